#[cfg(test)]
mod tests {
    use mnemo_config::schema::*;
    use mnemo_config::ConfigLoader;
    use std::io::Write;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_memory_config_defaults() {
        let config = MemoryConfig::default();
        assert_eq!(config.insert_threshold, 0.70);
        assert_eq!(config.update_threshold, 0.85);
        assert_eq!(config.recall_limit, 5);
        assert_eq!(config.decay_interval, 50);
        assert_eq!(config.decay_amount, 1);
        assert_eq!(config.initial_recall_count, 1);
        assert_eq!(config.decay_floor, 0);
        assert_eq!(config.capture_max_retries, 3);
        assert_eq!(config.capture_retry_base().as_millis(), 2000);
    }

    #[test]
    fn test_embedding_config_defaults() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.dimensions, 768);
        assert_eq!(config.identity(), "ollama/nomic-embed-text");
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, "pretty");
    }

    #[test]
    fn test_defaults_validate_cleanly() {
        let warnings = MnemoConfig::default().validate().unwrap();
        assert!(warnings.iter().all(|w| w.severity != WarningSeverity::Error));
    }

    // ── Validation ─────────────────────────────────────────────

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = MnemoConfig::default();
        config.memory.insert_threshold = 0.9;
        config.memory.update_threshold = 0.8;
        let err = config.validate().unwrap_err();
        assert!(err.contains("memory.insert_threshold"));
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let mut config = MnemoConfig::default();
        config.memory.update_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_recall_limit_rejected() {
        let mut config = MnemoConfig::default();
        config.memory.recall_limit = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("memory.recall_limit"));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let mut config = MnemoConfig::default();
        config.embedding.dimensions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider_is_only_a_warning() {
        let mut config = MnemoConfig::default();
        config.embedding.provider = "cohere".into();
        let warnings = config.validate().unwrap();
        assert!(warnings.iter().any(|w| w.field == "embedding.provider"));
    }

    #[test]
    fn test_warning_display() {
        let w = ConfigWarning {
            field: "logging.format".into(),
            message: "unknown log format 'xml'".into(),
            severity: WarningSeverity::Warning,
            hint: Some("Valid values: pretty, json, compact".into()),
        };
        let s = w.to_string();
        assert!(s.starts_with("warning logging.format"));
        assert!(s.contains("Valid values"));
    }

    // ── TOML roundtrip tests ───────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = MnemoConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: MnemoConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.memory.update_threshold, config.memory.update_threshold);
        assert_eq!(restored.embedding.model, config.embedding.model);
        assert_eq!(restored.evaluator.max_tokens, config.evaluator.max_tokens);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[memory]
update_threshold = 0.9
decay_interval = 10

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dimensions = 1536
"#;
        let config: MnemoConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.memory.update_threshold, 0.9);
        assert_eq!(config.memory.decay_interval, 10);
        assert_eq!(config.embedding.dimensions, 1536);
        // Defaults should fill in
        assert_eq!(config.memory.insert_threshold, 0.70);
        assert_eq!(config.memory.recall_limit, 5);
        assert_eq!(config.logging.format, "pretty");
    }

    // ── ConfigLoader tests ─────────────────────────────────────

    #[test]
    fn test_config_loader_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mnemo.toml");
        let mut f = std::fs::File::create(&config_path).unwrap();
        writeln!(
            f,
            r#"
[memory]
recall_limit = 8
decay_amount = 2

[logging]
format = "json"
"#
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        let config = loader.get();
        assert_eq!(config.memory.recall_limit, 8);
        assert_eq!(config.memory.decay_amount, 2);
        assert_eq!(config.logging.format, "json");
        assert_eq!(loader.path(), config_path.as_path());
    }

    #[test]
    fn test_config_loader_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mnemo.toml");
        std::fs::write(
            &config_path,
            r#"
[memory]
insert_threshold = 0.95
update_threshold = 0.85
"#,
        )
        .unwrap();

        let result = ConfigLoader::load(Some(config_path.as_path()));
        assert!(matches!(result, Err(mnemo_core::MnemoError::Config(_))));
    }

    #[test]
    fn test_config_loader_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("absent.toml");
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().memory.update_threshold, 0.85);
    }

    #[test]
    fn test_config_loader_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mnemo.toml");

        std::fs::write(
            &config_path,
            r#"
[memory]
recall_limit = 3
"#,
        )
        .unwrap();

        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();
        assert_eq!(loader.get().memory.recall_limit, 3);

        std::fs::write(
            &config_path,
            r#"
[memory]
recall_limit = 12
"#,
        )
        .unwrap();

        loader.reload().unwrap();
        assert_eq!(loader.get().memory.recall_limit, 12);
    }

    #[test]
    fn test_reload_keeps_config_when_new_file_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("mnemo.toml");
        std::fs::write(&config_path, "[memory]\nrecall_limit = 3\n").unwrap();
        let loader = ConfigLoader::load(Some(config_path.as_path())).unwrap();

        std::fs::write(&config_path, "[memory]\nrecall_limit = 0\n").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().memory.recall_limit, 3);
    }

    // ── JSON roundtrip ─────────────────────────────────────────

    #[test]
    fn test_config_json_roundtrip() {
        let config = MnemoConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let restored: MnemoConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.evaluator.model, config.evaluator.model);
    }
}
