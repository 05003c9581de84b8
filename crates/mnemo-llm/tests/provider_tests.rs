#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mnemo_config::{EmbeddingConfig, EvaluatorConfig, ServicesConfig};
    use mnemo_core::{MnemoError, Turn};
    use mnemo_llm::{
        build_embedding, build_judge, EmbeddingProvider, Judge, MockEmbedding, MockJudge,
        RetryPolicy,
    };

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    // ── Mock embedding ─────────────────────────────────────────

    #[tokio::test]
    async fn test_mock_embedding_scripted_vector() {
        let embedder = MockEmbedding::new(3).with_vector("I have a dog", vec![1.0, 0.0, 0.0]);
        let v = embedder.embed_one("I have a dog").await.unwrap();
        assert_eq!(v, vec![1.0, 0.0, 0.0]);
        assert_eq!(embedder.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_embedding_fallback_is_deterministic() {
        let embedder = MockEmbedding::new(64);
        let a = embedder.embed_one("User lives in Jakarta").await.unwrap();
        let b = embedder.embed_one("User lives in Jakarta").await.unwrap();
        assert_eq!(a.len(), 64);
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_embedding_queued_error_first() {
        let embedder = MockEmbedding::new(3).with_error(MnemoError::Timeout("slow".into()));
        assert!(matches!(
            embedder.embed_one("hello there").await,
            Err(MnemoError::Timeout(_))
        ));
        assert!(embedder.embed_one("hello there").await.is_ok());
    }

    #[tokio::test]
    async fn test_embed_one_rejects_wrong_dimension() {
        let embedder = MockEmbedding::new(3).with_vector("odd", vec![1.0, 0.0]);
        let err = embedder.embed_one("odd").await.unwrap_err();
        assert!(matches!(
            err,
            MnemoError::DimensionMismatch { expected: 3, actual: 2 }
        ));
        assert!(err.is_fatal());
    }

    // ── Mock judge ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_mock_judge_replays_queue_then_accepts() {
        let judge = MockJudge::new()
            .with_skip()
            .with_store("health", 0.8, "User is allergic to penicillin");
        let ctx = vec![Turn::user("hi")];

        assert!(!judge.judge("first", &ctx).await.unwrap().store);
        let j = judge.judge("second", &ctx).await.unwrap();
        assert_eq!(j.category, "health");
        assert_eq!(j.content, "User is allergic to penicillin");

        let j = judge.judge("User owns a bicycle", &ctx).await.unwrap();
        assert!(j.store);
        assert_eq!(j.content, "User owns a bicycle");
        assert_eq!(judge.call_count(), 3);
    }

    // ── Retry with mocks ───────────────────────────────────────

    #[tokio::test]
    async fn test_retry_recovers_from_rate_limit() {
        let judge = MockJudge::new()
            .with_error(MnemoError::RateLimited { retry_after_secs: 0 })
            .with_store("fact", 0.6, "User has a dog");
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let judge_ref = &judge;
        let j = policy
            .run("judge", move || async move { judge_ref.judge("I have a dog", &[]).await })
            .await
            .unwrap();
        assert!(j.store);
        assert_eq!(judge.call_count(), 2);
    }

    // ── Factory ────────────────────────────────────────────────

    #[test]
    fn test_factory_builds_mock_backends() {
        let cfg = EmbeddingConfig {
            provider: "mock".into(),
            dimensions: 16,
            ..Default::default()
        };
        let embedder = build_embedding(&cfg, &ServicesConfig::default()).unwrap();
        assert_eq!(embedder.dimensions(), 16);
        assert_eq!(embedder.name(), "mock");

        let ecfg = EvaluatorConfig {
            provider: "mock".into(),
            ..Default::default()
        };
        let judge = build_judge(&ecfg, &ServicesConfig::default()).unwrap();
        assert_eq!(judge.name(), "mock");
    }

    #[test]
    fn test_factory_ollama_default() {
        let embedder =
            build_embedding(&EmbeddingConfig::default(), &ServicesConfig::default()).unwrap();
        assert_eq!(embedder.name(), "ollama");
        assert_eq!(embedder.dimensions(), 768);
    }

    #[test]
    fn test_factory_openai_requires_key() {
        let cfg = EmbeddingConfig {
            provider: "openai".into(),
            ..Default::default()
        };
        let result = build_embedding(&cfg, &ServicesConfig::default());
        assert!(matches!(result, Err(MnemoError::Config(_))));

        let services = ServicesConfig {
            openai_api_key: Some("sk-test".into()),
        };
        assert!(build_embedding(&cfg, &services).is_ok());
    }

    #[test]
    fn test_factory_unknown_provider() {
        let cfg = EvaluatorConfig {
            provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(build_judge(&cfg, &ServicesConfig::default()).is_err());
    }
}
