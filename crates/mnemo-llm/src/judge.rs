use async_trait::async_trait;
use mnemo_core::{MnemoError, Result, Role, Turn};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::{http_error, transport_error};

/// The evaluator model's verdict on one candidate statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    /// Whether the statement is durably worth remembering.
    pub store: bool,
    /// Normalized restatement of the candidate.
    pub content: String,
    /// Category guess, lowercase ("fact", "preference", ...).
    pub category: String,
    /// Importance estimate in [0, 1].
    pub importance: f32,
}

impl Judgment {
    pub fn skip() -> Self {
        Self {
            store: false,
            content: String::new(),
            category: String::new(),
            importance: 0.0,
        }
    }

    pub fn store(category: &str, importance: f32, content: &str) -> Self {
        Self {
            store: true,
            content: content.trim().to_string(),
            category: category.trim().to_lowercase(),
            importance: normalize_importance(importance),
        }
    }
}

/// Clamp to [0, 1]. Non-finite estimates fall back to 0.5.
pub fn normalize_importance(importance: f32) -> f32 {
    if importance.is_finite() {
        importance.clamp(0.0, 1.0)
    } else {
        0.5
    }
}

/// Layer-two judgment call of the evaluator gate.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Decide whether `candidate` is worth persisting, given the recent conversation.
    async fn judge(&self, candidate: &str, context: &[Turn]) -> Result<Judgment>;

    /// Backend name, for logs.
    fn name(&self) -> &str;
}

pub const JUDGE_PROMPT: &str = r#"You decide whether a message from the user contains something worth keeping in long-term memory.

Keep statements about the user that stay true for a while:
- personal facts (name, job, home, family, pets)
- preferences, likes and dislikes, habits
- notable events and milestones
- decisions and commitments
- lessons learned
- health information
- relationships
- technical setup and configuration they rely on

Do not keep:
- greetings, thanks and other small talk
- questions that carry no new information
- transient status ("heading out for lunch")
- anything the assistant said that the user did not confirm
- instructions addressed to the assistant
- general knowledge and vague statements

If the message corrects something stated earlier (e.g. "I moved to Bandung" after "I live in Jakarta"), restate only the newest fact. The store merges it with the old one.

Answer with exactly one line, nothing else:
SKIP
or
STORE|category|importance|content

category: fact, preference, event, decision, lesson, health, relationship, config
importance: 0.3 (minor) to 0.9 (critical)
content: a short third-person restatement, e.g. "User has a dog named Rex"

Examples:
"I'm allergic to penicillin" -> STORE|health|0.8|User is allergic to penicillin
"thanks!" -> SKIP
"I like my coffee black" -> STORE|preference|0.5|User drinks coffee black
"can you check the weather?" -> SKIP
"I moved to Bandung last month" -> STORE|fact|0.7|User moved to and now lives in Bandung"#;

/// Parse the one-line judgment protocol.
///
/// Returns `None` when no line follows the protocol. Reasoning models may
/// emit preamble text, so the first protocol-shaped line wins.
pub fn parse_judgment(raw: &str) -> Option<Judgment> {
    for line in raw.lines().map(str::trim) {
        if line.starts_with("SKIP") {
            return Some(Judgment::skip());
        }
        if let Some(rest) = line.strip_prefix("STORE|") {
            let parts: Vec<&str> = rest.splitn(3, '|').collect();
            if parts.len() != 3 {
                return None;
            }
            let content = parts[2].trim();
            if content.is_empty() {
                return None;
            }
            let importance = parts[1]
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .unwrap_or(0.5);
            return Some(Judgment::store(parts[0], importance, content));
        }
    }
    None
}

/// Judge backed by any OpenAI-compatible `/chat/completions` endpoint
/// (OpenAI itself, or Ollama's compatibility API).
pub struct ChatJudge {
    client: reqwest::Client,
    name: String,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    /// How many preceding turns are shown to the model.
    context_turns: usize,
}

impl ChatJudge {
    /// Judge against OpenAI's API.
    pub fn openai(api_key: String, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: "openai".into(),
            api_key: Some(api_key),
            base_url: "https://api.openai.com/v1".into(),
            model: model.to_string(),
            temperature: 0.1,
            max_tokens: 150,
            context_turns: 4,
        }
    }

    /// Judge against a local Ollama server.
    pub fn ollama(model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: "ollama".into(),
            api_key: None,
            base_url: "http://127.0.0.1:11434/v1".into(),
            model: model.to_string(),
            temperature: 0.1,
            max_tokens: 150,
            context_turns: 4,
        }
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn build_messages(&self, candidate: &str, context: &[Turn]) -> Vec<serde_json::Value> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": JUDGE_PROMPT,
        })];

        let start = context.len().saturating_sub(self.context_turns);
        let recent: Vec<String> = context[start..]
            .iter()
            .filter(|t| matches!(t.role, Role::User | Role::Assistant))
            .map(|t| format!("{}: {}", t.role, t.text))
            .collect();

        let mut prompt = String::new();
        if !recent.is_empty() {
            prompt.push_str("Recent conversation:\n");
            prompt.push_str(&recent.join("\n"));
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!("User message: \"{candidate}\""));

        messages.push(serde_json::json!({
            "role": "user",
            "content": prompt,
        }));
        messages
    }
}

#[async_trait]
impl Judge for ChatJudge {
    async fn judge(&self, candidate: &str, context: &[Turn]) -> Result<Judgment> {
        debug!(backend = %self.name, model = %self.model, "judging memory candidate");

        let body = serde_json::json!({
            "model": &self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": self.build_messages(candidate, context),
        });

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.map_err(|e| transport_error(&self.name, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(http_error(&self.name, status, &text));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| MnemoError::Provider(format!("{}: judge parse error: {}", self.name, e)))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");

        match parse_judgment(content) {
            Some(judgment) => Ok(judgment),
            None => {
                warn!(backend = %self.name, response = %content, "unexpected judge response, skipping");
                Ok(Judgment::skip())
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_store_line() {
        let j = parse_judgment("STORE|Fact|0.7|User's name is Riyo").unwrap();
        assert!(j.store);
        assert_eq!(j.category, "fact");
        assert_eq!(j.importance, 0.7);
        assert_eq!(j.content, "User's name is Riyo");
    }

    #[test]
    fn test_parse_skip_line() {
        let j = parse_judgment("SKIP").unwrap();
        assert!(!j.store);
    }

    #[test]
    fn test_importance_clamped() {
        let j = parse_judgment("STORE|health|1.7|User is diabetic").unwrap();
        assert_eq!(j.importance, 1.0);
        let j = parse_judgment("STORE|health|-2|User is diabetic").unwrap();
        assert_eq!(j.importance, 0.0);
    }

    #[test]
    fn test_unparseable_importance_defaults() {
        let j = parse_judgment("STORE|fact|high|User owns a boat").unwrap();
        assert_eq!(j.importance, 0.5);
    }

    #[test]
    fn test_non_finite_importance_defaults() {
        for raw in ["nan", "NaN", "inf", "-inf"] {
            let j = parse_judgment(&format!("STORE|fact|{raw}|User has a dog")).unwrap();
            assert_eq!(j.importance, 0.5, "importance {raw}");
        }
        assert_eq!(Judgment::store("fact", f32::NAN, "User has a dog").importance, 0.5);
        assert_eq!(normalize_importance(f32::INFINITY), 0.5);
    }

    #[test]
    fn test_content_may_contain_pipes() {
        let j = parse_judgment("STORE|config|0.4|Shell alias ll = ls -la | less").unwrap();
        assert_eq!(j.content, "Shell alias ll = ls -la | less");
    }

    #[test]
    fn test_preamble_is_skipped() {
        let raw = "<think>the user states a fact</think>\nSTORE|fact|0.6|User has a dog";
        let j = parse_judgment(raw).unwrap();
        assert_eq!(j.content, "User has a dog");
    }

    #[test]
    fn test_malformed_is_none() {
        assert!(parse_judgment("I think this should be stored").is_none());
        assert!(parse_judgment("STORE|fact|0.5").is_none());
        assert!(parse_judgment("STORE|fact|0.5|   ").is_none());
    }

    #[test]
    fn test_context_window_trimmed() {
        let judge = ChatJudge::ollama("tiny");
        let context: Vec<Turn> = (0..10).map(|i| Turn::user(format!("turn {i}"))).collect();
        let messages = judge.build_messages("I have a cat", &context);
        let prompt = messages[1]["content"].as_str().unwrap();
        assert!(prompt.contains("turn 9"));
        assert!(!prompt.contains("turn 5"));
        assert!(prompt.ends_with("User message: \"I have a cat\""));
    }
}
