use mnemo_config::MemoryConfig;
use mnemo_core::{MnemoError, OwnerId, Result, Role, Turn};
use mnemo_llm::{Judge, normalize_importance};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::record::Category;

/// Greetings, acknowledgements and other turns that carry no information.
const PHATIC: &[&str] = &[
    "ok", "oke", "okay", "thanks", "thank you", "terima kasih", "makasih", "hi", "halo", "hello",
    "hey", "lanjut", "next", "yes", "no", "ya", "tidak", "gak", "nggak", "yep", "nope", "good",
    "nice", "cool", "bagus", "sip",
];

const QUESTION_WORDS: &[&str] = &[
    "apa", "what", "how", "gimana", "kapan", "when", "where", "dimana", "siapa", "who", "kenapa",
    "why",
];

/// Questions shorter than this are assumed to carry no statement.
const SHORT_QUESTION_CHARS: usize = 30;

/// Why a candidate was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotUserAuthored,
    TooShort,
    Phatic,
    Interrogative,
    Repeat,
    JudgedNotUseful,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::NotUserAuthored => "not user authored",
            RejectReason::TooShort => "too short",
            RejectReason::Phatic => "phatic",
            RejectReason::Interrogative => "interrogative",
            RejectReason::Repeat => "repeat of previous candidate",
            RejectReason::JudgedNotUseful => "judged not useful",
        };
        f.write_str(s)
    }
}

/// The gate's decision on one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub store: bool,
    /// Normalized restatement; empty when rejected.
    pub content: String,
    pub category: Category,
    pub importance: f32,
    pub reason: Option<RejectReason>,
}

impl Verdict {
    pub fn reject(reason: RejectReason) -> Self {
        Self {
            store: false,
            content: String::new(),
            category: Category::Fact,
            importance: 0.0,
            reason: Some(reason),
        }
    }
}

/// Two-layer filter deciding whether a candidate is worth remembering.
///
/// Layer one is local and deterministic. Layer two asks the [`Judge`] and
/// is only reached by end-user statements that survived layer one.
pub struct EvaluatorGate {
    judge: Arc<dyn Judge>,
    /// Last screened candidate per owner, for repeat detection.
    last: Mutex<HashMap<Option<OwnerId>, String>>,
}

impl EvaluatorGate {
    pub fn new(judge: Arc<dyn Judge>) -> Self {
        Self {
            judge,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Full evaluation: [`screen`](Self::screen), then one judgment call.
    ///
    /// A judge failure is returned as-is; nothing is retried here.
    pub async fn evaluate(
        &self,
        candidate: &str,
        role: Role,
        owner: Option<&str>,
        context: &[Turn],
        cfg: &MemoryConfig,
    ) -> Result<Verdict> {
        if let Some(reason) = self.screen(candidate, role, owner, cfg)? {
            return Ok(Verdict::reject(reason));
        }
        self.judge_candidate(candidate, context, cfg).await
    }

    /// Layer one. `Ok(None)` means the candidate may go to the judge.
    ///
    /// Empty or oversized text is an `InvalidContent` error, not a rejection.
    pub fn screen(
        &self,
        candidate: &str,
        role: Role,
        owner: Option<&str>,
        cfg: &MemoryConfig,
    ) -> Result<Option<RejectReason>> {
        let text = candidate.trim();
        let chars = text.chars().count();
        if chars == 0 {
            return Err(MnemoError::InvalidContent("empty candidate".into()));
        }
        if chars > cfg.max_content_chars {
            return Err(MnemoError::InvalidContent(format!(
                "candidate is {} chars, limit is {}",
                chars, cfg.max_content_chars
            )));
        }

        if !role.is_end_user() {
            debug!(%role, "candidate rejected: not user authored");
            return Ok(Some(RejectReason::NotUserAuthored));
        }

        let previous = self
            .last
            .lock()
            .insert(owner.map(str::to_string), text.to_string());

        let reason = if chars < cfg.min_content_chars {
            Some(RejectReason::TooShort)
        } else if is_phatic(text) {
            Some(RejectReason::Phatic)
        } else if is_interrogative(text) {
            Some(RejectReason::Interrogative)
        } else if previous.as_deref() == Some(text) {
            Some(RejectReason::Repeat)
        } else {
            None
        };

        if let Some(r) = reason {
            debug!(reason = %r, "candidate rejected by layer one");
        }
        Ok(reason)
    }

    /// Layer two: a single, time-bounded judgment call.
    pub async fn judge_candidate(
        &self,
        candidate: &str,
        context: &[Turn],
        cfg: &MemoryConfig,
    ) -> Result<Verdict> {
        let timeout = cfg.provider_timeout();
        let judgment = tokio::time::timeout(timeout, self.judge.judge(candidate.trim(), context))
            .await
            .map_err(|_| {
                MnemoError::Timeout(format!(
                    "{} judge after {}s",
                    self.judge.name(),
                    timeout.as_secs()
                ))
            })??;

        if !judgment.store || judgment.content.trim().is_empty() {
            return Ok(Verdict::reject(RejectReason::JudgedNotUseful));
        }

        let mut content = judgment.content.trim().to_string();
        if content.chars().count() > cfg.max_content_chars {
            content = content.chars().take(cfg.max_content_chars).collect();
        }
        Ok(Verdict {
            store: true,
            content,
            category: Category::parse(&judgment.category),
            importance: normalize_importance(judgment.importance),
            reason: None,
        })
    }
}

fn normalize(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase()
}

fn is_phatic(text: &str) -> bool {
    let n = normalize(text);
    PHATIC.contains(&n.as_str())
}

fn is_interrogative(text: &str) -> bool {
    let short = text.chars().count() < SHORT_QUESTION_CHARS;
    if !short {
        return false;
    }
    if text.trim_end().ends_with('?') {
        return true;
    }
    let lower = text.to_lowercase();
    let first = lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");
    QUESTION_WORDS.contains(&first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_llm::MockJudge;

    fn gate() -> (EvaluatorGate, Arc<MockJudge>) {
        let judge = Arc::new(MockJudge::new());
        (EvaluatorGate::new(judge.clone()), judge)
    }

    #[test]
    fn test_phatic_variants() {
        assert!(is_phatic("Thanks!"));
        assert!(is_phatic("  ok. "));
        assert!(is_phatic("terima kasih"));
        assert!(!is_phatic("thanks for fixing my laptop yesterday"));
    }

    #[test]
    fn test_interrogative_detection() {
        assert!(is_interrogative("what time is it"));
        assert!(is_interrogative("is it raining?"));
        assert!(is_interrogative("Gimana caranya"));
        assert!(!is_interrogative("I moved to Bandung last month"));
        assert!(!is_interrogative(
            "why I left my job is a long story about my manager"
        ));
    }

    #[test]
    fn test_screen_order() {
        let (gate, _) = gate();
        let cfg = MemoryConfig::default();
        assert_eq!(
            gate.screen("I have a dog", Role::Assistant, None, &cfg).unwrap(),
            Some(RejectReason::NotUserAuthored)
        );
        assert_eq!(
            gate.screen("hey", Role::User, None, &cfg).unwrap(),
            Some(RejectReason::TooShort)
        );
        assert_eq!(
            gate.screen("hello", Role::User, None, &cfg).unwrap(),
            Some(RejectReason::Phatic)
        );
        assert_eq!(gate.screen("I have a dog", Role::User, None, &cfg).unwrap(), None);
        assert_eq!(
            gate.screen("I have a dog", Role::User, None, &cfg).unwrap(),
            Some(RejectReason::Repeat)
        );
    }

    #[test]
    fn test_repeat_is_per_owner() {
        let (gate, _) = gate();
        let cfg = MemoryConfig::default();
        assert_eq!(gate.screen("I have a dog", Role::User, Some("a"), &cfg).unwrap(), None);
        assert_eq!(gate.screen("I have a dog", Role::User, Some("b"), &cfg).unwrap(), None);
    }

    #[test]
    fn test_invalid_content() {
        let (gate, _) = gate();
        let cfg = MemoryConfig::default();
        assert!(matches!(
            gate.screen("   ", Role::User, None, &cfg),
            Err(MnemoError::InvalidContent(_))
        ));
        let long = "a".repeat(cfg.max_content_chars + 1);
        assert!(matches!(
            gate.screen(&long, Role::User, None, &cfg),
            Err(MnemoError::InvalidContent(_))
        ));
    }

    #[tokio::test]
    async fn test_layer_one_never_calls_judge() {
        let (gate, judge) = gate();
        let cfg = MemoryConfig::default();
        let v = gate
            .evaluate("thank you", Role::User, None, &[], &cfg)
            .await
            .unwrap();
        assert_eq!(v.reason, Some(RejectReason::Phatic));
        let v = gate
            .evaluate("I have a dog named Rex", Role::Assistant, None, &[], &cfg)
            .await
            .unwrap();
        assert_eq!(v.reason, Some(RejectReason::NotUserAuthored));
        assert_eq!(judge.call_count(), 0);
    }

    #[tokio::test]
    async fn test_judge_verdict_mapped() {
        let judge = Arc::new(MockJudge::new().with_store("Health", 1.4, "User is allergic to penicillin"));
        let gate = EvaluatorGate::new(judge);
        let v = gate
            .evaluate("I'm allergic to penicillin", Role::User, None, &[], &MemoryConfig::default())
            .await
            .unwrap();
        assert!(v.store);
        assert_eq!(v.category, Category::Health);
        assert_eq!(v.importance, 1.0);
        assert_eq!(v.content, "User is allergic to penicillin");
    }
}
