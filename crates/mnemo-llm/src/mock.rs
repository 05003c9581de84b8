//! Deterministic provider doubles for testing.
//!
//! Neither mock makes HTTP calls. Both record what they were asked so tests
//! can assert that a call did (or did not) happen.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::judge::{Judge, Judgment};
use mnemo_core::{MnemoError, Result, Turn};

/// An embedding provider with scripted vectors.
///
/// Texts registered with [`MockEmbedding::with_vector`] map to exactly that
/// vector. Anything else gets a normalized bag-of-words hash, so identical
/// texts always embed identically.
///
/// # Example
/// ```
/// use mnemo_llm::mock::MockEmbedding;
/// let embedder = MockEmbedding::new(3)
///     .with_vector("I have a dog", vec![1.0, 0.0, 0.0]);
/// ```
pub struct MockEmbedding {
    dims: usize,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    errors: Mutex<VecDeque<MnemoError>>,
    /// Every text embedded so far, in call order.
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockEmbedding {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: Mutex::new(HashMap::new()),
            errors: Mutex::new(VecDeque::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Script the vector returned for `text`.
    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.lock().insert(text.to_string(), vector);
        self
    }

    /// Queue an error; queued errors are returned before any vector.
    pub fn with_error(self, err: MnemoError) -> Self {
        self.errors.lock().push_back(err);
        self
    }

    /// Script a vector after construction.
    pub fn set_vector(&self, text: &str, vector: Vec<f32>) {
        self.vectors.lock().insert(text.to_string(), vector);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims.max(1)];
        for word in text.to_lowercase().split_whitespace() {
            let mut h: u64 = 0xcbf2_9ce4_8422_2325;
            for b in word.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
            let len = v.len() as u64;
            v[(h % len) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            self.calls.lock().push(text.to_string());
            if let Some(err) = self.errors.lock().pop_front() {
                return Err(err);
            }
            let scripted = self.vectors.lock().get(*text).cloned();
            out.push(scripted.unwrap_or_else(|| self.hashed(text)));
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// A judge that replays queued verdicts.
///
/// With nothing queued it accepts every candidate verbatim as a `fact` of
/// importance 0.5.
pub struct MockJudge {
    responses: Mutex<VecDeque<Result<Judgment>>>,
    /// Every candidate judged so far, in call order.
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl Default for MockJudge {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJudge {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a STORE verdict.
    pub fn with_store(self, category: &str, importance: f32, content: &str) -> Self {
        self.responses
            .lock()
            .push_back(Ok(Judgment::store(category, importance, content)));
        self
    }

    /// Queue a SKIP verdict.
    pub fn with_skip(self) -> Self {
        self.responses.lock().push_back(Ok(Judgment::skip()));
        self
    }

    /// Queue a provider failure.
    pub fn with_error(self, err: MnemoError) -> Self {
        self.responses.lock().push_back(Err(err));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Judge for MockJudge {
    async fn judge(&self, candidate: &str, _context: &[Turn]) -> Result<Judgment> {
        self.calls.lock().push(candidate.to_string());
        match self.responses.lock().pop_front() {
            Some(resp) => resp,
            None => Ok(Judgment::store("fact", 0.5, candidate)),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
