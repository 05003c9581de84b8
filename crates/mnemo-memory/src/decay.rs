use mnemo_config::MemoryConfig;
use mnemo_core::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

use crate::store::MemoryStore;

/// What a call to [`DecayEngine::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ran { decremented: usize },
    /// This turn (or a later one) was already decayed.
    AlreadyRan,
    /// Another tick was in progress; this one is dropped, not queued.
    Skipped,
}

struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Lowers `recall_count` on memories nobody has touched since the last tick.
///
/// Driven by the conversation-turn counter rather than a timer. Never
/// deletes, and never touches content, embeddings or permanent records.
pub struct DecayEngine {
    store: Arc<MemoryStore>,
    running: AtomicBool,
}

impl DecayEngine {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            running: AtomicBool::new(false),
        }
    }

    /// Tick if `turn` falls on the configured cadence.
    pub fn maybe_tick(&self, turn: u64, cfg: &MemoryConfig) -> Result<Option<TickOutcome>> {
        if cfg.decay_interval == 0 || turn == 0 || turn % cfg.decay_interval != 0 {
            return Ok(None);
        }
        self.tick(turn, cfg).map(Some)
    }

    /// Decay once for `turn`. Repeating a turn is a no-op.
    pub fn tick(&self, turn: u64, cfg: &MemoryConfig) -> Result<TickOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!(turn, "decay tick already running, skipping");
            return Ok(TickOutcome::Skipped);
        }
        let _running = Running(&self.running);

        if self.store.last_decay_turn()?.is_some_and(|last| turn <= last) {
            debug!(turn, "decay already ran for this turn");
            return Ok(TickOutcome::AlreadyRan);
        }

        let candidates = self.store.decay_candidates(cfg.decay_floor);
        let mut decremented = 0;
        for batch in candidates.chunks(cfg.decay_batch_size.max(1)) {
            decremented += self
                .store
                .decay_batch(batch, cfg.decay_amount, cfg.decay_floor)?;
        }
        let epoch = self.store.finish_tick(turn)?;

        info!(turn, decremented, epoch, "decay tick");
        Ok(TickOutcome::Ran { decremented })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NewRecord;

    #[test]
    fn test_cadence() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let decay = DecayEngine::new(store);
        let cfg = MemoryConfig {
            decay_interval: 10,
            ..Default::default()
        };
        assert_eq!(decay.maybe_tick(9, &cfg).unwrap(), None);
        assert!(matches!(
            decay.maybe_tick(10, &cfg).unwrap(),
            Some(TickOutcome::Ran { .. })
        ));
    }

    #[test]
    fn test_overlapping_tick_skipped() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        let decay = DecayEngine::new(store);
        decay.running.store(true, Ordering::Release);
        assert_eq!(
            decay.tick(50, &MemoryConfig::default()).unwrap(),
            TickOutcome::Skipped
        );
    }

    #[test]
    fn test_small_batches_cover_everything() {
        let store = Arc::new(MemoryStore::open_in_memory().unwrap());
        for i in 0..7 {
            let angle = i as f32 * 0.2;
            store
                .insert(NewRecord::new(format!("memory {i}"), vec![angle.cos(), angle.sin()]))
                .unwrap();
        }
        let decay = DecayEngine::new(Arc::clone(&store));
        let cfg = MemoryConfig {
            decay_batch_size: 2,
            ..Default::default()
        };
        assert_eq!(decay.tick(1, &cfg).unwrap(), TickOutcome::Ran { decremented: 7 });
        assert!(!decay.is_running());
    }
}
