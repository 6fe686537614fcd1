//! Per-key inbound debouncer.
//!
//! Messages pushed under the same key are buffered until the key has been
//! quiet for the debounce window, then delivered as one batch. A key can be
//! paused: it keeps buffering but no flush is scheduled until it is resumed,
//! either explicitly or by the pause timeout.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Items buffered under one key, delivered together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebouncedBatch<T> {
    pub key: String,
    pub items: Vec<T>,
}

struct KeyState<T> {
    items: Vec<T>,
    /// Bumped on every change; a scheduled flush only fires if it still matches.
    generation: u64,
    paused: bool,
    /// Bumped on every pause; a pause timeout only fires if it still matches.
    pause_generation: u64,
}

impl<T> KeyState<T> {
    fn new() -> Self {
        Self {
            items: Vec::new(),
            generation: 0,
            paused: false,
            pause_generation: 0,
        }
    }
}

struct Shared<T> {
    keys: Mutex<HashMap<String, KeyState<T>>>,
    window: Duration,
    pause_timeout: Duration,
    flush_tx: mpsc::Sender<DebouncedBatch<T>>,
}

enum Resume {
    NotPaused,
    Drained,
    Reschedule(u64),
}

impl<T: Send + 'static> Shared<T> {
    fn schedule_flush(self: &Arc<Self>, key: String, generation: u64) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.window).await;
            let batch = {
                let mut keys = shared.keys.lock();
                let due = keys
                    .get(&key)
                    .is_some_and(|entry| entry.generation == generation && !entry.paused);
                if due {
                    keys.remove(&key).map(|entry| entry.items)
                } else {
                    None
                }
            };
            if let Some(items) = batch.filter(|items| !items.is_empty()) {
                if shared
                    .flush_tx
                    .send(DebouncedBatch { key, items })
                    .await
                    .is_err()
                {
                    tracing::warn!("Debounce flush receiver dropped");
                }
            }
        });
    }

    fn schedule_pause_timeout(self: &Arc<Self>, key: String, pause_generation: u64) {
        if self.pause_timeout.is_zero() {
            return;
        }
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(shared.pause_timeout).await;
            let expired = shared.keys.lock().get(&key).is_some_and(|entry| {
                entry.paused && entry.pause_generation == pause_generation
            });
            if expired {
                tracing::info!(key = %key, "Typing pause timed out, resuming debounce");
                shared.resume(&key);
            }
        });
    }

    fn resume(self: &Arc<Self>, key: &str) -> bool {
        let outcome = {
            let mut keys = self.keys.lock();
            match keys.get_mut(key) {
                Some(entry) if entry.paused => {
                    entry.paused = false;
                    if entry.items.is_empty() {
                        keys.remove(key);
                        Resume::Drained
                    } else {
                        entry.generation += 1;
                        Resume::Reschedule(entry.generation)
                    }
                }
                _ => Resume::NotPaused,
            }
        };

        match outcome {
            Resume::NotPaused => false,
            Resume::Drained => true,
            Resume::Reschedule(generation) => {
                self.schedule_flush(key.to_string(), generation);
                true
            }
        }
    }
}

/// Keyed debouncer delivering batches on an mpsc channel.
pub struct InboundDebouncer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for InboundDebouncer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> InboundDebouncer<T> {
    /// `pause_timeout` of zero disables automatic resume.
    pub fn new(
        window: Duration,
        pause_timeout: Duration,
        flush_tx: mpsc::Sender<DebouncedBatch<T>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                keys: Mutex::new(HashMap::new()),
                window,
                pause_timeout,
                flush_tx,
            }),
        }
    }

    /// Buffer an item and restart the key's quiet window.
    pub fn push(&self, key: &str, item: T) {
        let generation = {
            let mut keys = self.shared.keys.lock();
            let entry = keys.entry(key.to_string()).or_insert_with(KeyState::new);
            entry.items.push(item);
            entry.generation += 1;
            (!entry.paused).then_some(entry.generation)
        };
        if let Some(generation) = generation {
            self.shared.schedule_flush(key.to_string(), generation);
        }
    }

    /// Stop scheduling flushes for `key`. Pending and future items stay
    /// buffered. Pausing again restarts the pause timeout.
    pub fn pause(&self, key: &str) {
        let pause_generation = {
            let mut keys = self.shared.keys.lock();
            let entry = keys.entry(key.to_string()).or_insert_with(KeyState::new);
            entry.paused = true;
            entry.generation += 1;
            entry.pause_generation += 1;
            entry.pause_generation
        };
        tracing::debug!(key, "Debounce paused");
        self.shared
            .schedule_pause_timeout(key.to_string(), pause_generation);
    }

    /// Unpause `key` and schedule a flush for whatever it buffered.
    pub fn resume(&self, key: &str) -> bool {
        self.shared.resume(key)
    }

    /// Resume every paused key accepted by `predicate`. Returns how many were resumed.
    pub fn resume_matching<F>(&self, predicate: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let paused: Vec<String> = self
            .shared
            .keys
            .lock()
            .iter()
            .filter(|(key, entry)| entry.paused && predicate(key))
            .map(|(key, _)| key.clone())
            .collect();

        paused.iter().filter(|key| self.shared.resume(key)).count()
    }

    pub fn is_paused(&self, key: &str) -> bool {
        self.shared
            .keys
            .lock()
            .get(key)
            .is_some_and(|entry| entry.paused)
    }

    pub fn pending(&self, key: &str) -> usize {
        self.shared
            .keys
            .lock()
            .get(key)
            .map_or(0, |entry| entry.items.len())
    }
}
