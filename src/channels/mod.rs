//! Inbound channel plumbing: per-conversation debouncing, the typing gate,
//! and the registry of in-flight agent runs that typing can interrupt.

pub mod debounce;
pub mod traits;
pub mod typing;

pub use debounce::{DebouncedBatch, InboundDebouncer};
pub use traits::{ChannelMessage, InboundEvent};
pub use typing::TypingGate;

use crate::config::{IMessageAccountConfig, IMessageConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Debounce key for a conversation on an account.
pub fn conversation_key(account: &str, chat: &str) -> String {
    format!("{account}:{chat}")
}

// ── In-flight runs ────────────────────────────────────────────────

struct InFlightRunState {
    run_id: u64,
    cancellation: CancellationToken,
}

/// Handle for one registered run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub key: String,
    pub run_id: u64,
    pub cancellation: CancellationToken,
}

/// Agent runs in progress, at most one per conversation.
#[derive(Clone, Default)]
pub struct InFlightRuns {
    active: Arc<Mutex<HashMap<String, InFlightRunState>>>,
    sequence: Arc<AtomicU64>,
}

impl InFlightRuns {
    /// Register a run for `key`, interrupting any run already registered there.
    pub fn begin(&self, key: &str) -> RunHandle {
        let run_id = self.sequence.fetch_add(1, Ordering::Relaxed);
        let cancellation = CancellationToken::new();
        let previous = self.active.lock().insert(
            key.to_string(),
            InFlightRunState {
                run_id,
                cancellation: cancellation.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::info!(key, "Interrupting previous in-flight run for conversation");
            previous.cancellation.cancel();
        }
        RunHandle {
            key: key.to_string(),
            run_id,
            cancellation,
        }
    }

    /// Deregister a finished run. A newer run under the same key is left alone.
    pub fn finish(&self, handle: &RunHandle) {
        let mut active = self.active.lock();
        if active
            .get(&handle.key)
            .is_some_and(|state| state.run_id == handle.run_id)
        {
            active.remove(&handle.key);
        }
    }

    /// Cancel and deregister the run for `key`. Returns whether one existed.
    pub fn abort(&self, key: &str) -> bool {
        let removed = self.active.lock().remove(key);
        match removed {
            Some(state) => {
                tracing::info!(key, "Aborting in-flight run");
                state.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.active.lock().contains_key(key)
    }
}

// ── Routing ───────────────────────────────────────────────────────

/// Debouncer configured from an account's settings.
pub fn account_debouncer<T: Send + 'static>(
    config: &IMessageAccountConfig,
    flush_tx: mpsc::Sender<DebouncedBatch<T>>,
) -> InboundDebouncer<T> {
    let pause_timeout = if config.typing_gate {
        Duration::from_millis(config.typing_timeout_ms)
    } else {
        Duration::ZERO
    };
    InboundDebouncer::new(Duration::from_millis(config.debounce_ms), pause_timeout, flush_tx)
}

/// Feeds inbound events into per-account typing gates.
pub struct InboundRouter {
    accounts: IMessageConfig,
    gates: HashMap<String, TypingGate<ChannelMessage>>,
    runs: InFlightRuns,
    flush_tx: mpsc::Sender<DebouncedBatch<ChannelMessage>>,
}

impl InboundRouter {
    pub fn new(
        accounts: IMessageConfig,
        runs: InFlightRuns,
        flush_tx: mpsc::Sender<DebouncedBatch<ChannelMessage>>,
    ) -> Self {
        Self {
            accounts,
            gates: HashMap::new(),
            runs,
            flush_tx,
        }
    }

    fn gate(&mut self, account: &str) -> &TypingGate<ChannelMessage> {
        let Self {
            accounts,
            gates,
            runs,
            flush_tx,
        } = self;
        gates.entry(account.to_string()).or_insert_with(|| {
            let config = accounts.account(account);
            TypingGate::new(
                account,
                &config,
                account_debouncer(&config, flush_tx.clone()),
                runs.clone(),
            )
        })
    }

    pub fn handle(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Message(message) => {
                let key = message.conversation_key();
                self.gate(&message.account).debouncer().push(&key, message);
            }
            InboundEvent::TypingStarted { account, chat } => {
                self.gate(&account).on_typing_started(&chat);
            }
            InboundEvent::TypingStopped { account, chat } => {
                self.gate(&account).on_typing_stopped(&chat);
            }
        }
    }

    /// Route events until the sending side closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        tracing::debug!("Inbound event stream closed");
    }
}
