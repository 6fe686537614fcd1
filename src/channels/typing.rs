//! Typing-aware gate over the inbound debouncer.
//!
//! While the remote user is typing, their conversation's debounce key is
//! paused so a half-finished thought is not answered, and any in-flight run
//! for the conversation is aborted because the reply it is preparing is about
//! to be stale. Typing-stop resumes the key; if the stop event is lost, the
//! debouncer's pause timeout resumes it instead.

use super::debounce::InboundDebouncer;
use super::{conversation_key, InFlightRuns};
use crate::config::IMessageAccountConfig;

pub struct TypingGate<T> {
    account: String,
    enabled: bool,
    debouncer: InboundDebouncer<T>,
    runs: InFlightRuns,
}

impl<T: Send + 'static> TypingGate<T> {
    pub fn new(
        account: impl Into<String>,
        config: &IMessageAccountConfig,
        debouncer: InboundDebouncer<T>,
        runs: InFlightRuns,
    ) -> Self {
        Self {
            account: account.into(),
            enabled: config.typing_gate,
            debouncer,
            runs,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn debouncer(&self) -> &InboundDebouncer<T> {
        &self.debouncer
    }

    /// Pause the conversation and abort its in-flight run. Returns whether a
    /// run was aborted.
    pub fn on_typing_started(&self, chat: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let key = conversation_key(&self.account, chat);
        self.debouncer.pause(&key);
        let aborted = self.runs.abort(&key);
        tracing::debug!(account = %self.account, chat, aborted, "Remote user started typing");
        aborted
    }

    /// Resume the conversation. Returns how many debounce keys were resumed.
    pub fn on_typing_stopped(&self, chat: &str) -> usize {
        if !self.enabled {
            return 0;
        }
        let key = conversation_key(&self.account, chat);
        let resumed = self.debouncer.resume_matching(|candidate| candidate == key);
        tracing::debug!(account = %self.account, chat, resumed, "Remote user stopped typing");
        resumed
    }
}
