/// A message received from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: String,
    /// Channel account the message arrived on.
    pub account: String,
    /// Conversation (chat) identifier within the account.
    pub chat: String,
    pub sender: String,
    pub content: String,
    pub timestamp: u64,
}

impl ChannelMessage {
    pub fn conversation_key(&self) -> String {
        super::conversation_key(&self.account, &self.chat)
    }
}

/// Inbound events a channel integration forwards to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(ChannelMessage),
    TypingStarted { account: String, chat: String },
    TypingStopped { account: String, chat: String },
}
