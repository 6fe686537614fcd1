pub mod schema;

#[allow(unused_imports)]
pub use schema::{
    AgentConfig, ChannelsConfig, Config, IMessageAccountConfig, IMessageConfig, ProviderCompatConfig,
    ProviderConfig, SubagentPromptMode, API_KEY_ENV, CONFIG_DIR_ENV,
};
