//! Callbridge: Core library.
//! Agent profiles, the read-only agent store and the reasoning service shared by the voice core
//! and the gateway.

pub mod agent;
pub mod brain;
pub mod error;
pub mod store;

pub use agent::{AgentProfile, VoiceProvider, DEFAULT_GREETING, DEFAULT_PROMPT};
pub use brain::{BrainService, Reasoning, ReasoningConfig};
pub use error::{CoreError, CoreResult};
pub use store::{AgentLookup, AgentStore};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
