//! Token-weighted reaction polls
//!
//! Community members register a wallet address against their chat account and
//! vote on proposals by reacting to the proposal message. Each vote counts with
//! the voter's token balance, and every user holds at most one active vote per
//! proposal: reacting with a different option moves the vote.
//!
//! - [`registry`]: bidirectional user ↔ address registration
//! - [`oracle`]: token balance lookups over JSON-RPC, behind a circuit breaker
//! - [`engine`]: per-proposal vote state machine and tally
//! - [`proposal`]: one task per live proposal, fed by reaction events
//! - [`commands`]: slash-command dispatcher
//! - [`platform`]: the chat platform seam

pub mod circuit_breaker;
pub mod commands;
pub mod config;
pub mod embed;
pub mod engine;
pub mod oracle;
pub mod platform;
pub mod proposal;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use commands::{CommandDispatcher, CommandInvocation, CommandSpec, OptionSpec, Reply, COMMANDS};
pub use config::{BotConfig, ConfigError};
pub use embed::{render, EmbedField, EmbedSnapshot, ProposalHeader, Tally};
pub use engine::{VoteContext, VoteEngine, VoteOutcome, VoteRecord};
pub use oracle::{BalanceOracle, GuardedOracle, JsonRpcBalanceOracle, OracleError};
pub use platform::{ChatPlatform, PlatformError, ReactionEvent, ReactionKind};
pub use proposal::{ProposalDraft, ProposalError, ProposalManager};
pub use registry::{Identifier, IdentityRegistry, RegistryError, Unregistered};
pub use types::{Address, AddressError, ChannelId, MessageId, OptionToken, UserId, Weight};
