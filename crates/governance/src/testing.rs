//! In-memory doubles of the external collaborators
//!
//! Used by the unit and integration tests; nothing here talks to a network.

use crate::embed::EmbedSnapshot;
use crate::oracle::{BalanceOracle, OracleError};
use crate::platform::{ChatPlatform, PlatformError};
use crate::types::{Address, ChannelId, MessageId, OptionToken, UserId, Weight};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Deterministic address for a test user id
pub fn addr(user: u64) -> Address {
    format!("0x{user:040x}")
        .parse()
        .unwrap_or_else(|e| panic!("test address for {user}: {e}"))
}

/// Oracle answering from a fixed table; unknown addresses hold nothing
#[derive(Default)]
pub struct StaticOracle {
    balances: Mutex<HashMap<Address, Weight>>,
    failing: Mutex<HashSet<Address>>,
}

impl StaticOracle {
    pub fn set(&self, address: &Address, weight: Weight) {
        self.failing.lock().remove(address);
        self.balances.lock().insert(address.clone(), weight);
    }

    /// Make lookups for `address` fail
    pub fn fail(&self, address: &Address) {
        self.failing.lock().insert(address.clone());
    }
}

#[async_trait]
impl BalanceOracle for StaticOracle {
    async fn balance_of(&self, address: &Address) -> Result<Weight, OracleError> {
        if self.failing.lock().contains(address) {
            return Err(OracleError::MissingResult);
        }
        Ok(self.balances.lock().get(address).copied().unwrap_or(0))
    }
}

/// Chat platform that records every call.
///
/// Operations are logged as `send:<channel>`, `edit:<message>`,
/// `react:<message>:<token>` and `unreact:<message>:<user>:<token>`.
pub struct RecordingPlatform {
    operations: Mutex<Vec<String>>,
    embeds: Mutex<Vec<(MessageId, EmbedSnapshot)>>,
    next_message: AtomicU64,
    refuse_removals: AtomicBool,
}

impl Default for RecordingPlatform {
    fn default() -> Self {
        Self {
            operations: Mutex::new(Vec::new()),
            embeds: Mutex::new(Vec::new()),
            next_message: AtomicU64::new(1000),
            refuse_removals: AtomicBool::new(false),
        }
    }
}

impl RecordingPlatform {
    fn record(&self, entry: impl Into<String>) {
        self.operations.lock().push(entry.into());
    }

    /// Make `remove_reaction` fail after recording the call
    pub fn refuse_removals(&self, refuse: bool) {
        self.refuse_removals.store(refuse, Ordering::SeqCst);
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    /// Most recent embed sent or edited
    pub fn last_embed(&self) -> Option<EmbedSnapshot> {
        self.embeds.lock().last().map(|(_, e)| e.clone())
    }

    /// Most recent embed of `message`
    pub fn embed_of(&self, message: MessageId) -> Option<EmbedSnapshot> {
        self.embeds
            .lock()
            .iter()
            .rev()
            .find(|(m, _)| *m == message)
            .map(|(_, e)| e.clone())
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_embed(
        &self,
        channel: ChannelId,
        embed: &EmbedSnapshot,
    ) -> Result<MessageId, PlatformError> {
        let message = MessageId(self.next_message.fetch_add(1, Ordering::SeqCst));
        self.record(format!("send:{channel}"));
        self.embeds.lock().push((message, embed.clone()));
        Ok(message)
    }

    async fn edit_embed(
        &self,
        _channel: ChannelId,
        message: MessageId,
        embed: &EmbedSnapshot,
    ) -> Result<(), PlatformError> {
        self.record(format!("edit:{message}"));
        self.embeds.lock().push((message, embed.clone()));
        Ok(())
    }

    async fn react(
        &self,
        _channel: ChannelId,
        message: MessageId,
        token: &OptionToken,
    ) -> Result<(), PlatformError> {
        self.record(format!("react:{message}:{token}"));
        Ok(())
    }

    async fn remove_reaction(
        &self,
        _channel: ChannelId,
        message: MessageId,
        user: UserId,
        token: &OptionToken,
    ) -> Result<(), PlatformError> {
        self.record(format!("unreact:{message}:{user}:{token}"));
        if self.refuse_removals.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("missing permissions".into()));
        }
        Ok(())
    }
}
