//! Vote tally engine
//!
//! State per (proposal, user) is either *Unvoted* or *VotedOnOption(o)*,
//! persisted as a vote record under
//! `"{userId}_lastReactionOnMessage_{messageId}"`.
//!
//! Reaction adds:
//! - Unvoted → VotedOnOption(o): voter needs a registered address and a
//!   nonzero balance, otherwise the reaction is retracted
//! - VotedOnOption(o1) → VotedOnOption(o2): the recorded weight moves from
//!   `o1` to `o2` and the `o1` reaction is retracted (last reaction wins)
//!
//! Reaction removes:
//! - removing the recorded option withdraws the vote (back to Unvoted)
//! - any other removal is ignored, which covers the bot's own retractions
//!
//! A [`VoteEngine`] is owned by exactly one proposal task, so every mutation
//! of one proposal's tally happens in event order.

use crate::embed::{render, EmbedSnapshot, ProposalHeader, Tally};
use crate::oracle::{weight_or_zero, BalanceOracle};
use crate::platform::{ChatPlatform, ReactionEvent, ReactionKind};
use crate::registry::IdentityRegistry;
use crate::types::{ChannelId, MessageId, OptionToken, UserId, Weight};
use dao_kv_store::{KeyValueStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared collaborators of every proposal
#[derive(Clone)]
pub struct VoteContext {
    pub store: Arc<dyn KeyValueStore>,
    pub registry: IdentityRegistry,
    pub oracle: Arc<dyn BalanceOracle>,
    pub platform: Arc<dyn ChatPlatform>,
    /// The bot's own user id; its reactions never count
    pub bot_user: UserId,
}

/// A user's current choice on one proposal
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub reaction: OptionToken,
    /// Weight added to the tally when the vote was cast
    #[serde(with = "weight_string", default)]
    pub weight: Weight,
}

/// Weights are stored as decimal strings; JSON numbers lose precision past 2^53
mod weight_string {
    use crate::types::Weight;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(weight: &Weight, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&weight.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Weight, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub fn vote_key(user: UserId, message: MessageId) -> String {
    format!("{user}_lastReactionOnMessage_{message}")
}

/// Why an event did not reach the state machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnReaction,
    NotAnOption,
    UnrelatedRemoval,
    AlreadyVotedForOption,
    Closed,
}

/// Why a reaction was retracted without a state change
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    NotRegistered,
    NoBalance,
    ConcurrentReactions,
    StoreUnavailable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    Ignored(IgnoreReason),
    Rejected(RejectReason),
    Cast {
        option: OptionToken,
        weight: Weight,
    },
    Switched {
        from: OptionToken,
        to: OptionToken,
        weight: Weight,
    },
    Withdrawn {
        option: OptionToken,
        weight: Weight,
    },
}

/// Tally state machine of one proposal message
pub struct VoteEngine {
    ctx: VoteContext,
    channel: ChannelId,
    message: MessageId,
    header: ProposalHeader,
    options: Vec<OptionToken>,
    tally: Tally,
    /// Option reactions each user currently holds, as seen in the event stream
    held: HashMap<UserId, BTreeSet<OptionToken>>,
    closed: bool,
}

impl VoteEngine {
    pub fn new(
        ctx: VoteContext,
        channel: ChannelId,
        message: MessageId,
        header: ProposalHeader,
        options: Vec<OptionToken>,
    ) -> Self {
        let tally = Tally::new(&options);
        Self {
            ctx,
            channel,
            message,
            header,
            options,
            tally,
            held: HashMap::new(),
            closed: false,
        }
    }

    pub fn message(&self) -> MessageId {
        self.message
    }

    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    /// Add one reaction per option so voters can click them
    pub async fn seed_reactions(&self) {
        for option in &self.options {
            if let Err(e) = self
                .ctx
                .platform
                .react(self.channel, self.message, option)
                .await
            {
                warn!(
                    message_id = %self.message,
                    option = %option,
                    error = %e,
                    "Failed to seed option reaction"
                );
            }
        }
    }

    pub fn snapshot(&self) -> EmbedSnapshot {
        render(&self.header, &self.tally, self.closed)
    }

    pub async fn handle(&mut self, event: &ReactionEvent) -> VoteOutcome {
        if self.closed {
            return VoteOutcome::Ignored(IgnoreReason::Closed);
        }
        if event.user == self.ctx.bot_user {
            return VoteOutcome::Ignored(IgnoreReason::OwnReaction);
        }
        if !self.options.contains(&event.token) {
            return VoteOutcome::Ignored(IgnoreReason::NotAnOption);
        }

        let outcome = match event.kind {
            ReactionKind::Added => self.on_added(event.user, &event.token).await,
            ReactionKind::Removed => self.on_removed(event.user, &event.token).await,
        };
        debug!(
            message_id = %self.message,
            user_id = %event.user,
            token = %event.token,
            outcome = ?outcome,
            "Reaction processed"
        );
        outcome
    }

    async fn on_added(&mut self, user: UserId, token: &OptionToken) -> VoteOutcome {
        let already_held = self
            .held
            .get(&user)
            .map(|set| set.iter().filter(|t| *t != token).count())
            .unwrap_or(0);
        if already_held > 1 {
            self.retract(user, token).await;
            return VoteOutcome::Rejected(RejectReason::ConcurrentReactions);
        }
        self.held.entry(user).or_default().insert(token.clone());

        let address = match self.ctx.registry.address_of(user).await {
            Ok(Some(address)) => address,
            Ok(None) => {
                self.retract(user, token).await;
                return VoteOutcome::Rejected(RejectReason::NotRegistered);
            }
            Err(e) => {
                warn!(user_id = %user, error = %e, "Registry lookup failed");
                self.retract(user, token).await;
                return VoteOutcome::Rejected(RejectReason::StoreUnavailable);
            }
        };

        let weight = weight_or_zero(self.ctx.oracle.as_ref(), &address).await;
        if weight == 0 {
            self.retract(user, token).await;
            return VoteOutcome::Rejected(RejectReason::NoBalance);
        }

        let previous = match self.load_record(user).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(user_id = %user, error = %e, "Vote record unreadable");
                self.retract(user, token).await;
                return VoteOutcome::Rejected(RejectReason::StoreUnavailable);
            }
        };

        match previous {
            Some(record) if &record.reaction == token => {
                VoteOutcome::Ignored(IgnoreReason::AlreadyVotedForOption)
            }
            previous => {
                let record = VoteRecord {
                    reaction: token.clone(),
                    weight,
                };
                if let Err(e) = self.save_record(user, &record).await {
                    warn!(user_id = %user, error = %e, "Failed to persist vote");
                    self.retract(user, token).await;
                    return VoteOutcome::Rejected(RejectReason::StoreUnavailable);
                }

                let outcome = match previous {
                    None => {
                        self.tally.add(token, weight);
                        VoteOutcome::Cast {
                            option: token.clone(),
                            weight,
                        }
                    }
                    Some(old) => {
                        self.tally.subtract(&old.reaction, old.weight);
                        self.tally.add(token, weight);
                        let still_held = self
                            .held
                            .get(&user)
                            .map(|set| set.contains(&old.reaction))
                            .unwrap_or(false);
                        if still_held {
                            self.retract(user, &old.reaction).await;
                        }
                        VoteOutcome::Switched {
                            from: old.reaction,
                            to: token.clone(),
                            weight,
                        }
                    }
                };
                info!(
                    message_id = %self.message,
                    user_id = %user,
                    option = %token,
                    weight = %weight,
                    "Vote recorded"
                );
                self.publish().await;
                outcome
            }
        }
    }

    async fn on_removed(&mut self, user: UserId, token: &OptionToken) -> VoteOutcome {
        if let Some(set) = self.held.get_mut(&user) {
            set.remove(token);
            if set.is_empty() {
                self.held.remove(&user);
            }
        }

        let record = match self.load_record(user).await {
            Ok(Some(record)) if &record.reaction == token => record,
            Ok(_) => return VoteOutcome::Ignored(IgnoreReason::UnrelatedRemoval),
            Err(e) => {
                warn!(user_id = %user, error = %e, "Vote record unreadable");
                return VoteOutcome::Rejected(RejectReason::StoreUnavailable);
            }
        };

        if let Err(e) = self.ctx.store.delete(&vote_key(user, self.message)).await {
            warn!(user_id = %user, error = %e, "Failed to delete vote record");
            return VoteOutcome::Rejected(RejectReason::StoreUnavailable);
        }

        self.tally.subtract(token, record.weight);
        info!(
            message_id = %self.message,
            user_id = %user,
            option = %token,
            "Vote withdrawn"
        );
        self.publish().await;
        VoteOutcome::Withdrawn {
            option: record.reaction,
            weight: record.weight,
        }
    }

    /// Mark the proposal closed and render the final embed
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!(message_id = %self.message, total = %self.tally.total(), "Proposal closed");
        self.publish().await;
    }

    async fn load_record(&self, user: UserId) -> Result<Option<VoteRecord>, StoreError> {
        let key = vote_key(user, self.message);
        match self.ctx.store.get(&key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn save_record(&self, user: UserId, record: &VoteRecord) -> Result<(), StoreError> {
        let key = vote_key(user, self.message);
        let value = serde_json::to_value(record).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.ctx.store.set(&key, value).await
    }

    /// Remove the user's reaction; it stays held if the platform refuses
    async fn retract(&mut self, user: UserId, token: &OptionToken) {
        match self
            .ctx
            .platform
            .remove_reaction(self.channel, self.message, user, token)
            .await
        {
            Ok(()) => {
                if let Some(set) = self.held.get_mut(&user) {
                    set.remove(token);
                    if set.is_empty() {
                        self.held.remove(&user);
                    }
                }
            }
            Err(e) => warn!(
                message_id = %self.message,
                user_id = %user,
                token = %token,
                error = %e,
                "Failed to retract reaction"
            ),
        }
    }

    async fn publish(&self) {
        let embed = self.snapshot();
        if let Err(e) = self
            .ctx
            .platform
            .edit_embed(self.channel, self.message, &embed)
            .await
        {
            warn!(message_id = %self.message, error = %e, "Failed to update proposal embed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{addr, RecordingPlatform, StaticOracle};
    use chrono::Utc;
    use dao_kv_store::MemoryStore;
    use serde_json::json;

    const MSG: MessageId = MessageId(500);
    const BOT: UserId = UserId(1);

    struct Fixture {
        store: Arc<MemoryStore>,
        oracle: Arc<StaticOracle>,
        platform: Arc<RecordingPlatform>,
        registry: IdentityRegistry,
        engine: VoteEngine,
    }

    fn fixture() -> Fixture {
        fixture_with(&["👍", "👎"])
    }

    fn fixture_with(options: &[&str]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(StaticOracle::default());
        let platform = Arc::new(RecordingPlatform::default());
        let registry = IdentityRegistry::new(store.clone());
        let ctx = VoteContext {
            store: store.clone(),
            registry: registry.clone(),
            oracle: oracle.clone(),
            platform: platform.clone(),
            bot_user: BOT,
        };
        let engine = VoteEngine::new(
            ctx,
            ChannelId(9),
            MSG,
            ProposalHeader {
                title: "Mural".into(),
                description: "Paint it?".into(),
                author: "alice".into(),
                created_at: Utc::now(),
            },
            options.iter().map(|&o| o.into()).collect(),
        );
        Fixture {
            store,
            oracle,
            platform,
            registry,
            engine,
        }
    }

    async fn voter(f: &Fixture, user: u64, balance: Weight) {
        let address = addr(user);
        f.registry.register(UserId(user), &address).await.unwrap();
        f.oracle.set(&address, balance);
    }

    fn weights(f: &Fixture) -> (Weight, Weight) {
        (
            f.engine.tally().get(&"👍".into()).unwrap(),
            f.engine.tally().get(&"👎".into()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_first_vote_adds_balance() {
        let mut f = fixture();
        voter(&f, 10, 5).await;

        let outcome = f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👍")).await;
        assert_eq!(
            outcome,
            VoteOutcome::Cast {
                option: "👍".into(),
                weight: 5
            }
        );
        assert_eq!(weights(&f), (5, 0));
        assert_eq!(
            f.store.get(&vote_key(UserId(10), MSG)).await.unwrap(),
            Some(json!({ "reaction": "👍", "weight": "5" }))
        );
        let embed = f.platform.last_embed().expect("embed edited");
        assert_eq!(embed.field("👍"), Some("5"));
        assert_eq!(embed.field("👎"), Some("0"));
    }

    #[tokio::test]
    async fn test_switch_moves_weight_and_retracts_old_reaction() {
        let mut f = fixture();
        voter(&f, 10, 5).await;

        f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👍")).await;
        let outcome = f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👎")).await;

        assert_eq!(
            outcome,
            VoteOutcome::Switched {
                from: "👍".into(),
                to: "👎".into(),
                weight: 5
            }
        );
        assert_eq!(weights(&f), (0, 5));
        assert!(f.platform.operations().contains(&"unreact:500:10:👍".to_string()));

        // the retraction echoes back as a removal and must not change anything
        let echo = f.engine.handle(&ReactionEvent::removed(MSG, UserId(10), "👍")).await;
        assert_eq!(echo, VoteOutcome::Ignored(IgnoreReason::UnrelatedRemoval));
        assert_eq!(weights(&f), (0, 5));
    }

    #[tokio::test]
    async fn test_unregistered_reaction_is_retracted() {
        let mut f = fixture();
        let outcome = f.engine.handle(&ReactionEvent::added(MSG, UserId(20), "👍")).await;

        assert_eq!(outcome, VoteOutcome::Rejected(RejectReason::NotRegistered));
        assert_eq!(weights(&f), (0, 0));
        assert_eq!(f.platform.operations(), vec!["unreact:500:20:👍".to_string()]);
        assert!(f.store.get(&vote_key(UserId(20), MSG)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_balance_is_retracted() {
        let mut f = fixture();
        voter(&f, 10, 0).await;

        let outcome = f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👍")).await;
        assert_eq!(outcome, VoteOutcome::Rejected(RejectReason::NoBalance));
        assert_eq!(weights(&f), (0, 0));
    }

    #[tokio::test]
    async fn test_oracle_failure_counts_as_zero() {
        let mut f = fixture();
        f.registry.register(UserId(10), &addr(10)).await.unwrap();
        f.oracle.fail(&addr(10));

        let outcome = f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👍")).await;
        assert_eq!(outcome, VoteOutcome::Rejected(RejectReason::NoBalance));
    }

    #[tokio::test]
    async fn test_removal_withdraws_vote() {
        let mut f = fixture();
        voter(&f, 10, 5).await;
        f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👍")).await;

        let outcome = f.engine.handle(&ReactionEvent::removed(MSG, UserId(10), "👍")).await;
        assert_eq!(
            outcome,
            VoteOutcome::Withdrawn {
                option: "👍".into(),
                weight: 5
            }
        );
        assert_eq!(weights(&f), (0, 0));
        assert!(f.store.get(&vote_key(UserId(10), MSG)).await.unwrap().is_none());

        // voting again after withdrawing is a fresh vote
        let again = f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👎")).await;
        assert!(matches!(again, VoteOutcome::Cast { .. }));
        assert_eq!(weights(&f), (0, 5));
    }

    #[tokio::test]
    async fn test_switch_subtracts_recorded_weight() {
        let mut f = fixture();
        voter(&f, 10, 5).await;
        f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👍")).await;

        // balance changes between votes
        f.oracle.set(&addr(10), 8);
        f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👎")).await;
        assert_eq!(weights(&f), (0, 8));
    }

    #[tokio::test]
    async fn test_foreign_and_own_reactions_ignored() {
        let mut f = fixture();
        voter(&f, 10, 5).await;

        assert_eq!(
            f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "🔥")).await,
            VoteOutcome::Ignored(IgnoreReason::NotAnOption)
        );
        assert_eq!(
            f.engine.handle(&ReactionEvent::added(MSG, BOT, "👍")).await,
            VoteOutcome::Ignored(IgnoreReason::OwnReaction)
        );
        assert!(f.platform.operations().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_reactions_rejected() {
        let mut f = fixture_with(&["👍", "👎", "🤷"]);
        voter(&f, 10, 5).await;
        // Retractions fail, so the user keeps every reaction they add
        f.platform.refuse_removals(true);

        f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👍")).await;
        let switched = f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👎")).await;
        assert!(matches!(switched, VoteOutcome::Switched { .. }));
        assert!(f
            .platform
            .operations()
            .contains(&format!("unreact:{MSG}:10:👍")));

        let outcome = f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "🤷")).await;
        assert_eq!(outcome, VoteOutcome::Rejected(RejectReason::ConcurrentReactions));
        assert_eq!(weights(&f), (0, 5));
        assert_eq!(f.engine.tally().get(&"🤷".into()), Some(0));
        assert!(f
            .platform
            .operations()
            .contains(&format!("unreact:{MSG}:10:🤷")));

        // Once the stale reaction is really gone, new adds pass the filter again
        f.engine.handle(&ReactionEvent::removed(MSG, UserId(10), "👍")).await;
        let outcome = f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "🤷")).await;
        assert!(matches!(outcome, VoteOutcome::Switched { .. }));
    }

    #[tokio::test]
    async fn test_closed_engine_ignores_events() {
        let mut f = fixture();
        voter(&f, 10, 5).await;
        f.engine.close().await;

        let outcome = f.engine.handle(&ReactionEvent::added(MSG, UserId(10), "👍")).await;
        assert_eq!(outcome, VoteOutcome::Ignored(IgnoreReason::Closed));
        assert_eq!(
            f.platform.last_embed().expect("final embed").field("Result"),
            Some("No votes")
        );
    }
}
