//! Live proposals
//!
//! Every proposal message gets its own task owning a [`VoteEngine`]. Platform
//! reaction events are routed to that task through a bounded channel, so
//! tally updates for one message are applied strictly one at a time while
//! different proposals proceed independently.

use crate::embed::{render, ProposalHeader, Tally};
use crate::engine::{VoteContext, VoteEngine};
use crate::platform::{PlatformError, ReactionEvent};
use crate::types::{ChannelId, MessageId, OptionToken};
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Discord allows at most 20 distinct reactions per message
pub const MAX_OPTIONS: usize = 20;

const EVENT_BUFFER: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposalDraft {
    pub title: String,
    pub description: String,
    pub author: String,
    pub options: Vec<OptionToken>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProposalError {
    #[error("A proposal needs a title")]
    EmptyTitle,
    #[error("A proposal needs at least one reaction option")]
    NoOptions,
    #[error("A proposal can have at most 20 options, got {0}")]
    TooManyOptions(usize),
    #[error("No open proposal for message {0}")]
    NotFound(MessageId),
    #[error("Proposal task for message {0} has stopped")]
    TaskStopped(MessageId),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Split a comma-separated option list, dropping blanks and duplicates
pub fn parse_options(raw: &str) -> Result<Vec<OptionToken>, ProposalError> {
    let mut options: Vec<OptionToken> = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let token = OptionToken::new(token);
        if !options.contains(&token) {
            options.push(token);
        }
    }
    match options.len() {
        0 => Err(ProposalError::NoOptions),
        n if n > MAX_OPTIONS => Err(ProposalError::TooManyOptions(n)),
        _ => Ok(options),
    }
}

enum ProposalCommand {
    Reaction(ReactionEvent),
    Snapshot(oneshot::Sender<Tally>),
    Close(oneshot::Sender<Tally>),
}

struct ProposalHandle {
    tx: mpsc::Sender<ProposalCommand>,
    task: JoinHandle<()>,
}

/// Registry of open proposals and router of their reaction events
pub struct ProposalManager {
    ctx: VoteContext,
    proposals: DashMap<MessageId, ProposalHandle>,
}

impl ProposalManager {
    pub fn new(ctx: VoteContext) -> Self {
        Self {
            ctx,
            proposals: DashMap::new(),
        }
    }

    /// Post the proposal and start its task, which seeds the option reactions
    pub async fn open(
        &self,
        channel: ChannelId,
        draft: ProposalDraft,
    ) -> Result<MessageId, ProposalError> {
        if draft.title.trim().is_empty() {
            return Err(ProposalError::EmptyTitle);
        }
        if draft.options.is_empty() {
            return Err(ProposalError::NoOptions);
        }
        if draft.options.len() > MAX_OPTIONS {
            return Err(ProposalError::TooManyOptions(draft.options.len()));
        }

        let header = ProposalHeader {
            title: draft.title,
            description: draft.description,
            author: draft.author,
            created_at: Utc::now(),
        };
        let embed = render(&header, &Tally::new(&draft.options), false);
        let message = self.ctx.platform.send_embed(channel, &embed).await?;

        // The task seeds the option reactions before handling any event
        let engine = VoteEngine::new(
            self.ctx.clone(),
            channel,
            message,
            header,
            draft.options.clone(),
        );
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = tokio::spawn(run_proposal(engine, rx));
        self.proposals.insert(message, ProposalHandle { tx, task });

        info!(
            message_id = %message,
            channel_id = %channel,
            options = draft.options.len(),
            "Proposal opened"
        );
        Ok(message)
    }

    /// Hand a reaction event to its proposal. Returns `false` if the message
    /// is not an open proposal.
    pub async fn dispatch(&self, event: ReactionEvent) -> bool {
        let message = event.message;
        let Some(tx) = self.proposals.get(&message).map(|h| h.tx.clone()) else {
            return false;
        };
        if tx.send(ProposalCommand::Reaction(event)).await.is_err() {
            warn!(message_id = %message, "Proposal task gone, dropping it");
            self.proposals.remove(&message);
            return false;
        }
        true
    }

    /// Current tally, after every event dispatched so far
    pub async fn tally(&self, message: MessageId) -> Result<Tally, ProposalError> {
        let tx = self
            .proposals
            .get(&message)
            .map(|h| h.tx.clone())
            .ok_or(ProposalError::NotFound(message))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(ProposalCommand::Snapshot(reply_tx))
            .await
            .map_err(|_| ProposalError::TaskStopped(message))?;
        reply_rx
            .await
            .map_err(|_| ProposalError::TaskStopped(message))
    }

    /// Stop listening on `message` and render its final result
    pub async fn close(&self, message: MessageId) -> Result<Tally, ProposalError> {
        let (_, handle) = self
            .proposals
            .remove(&message)
            .ok_or(ProposalError::NotFound(message))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(ProposalCommand::Close(reply_tx))
            .await
            .map_err(|_| ProposalError::TaskStopped(message))?;
        let tally = reply_rx
            .await
            .map_err(|_| ProposalError::TaskStopped(message))?;
        if let Err(e) = handle.task.await {
            warn!(message_id = %message, error = %e, "Proposal task ended abnormally");
        }
        Ok(tally)
    }

    pub fn is_open(&self, message: MessageId) -> bool {
        self.proposals.contains_key(&message)
    }

    pub fn open_count(&self) -> usize {
        self.proposals.len()
    }

    /// Stop every proposal task without rendering a result
    pub async fn shutdown(&self) {
        let messages: Vec<MessageId> = self.proposals.iter().map(|e| *e.key()).collect();
        for message in messages {
            if let Some((_, handle)) = self.proposals.remove(&message) {
                drop(handle.tx);
                if let Err(e) = handle.task.await {
                    warn!(message_id = %message, error = %e, "Proposal task ended abnormally");
                }
            }
        }
        info!("All proposal tasks stopped");
    }
}

async fn run_proposal(mut engine: VoteEngine, mut rx: mpsc::Receiver<ProposalCommand>) {
    engine.seed_reactions().await;
    while let Some(command) = rx.recv().await {
        match command {
            ProposalCommand::Reaction(event) => {
                engine.handle(&event).await;
            }
            ProposalCommand::Snapshot(reply) => {
                let _ = reply.send(engine.tally().clone());
            }
            ProposalCommand::Close(reply) => {
                engine.close().await;
                let _ = reply.send(engine.tally().clone());
                break;
            }
        }
    }
    debug!(message_id = %engine.message(), "Proposal task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::IdentityRegistry;
    use crate::testing::{addr, RecordingPlatform, StaticOracle};
    use crate::types::UserId;
    use dao_kv_store::MemoryStore;
    use std::sync::Arc;

    fn manager() -> (Arc<RecordingPlatform>, Arc<StaticOracle>, IdentityRegistry, ProposalManager) {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(RecordingPlatform::default());
        let oracle = Arc::new(StaticOracle::default());
        let registry = IdentityRegistry::new(store.clone());
        let manager = ProposalManager::new(VoteContext {
            store,
            registry: registry.clone(),
            oracle: oracle.clone(),
            platform: platform.clone(),
            bot_user: UserId(1),
        });
        (platform, oracle, registry, manager)
    }

    fn draft(options: &str) -> ProposalDraft {
        ProposalDraft {
            title: "Budget".into(),
            description: "Spend it?".into(),
            author: "alice".into(),
            options: parse_options(options).unwrap(),
        }
    }

    #[test]
    fn test_parse_options() {
        let options = parse_options(" 👍, 👎 ,,👍").unwrap();
        assert_eq!(options, vec![OptionToken::new("👍"), OptionToken::new("👎")]);
        assert!(matches!(parse_options(" , "), Err(ProposalError::NoOptions)));

        let many = (0..21).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        assert!(matches!(parse_options(&many), Err(ProposalError::TooManyOptions(21))));
    }

    #[tokio::test]
    async fn test_open_posts_and_seeds_reactions() {
        let (platform, _, _, manager) = manager();
        let message = manager.open(ChannelId(7), draft("👍,👎")).await.unwrap();
        manager.tally(message).await.unwrap();

        assert!(manager.is_open(message));
        assert_eq!(
            platform.operations(),
            vec![
                "send:7".to_string(),
                format!("react:{message}:👍"),
                format!("react:{message}:👎"),
            ]
        );
        let embed = platform.embed_of(message).unwrap();
        assert_eq!(embed.field("👍"), Some("0"));
        assert_eq!(embed.author, "alice");
    }

    #[tokio::test]
    async fn test_open_rejects_empty_title() {
        let (_, _, _, manager) = manager();
        let mut bad = draft("👍");
        bad.title = "  ".into();
        assert!(matches!(
            manager.open(ChannelId(7), bad).await,
            Err(ProposalError::EmptyTitle)
        ));
        assert_eq!(manager.open_count(), 0);
    }

    #[tokio::test]
    async fn test_events_route_to_their_proposal() {
        let (_, oracle, registry, manager) = manager();
        registry.register(UserId(10), &addr(10)).await.unwrap();
        oracle.set(&addr(10), 3);

        let first = manager.open(ChannelId(7), draft("👍,👎")).await.unwrap();
        let second = manager.open(ChannelId(7), draft("👍,👎")).await.unwrap();

        assert!(manager.dispatch(ReactionEvent::added(first, UserId(10), "👍")).await);
        assert!(manager.dispatch(ReactionEvent::added(second, UserId(10), "👎")).await);
        assert!(!manager.dispatch(ReactionEvent::added(MessageId(1), UserId(10), "👍")).await);

        let t1 = manager.tally(first).await.unwrap();
        let t2 = manager.tally(second).await.unwrap();
        assert_eq!(t1.get(&"👍".into()), Some(3));
        assert_eq!(t2.get(&"👎".into()), Some(3));
        assert_eq!(t2.get(&"👍".into()), Some(0));
    }

    #[tokio::test]
    async fn test_close_stops_routing() {
        let (platform, oracle, registry, manager) = manager();
        registry.register(UserId(10), &addr(10)).await.unwrap();
        oracle.set(&addr(10), 4);

        let message = manager.open(ChannelId(7), draft("👍,👎")).await.unwrap();
        manager.dispatch(ReactionEvent::added(message, UserId(10), "👍")).await;

        let tally = manager.close(message).await.unwrap();
        assert_eq!(tally.get(&"👍".into()), Some(4));
        assert!(!manager.is_open(message));
        assert!(!manager.dispatch(ReactionEvent::added(message, UserId(10), "👎")).await);
        assert!(matches!(manager.close(message).await, Err(ProposalError::NotFound(_))));

        let final_embed = platform.embed_of(message).unwrap();
        assert_eq!(final_embed.field("Result"), Some("👍"));
    }

    #[tokio::test]
    async fn test_many_voters_are_serialized() {
        let (_, oracle, registry, manager) = manager();
        let manager = Arc::new(manager);
        let message = manager.open(ChannelId(7), draft("👍,👎")).await.unwrap();

        for user in 10..60u64 {
            registry.register(UserId(user), &addr(user)).await.unwrap();
            oracle.set(&addr(user), 2);
        }

        let mut tasks = Vec::new();
        for user in 10..60u64 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                manager
                    .dispatch(ReactionEvent::added(message, UserId(user), "👍"))
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }

        let tally = manager.tally(message).await.unwrap();
        assert_eq!(tally.get(&"👍".into()), Some(100));
    }

    #[tokio::test]
    async fn test_shutdown_stops_all() {
        let (_, _, _, manager) = manager();
        manager.open(ChannelId(7), draft("👍")).await.unwrap();
        manager.open(ChannelId(8), draft("👍")).await.unwrap();
        assert_eq!(manager.open_count(), 2);

        manager.shutdown().await;
        assert_eq!(manager.open_count(), 0);
    }
}
