//! DAO Bot
//!
//! Address registration and token-weighted reaction proposals on Discord.

mod discord;

use anyhow::{Context as _, Result};
use clap::Parser;
use dao_governance::{
    BotConfig, CircuitBreakerConfig, CommandDispatcher, GuardedOracle, IdentityRegistry,
    JsonRpcBalanceOracle, ProposalManager, VoteContext,
};
use dao_kv_store::{KeyValueStore, MemoryStore, SledStore};
use discord::{DiscordPlatform, Handler};
use serenity::all::{GatewayIntents, Http};
use serenity::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ==================== CLI ====================

#[derive(Parser, Debug)]
#[command(name = "dao-bot")]
#[command(about = "Discord bot for address registration and token-weighted proposals")]
struct Args {
    /// JSON config file
    #[arg(short, long, env = "DAO_BOT_CONFIG", default_value = "./config.json")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Bot token, overrides the config file
    #[arg(long, env = "DISCORD_TOKEN")]
    token: Option<String>,

    /// JSON-RPC endpoint for balance lookups, overrides the config file
    #[arg(long, env = "RPC_URL")]
    rpc_url: Option<String>,

    /// Keep registrations and votes in memory only
    #[arg(long)]
    memory_store: bool,
}

// ==================== Main ====================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dao_bot=debug,dao_governance=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(client_id = %config.client_id, "Starting DAO bot");

    // Storage
    let store: Arc<dyn KeyValueStore> = if args.memory_store {
        warn!("Store: in-memory (--memory-store), nothing survives a restart");
        Arc::new(MemoryStore::new())
    } else {
        std::fs::create_dir_all(&args.data_dir)?;
        let data_dir = std::fs::canonicalize(&args.data_dir)?;
        let path = data_dir.join(format!("{}.sled", config.database));
        Arc::new(SledStore::open(&path).with_context(|| format!("opening {}", path.display()))?)
    };

    // Balance oracle
    let contract = config.contract()?;
    let oracle = GuardedOracle::new(
        JsonRpcBalanceOracle::new(&config.rpc_url, contract.clone())?,
        CircuitBreakerConfig::default(),
    );
    info!(rpc_url = %config.rpc_url, contract = %contract, "Balance oracle ready");

    // Governance
    let http = Arc::new(Http::new(&config.token));
    let registry = IdentityRegistry::new(store.clone());
    let proposals = Arc::new(ProposalManager::new(VoteContext {
        store,
        registry: registry.clone(),
        oracle: Arc::new(oracle),
        platform: Arc::new(DiscordPlatform::new(http)),
        bot_user: config.client_id,
    }));
    let dispatcher = Arc::new(CommandDispatcher::new(registry, proposals.clone()));

    // Discord gateway
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGE_REACTIONS;
    let mut client = Client::builder(&config.token, intents)
        .event_handler(Handler::new(dispatcher, proposals.clone(), config.guild_id))
        .await
        .context("building Discord client")?;
    let shard_manager = client.shard_manager.clone();

    let gateway = tokio::spawn(async move {
        if let Err(e) = client.start().await {
            error!("Discord client error: {}", e);
        }
    });

    info!("Bot running. Ctrl+C to stop.");

    let mut interval = tokio::time::interval(Duration::from_secs(300));
    tokio::pin!(gateway);

    loop {
        tokio::select! {
            _ = &mut gateway => {
                warn!("Discord client stopped");
                break;
            }

            _ = interval.tick() => {
                debug!(open_proposals = proposals.open_count(), "Heartbeat");
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                shard_manager.shutdown_all().await;
                break;
            }
        }
    }

    proposals.shutdown().await;
    info!("Stopped.");
    Ok(())
}

/// Config file values, with CLI/env overrides applied and validated
fn load_config(args: &Args) -> Result<BotConfig> {
    let mut config = BotConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(token) = &args.token {
        config.token = token.clone();
    }
    if let Some(rpc_url) = &args.rpc_url {
        config.rpc_url = rpc_url.clone();
    }
    config.validate()?;
    Ok(config)
}
