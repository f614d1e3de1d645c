//! ChainHook CLI: run the event pipeline and manage subscriptions.
//!
//! # Commands
//! ```text
//! chainhook run
//! chainhook subscribe     --chain-id 1 --address 0x… --abi erc20.json --webhook https://…
//! chainhook subscriptions
//! chainhook pause         <SUBSCRIPTION>
//! chainhook resume        <SUBSCRIPTION>
//! chainhook unsubscribe   <SUBSCRIPTION>
//! chainhook events        <SUBSCRIPTION> [--status failed] [--limit 20]
//! chainhook attempts      <SUBSCRIPTION> <EVENT>
//! chainhook replay        <SUBSCRIPTION> <EVENT>
//! chainhook reset-cursor  <SUBSCRIPTION> <BLOCK>
//! chainhook chains
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use chainhook_core::config::ChainhookConfig;

mod cmd_manage;
mod cmd_run;
mod logging;

#[derive(Parser)]
#[command(
    name = "chainhook",
    about = "Watch EVM contracts and deliver their events to webhooks",
    long_about = "
ChainHook polls EVM chains for logs emitted by subscribed contracts, decodes
them against the subscription's ABI and POSTs each event to the subscriber's
webhook, retrying with exponential backoff.

Without --config, built-in defaults are used: SQLite at ./chainhook.db and the
public RPC endpoint of every known chain.
",
    version
)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Owner that management commands act on behalf of
    #[arg(long, global = true, default_value = "default")]
    owner: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poller and the delivery worker until Ctrl-C
    Run,

    /// Create a subscription
    Subscribe {
        #[arg(long)]
        chain_id: u64,
        /// Contract address (0x-prefixed)
        #[arg(long)]
        address: String,
        /// Path to the contract's ABI JSON (an array, or an object with an "abi" field)
        #[arg(long)]
        abi: PathBuf,
        /// http(s) URL the events are POSTed to
        #[arg(long)]
        webhook: String,
        /// Only forward these event names (repeatable)
        #[arg(long = "event")]
        events: Vec<String>,
    },

    /// List subscriptions, newest first
    Subscriptions,

    /// Stop polling and delivering for a subscription
    Pause { subscription: Uuid },

    /// Resume a paused subscription
    Resume { subscription: Uuid },

    /// Delete a subscription; captured events are kept
    Unsubscribe { subscription: Uuid },

    /// List captured events of a subscription, newest first
    Events {
        subscription: Uuid,
        /// pending | processing | delivered | failed
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List delivery attempts of one event, newest first
    Attempts { subscription: Uuid, event: Uuid },

    /// Queue an event for delivery again
    Replay { subscription: Uuid, event: Uuid },

    /// Move a subscription's block cursor; 0 restarts from the chain head
    #[command(name = "reset-cursor")]
    ResetCursor { subscription: Uuid, block: u64 },

    /// Show the chains and RPC endpoints in use
    Chains,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ChainhookConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ChainhookConfig::default(),
    };
    logging::init_tracing(&config.log);

    match cli.command {
        Commands::Run => cmd_run::run(config).await,
        Commands::Chains => {
            cmd_manage::chains(&config);
            Ok(())
        }
        command => {
            let ctx = cmd_manage::Manager::open(&config, &cli.owner).await?;
            match command {
                Commands::Subscribe {
                    chain_id,
                    address,
                    abi,
                    webhook,
                    events,
                } => ctx.subscribe(chain_id, &address, &abi, &webhook, events).await,
                Commands::Subscriptions => ctx.subscriptions().await,
                Commands::Pause { subscription } => ctx.set_paused(subscription, true).await,
                Commands::Resume { subscription } => ctx.set_paused(subscription, false).await,
                Commands::Unsubscribe { subscription } => ctx.unsubscribe(subscription).await,
                Commands::Events {
                    subscription,
                    status,
                    limit,
                } => ctx.events(subscription, status.as_deref(), limit).await,
                Commands::Attempts {
                    subscription,
                    event,
                } => ctx.attempts(subscription, event).await,
                Commands::Replay {
                    subscription,
                    event,
                } => ctx.replay(subscription, event).await,
                Commands::ResetCursor {
                    subscription,
                    block,
                } => ctx.reset_cursor(subscription, block).await,
                Commands::Run | Commands::Chains => Ok(()),
            }
        }
    }
}
