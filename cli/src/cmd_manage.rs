//! Management commands. Results are printed as pretty JSON.

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use chainhook_core::clock::SystemClock;
use chainhook_core::config::ChainhookConfig;
use chainhook_core::management::{Management, SubscriptionUpdate};
use chainhook_core::state::DeliveryStatus;
use chainhook_core::types::{EventId, OwnerId, SubscriptionId, SubscriptionStatus};
use chainhook_evm::chains::{known_chain, resolve_endpoints};
use chainhook_storage::SqliteStorage;

pub struct Manager {
    management: Management,
    owner: OwnerId,
}

impl Manager {
    pub async fn open(config: &ChainhookConfig, owner: &str) -> Result<Self> {
        let store = SqliteStorage::open(&config.database_url)
            .await
            .with_context(|| format!("opening {}", config.database_url))?;
        let chains = resolve_endpoints(&config.chains).into_keys();
        let management =
            Management::new(Arc::new(store), Arc::new(SystemClock)).with_supported_chains(chains);
        Ok(Self {
            management,
            owner: OwnerId::new(owner),
        })
    }

    pub async fn subscribe(
        &self,
        chain_id: u64,
        address: &str,
        abi_path: &Path,
        webhook: &str,
        events: Vec<String>,
    ) -> Result<()> {
        let abi = read_abi(abi_path)?;
        let sub = self
            .management
            .create_subscription(&self.owner, chain_id, address, abi, webhook, events)
            .await?;
        print_json(&sub)
    }

    pub async fn subscriptions(&self) -> Result<()> {
        let subs = self.management.list_subscriptions(&self.owner).await?;
        print_json(&subs)
    }

    pub async fn set_paused(&self, id: Uuid, paused: bool) -> Result<()> {
        let status = if paused {
            SubscriptionStatus::Paused
        } else {
            SubscriptionStatus::Active
        };
        let update = SubscriptionUpdate {
            status: Some(status),
            ..SubscriptionUpdate::default()
        };
        let sub = self
            .management
            .update_subscription(&self.owner, SubscriptionId(id), update)
            .await?;
        print_json(&sub)
    }

    pub async fn unsubscribe(&self, id: Uuid) -> Result<()> {
        self.management
            .delete_subscription(&self.owner, SubscriptionId(id))
            .await?;
        println!("deleted {id}");
        Ok(())
    }

    pub async fn events(&self, id: Uuid, status: Option<&str>, limit: Option<usize>) -> Result<()> {
        let status = status.map(DeliveryStatus::parse).transpose()?;
        let events = self
            .management
            .list_events(&self.owner, SubscriptionId(id), status, limit)
            .await?;
        print_json(&events)
    }

    pub async fn attempts(&self, id: Uuid, event: Uuid) -> Result<()> {
        let attempts = self
            .management
            .list_attempts(&self.owner, SubscriptionId(id), EventId(event))
            .await?;
        print_json(&attempts)
    }

    pub async fn replay(&self, id: Uuid, event: Uuid) -> Result<()> {
        self.management
            .replay_event(&self.owner, SubscriptionId(id), EventId(event))
            .await?;
        println!("queued {event} for delivery");
        Ok(())
    }

    pub async fn reset_cursor(&self, id: Uuid, block: u64) -> Result<()> {
        self.management
            .reset_cursor(&self.owner, SubscriptionId(id), block)
            .await?;
        println!("cursor of {id} set to {block}");
        Ok(())
    }
}

pub fn chains(config: &ChainhookConfig) {
    println!("{:<10} {:<14} RPC", "CHAIN ID", "NAME");
    for (chain_id, url) in resolve_endpoints(&config.chains) {
        let name = known_chain(chain_id).map_or("custom", |c| c.name);
        println!("{chain_id:<10} {name:<14} {url}");
    }
}

/// Accepts a bare ABI array or a compiler artifact with an `abi` field.
fn read_abi(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading ABI from {}", path.display()))?;
    let json: Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing ABI JSON in {}", path.display()))?;
    match json {
        Value::Array(_) => Ok(json),
        Value::Object(mut obj) => match obj.remove("abi") {
            Some(abi @ Value::Array(_)) => Ok(abi),
            _ => bail!("{}: object has no \"abi\" array", path.display()),
        },
        _ => bail!("{}: ABI must be a JSON array", path.display()),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
