//! Offline administration of API keys.

use crate::api_keys::{ApiKey, ApiKeyStore, API_KEYS_FILE};
use crate::clock::SystemClock;
use crate::config::AltbotConfig;
use anyhow::{Context, Result};
use clap::Subcommand;
use std::sync::Arc;

#[derive(Debug, Subcommand)]
pub enum KeyCommand {
    /// Create a new API key
    CreateKey {
        #[arg(long)]
        email: String,
        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: i64,
        #[arg(long, default_value = "")]
        note: String,
    },
    /// List every API key
    ListKeys,
    /// Deactivate an API key
    RevokeKey { key: String },
    /// Push an API key's expiry further out
    ExtendKey {
        key: String,
        #[arg(long)]
        days: i64,
    },
    /// Find the key registered for an email address
    Lookup {
        #[arg(long)]
        email: String,
    },
    /// Remove keys that expired more than 30 days ago
    Cleanup,
}

pub fn run_admin(config: &AltbotConfig, command: KeyCommand) -> Result<()> {
    let store = ApiKeyStore::open(config.data_path(API_KEYS_FILE), Arc::new(SystemClock))
        .context("failed to open API key store")?;

    match command {
        KeyCommand::CreateKey { email, days, note } => {
            anyhow::ensure!(days > 0, "--days must be positive");
            let key = store.generate(&email, days, &note)?;
            println!("Created API key for {}", key.email);
            println!("  key:     {}", key.key);
            println!("  expires: {}", key.expires_at.format("%Y-%m-%d"));
        }
        KeyCommand::ListKeys => {
            let keys = store.list();
            if keys.is_empty() {
                println!("No API keys.");
            }
            for key in &keys {
                print_key(&store, key);
            }
        }
        KeyCommand::RevokeKey { key } => {
            store.revoke(&key)?;
            println!("Revoked {key}");
        }
        KeyCommand::ExtendKey { key, days } => {
            anyhow::ensure!(days > 0, "--days must be positive");
            let extended = store.extend(&key, days)?;
            println!(
                "Extended {} until {}",
                extended.key,
                extended.expires_at.format("%Y-%m-%d")
            );
        }
        KeyCommand::Lookup { email } => match store.find_by_email(&email) {
            Some(key) => print_key(&store, &key),
            None => println!("No API key registered for {email}"),
        },
        KeyCommand::Cleanup => {
            let removed = store.cleanup_expired()?;
            println!("Removed {removed} expired key(s)");
        }
    }
    Ok(())
}

fn print_key(store: &ApiKeyStore, key: &ApiKey) {
    let state = if key.active { "active" } else { "revoked" };
    println!(
        "{}  {}  {}  used {} this month  {} day(s) left",
        key.key,
        key.email,
        state,
        key.usage_month,
        store.days_remaining(key)
    );
    if !key.note.is_empty() {
        println!("    note: {}", key.note);
    }
}
