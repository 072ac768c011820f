// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Zapdesk - multi-tenant WhatsApp helpdesk server.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod channels;
mod heap;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use zapdesk_config::{ConfigError, ZapdeskConfig};
use zapdesk_core::StorageAdapter;
use zapdesk_core::types::{ChannelKind, TenantId};
use zapdesk_storage::SqliteStorage;

/// Zapdesk - multi-tenant WhatsApp helpdesk server.
#[derive(Parser, Debug)]
#[command(name = "zapdesk", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the helpdesk server.
    Serve,
    /// Validate configuration and report every error found.
    CheckConfig,
    /// Manage WhatsApp channels.
    Channel {
        #[command(subcommand)]
        action: ChannelAction,
    },
}

#[derive(Subcommand, Debug)]
enum ChannelAction {
    /// Register a channel for a tenant.
    Add {
        #[arg(long)]
        tenant: TenantId,
        #[arg(long)]
        name: String,
        /// `socket` or `business_api`.
        #[arg(long, value_parser = channels::parse_kind)]
        kind: ChannelKind,
        #[arg(long)]
        access_token: Option<String>,
        #[arg(long)]
        phone_number_id: Option<String>,
        /// Token the webhook subscription handshake must present.
        #[arg(long)]
        verify_token: Option<String>,
    },
    /// List stored channels.
    List,
}

fn load(path: Option<&PathBuf>) -> Result<ZapdeskConfig, Vec<ConfigError>> {
    match path {
        Some(path) => zapdesk_config::load_and_validate_path(path),
        None => zapdesk_config::load_and_validate(),
    }
}

async fn open_storage(config: &ZapdeskConfig) -> Result<SqliteStorage, zapdesk_core::ZapdeskError> {
    let storage = SqliteStorage::new(config.storage.clone());
    storage.initialize().await?;
    Ok(storage)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(errors) => {
            zapdesk_config::render_errors(&errors);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Serve) => serve::run_serve(config).await,
        Some(Commands::CheckConfig) => {
            println!(
                "zapdesk: configuration is valid (gateway={}:{}, database={})",
                config.gateway.host, config.gateway.port, config.storage.database_path
            );
            Ok(())
        }
        Some(Commands::Channel { action }) => run_channel(&config, action).await,
        None => {
            println!("zapdesk: use --help for available commands");
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run_channel(
    config: &ZapdeskConfig,
    action: ChannelAction,
) -> Result<(), zapdesk_core::ZapdeskError> {
    let storage = open_storage(config).await?;
    match action {
        ChannelAction::Add {
            tenant,
            name,
            kind,
            access_token,
            phone_number_id,
            verify_token,
        } => {
            let id = channels::add_channel(
                &storage,
                channels::AddChannel {
                    tenant_id: tenant,
                    name,
                    kind,
                    access_token,
                    phone_number_id,
                    verify_token,
                },
            )
            .await?;
            println!("channel {id} added; webhook path /webhook/{id}");
        }
        ChannelAction::List => {
            for line in channels::list_channels(&storage).await? {
                println!("{line}");
            }
        }
    }
    storage.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn channel_add_parses() {
        let cli = Cli::try_parse_from([
            "zapdesk",
            "channel",
            "add",
            "--tenant",
            "4",
            "--name",
            "Vendas",
            "--kind",
            "business_api",
            "--access-token",
            "EAAG",
            "--phone-number-id",
            "1065",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Channel {
                action: ChannelAction::Add { tenant, kind, .. },
            }) => {
                assert_eq!(tenant, 4);
                assert_eq!(kind, ChannelKind::BusinessApi);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let parsed = Cli::try_parse_from([
            "zapdesk", "channel", "add", "--tenant", "1", "--name", "x", "--kind", "sms",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn config_file_path_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zapdesk.toml");
        std::fs::write(&path, "[gateway]\nport = 4100\n").unwrap();
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.gateway.port, 4100);
    }

    #[test]
    fn invalid_config_file_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zapdesk.toml");
        std::fs::write(&path, "[gateway]\nprot = 4100\n").unwrap();
        assert!(!load(Some(&path)).unwrap_err().is_empty());
    }
}
