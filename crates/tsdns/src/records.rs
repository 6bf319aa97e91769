//! Offline administration of the record store.
//!
//! These commands operate on the configured repository directly. A running server picks up
//! their changes with its next cache refresh.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use tsdns_service::config::Config;
use tsdns_service::repository::{RecordRepository, RepositoryConfig};
use tsdns_service::types::NewRecord;

/// Record management commands.
#[derive(Subcommand, Debug)]
pub enum RecordsCommand {
    /// List all live records.
    List {
        /// Print the records as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Add a record.
    Add {
        /// The domain key clients query.
        domain: String,
        /// The host returned for the domain.
        target: String,
        /// The port returned along with the host, 0 to omit it.
        #[arg(long, short, default_value_t = 0)]
        port: u16,
        /// The instance the record belongs to.
        #[arg(long, default_value_t = 0)]
        instance: i64,
    },

    /// Delete the record of a domain.
    Remove {
        /// The domain key to delete.
        domain: String,
    },

    /// Delete all records of an instance.
    RemoveInstance {
        /// The instance whose records are deleted.
        instance: i64,
    },
}

/// Runs a records command against the configured repository, writing its output to `out`.
pub fn execute(config: &Config, command: RecordsCommand, out: &mut impl Write) -> Result<()> {
    if config.repository == RepositoryConfig::Memory {
        anyhow::bail!("records commands require a persistent repository");
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let repository = config
            .repository
            .open()
            .await
            .context("failed to open the record repository")?;

        let result = run(&repository, command, out).await;
        let closed = repository
            .close()
            .await
            .context("failed to close the record repository");
        result.and(closed)
    })
}

async fn run(
    repository: &Arc<dyn RecordRepository>,
    command: RecordsCommand,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        RecordsCommand::List { json } => {
            let mut records = repository.find().await?;
            records.sort_by(|a, b| a.domain.cmp(&b.domain));

            if json {
                serde_json::to_writer_pretty(&mut *out, &records)?;
                writeln!(out)?;
            } else {
                for record in records {
                    writeln!(
                        out,
                        "{}\t{}\tinstance={}",
                        record.domain,
                        record.response(),
                        record.instance_id
                    )?;
                }
            }
        }
        RecordsCommand::Add {
            domain,
            target,
            port,
            instance,
        } => {
            let record = NewRecord::new(domain, target, port).with_instance(instance);
            let record = repository.create(record).await?;
            tracing::info!(id = record.id, "added record for {}", record.domain);
            writeln!(out, "{} -> {}", record.domain, record.response())?;
        }
        RecordsCommand::Remove { domain } => {
            repository.delete(&domain).await?;
            tracing::info!("removed record for {}", domain);
            writeln!(out, "removed {domain}")?;
        }
        RecordsCommand::RemoveInstance { instance } => {
            let deleted = repository.delete_by_instance_id(instance).await?;
            tracing::info!(deleted, "removed records of instance {}", instance);
            writeln!(out, "removed {deleted} records")?;
        }
    }

    Ok(())
}
