mod cli;

use crate::cli::{Command, CLI};
use anyhow::{bail, Context};
use clap::Parser;
use linkstash_core::{PipelineState, UrlStorage};
use linkstash_generator::HexKeyGenerator;
use linkstash_shortener::{PingStatus, Shortened, ShortenerService};
use linkstash_storage::{PostgresSettings, PostgresStore, VolatileSettings, VolatileStore};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct ShortenOutput<'a> {
    short_key: &'a str,
    created: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CLI::parse();
    init_tracing(config.log_json);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, aborting open deletions");
                shutdown.cancel();
            }
        }
    });

    match config.database_dsn {
        Some(dsn) => {
            info!(storage_backend = "postgres", "starting linkstash admin");
            let store = PostgresStore::connect(
                PostgresSettings::builder()
                    .database_url(dsn)
                    .max_connections(config.max_connections)
                    .shutdown(shutdown)
                    .deletion_buffer(config.deletion_buffer)
                    .build(),
            )
            .await
            .context("failed to open postgres store")?;

            let outcome = run(store.clone(), config.command).await;
            store.close().await;
            outcome
        }
        None => {
            info!(
                storage_backend = "volatile",
                persistent = config.file_storage_path.is_some(),
                "starting linkstash admin"
            );
            let store = VolatileStore::open(VolatileSettings {
                file_path: config.file_storage_path,
                shutdown,
                deletion_buffer: config.deletion_buffer,
            })
            .await
            .context("failed to open volatile store")?;

            run(store, config.command).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run<S: UrlStorage>(store: S, command: Command) -> anyhow::Result<()> {
    let service = ShortenerService::new(store, HexKeyGenerator::new());
    let outcome = execute(&service, command).await;
    service.shutdown().await;
    outcome
}

async fn execute<S: UrlStorage>(
    service: &ShortenerService<S, HexKeyGenerator>,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Shorten { url, user } => {
            let shortened = service.shorten(&url, &user).await?;
            if let Shortened::Existing(key) = &shortened {
                warn!(short_key = %key, "url was already stored");
            }
            let output = ShortenOutput {
                short_key: shortened.key(),
                created: shortened.is_created(),
            };
            println!("{}", serde_json::to_string(&output)?);
        }
        Command::Resolve { key } => {
            println!("{}", service.resolve(&key).await?);
        }
        Command::List { user } => {
            let urls = service.user_urls(&user).await?;
            println!("{}", serde_json::to_string_pretty(&urls)?);
        }
        Command::Delete { user, keys } => {
            let status = service.delete_user_urls(&user, keys)?;
            match status.wait().await {
                PipelineState::Committed { deleted } => println!("deleted {deleted}"),
                PipelineState::Aborted(e) => {
                    return Err(e).context("deletion was aborted");
                }
                other => bail!("deletion stopped in non-terminal state {other:?}"),
            }
        }
        Command::Stats => {
            let stats = service.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Ping => match service.ping().await? {
            PingStatus::Healthy => println!("ok"),
            PingStatus::Unsupported => println!("ping is not supported by the volatile store"),
        },
    }

    Ok(())
}
