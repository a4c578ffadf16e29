//! Command-line front end for the feed-polling engine.
//!
//! One-shot subcommands (`add`, `ls`, `remove`, `change`, `get`) operate on
//! the persisted subscription state and exit; `run` starts the scheduler
//! and prints delivery batches to stdout until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use feedrelay::config::Config;
use feedrelay::dispatch::{self, Dispatcher};
use feedrelay::engine::{Engine, GetTarget};
use feedrelay::store::{JsonFileStore, SubscriptionStore};

#[derive(Parser)]
#[command(name = "feedrelay", version, about = "Channel-scoped RSS/Atom feed poller")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "feedrelay.toml")]
    config: PathBuf,

    /// Path to the JSON subscription state file
    #[arg(long, default_value = "feedrelay-state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Subscribe a channel to a feed URL
    Add {
        channel: String,
        url: String,
        /// Optional cron expression (5 or 6 space-separated fields)
        #[arg(trailing_var_arg = true)]
        cron: Vec<String>,
    },
    /// List a channel's subscriptions
    Ls { channel: String },
    /// Unsubscribe a channel from the feed at a list index
    Remove { channel: String, index: usize },
    /// Change the cron schedule of the feed at a list index
    Change {
        channel: String,
        index: usize,
        /// New cron expression; omit to reset to the configured default
        #[arg(trailing_var_arg = true)]
        cron: Vec<String>,
    },
    /// Fetch the most recent items of one feed (by index) or all feeds
    Get {
        channel: String,
        /// "all" or a list index
        #[arg(default_value = "all")]
        target: String,
        /// Maximum items per feed
        #[arg(long, default_value_t = 15)]
        count: usize,
    },
    /// Run the scheduler, printing delivery batches until interrupted
    Run,
}

fn join_cron(fields: &[String]) -> Option<String> {
    if fields.is_empty() {
        None
    } else {
        Some(fields.join(" "))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feedrelay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config).context("loading configuration")?;
    let store = Arc::new(
        SubscriptionStore::open(Box::new(JsonFileStore::new(&args.state)))
            .context("loading subscription state")?,
    );

    let (dispatcher, mut rx) = Dispatcher::channel(64);
    let engine = Engine::new(config, store, dispatcher).context("building engine")?;

    match args.command {
        Command::Add { channel, url, cron } => {
            let outcome = engine
                .add(&channel, &url, join_cron(&cron).as_deref())
                .await?;
            let title = outcome.title.as_deref().unwrap_or(&outcome.url);
            if outcome.reused {
                println!(
                    "subscribed to existing feed [{title}] at index {} (cron: {})",
                    outcome.index, outcome.cron_expr
                );
            } else {
                println!(
                    "subscribed to [{title}] at index {} (cron: {})",
                    outcome.index, outcome.cron_expr
                );
            }
        }
        Command::Ls { channel } => {
            let rows = engine.list(&channel);
            if rows.is_empty() {
                println!("no subscriptions for {channel}");
            }
            for row in rows {
                println!(
                    "{}. [{}] {} (cron: {})",
                    row.index,
                    row.title.as_deref().unwrap_or("untitled"),
                    row.url,
                    row.cron_expr
                );
            }
        }
        Command::Remove { channel, index } => {
            engine.remove(&channel, index)?;
            println!("unsubscribed {channel} from index {index}");
        }
        Command::Change {
            channel,
            index,
            cron,
        } => {
            let expr = engine.change(&channel, index, join_cron(&cron).as_deref())?;
            println!("schedule at index {index} is now: {expr}");
        }
        Command::Get {
            channel,
            target,
            count,
        } => {
            let target = match target.as_str() {
                "all" => GetTarget::All,
                n => GetTarget::Index(
                    n.parse()
                        .context("target must be \"all\" or a list index")?,
                ),
            };
            let summary_max = engine.config().summary_max_chars;
            for result in engine.get(&channel, target, count).await? {
                let title = result.info.title.as_deref().unwrap_or(&result.info.url);
                match result.items {
                    Ok(items) => {
                        println!(
                            "{}",
                            dispatch::render_get(title, &result.info.url, &items, summary_max)
                        );
                    }
                    Err(e) => println!("[{title}] fetch failed: {e}"),
                }
            }
        }
        Command::Run => {
            let summary_max = engine.config().summary_max_chars;
            engine.start();

            let printer = tokio::spawn(async move {
                while let Some(batch) = rx.recv().await {
                    println!("--> {}", batch.channel);
                    println!("{}", dispatch::render_push(&batch, summary_max));
                }
            });

            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            tracing::info!("Shutting down");
            drop(engine);
            printer.abort();
        }
    }

    Ok(())
}
