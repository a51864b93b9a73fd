use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use dramabox_core::{logging, ClientRegistry, Config, DramaboxClient, Error};

#[derive(Parser, Debug)]
#[command(name = "dramabox")]
#[command(about = "Dramabox content API client", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, env = "DRAMABOX_CONFIG")]
    config: Option<String>,

    /// Content language; blank selects the configured default
    #[arg(long, env = "DRAMABOX_LANG", default_value = "")]
    lang: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search books by keyword
    Search {
        keyword: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        size: u32,
    },
    /// Home listing
    Home {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
    },
    /// VIP listing
    Vip,
    /// Book detail
    Detail { book_id: String },
    /// Chapters of a book
    Chapters { book_id: String },
    /// Stream URL of one episode
    Stream { book_id: String, episode: u32 },
    /// Stream URLs of every episode of a book
    Batch {
        book_id: String,
        /// Include per-episode failures
        #[arg(long)]
        report: bool,
    },
    /// Category list
    Categories,
    /// Books in a category
    Category {
        id: u32,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        size: u32,
    },
    /// Recommended books
    Recommend,
    /// Signed headers a request would carry right now
    Header,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let registry = match setup(&cli) {
        Ok(registry) => registry,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(&registry, &cli).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: failed to encode output: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!(
                "{}",
                json!({ "code": e.code(), "status": e.http_status(), "message": e.to_string() })
            );
            ExitCode::FAILURE
        }
    }
}

fn setup(cli: &Cli) -> anyhow::Result<ClientRegistry> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    logging::init_logging(&config.logging)?;
    debug!(base_url = %config.upstream.base_url, "Configuration loaded");
    ClientRegistry::new(config).context("failed to build client registry")
}

async fn run(registry: &ClientRegistry, cli: &Cli) -> Result<Value, Error> {
    let client = registry.get(&cli.lang)?;

    match &cli.command {
        Command::Search { keyword, page, size } => to_json(&client.search(keyword, *page, *size).await?),
        Command::Home { page, size } => to_json(&client.list_home(*page, *size).await?),
        Command::Vip => to_json(&client.list_vip().await?),
        Command::Detail { book_id } => to_json(&client.get_detail(book_id).await?),
        Command::Chapters { book_id } => to_json(&client.get_chapters(book_id).await?),
        Command::Stream { book_id, episode } => to_json(&client.get_stream_url(book_id, *episode).await?),
        Command::Batch { book_id, report } => batch(&client, book_id, *report).await,
        Command::Categories => to_json(&client.list_categories().await?),
        Command::Category { id, page, size } => {
            to_json(&client.list_by_category(*id, *page, *size).await?)
        }
        Command::Recommend => to_json(&client.list_recommended().await?),
        Command::Header => to_json(&client.debug_headers().await?),
    }
}

async fn batch(client: &DramaboxClient, book_id: &str, report: bool) -> Result<Value, Error> {
    let batch = client.batch_download_report(book_id).await?;
    if batch.targets.is_empty() {
        return Err(Error::not_found(format!("no episode of book {book_id} could be resolved")));
    }
    if report {
        to_json(&batch)
    } else {
        to_json(&batch.targets)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, Error> {
    Ok(serde_json::to_value(value)?)
}
