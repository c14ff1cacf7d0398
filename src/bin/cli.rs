use anyhow::Context;
use clap::{Parser, Subcommand};
use exam_bank_api::api::{self, QuestionKind};
use exam_bank_api::client::{self, render_tree, ClientError, OutlineLabel, TreeNode};
use exam_bank_api::config::Settings;
use serde::Serialize;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// The address to bind to (overrides SERVER_ADDR)
        #[arg(short, long)]
        addr: Option<SocketAddr>,
    },
    /// Client commands
    Client {
        /// The base URL of the API
        #[arg(long, env = "EXAM_BANK_URL", default_value = exam_bank_api::BASE_URL)]
        url: String,
        #[command(subcommand)]
        command: ClientCommands,
    },
}

#[derive(Subcommand)]
enum ClientCommands {
    /// Category related commands
    Categories {
        #[command(subcommand)]
        command: CategoryCommands,
    },
    /// Chapter related commands
    Chapters {
        #[command(subcommand)]
        command: ChapterCommands,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// Display the category tree of a subject
    Tree {
        subject_id: i32,
        /// Only enabled categories
        #[arg(long)]
        enabled: bool,
        /// Only branches with questions of this type (exam or mock)
        #[arg(long, conflicts_with = "enabled")]
        filtered: Option<QuestionKind>,
        /// Display an indented outline instead of JSON
        #[arg(long)]
        simple: bool,
    },
    /// Show whether a category can be deleted
    Usage { category_id: i32 },
}

#[derive(Subcommand)]
enum ChapterCommands {
    /// Display the chapter tree of a subject
    Tree {
        subject_id: i32,
        /// Include disabled chapters
        #[arg(long)]
        all: bool,
        /// Display an indented outline instead of JSON
        #[arg(long)]
        simple: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exam_bank_api=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_tree<T>(tree: &[TreeNode<T>], simple: bool) -> anyhow::Result<()>
where
    T: OutlineLabel + Serialize,
{
    if simple {
        print!("{}", render_tree(tree));
    } else {
        println!("{}", serde_json::to_string_pretty(tree)?);
    }
    Ok(())
}

fn report(err: ClientError) -> anyhow::Error {
    match err {
        ClientError::NotFound(message) => anyhow::anyhow!("Not found: {message}"),
        err => err.into(),
    }
}

async fn serve(addr: Option<SocketAddr>) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    let addr = addr.unwrap_or(settings.server_addr);

    let pool = api::build_pool(&settings.database_url, settings.pool_size)
        .context("Failed to create database pool")?;
    let app = api::create_router(pool, &settings);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Starting server on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_client(url: &str, command: ClientCommands) -> anyhow::Result<()> {
    match command {
        ClientCommands::Categories { command } => match command {
            CategoryCommands::Tree {
                subject_id,
                enabled,
                filtered,
                simple,
            } => {
                let tree = match filtered {
                    Some(kind) => client::fetch_filtered_category_tree(url, subject_id, kind).await,
                    None => client::fetch_category_tree(url, subject_id, enabled).await,
                }
                .map_err(report)?;
                print_tree(&tree, simple)
            }
            CategoryCommands::Usage { category_id } => {
                let usage = client::fetch_category_usage(url, category_id)
                    .await
                    .map_err(report)?;
                println!("{}", serde_json::to_string_pretty(&usage)?);
                Ok(())
            }
        },
        ClientCommands::Chapters { command } => match command {
            ChapterCommands::Tree {
                subject_id,
                all,
                simple,
            } => {
                let tree = client::fetch_chapter_tree(url, subject_id, all)
                    .await
                    .map_err(report)?;
                print_tree(&tree, simple)
            }
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { addr } => serve(addr).await,
        Commands::Client { url, command } => run_client(&url, command).await,
    }
}
