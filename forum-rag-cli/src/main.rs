use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{ArgAction, Args, Parser, Subcommand};
use forum_rag::{RagConfig, RetryPolicy};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "forum-rag", version, about = "Refine, categorize, index and query forum posts")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(flatten)]
    pacing: PacingArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Rate limiting and retry settings shared by every remote call.
#[derive(Args, Debug)]
struct PacingArgs {
    /// Pause after this many remote calls.
    #[arg(long, global = true, default_value_t = 10)]
    throttle_every: usize,
    /// Length of each pause, in milliseconds.
    #[arg(long, global = true, default_value_t = 1000)]
    throttle_pause_ms: u64,
    /// Attempts per remote call, including the first.
    #[arg(long, global = true, default_value_t = 3)]
    max_attempts: u32,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Refine scraped posts into records with keywords and condensed comments.
    Refine {
        /// Raw CSV with talkNo, Title, Contents, Comments, ViewCount, Date.
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Posts per generation call.
        #[arg(long, default_value_t = 20)]
        batch_size: usize,
    },
    /// Generate categories from the keyword vocabulary of refined records.
    Categories {
        #[arg(long)]
        input: PathBuf,
        /// JSON file to write the category set to.
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = forum_rag::category::DEFAULT_CATEGORY_COUNT)]
        count: usize,
    },
    /// Assign primary and secondary categories to refined records.
    Classify {
        #[arg(long)]
        input: PathBuf,
        /// Category set written by `categories`.
        #[arg(long)]
        categories: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Embed records and write the index with its vectors.
    Embed {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Exclusive token limit for embedded content.
        #[arg(long, default_value_t = forum_rag::MAX_TOKENS)]
        max_tokens: usize,
    },
    /// Print the posts most similar to a query.
    Search {
        /// Index written by `embed`.
        #[arg(long)]
        index: PathBuf,
        query: String,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
        /// Print results as JSON lines.
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Answer a question grounded on the most similar posts.
    Answer {
        #[arg(long)]
        index: PathBuf,
        question: String,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("forum_rag={default_level},warn")));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn build_config(pacing: &PacingArgs, top_k: usize, max_tokens: usize) -> Result<RagConfig> {
    let config = RagConfig::builder()
        .top_k(top_k)
        .max_tokens(max_tokens)
        .throttle(pacing.throttle_every, Duration::from_millis(pacing.throttle_pause_ms))
        .retry(RetryPolicy { max_attempts: pacing.max_attempts, ..RetryPolicy::default() })
        .build()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; variables may come from the environment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let defaults = RagConfig::default();

    match cli.command {
        Commands::Refine { input, output, batch_size } => {
            let config = build_config(&cli.pacing, defaults.top_k, defaults.max_tokens)?;
            commands::refine(&input, &output, batch_size, config).await
        }
        Commands::Categories { input, output, count } => {
            let config = build_config(&cli.pacing, defaults.top_k, defaults.max_tokens)?;
            commands::categories(&input, &output, count, config).await
        }
        Commands::Classify { input, categories, output } => {
            let config = build_config(&cli.pacing, defaults.top_k, defaults.max_tokens)?;
            commands::classify(&input, &categories, &output, config).await
        }
        Commands::Embed { input, output, max_tokens } => {
            let config = build_config(&cli.pacing, defaults.top_k, max_tokens)?;
            commands::embed(&input, &output, config).await
        }
        Commands::Search { index, query, top_k, json } => {
            let config = build_config(&cli.pacing, top_k, defaults.max_tokens)?;
            commands::search(&index, &query, json, config).await
        }
        Commands::Answer { index, question, top_k } => {
            let config = build_config(&cli.pacing, top_k, defaults.max_tokens)?;
            commands::answer(&index, &question, config).await
        }
    }
}
