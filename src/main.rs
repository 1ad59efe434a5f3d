//! # datasearch CLI (`dsearch`)
//!
//! Seeds, enriches and embeds dataset metadata from Kaggle and the
//! HuggingFace Hub, and ranks it with hybrid search.
//!
//! ## Usage
//!
//! ```bash
//! dsearch --config ./config/datasearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsearch init` | Create the SQLite catalog and record the embedding dimension |
//! | `dsearch sources` | List configured sources |
//! | `dsearch seed <source>` | Bulk-load minimal records from the seed feed |
//! | `dsearch enrich <source>` | Enrich MINIMAL and PENDING datasets |
//! | `dsearch latest <source>` | Pull recently changed datasets |
//! | `dsearch embed` | Embed enriched datasets that have no vector |
//! | `dsearch search "<query>"` | Hybrid search |
//! | `dsearch get <id>` | Show one dataset |
//! | `dsearch logs <id>` | Show a dataset's enrichment log |
//! | `dsearch stats` | Per-source lifecycle counts |
//! | `dsearch cycle` | latest + enrich for every source, then embed |
//!
//! ## Examples
//!
//! ```bash
//! dsearch init
//! dsearch seed kaggle
//! dsearch enrich kaggle --batch-size 20
//! dsearch latest huggingface --sort hottest --limit 50
//! dsearch embed --all
//! dsearch search "sentiment analysis movie reviews" --explain
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use datasearch::app::AppContext;
use datasearch::models::{SortOrder, Source};
use datasearch::{config, embed_cmd, get, jobs, logging, migrate, search, sources, stats};

/// datasearch: enrichment pipeline and hybrid search over public dataset
/// catalogs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/datasearch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "dsearch",
    about = "datasearch: enrichment pipeline and hybrid search over public dataset catalogs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/datasearch.toml")]
    config: PathBuf,

    /// Debug-level logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Only warnings and errors.
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the catalog database.
    ///
    /// Idempotent. Fails if the database already records a different
    /// embedding dimension than `db.embedding_dims`.
    Init,

    /// List configured sources.
    Sources,

    /// Bulk-load minimal records from a source's seed feed.
    Seed {
        /// `kaggle` or `huggingface` (`hf`).
        #[arg(value_parser = parse_source)]
        source: Source,

        /// Records per upsert transaction.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Overwrite content of records that already exist (status is kept).
        #[arg(long)]
        force_refresh: bool,
    },

    /// Enrich MINIMAL and PENDING datasets, one call at a time.
    Enrich {
        #[arg(value_parser = parse_source)]
        source: Source,

        /// Maximum datasets to process in this run.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Fetch recently changed datasets.
    Latest {
        #[arg(value_parser = parse_source)]
        source: Source,

        #[arg(long)]
        limit: Option<usize>,

        /// `updated`, `hottest`, or `votes`.
        #[arg(long, value_parser = parse_sort)]
        sort: Option<SortOrder>,
    },

    /// Embed enriched datasets that have no vector yet.
    Embed {
        /// Datasets per encoder call.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Keep going until nothing is left to embed.
        #[arg(long)]
        all: bool,
    },

    /// Hybrid search over ready-for-search datasets.
    Search {
        query: String,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, value_parser = parse_source)]
        source: Option<Source>,

        /// Print the per-signal score breakdown.
        #[arg(long)]
        explain: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show one dataset by id.
    Get { id: String },

    /// Show the enrichment log of one dataset.
    Logs { id: String },

    /// Per-source lifecycle counts and embedding coverage.
    Stats,

    /// One scheduled pass: latest and enrich for every source, then embed.
    Cycle,
}

fn parse_source(s: &str) -> Result<Source, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_sort(s: &str) -> Result<SortOrder, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    if let Commands::Init = cli.command {
        migrate::run_migrations(&cfg).await?;
        println!("Database initialized successfully.");
        return Ok(());
    }

    let ctx = AppContext::open(cfg).await?;

    let result = match cli.command {
        Commands::Init => Ok(()),
        Commands::Sources => {
            sources::list_sources(ctx.registry());
            Ok(())
        }
        Commands::Seed {
            source,
            batch_size,
            force_refresh,
        } => jobs::run_seed(&ctx, source, batch_size, force_refresh).await,
        Commands::Enrich { source, batch_size } => jobs::run_enrich(&ctx, source, batch_size).await,
        Commands::Latest {
            source,
            limit,
            sort,
        } => jobs::run_latest(&ctx, source, limit, sort).await,
        Commands::Embed { batch_size, all } => embed_cmd::run_embed(&ctx, batch_size, all).await,
        Commands::Search {
            query,
            limit,
            source,
            explain,
            json,
        } => search::run_search(&ctx, &query, source, limit, explain, json).await,
        Commands::Get { id } => get::run_get(&ctx, &id).await,
        Commands::Logs { id } => get::run_logs(&ctx, &id).await,
        Commands::Stats => stats::run_stats(&ctx).await,
        Commands::Cycle => jobs::run_cycle(&ctx).await,
    };

    ctx.close().await;
    result
}
