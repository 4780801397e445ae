//! heritage-search CLI - drives search sessions against fixture sources.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use heritage_search::{
    fanout::SourceSnapshot,
    saved::{FileStorage, SavedSearches},
    sources::FixtureSource,
    FanOut, QueryCodec, QueryState, SearchSource, SessionConfig,
};

/// heritage-search - Search sessions over collection catalogues
#[derive(Parser)]
#[command(name = "heritage-search")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search all fixture sources
    Search(SearchArgs),

    /// List the sources defined by fixture files
    Sources(SourcesArgs),

    /// Save a query under a name
    Save(SaveArgs),

    /// List saved queries
    Saved(SavedArgs),
}

#[derive(Parser)]
struct SearchArgs {
    /// Search term, or a query string such as "q=wave&artist=Hokusai"
    query: String,

    /// Fixture files, one source each
    #[arg(short = 'x', long, required = true, num_args = 1..)]
    fixtures: Vec<PathBuf>,

    /// Only search these sources (comma-separated names or shortcuts)
    #[arg(short, long, value_delimiter = ',')]
    sources: Option<Vec<String>>,

    /// Number of extra pages to load per source
    #[arg(short, long, default_value = "0")]
    more: usize,

    /// Prefetch the page after each loaded one
    #[arg(long)]
    prefetch: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Parser)]
struct SourcesArgs {
    /// Fixture files, one source each
    #[arg(short = 'x', long, required = true, num_args = 1..)]
    fixtures: Vec<PathBuf>,
}

#[derive(Parser)]
struct SaveArgs {
    /// Name of the saved search
    name: String,

    /// Search term or query string
    query: String,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Parser)]
struct SavedArgs {
    #[command(flatten)]
    store: StoreArgs,
}

#[derive(Args)]
struct StoreArgs {
    /// JSON file holding saved searches
    #[arg(long, default_value = "saved-searches.json")]
    store: PathBuf,

    /// Namespace of the storage keys
    #[arg(long, default_value = "heritage")]
    namespace: String,

    /// Source shortcut the searches belong to
    #[arg(long, default_value = "all")]
    source: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Compact single-line output
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    if cli.verbose {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::DEBUG)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    match cli.command {
        Commands::Search(args) => run_search(args).await,
        Commands::Sources(args) => list_sources(args),
        Commands::Save(args) => save_search(args),
        Commands::Saved(args) => list_saved(args),
    }
}

fn parse_query(input: &str) -> QueryState {
    let codec = QueryCodec::default();
    if input.contains('=') {
        codec.parse_query_string(input)
    } else {
        codec.normalize(&QueryState::new(input))
    }
}

fn load_sources(paths: &[PathBuf]) -> Result<Vec<FixtureSource>> {
    paths
        .iter()
        .map(|path| {
            FixtureSource::from_file(path)
                .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))
        })
        .collect()
}

fn list_sources(args: SourcesArgs) -> Result<()> {
    println!("Available sources:\n");
    for source in load_sources(&args.fixtures)? {
        let facets = source.config().facet_keys().join(", ");
        println!(
            "  {:<10} - {} ({} items{})",
            source.shortcut(),
            source.name(),
            source.len(),
            if facets.is_empty() {
                String::new()
            } else {
                format!("; facets: {}", facets)
            }
        );
    }
    println!();
    println!("Usage: heritage-search search \"q=wave&artist=Hokusai\" -x prints.json");
    Ok(())
}

async fn run_search(args: SearchArgs) -> Result<()> {
    let mut fanout = FanOut::new().with_config(SessionConfig {
        prefetch: args.prefetch,
    });

    for source in load_sources(&args.fixtures)? {
        let wanted = args.sources.as_ref().map_or(true, |names| {
            names
                .iter()
                .any(|n| n == source.name() || n == source.shortcut())
        });
        if wanted {
            fanout.add_source(source);
        }
    }

    if fanout.source_count() == 0 {
        anyhow::bail!("No valid sources specified");
    }

    let query = parse_query(&args.query);
    if query.is_empty() {
        anyhow::bail!("Query cannot be empty");
    }

    fanout.run_query(&query).await;
    for snapshot in fanout.snapshots() {
        for _ in 0..args.more {
            fanout.load_more(&snapshot.name).await?;
        }
    }

    let snapshots = fanout.snapshots();
    match args.format {
        OutputFormat::Text => print_text(&query, &snapshots),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshots)?),
        OutputFormat::Compact => {
            for snapshot in &snapshots {
                for item in &snapshot.session.items {
                    println!("{}\t{}\t{}", snapshot.shortcut, item.title, item.url);
                }
            }
        }
    }

    Ok(())
}

fn print_text(query: &QueryState, snapshots: &[SourceSnapshot]) {
    println!("\nSearch results for \"{}\":", query.term);

    for snapshot in snapshots {
        let session = &snapshot.session;
        let total = session
            .total
            .map(|t| t.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "\n== {} ({:?}, {} of {}) ==\n",
            snapshot.name,
            session.status,
            session.items.len(),
            total
        );

        if let Some(error) = &session.error {
            println!("   Error: {}", error);
            continue;
        }

        for (i, item) in session.items.iter().enumerate() {
            println!("{}. {}", i + 1, item.title);
            if !item.url.is_empty() {
                println!("   URL: {}", item.url);
            }
            if let Some(description) = &item.description {
                let short: String = description.chars().take(150).collect();
                if short.len() < description.len() {
                    println!("   {}...", short);
                } else {
                    println!("   {}", short);
                }
            }
            if let Some(date) = &item.date {
                println!("   Date: {}", date);
            }
        }

        for facet in &session.facets {
            let values: Vec<String> = facet
                .values
                .iter()
                .map(|v| {
                    let mark = if v.selected { "*" } else { "" };
                    format!("{}{} ({})", mark, v.value, v.count)
                })
                .collect();
            println!("\n   {}: {}", facet.key, values.join(", "));
        }

        if let Some(error) = &session.append_error {
            println!("\n   Loading more failed: {}", error);
        } else if session.continuation.is_some() {
            println!("\n   More results available (--more)");
        }
    }
    println!();
}

fn saved_searches(args: &StoreArgs) -> SavedSearches {
    SavedSearches::new(
        Arc::new(FileStorage::new(&args.store)),
        &args.namespace,
        &args.source,
        QueryCodec::default(),
    )
}

fn save_search(args: SaveArgs) -> Result<()> {
    let query = parse_query(&args.query);
    saved_searches(&args.store).save(&args.name, &query)?;
    println!("Saved \"{}\"", args.name.trim());
    Ok(())
}

fn list_saved(args: SavedArgs) -> Result<()> {
    let saved = saved_searches(&args.store);
    let entries = saved.list()?;
    if entries.is_empty() {
        println!("No saved searches under {}", saved.key());
        return Ok(());
    }
    for entry in entries {
        println!("  {:<20} ?{}", entry.name, entry.query);
    }
    Ok(())
}
