use anyhow::Context;
use clap::{Parser, Subcommand};
use rewind_common::{EntityRef, attrs};
use rewind_kernel::{MemoryStore, RecordStore};
use rewind_persist::{Journal, Operation};
use rewind_schema::{EntitySchema, RelationSchema};
use rewind_tools::HistoryInspector;
use rewind_undo::{CaptureContext, EngineConfig, TransactionLog, UndoEngine, Validation};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rewind-cli", about = "CLI tool for rewind operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Capture a destroy of a post with comments and tags, then undo it
    Demo {
        /// Number of comments on the demo post
        #[arg(short, long, default_value = "3")]
        comments: usize,
        /// Engine configuration file (YAML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Save the resulting history to this journal directory
        #[arg(long)]
        journal: Option<PathBuf>,
    },
    /// Verify a saved journal and describe its transactions
    Inspect {
        /// Journal directory
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("rewind-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", rewind_common::crate_info());
            println!("schema: {}", rewind_schema::crate_info());
            println!("kernel: {}", rewind_kernel::crate_info());
            println!("persist: {}", rewind_persist::crate_info());
            println!("undo: {}", rewind_undo::crate_info());
            println!("tools: {}", rewind_tools::crate_info());
        }
        Commands::Demo {
            comments,
            config,
            journal,
        } => {
            let config = match config {
                Some(path) => EngineConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => EngineConfig::default(),
            };
            run_demo(comments, config, journal)?;
        }
        Commands::Inspect { path } => {
            let journal = Journal::open(&path)
                .with_context(|| format!("opening journal {}", path.display()))?;
            journal.verify_integrity().context("integrity check")?;
            let contents = journal.load()?;
            let log = TransactionLog::from_parts(contents.revisions, contents.transactions);
            let codec = EngineConfig::default().codec();

            println!("{}", HistoryInspector::summary(&log));
            for transaction in log.transactions() {
                if let Some(info) = HistoryInspector::describe_transaction(&log, &codec, transaction.id) {
                    println!("{info}");
                }
            }
        }
    }

    Ok(())
}

fn demo_schema() -> anyhow::Result<RelationSchema> {
    Ok(RelationSchema::new()
        .with(
            EntitySchema::new("Post")
                .owned_many("comments", "Comment")
                .reference_many("tags", "Tag"),
        )?
        .with(EntitySchema::new("Comment"))?
        .with(EntitySchema::new("Tag"))?)
}

fn run_demo(comments: usize, config: EngineConfig, journal: Option<PathBuf>) -> anyhow::Result<()> {
    let schema = demo_schema()?;
    let mut store = MemoryStore::from_schema(&schema);
    let mut engine = UndoEngine::new(schema, config);
    let mut ctx = CaptureContext::new();

    let post = EntityRef::new("Post", store.insert("Post", attrs([("title", "Hello")]))?.0);
    let mut children = Vec::with_capacity(comments);
    for i in 0..comments {
        let id = store.insert("Comment", attrs([("body", format!("comment {i}"))]))?;
        children.push(EntityRef::new("Comment", id.0));
    }
    let tag = EntityRef::new("Tag", store.insert("Tag", attrs([("name", "rust")]))?.0);
    store.replace_related(&post, "comments", &children)?;
    store.replace_related(&post, "tags", &[tag])?;
    println!("Before: records={}", store.len());

    let tx = engine.begin(&mut ctx, Some("delete post"));
    let key = engine.capture(&ctx, &store, Operation::Destroy, &post, Validation::Passed)?;
    tracing::info!(%tx, revision = ?key, "captured destroy");
    for child in &children {
        store.delete(child)?;
    }
    store.delete(&post)?;
    println!("After destroy: records={}", store.len());

    let report = engine.undo(&mut ctx, tx, &mut store)?;
    println!(
        "After undo: records={} restored={} missing_references={}",
        store.len(),
        report.restored,
        report.missing_references.len()
    );
    println!(
        "Comments linked: {}",
        store.find_related(&post, "comments")?.len()
    );

    if let Some(path) = journal {
        engine
            .save(&path)
            .with_context(|| format!("saving journal {}", path.display()))?;
        println!("Journal saved to {}", path.display());
    }
    Ok(())
}
