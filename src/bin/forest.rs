//! Forest CLI — knowledge base engine with a semantic note graph.
//!
//! Usage:
//!   forest capture "Title" --body "..." [--tag t]...
//!   forest search "query" / forest find --term "..." / forest context --tag t
//!   forest import "Doc title" --file notes.md
//!   forest snapshot take|list|diff|growth
//!   forest admin recompute-embeddings|retag|rescore|backfill

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use forest::{
    admin::NormalizerTagSource, document::ImportOptions, store::SnapshotFilter, CancellationToken,
    CaptureInput, ChunkStrategy, ContextParams, DocumentId, ForestConfig, ForestEngine,
    MetadataFilter, NotePatch, RetagOptions, SegmentId, SemanticSearchParams, SnapshotType,
    SortOrder,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forest", version, about = "Knowledge base engine with a semantic note graph")]
struct Cli {
    /// Path to the config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a new note
    Capture {
        title: String,
        #[arg(long, default_value = "")]
        body: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Show a note (id, prefix, title, or @ordinal)
    Show { reference: String },
    /// Update a note's title, body, or tags
    Update {
        reference: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Delete a note (cascades its edges)
    Delete { reference: String },
    /// Create a manual edge between two notes
    Link { a: String, b: String },
    /// Remove an edge (src::dst or edge-id prefix)
    Unlink { reference: String },
    /// Show unpersisted suggestions for a note
    Suggest {
        reference: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Semantic search over embeddings
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 0.0)]
        min_score: f32,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    /// Metadata search with filters
    Find {
        #[arg(long)]
        term: Option<String>,
        #[arg(long = "tag")]
        tags_all: Vec<String>,
        #[arg(long = "any-tag")]
        tags_any: Vec<String>,
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long, default_value = "recent")]
        sort: String,
        #[arg(long)]
        show_chunks: bool,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Expand the neighborhood around a note
    Neighbors {
        reference: String,
        #[arg(long, default_value_t = 1)]
        depth: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Topology summary seeded by tag or query
    Context {
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        query: Option<String>,
        #[arg(long, default_value_t = 500)]
        budget: usize,
    },
    /// Import a markdown file as a chunked document
    Import {
        title: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "headers")]
        strategy: String,
        #[arg(long, default_value_t = 1200)]
        size: usize,
        #[arg(long, default_value_t = 120)]
        overlap: usize,
        #[arg(long)]
        no_root: bool,
        #[arg(long)]
        no_auto_link: bool,
    },
    /// Document maintenance
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },
    /// List all tags with counts
    Tags,
    /// Snapshot operations
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },
    /// Batch admin operations
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum DocCommands {
    /// Show a document and its chunk layout
    Show { document_id: String },
    /// Delete one chunk by segment id
    DeleteChunk {
        document_id: String,
        segment_id: String,
    },
    /// Reorder chunks by segment id
    Reorder {
        document_id: String,
        segment_ids: Vec<String>,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// Take a manual snapshot
    Take,
    /// List snapshots
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Diff the graph against the snapshot baseline at a time
    Diff {
        #[arg(long)]
        since: DateTime<Utc>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Growth timeline from snapshots
    Growth {
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Re-embed every note with the current provider
    RecomputeEmbeddings {
        #[arg(long)]
        rescore: bool,
    },
    /// Rederive tags across all notes
    Retag {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long)]
        skip_unchanged: bool,
    },
    /// Rescore every note's edges
    Rescore,
    /// Seed canonical document rows for legacy chunk notes
    Backfill,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forest=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> forest::ForestResult<()> {
    let config_path = cli
        .config
        .unwrap_or_else(forest::config::default_config_path);
    let mut config = ForestConfig::load(&config_path)?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    let engine = ForestEngine::open(config)?;

    match cli.command {
        Commands::Capture { title, body, tags } => {
            let note = engine
                .capture(CaptureInput {
                    title,
                    body,
                    tags,
                    ..Default::default()
                })
                .await?;
            println!("{}  {}", note.id, note.title);
        }
        Commands::Show { reference } => {
            let note = engine.get_note(&reference)?;
            println!("# {}  [{}]", note.title, note.id);
            if !note.tags.is_empty() {
                println!("tags: {}", note.tags.join(", "));
            }
            println!("updated: {}", note.updated_at.to_rfc3339());
            println!("\n{}", note.body);
            let edges = engine.edges_for(note.id.as_str())?;
            if !edges.is_empty() {
                println!("\nedges:");
                for edge in edges {
                    let other = if edge.source_id == note.id {
                        &edge.target_id
                    } else {
                        &edge.source_id
                    };
                    println!("  {:.3}  {}  ({})", edge.score, other, edge.edge_type);
                }
            }
        }
        Commands::Update {
            reference,
            title,
            body,
            tags,
        } => {
            let patch = NotePatch {
                title,
                body,
                tags: if tags.is_empty() { None } else { Some(tags) },
            };
            let note = engine.update_note(&reference, patch).await?;
            println!("updated {}", note.id);
        }
        Commands::Delete { reference } => {
            engine.delete_note(&reference)?;
            println!("deleted");
        }
        Commands::Link { a, b } => {
            let edge = engine.link_manual(&a, &b)?;
            println!("{} -- {}", edge.source_id, edge.target_id);
        }
        Commands::Unlink { reference } => {
            engine.unlink(&reference)?;
            println!("unlinked");
        }
        Commands::Suggest { reference, limit } => {
            for s in engine.suggestions(&reference, limit)? {
                println!("{:.3}  {}  {}", s.breakdown.score, s.note_id, s.title);
            }
        }
        Commands::Search {
            query,
            limit,
            offset,
            min_score,
            tags,
        } => {
            let result = engine
                .semantic_search(
                    &query,
                    &SemanticSearchParams {
                        limit,
                        offset,
                        min_score,
                        tags: if tags.is_empty() { None } else { Some(tags) },
                    },
                )
                .await?;
            if result.used_fallback {
                eprintln!("(query not embeddable; metadata fallback)");
            }
            for (i, hit) in result.hits.iter().enumerate() {
                let note = engine.get_note(hit.note_id.as_str())?;
                println!("@{i}  {:.3}  {}  {}", hit.similarity, hit.note_id, note.title);
            }
            println!("total: {}", result.total);
        }
        Commands::Find {
            term,
            tags_all,
            tags_any,
            since,
            until,
            sort,
            show_chunks,
            limit,
        } => {
            let sort = match sort.as_str() {
                "score" => SortOrder::Score,
                "degree" => SortOrder::Degree,
                _ => SortOrder::Recent,
            };
            let notes = engine.metadata_search(&MetadataFilter {
                term,
                tags_all,
                tags_any,
                since,
                until,
                sort,
                show_chunks,
                limit: Some(limit),
                ..Default::default()
            })?;
            for (i, note) in notes.iter().enumerate() {
                println!("@{i}  {}  {}", note.id, note.title);
            }
        }
        Commands::Neighbors {
            reference,
            depth,
            limit,
        } => {
            let hood = engine.neighborhood(&reference, depth, limit)?;
            for note in &hood.notes {
                println!("{}  {}", note.id, note.title);
            }
            println!("{} notes, {} edges", hood.notes.len(), hood.edges.len());
        }
        Commands::Context { tag, query, budget } => {
            let summary = engine
                .context(&ContextParams { tag, query, budget })
                .await?;
            print!("{}", summary.rendered);
            if summary.truncated {
                eprintln!("(truncated at {} tokens)", summary.token_estimate);
            }
        }
        Commands::Import {
            title,
            file,
            strategy,
            size,
            overlap,
            no_root,
            no_auto_link,
        } => {
            let body = std::fs::read_to_string(&file).map_err(|e| {
                forest::ForestError::ValidationFailed(format!(
                    "reading {}: {e}",
                    file.display()
                ))
            })?;
            let chunk_strategy = match strategy.as_str() {
                "size" => ChunkStrategy::SizeOverlap { size, overlap },
                "hybrid" => ChunkStrategy::Hybrid { size, overlap },
                _ => ChunkStrategy::Headers,
            };
            let outcome = engine
                .import_document(
                    &title,
                    &body,
                    ImportOptions {
                        chunk_strategy,
                        auto_link: !no_auto_link,
                        create_root: !no_root,
                        source_file: Some(file.display().to_string()),
                        template_id: None,
                    },
                )
                .await?;
            println!("document {}", outcome.document_id);
            for (i, id) in outcome.chunk_note_ids.iter().enumerate() {
                println!("  chunk {i}: {id}");
            }
        }
        Commands::Doc { command } => match command {
            DocCommands::Show { document_id } => {
                let id = DocumentId::from_string(document_id);
                let document = engine.get_document(&id)?;
                println!("# {}  v{}  [{}]", document.title, document.version, document.id);
                for chunk in engine.document_chunks(&id)? {
                    println!(
                        "  [{}] segment {}  note {}  @{}+{}",
                        chunk.chunk_order, chunk.segment_id, chunk.note_id, chunk.offset,
                        chunk.length
                    );
                }
            }
            DocCommands::DeleteChunk {
                document_id,
                segment_id,
            } => {
                let outcome = engine.delete_chunk(
                    &DocumentId::from_string(document_id),
                    &SegmentId::from_string(segment_id),
                )?;
                println!("document at v{}", outcome.version);
            }
            DocCommands::Reorder {
                document_id,
                segment_ids,
            } => {
                let order: Vec<SegmentId> =
                    segment_ids.into_iter().map(SegmentId::from_string).collect();
                let outcome =
                    engine.reorder_document(&DocumentId::from_string(document_id), &order)?;
                println!("document at v{}", outcome.version);
            }
        },
        Commands::Tags => {
            for (tag, count) in engine.all_tags()? {
                println!("{count:5}  {tag}");
            }
        }
        Commands::Snapshot { command } => match command {
            SnapshotCommands::Take => {
                let snapshot = engine.create_snapshot(SnapshotType::Manual)?;
                println!(
                    "{}  nodes={} edges={} tags={}",
                    snapshot.id, snapshot.node_count, snapshot.edge_count, snapshot.tag_count
                );
            }
            SnapshotCommands::List { limit } => {
                for s in engine.list_snapshots(&SnapshotFilter {
                    limit: Some(limit),
                    ..Default::default()
                })? {
                    println!(
                        "{}  {}  {}  nodes={} edges={}",
                        s.taken_at.to_rfc3339(),
                        s.snapshot_type,
                        s.id,
                        s.node_count,
                        s.edge_count
                    );
                }
            }
            SnapshotCommands::Diff { since, limit } => {
                let report = engine.diff(since, limit)?;
                if let Some(warning) = &report.warning {
                    eprintln!("warning: {warning}");
                }
                println!(
                    "nodes: +{} -{} ~{}",
                    report.nodes.added.total(),
                    report.nodes.removed.total(),
                    report.nodes.updated.total()
                );
                println!(
                    "edges: +{} -{} ~{}",
                    report.edges.added.total(),
                    report.edges.removed.total(),
                    report.edges.changed.total()
                );
                println!(
                    "counts: {} -> {} nodes, {} -> {} edges",
                    report.before.nodes, report.after.nodes, report.before.edges,
                    report.after.edges
                );
            }
            SnapshotCommands::Growth {
                since,
                until,
                limit,
            } => {
                for point in engine.growth(since, until, limit)? {
                    let marker = if point.live { " (live)" } else { "" };
                    println!(
                        "{}  nodes={} edges={} tags={}{marker}",
                        point.taken_at.to_rfc3339(),
                        point.node_count,
                        point.edge_count,
                        point.tag_count
                    );
                }
            }
        },
        Commands::Admin { command } => {
            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c_cancel.cancel();
                }
            });
            match command {
                AdminCommands::RecomputeEmbeddings { rescore } => {
                    let report = engine.recompute_embeddings(rescore, &cancel).await?;
                    print_report(&report);
                }
                AdminCommands::Retag {
                    dry_run,
                    limit,
                    skip,
                    skip_unchanged,
                } => {
                    let report = engine
                        .retag_all(
                            &NormalizerTagSource,
                            &RetagOptions {
                                dry_run,
                                limit,
                                skip,
                                skip_unchanged,
                            },
                            &cancel,
                        )
                        .await?;
                    print_report(&report);
                }
                AdminCommands::Rescore => {
                    let report = engine.rescore_all(&cancel)?;
                    print_report(&report);
                }
                AdminCommands::Backfill => {
                    let repaired = engine.backfill_canonical_documents()?;
                    println!("backfilled {repaired} documents");
                }
            }
        }
        Commands::Config => {
            let rendered = toml::to_string_pretty(engine.config()).map_err(|e| {
                forest::ForestError::Internal(format!("rendering config: {e}"))
            })?;
            print!("{rendered}");
        }
    }
    Ok(())
}

fn print_report(report: &forest::BatchReport) {
    println!(
        "processed={} changed={} skipped={} failed={}{}",
        report.processed,
        report.changed,
        report.skipped,
        report.failed.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    for (id, error) in &report.failed {
        eprintln!("  {id}: {error}");
    }
}
