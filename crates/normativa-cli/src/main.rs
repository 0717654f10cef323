//! CLI entry point for the Normativa backend: ingestion, search, answers and evaluation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use normativa_core::config::{set_docs_dir, Config};
use normativa_core::eval::{evaluate, load_gold, summarize, write_jsonl};
use normativa_core::providers::ProviderSettings;
use normativa_core::{
    app_data_dir, load_config, load_config_from, status, Assistant, IndexBuilder, IndexPaths,
    ProviderKind, ProviderRegistry, Retriever, SourceTable,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "normativa")]
#[command(about = "Normativa: grounded answers over university regulations")]
struct Cli {
    /// Config file to use instead of the one in the app data directory.
    #[arg(long, global = true, env = "NORMATIVA_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status and where the index lives.
    Status,
    /// Show where Normativa stores its config and index (app data directory).
    DataDir,
    /// Set the documents folder used by `ingest` and save it to the config.
    SetDocs {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Chunk, embed and index every document under the documents folder.
    Ingest {
        /// Documents folder (defaults to `docs_dir` from config).
        #[arg(long, value_name = "PATH")]
        docs: Option<PathBuf>,
        /// Index directory (defaults to `index_dir` from config).
        #[arg(long, value_name = "PATH")]
        index: Option<PathBuf>,
        /// Source metadata table (defaults to `sources.toml` in the documents folder).
        #[arg(long, value_name = "FILE")]
        sources: Option<PathBuf>,
    },
    /// Show the chunks closest to a query.
    Search {
        #[arg(value_name = "QUERY")]
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long, value_name = "PATH")]
        index: Option<PathBuf>,
    },
    /// Answer a question from the indexed regulations.
    Ask {
        #[arg(value_name = "QUESTION", required = true, num_args = 1..)]
        question: Vec<String>,
        /// chatgpt, deepseek or ollama (defaults to `provider.name` from config).
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long, value_name = "PATH")]
        index: Option<PathBuf>,
    },
    /// Run a gold set of questions through one or more providers.
    Eval {
        /// JSON array of `{question, expected}`.
        #[arg(long, value_name = "FILE")]
        gold: PathBuf,
        /// Per-question results (JSON Lines).
        #[arg(long, value_name = "FILE", default_value = "eval_results.jsonl")]
        out: PathBuf,
        /// Per-provider summary (JSON Lines).
        #[arg(long, value_name = "FILE", default_value = "eval_summary.jsonl")]
        summary: PathBuf,
        /// Providers to evaluate (defaults to all).
        #[arg(long, num_args = 1..)]
        providers: Vec<String>,
        #[arg(long, value_name = "PATH")]
        index: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("Normativa backend");
            println!("  core: {}", status());
            match config.index_dir() {
                Some(dir) => {
                    let paths = IndexPaths::new(dir);
                    let built = paths.vector_index().is_file() && paths.metadata().is_file();
                    println!("  index: {} ({})", paths.root().display(), if built { "built" } else { "missing" });
                }
                None => println!("  index: unknown location"),
            }
            if let Some(docs) = config.docs_dir() {
                println!("  docs: {}", docs.display());
            }
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::SetDocs { path } => {
            set_docs_dir(&path).with_context(|| format!("cannot use {} as documents folder", path.display()))?;
            println!("Documents folder set to {}", path.display());
        }
        Commands::Ingest { docs, index, sources } => ingest(&config, docs, index, sources)?,
        Commands::Search { query, k, index } => {
            let retriever = open_retriever(&config, index)?;
            let k = k.unwrap_or(config.retrieval.k);
            for (i, hit) in retriever.search(&query, k)?.iter().enumerate() {
                println!("{}. [{:.3}] {}", i + 1, hit.score, hit.title);
                println!("   {}", preview(&hit.text, 160));
            }
        }
        Commands::Ask {
            question,
            provider,
            k,
            index,
        } => {
            let question = question.join(" ");
            let name = provider.unwrap_or_else(|| config.provider.name.clone());
            let retriever = Arc::new(open_retriever(&config, index)?);
            let provider = ProviderRegistry::new(config.provider_settings())
                .build_named(&name)
                .with_context(|| format!("cannot use provider '{name}'"))?;
            let assistant = Assistant::new(retriever, provider).with_top_k(k.unwrap_or(config.retrieval.k));
            match assistant.ask(&question) {
                Ok(answer) => {
                    println!("{}", answer.answer);
                    if !answer.references.is_empty() {
                        println!();
                        println!("Referencias:");
                        for title in &answer.references {
                            println!("- {title}");
                        }
                    }
                }
                Err(e) => {
                    eprintln!("{}", e.public_message());
                    std::process::exit(1);
                }
            }
        }
        Commands::Eval {
            gold,
            out,
            summary,
            providers,
            index,
        } => run_eval(&config, &gold, &out, &summary, providers, index)?,
    }
    Ok(())
}

fn ingest(config: &Config, docs: Option<PathBuf>, index: Option<PathBuf>, sources: Option<PathBuf>) -> Result<()> {
    let docs = docs
        .or_else(|| config.docs_dir())
        .context("no documents folder; pass --docs or set docs_dir in the config")?;
    let paths = index_paths(config, index)?;
    let sources = sources
        .or_else(|| config.sources_path())
        .map(|p| SourceTable::load(&p))
        .unwrap_or_default();
    info!(docs = %docs.display(), sources = sources.len(), "starting ingestion");

    let options = config.ingest_options().context("invalid [chunking] settings")?;
    let embedder = config.embedding.embedder().context("cannot create embedder")?;
    let report = IndexBuilder::new(embedder.as_ref())
        .with_options(options)
        .run(&docs, &sources, &paths)
        .with_context(|| format!("ingestion of {} failed", docs.display()))?;

    println!(
        "Indexed {} chunk(s) from {} document(s) into {}",
        report.rows,
        report.documents,
        report.index_dir.display()
    );
    Ok(())
}

fn run_eval(
    config: &Config,
    gold: &Path,
    out: &Path,
    summary: &Path,
    providers: Vec<String>,
    index: Option<PathBuf>,
) -> Result<()> {
    let gold = load_gold(gold)?;
    let kinds: Vec<ProviderKind> = if providers.is_empty() {
        ProviderKind::ALL.to_vec()
    } else {
        providers
            .iter()
            .map(|p| p.parse())
            .collect::<Result<_, _>>()?
    };
    let retriever = Arc::new(open_retriever(config, index)?);
    // Each provider runs its own default model.
    let registry = ProviderRegistry::new(ProviderSettings {
        model: None,
        ..config.provider_settings()
    });

    let mut rows = Vec::new();
    for kind in kinds {
        let provider = match registry.build(kind) {
            Ok(p) => p,
            Err(e) => {
                warn!(provider = %kind, error = %e, "skipping provider");
                continue;
            }
        };
        let assistant = Assistant::new(Arc::clone(&retriever), provider).with_top_k(config.retrieval.k);
        rows.extend(evaluate(kind.as_str(), &assistant, &gold)?);
    }
    if rows.is_empty() {
        bail!("no provider could be evaluated");
    }

    let totals = summarize(&rows);
    write_jsonl(out, &rows)?;
    write_jsonl(summary, &totals)?;
    for t in &totals {
        println!(
            "{}: {} question(s), {}% correct, {}% abstained, {:.2}s avg",
            t.provider, t.total_questions, t.correct_kw_rate, t.abstained_rate, t.avg_latency_sec
        );
    }
    println!("Results: {}  Summary: {}", out.display(), summary.display());
    Ok(())
}

fn index_paths(config: &Config, index: Option<PathBuf>) -> Result<IndexPaths> {
    let dir = index
        .or_else(|| config.index_dir())
        .context("could not determine index directory; pass --index")?;
    Ok(IndexPaths::new(dir))
}

fn open_retriever(config: &Config, index: Option<PathBuf>) -> Result<Retriever> {
    let paths = index_paths(config, index)?;
    let embedder = config.embedding.embedder().context("cannot create embedder")?;
    Ok(Retriever::load(&paths, embedder)?)
}

fn preview(text: &str, max_chars: usize) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        line
    }
}
