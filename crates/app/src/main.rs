mod logging;
mod repl;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_chat_core::{
    build_index, discover_pdf_files, embedder_for, generator_for, BuildSummary, ChatService,
    EmbeddingBackend, IndexError, LopdfExtractor, OllamaGenerator, Overrides,
    PersistentVectorStore, Settings, VectorIndex,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    /// JSON config file; falls back to $CONFIG_PATH, then ./config.json when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed every PDF in the folder into a fresh index.
    Build {
        /// Folder that contains the PDFs (not searched recursively).
        #[arg(long)]
        pdf_dir: Option<PathBuf>,
        /// Where the vector index is persisted.
        #[arg(long)]
        vector_dir: Option<PathBuf>,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        chunk_overlap: Option<usize>,
    },
    /// Interactive conversation over the indexed specifications.
    Chat {
        /// Rebuild the index before the session starts.
        #[arg(long, default_value_t = false)]
        rebuild: bool,
        #[arg(long)]
        pdf_dir: Option<PathBuf>,
    },
    /// Ask a single question and exit.
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long, default_value_t = false)]
        rebuild: bool,
        #[arg(long)]
        pdf_dir: Option<PathBuf>,
    },
    /// Show the chunks retrieval would hand to the model.
    Search {
        #[arg(long)]
        query: String,
        /// Number of chunks to return; defaults to retriever_k.
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Download the configured models into the local Ollama server.
    PullModels {
        #[arg(long, default_value_t = false, conflicts_with = "embeddings_only")]
        llm_only: bool,
        #[arg(long, default_value_t = false)]
        embeddings_only: bool,
    },
}

impl Command {
    fn overrides(&self) -> Overrides {
        match self {
            Command::Build {
                pdf_dir,
                vector_dir,
                chunk_size,
                chunk_overlap,
            } => Overrides {
                pdf_dir: pdf_dir.clone(),
                vector_store_dir: vector_dir.clone(),
                chunk_size: *chunk_size,
                chunk_overlap: *chunk_overlap,
            },
            Command::Chat { pdf_dir, .. } | Command::Ask { pdf_dir, .. } => Overrides {
                pdf_dir: pdf_dir.clone(),
                ..Overrides::default()
            },
            Command::Search { .. } | Command::PullModels { .. } => Overrides::default(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())
        .and_then(|settings| settings.with_overrides(cli.command.overrides()))
        .context("failed to load configuration")?;

    logging::init(&settings).context("failed to initialise logging")?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        model = %settings.resolved_model_name(),
        "pdf-chat boot"
    );

    settings
        .ensure_directories()
        .context("failed to create data directories")?;
    warn_if_no_pdfs(&settings.pdf_dir);

    match cli.command {
        Command::Build { .. } => {
            let embedder = embedder_for(&settings)?;
            let (_, summary) =
                build_index(&settings, &settings.pdf_dir, &LopdfExtractor, embedder).await?;
            report_build(&summary);
        }
        Command::Chat { rebuild, .. } => {
            let mut service = start_service(settings, rebuild).await?;
            repl::run(&mut service).await?;
        }
        Command::Ask {
            question, rebuild, ..
        } => {
            let mut service = start_service(settings, rebuild).await?;
            let response = service
                .ask(&question)
                .await
                .context("An error occurred while processing your query")?;
            repl::print_response(&response, true);
        }
        Command::Search { query, top_k } => {
            let embedder = embedder_for(&settings)?;
            let index = PersistentVectorStore::load(&settings.vector_store_dir, embedder)
                .map_err(missing_index_hint)?;
            let top_k = top_k.unwrap_or(settings.retriever_k);
            let hits = index
                .search(&query, top_k, settings.search_strategy())
                .await?;

            println!("query={query}");
            println!("results={}", hits.len());
            for hit in hits {
                let metadata = &hit.chunk.metadata;
                println!(
                    "[{}] score={:.4} chunk={}/{}",
                    metadata.source(),
                    hit.score,
                    metadata.chunk_index + 1,
                    metadata.chunk_count
                );
                println!("  chunk_text:");
                println!("{}", hit.chunk.content);
            }
        }
        Command::PullModels {
            llm_only,
            embeddings_only,
        } => {
            let client = generator_for(&settings)?;
            if !embeddings_only {
                pull(&client, &settings.resolved_model_name()).await?;
            }
            if !llm_only {
                match settings.embedding_backend {
                    EmbeddingBackend::Ollama => pull(&client, &settings.embedding_model).await?,
                    EmbeddingBackend::Ngram => {
                        println!("embedding backend is ngram; nothing to download")
                    }
                }
            }
        }
    }

    Ok(())
}

async fn start_service(
    settings: Settings,
    rebuild: bool,
) -> anyhow::Result<ChatService<OllamaGenerator>> {
    let generator = generator_for(&settings)?;
    let embedder = embedder_for(&settings)?;

    if rebuild {
        let (service, summary) = ChatService::build(settings, generator, embedder, None).await?;
        report_build(&summary);
        return Ok(service);
    }

    let service = ChatService::open(settings, generator, embedder).map_err(missing_index_hint)?;
    info!(chunks = service.indexed_chunks(), "loaded vector index");
    Ok(service)
}

fn missing_index_hint(error: IndexError) -> anyhow::Error {
    match error {
        IndexError::NotFound(_) => anyhow::Error::new(error)
            .context("no index yet; run `pdf-chat build` or pass --rebuild"),
        other => other.into(),
    }
}

fn report_build(summary: &BuildSummary) {
    if !summary.skipped.is_empty() {
        warn!(skipped_files = summary.skipped.len(), "some pdfs were skipped");
        for skipped in &summary.skipped {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
        }
    }
    if summary.chunks == 0 {
        println!("0 chunks indexed (no readable PDFs found)");
    }
    println!(
        "Vector store created with {} chunks from {} documents at {}",
        summary.chunks,
        summary.documents,
        summary.location.display()
    );
}

async fn pull(client: &OllamaGenerator, model: &str) -> anyhow::Result<()> {
    println!("pulling {model} ...");
    let status = client
        .pull_model(model)
        .await
        .with_context(|| format!("failed to pull {model}"))?;
    println!("{model}: {status}");
    Ok(())
}

fn warn_if_no_pdfs(pdf_dir: &Path) {
    match discover_pdf_files(pdf_dir) {
        Ok(files) if files.is_empty() => warn!(
            folder = %pdf_dir.display(),
            "no PDF files found; add specifications before building the index"
        ),
        Ok(files) => info!(folder = %pdf_dir.display(), pdfs = files.len(), "pdf folder ready"),
        Err(error) => warn!(folder = %pdf_dir.display(), error = %error, "cannot scan pdf folder"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_flags_become_overrides() {
        let cli = Cli::parse_from([
            "pdf-chat",
            "build",
            "--pdf-dir",
            "specs",
            "--chunk-size",
            "500",
            "--chunk-overlap",
            "50",
        ]);
        let overrides = cli.command.overrides();
        assert_eq!(overrides.pdf_dir, Some(PathBuf::from("specs")));
        assert_eq!(overrides.chunk_size, Some(500));
        assert_eq!(overrides.chunk_overlap, Some(50));
        assert_eq!(overrides.vector_store_dir, None);
    }

    #[test]
    fn pull_flags_are_exclusive() {
        let parsed = Cli::try_parse_from(["pdf-chat", "pull-models", "--llm-only", "--embeddings-only"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::parse_from(["pdf-chat", "search", "--query", "clock", "--config", "c.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("c.json")));
        assert!(matches!(cli.command, Command::Search { top_k: None, .. }));
    }
}
