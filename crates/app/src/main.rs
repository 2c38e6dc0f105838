use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docqa_core::{
    load_folder_best_effort, Answer, AnswerComposer, ChunkingConfig, Embedder, EmbeddingBackend,
    GeminiBackend, HashingBackend, IndexSnapshot, Indexer, KeywordPolicy, OllamaBackend,
    RetrievalOptions, Retriever, SharedIndex, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_GEMINI_MODEL, DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL, DEFAULT_OVERLAP,
    DEFAULT_TEMPERATURE, DEFAULT_TOP_K, DEFAULT_WINDOW,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Index snapshot file (vectors and chunk text in one unit)
    #[arg(long, env = "DOCQA_INDEX", default_value = "data/index/snapshot.json")]
    index: PathBuf,

    /// Embedding backend
    #[arg(long, env = "DOCQA_EMBEDDING_BACKEND", value_enum, default_value_t = BackendKind::Local)]
    embedding_backend: BackendKind,

    /// Embedding model name (ollama backend)
    #[arg(long, env = "DOCQA_EMBEDDING_MODEL", default_value = DEFAULT_OLLAMA_MODEL)]
    embedding_model: String,

    /// Embedding service base URL (ollama backend)
    #[arg(long, env = "DOCQA_EMBEDDING_URL", default_value = DEFAULT_OLLAMA_URL)]
    embedding_url: String,

    /// Vector size for the hashing backend
    #[arg(long, env = "DOCQA_HASHING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    hashing_dimensions: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    /// Local all-MiniLM-L6-v2 (the `local-embeddings` feature, on by default).
    Local,
    /// Ollama `/api/embed`.
    Ollama,
    /// Deterministic offline trigram hashing, for tests and air-gapped runs.
    Hashing,
}

#[derive(Subcommand)]
enum Command {
    /// Load a folder of PDF/DOCX/TXT files and replace the index with it.
    Ingest {
        /// Folder with documents, searched recursively.
        #[arg(long)]
        input: PathBuf,
        /// Words per chunk.
        #[arg(long, env = "DOCQA_WINDOW", default_value_t = DEFAULT_WINDOW)]
        window: usize,
        /// Words shared by consecutive chunks.
        #[arg(long, env = "DOCQA_OVERLAP", default_value_t = DEFAULT_OVERLAP)]
        overlap: usize,
    },
    /// Print the chunks closest to a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, env = "DOCQA_TOP_K", default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Drop hits whose squared distance exceeds this value.
        #[arg(long)]
        max_distance: Option<f32>,
    },
    /// Answer a question from the indexed documents; without --question, read questions from stdin.
    Ask {
        #[arg(long)]
        question: Option<String>,
        #[arg(long, env = "DOCQA_TOP_K", default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Gemini model
        #[arg(long, env = "DOCQA_GEMINI_MODEL", default_value = DEFAULT_GEMINI_MODEL)]
        gemini_model: String,
        /// Sampling temperature for generation
        #[arg(long, env = "DOCQA_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f32,
        /// Gemini API key
        #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Only answer uncovered questions that mention a legal keyword.
        #[arg(long, default_value_t = false)]
        legal_only: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        backend = ?cli.embedding_backend,
        "docqa boot"
    );

    let embedder = Embedder::new(embedding_backend(&cli)?);

    match cli.command {
        Command::Ingest {
            ref input,
            window,
            overlap,
        } => {
            let chunking = ChunkingConfig::new(window, overlap)?;
            ingest(&cli.index, input, Indexer::new(embedder, chunking)?).await?;
        }
        Command::Search {
            ref query,
            top_k,
            max_distance,
        } => {
            let retriever = open_retriever(&cli.index, embedder)?;
            let mut options = RetrievalOptions::top_k(top_k);
            options.max_distance = max_distance;

            let results = retriever.retrieve_with(query, options).await?;
            if results.is_empty() {
                println!("no matching chunks");
            }
            for result in results {
                println!(
                    "[{}] distance={:.4} position={} sources={}",
                    result.rank,
                    result.distance,
                    result.position,
                    result.sources.join(",")
                );
                println!("{}\n", result.text);
            }
        }
        Command::Ask {
            ref question,
            top_k,
            ref gemini_model,
            temperature,
            ref api_key,
            legal_only,
        } => {
            let api_key = api_key
                .clone()
                .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
                .filter(|key| !key.trim().is_empty())
                .context("GEMINI_API_KEY or GOOGLE_API_KEY must be set")?;

            let retriever = open_retriever(&cli.index, embedder)?;
            let generator = Arc::new(
                GeminiBackend::new(api_key, gemini_model.as_str())?.with_temperature(temperature),
            );
            let mut composer = AnswerComposer::new(retriever, generator)
                .with_options(RetrievalOptions::top_k(top_k));
            if legal_only {
                composer = composer.with_policy(Arc::new(KeywordPolicy::legal()?));
            }

            match question {
                Some(question) => print_answer(&composer.answer(question).await?),
                None => chat(&composer).await?,
            }
        }
    }

    Ok(())
}

fn embedding_backend(cli: &Cli) -> anyhow::Result<Arc<dyn EmbeddingBackend>> {
    let backend: Arc<dyn EmbeddingBackend> = match cli.embedding_backend {
        BackendKind::Hashing => Arc::new(HashingBackend::new(cli.hashing_dimensions)),
        BackendKind::Ollama => Arc::new(
            OllamaBackend::new(&cli.embedding_url, cli.embedding_model.as_str())
                .with_context(|| format!("invalid embedding url {}", cli.embedding_url))?,
        ),
        BackendKind::Local => local_backend()?,
    };
    Ok(backend)
}

#[cfg(feature = "local-embeddings")]
fn local_backend() -> anyhow::Result<Arc<dyn EmbeddingBackend>> {
    Ok(Arc::new(docqa_core::LazyBackend::new("all-minilm-l6-v2", || {
        Ok(Arc::new(docqa_core::FastembedBackend::try_new()?) as Arc<dyn EmbeddingBackend>)
    })))
}

#[cfg(not(feature = "local-embeddings"))]
fn local_backend() -> anyhow::Result<Arc<dyn EmbeddingBackend>> {
    anyhow::bail!(
        "the local embedding backend requires the local-embeddings feature; \
         pass --embedding-backend hashing or ollama instead"
    )
}

async fn ingest(index_path: &Path, input: &Path, indexer: Indexer) -> anyhow::Result<()> {
    let report = load_folder_best_effort(input);

    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
    }
    if report.documents.is_empty() {
        warn!(folder = %input.display(), "no readable documents, writing an empty index");
    }

    let snapshot = indexer.build(&report.documents).await?;
    snapshot
        .save(index_path)
        .with_context(|| format!("failed to write index to {}", index_path.display()))?;

    println!(
        "{} documents, {} chunks indexed at {}",
        report.documents.len(),
        snapshot.len(),
        snapshot.built_at().to_rfc3339()
    );
    Ok(())
}

fn open_retriever(index_path: &Path, embedder: Embedder) -> anyhow::Result<Retriever> {
    let snapshot = if index_path.exists() {
        IndexSnapshot::load(index_path)
            .with_context(|| format!("failed to load index from {}", index_path.display()))?
    } else {
        warn!(path = %index_path.display(), "no index yet, run `docqa ingest` first");
        IndexSnapshot::empty(embedder.model_id())
    };
    // An empty snapshot holds no vectors to disagree with the configured model.
    if !snapshot.is_empty() {
        snapshot.ensure_model(embedder.model_id())?;
    }

    Ok(Retriever::new(embedder, Arc::new(SharedIndex::new(snapshot))))
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.message());
    if let Answer::Grounded { sources, .. } = answer {
        for source in sources {
            println!(
                "  [{}] distance={:.4} sources={}",
                source.rank,
                source.distance,
                source.sources.join(",")
            );
        }
    }
}

async fn chat(composer: &AnswerComposer) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\nquestion (or 'exit')> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") {
            break;
        }

        match composer.answer(question).await {
            Ok(answer) => print_answer(&answer),
            Err(error) => {
                warn!(%error, "failed to answer");
                println!("error: {error}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::{Chunk, FlatIndex, RetrievalError};
    use tempfile::tempdir;

    fn hashing_embedder() -> Embedder {
        Embedder::new(Arc::new(HashingBackend::new(DEFAULT_EMBEDDING_DIMENSIONS)))
    }

    #[tokio::test]
    async fn empty_index_from_another_backend_still_answers_empty() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("snapshot.json");
        IndexSnapshot::empty("all-minilm-l6-v2").save(&path)?;

        let retriever = open_retriever(&path, hashing_embedder())?;
        assert!(retriever.retrieve("when is bail granted", 3).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_index_file_is_nothing_indexed_yet() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let retriever = open_retriever(&dir.path().join("absent.json"), hashing_embedder())?;
        assert!(retriever.retrieve("anything", 3).await?.is_empty());
        Ok(())
    }

    #[test]
    fn populated_index_from_another_backend_is_rejected() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("snapshot.json");
        let chunk = Chunk {
            chunk_id: "chunk-0".to_string(),
            position: 0,
            word_start: 0,
            word_end: 2,
            sources: vec!["act.txt".to_string()],
            text: "bail granted".to_string(),
        };
        IndexSnapshot::new(
            FlatIndex::build(&[vec![0.1, 0.2]])?,
            vec![chunk],
            "all-minilm-l6-v2",
            Utc::now(),
        )?
        .save(&path)?;

        let error = open_retriever(&path, hashing_embedder())
            .err()
            .and_then(|error| error.downcast::<RetrievalError>().ok());
        assert!(matches!(error, Some(RetrievalError::IncompatibleModel { .. })));
        Ok(())
    }

    #[test]
    fn cli_defaults_to_the_sentence_embedding_model() {
        let cli = Cli::parse_from(["docqa", "search", "--query", "bail"]);
        assert!(matches!(cli.embedding_backend, BackendKind::Local));

        let cli = Cli::parse_from([
            "docqa",
            "--embedding-backend",
            "hashing",
            "ask",
            "--temperature",
            "0.5",
        ]);
        assert!(matches!(cli.embedding_backend, BackendKind::Hashing));
        assert!(matches!(cli.command, Command::Ask { temperature, .. } if temperature == 0.5));
    }
}
