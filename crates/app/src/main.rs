use chrono::Utc;
use clap::{Parser, Subcommand};
use docvec_core::{
    ingest_documents, reindex, Document, HashedNgramModel, HttpTokenModel, MeanPoolEncoder, Query,
    RetrievalOrchestrator, Segmenter, StoreBackend, StoreConfig, TokenModel, VectorStore,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "docvec", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Index store backend: elasticsearch or opensearch.
    #[arg(long, env = "VECTOR_BACKEND", default_value = "elasticsearch")]
    backend: String,

    /// Index store base URL.
    #[arg(long, env = "VECTOR_DB_ENDPOINT", default_value = "http://localhost:9200")]
    endpoint: String,

    /// Index name.
    #[arg(long, env = "OPENSEARCH_INDEX_NAME", default_value = "medical_documents")]
    index: String,

    /// Vector dimension the index is created and validated with.
    #[arg(long, env = "VECTOR_DIMENSION", default_value = "768")]
    dimension: usize,

    /// Connection attempts before giving up on the index store.
    #[arg(long, env = "MAX_RETRIES", default_value = "10")]
    max_connect_retries: usize,

    /// Seconds between connection attempts.
    #[arg(long, env = "RETRY_INTERVAL", default_value = "10")]
    retry_interval_secs: u64,

    /// Per-request timeout in seconds for store and model calls.
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Model-serving endpoint returning token-level hidden states.
    /// Falls back to the deterministic offline model when unset.
    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Bearer token for the model-serving endpoint.
    #[arg(long, env = "EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,

    /// Model context limit in characters; longer input is windowed.
    #[arg(long, env = "EMBEDDING_MAX_CHARS", default_value = "512")]
    embedding_max_chars: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a folder of pre-extracted .txt documents into the index.
    Ingest {
        /// Folder scanned recursively for .txt files.
        #[arg(long)]
        folder: String,
    },
    /// Delete and recreate the index, then re-ingest the folder.
    /// Quiesce other writers and searchers while this runs.
    Reindex {
        #[arg(long)]
        folder: String,
    },
    /// Run a retrieval query and print results grouped by document.
    Search {
        /// Query text.
        #[arg(long)]
        query: String,
        /// Number of nearest neighbors to retrieve.
        #[arg(long, default_value = "20")]
        top_k: usize,
    },
    /// List indexed documents with chunk counts and page totals.
    List,
    /// Fetch one indexed chunk by id.
    Get {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let backend: StoreBackend = cli
        .backend
        .parse()
        .map_err(|error: String| anyhow::anyhow!(error))?;

    let store_config = StoreConfig {
        backend,
        endpoint: cli.endpoint.clone(),
        index: cli.index.clone(),
        dimension: cli.dimension,
        request_timeout: Duration::from_secs(cli.timeout_secs),
        max_connect_retries: cli.max_connect_retries,
        retry_interval: Duration::from_secs(cli.retry_interval_secs),
        ..StoreConfig::default()
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        backend = %cli.backend,
        index = %cli.index,
        "docvec boot"
    );

    let model: Box<dyn TokenModel> = match &cli.embedding_endpoint {
        Some(endpoint) => Box::new(HttpTokenModel::new(
            endpoint.clone(),
            cli.embedding_api_key.clone(),
            cli.dimension,
            cli.embedding_max_chars,
            Duration::from_secs(cli.timeout_secs),
        )?),
        None => Box::new(HashedNgramModel {
            dimension: cli.dimension,
            max_input_chars: cli.embedding_max_chars,
        }),
    };
    let encoder = MeanPoolEncoder::new(model);
    let segmenter = Segmenter::with_defaults()?;

    // Unreachable store is fatal for the whole run; connect retries first.
    let store = docvec_core::connect(&store_config).await?;

    match cli.command {
        Command::Ingest { folder } => {
            let documents = load_documents(Path::new(&folder))?;
            if documents.is_empty() {
                anyhow::bail!("no .txt documents found in {folder}");
            }

            store.create_index(store.dimension()).await?;
            let report = ingest_documents(&documents, &segmenter, &encoder, store.as_ref()).await?;
            print_report(&report);
        }
        Command::Reindex { folder } => {
            let documents = load_documents(Path::new(&folder))?;
            if documents.is_empty() {
                anyhow::bail!("no .txt documents found in {folder}");
            }

            let report = reindex(&documents, &segmenter, &encoder, store.as_ref()).await?;
            print_report(&report);
        }
        Command::Search { query, top_k } => {
            let orchestrator = RetrievalOrchestrator::new(encoder, store)?;
            let results = orchestrator.retrieve(&Query::new(query, top_k)).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::List => {
            let documents = store.list_documents().await?;
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }
        Command::Get { id } => match store.get(&id).await? {
            Some(chunk) => println!("{}", serde_json::to_string_pretty(&chunk)?),
            None => println!("document not found: {id}"),
        },
    }

    Ok(())
}

fn print_report(report: &docvec_core::IngestionReport) {
    for skipped in &report.skipped {
        warn!(
            document = %skipped.document_name,
            reason = %skipped.reason,
            "document skipped"
        );
    }

    println!(
        "{} chunks indexed across {} documents ({} skipped) at {}",
        report.total_chunks_indexed(),
        report.processed.len(),
        report.skipped.len(),
        Utc::now().to_rfc3339()
    );
}

fn discover_text_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));

        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// The CLI plays the text-extraction collaborator: files become
/// documents here and the core never sees the filesystem. Form feeds in
/// a file mark page boundaries.
fn load_documents(folder: &Path) -> anyhow::Result<Vec<Document>> {
    let mut documents = Vec::new();

    for path in discover_text_files(folder) {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable file");
                continue;
            }
        };

        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            warn!(path = %path.display(), "skipping file without a usable name");
            continue;
        };

        let pages: Vec<String> = text.split('\u{000C}').map(str::to_string).collect();
        documents.push(Document {
            name: name.to_string(),
            pages,
        });
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::{discover_text_files, load_documents};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;

        File::create(dir.path().join("b.txt"))?.write_all(b"second")?;
        File::create(nested.join("a.txt"))?.write_all(b"first")?;
        File::create(dir.path().join("ignored.pdf"))?.write_all(b"%PDF")?;

        let files = discover_text_files(dir.path());

        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("b.txt"));
        assert!(files[1].ends_with("nested/a.txt"));
        Ok(())
    }

    #[test]
    fn form_feeds_become_page_boundaries() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("note.txt"),
            "first page\u{000C}second page",
        )?;

        let documents = load_documents(dir.path())?;

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].name, "note.txt");
        assert_eq!(documents[0].pages.len(), 2);
        Ok(())
    }
}
