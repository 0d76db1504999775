//! # Lectern CLI (`lectern`)
//!
//! The `lectern` binary ingests a document and answers questions grounded
//! in its passages, one-shot or as an interactive conversation, locally
//! or over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! lectern --config ./config/lectern.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lectern ingest <file>` | Build (or reuse) the passage index for a document |
//! | `lectern ask <file> "<question>"` | Ask a single question about a document |
//! | `lectern chat <file>` | Converse with a document interactively |
//! | `lectern forget <file>` | Evict a document's index from the store |
//! | `lectern serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//!
//! # Build the index (a second run reuses it)
//! lectern ingest moby-dick.epub
//!
//! # One-shot question
//! lectern ask moby-dick.epub "Who is Queequeg?"
//!
//! # Interactive conversation with follow-up questions
//! lectern chat moby-dick.epub
//!
//! # Plain text with an explicit format override
//! lectern ask notes.md "What are the action items?" --format text
//!
//! # HTTP server on the configured bind address
//! lectern serve
//! ```

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

use lectern::assistant::Assistant;
use lectern::config::{self, Config};
use lectern::db;
use lectern::extract::DocumentFormat;
use lectern::models::Credential;
use lectern::server;
use lectern::store::sqlite::SqliteStore;
use lectern::store::IndexStore;
use lectern::Session;

/// Lectern — a document-grounded conversational assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lectern.example.toml` for a full example. Commands
/// that talk to the embedding and generation services read the API key
/// from `OPENAI_API_KEY` or the `--api-key` flag.
#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern — ingest a document, ask questions grounded in its passages",
    version,
    long_about = "Lectern ingests a document (plain text or EPUB), chunks and embeds it into \
    a content-addressed passage index, and answers questions about it with retrieved passages \
    grounding every generation call."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lectern.toml`; built-in defaults apply when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/lectern.toml")]
    config: PathBuf,

    /// API key for the embedding and generation services.
    ///
    /// Falls back to the `OPENAI_API_KEY` environment variable.
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Build (or reuse) the passage index for a document.
    ///
    /// Extracts the text, chunks it into overlapping passages, embeds
    /// them, and stores the index keyed by the document's content hash.
    /// Re-running on unchanged bytes reuses the stored index without
    /// calling the embedding service.
    Ingest {
        /// Document file (`.txt`/`.md` as text, `.epub` as EPUB).
        file: PathBuf,

        /// Override the format inferred from the extension: `text` or `epub`.
        #[arg(long)]
        format: Option<String>,
    },

    /// Ask a single question about a document.
    ///
    /// Ingests (or reuses) the document's index, retrieves the most
    /// similar passages, and prints one grounded answer with its sources.
    Ask {
        /// Document file.
        file: PathBuf,

        /// The question to answer.
        question: String,

        /// Override the format inferred from the extension: `text` or `epub`.
        #[arg(long)]
        format: Option<String>,
    },

    /// Converse with a document interactively.
    ///
    /// Opens a session and reads questions from stdin. Follow-ups are
    /// condensed against the conversation so far. `:status` prints the
    /// session, `:forget` evicts the index and exits, `:quit` exits.
    Chat {
        /// Document file.
        file: PathBuf,

        /// Override the format inferred from the extension: `text` or `epub`.
        #[arg(long)]
        format: Option<String>,
    },

    /// Evict a document's index from the store.
    ///
    /// Hashes the file and removes the matching index and passages.
    /// Running against a document with no index is a no-op.
    Forget {
        /// Document file.
        file: PathBuf,
    },

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// ingest/ask/forget endpoints over a single process-wide session.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Ingest { file, format } => {
            run_ingest(&cfg, cli.api_key.as_deref(), &file, format.as_deref()).await?;
        }
        Commands::Ask {
            file,
            question,
            format,
        } => {
            run_ask(
                &cfg,
                cli.api_key.as_deref(),
                &file,
                &question,
                format.as_deref(),
            )
            .await?;
        }
        Commands::Chat { file, format } => {
            run_chat(&cfg, cli.api_key.as_deref(), &file, format.as_deref()).await?;
        }
        Commands::Forget { file } => {
            run_forget(&cfg, &file).await?;
        }
        Commands::Serve => {
            run_serve(&cfg, cli.api_key.as_deref()).await?;
        }
    }

    Ok(())
}

/// Load the config file, or fall back to built-in defaults when the
/// default path does not exist.
fn load_config_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::default())
    }
}

fn resolve_credential(api_key: Option<&str>) -> anyhow::Result<Credential> {
    if let Some(key) = api_key {
        return Ok(Credential::new(key));
    }
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(Credential::new(key)),
        _ => anyhow::bail!("no API key: set OPENAI_API_KEY or pass --api-key"),
    }
}

fn resolve_format(file: &Path, flag: Option<&str>) -> lectern::Result<DocumentFormat> {
    match flag {
        Some(s) => s.parse(),
        None => DocumentFormat::from_path(file),
    }
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<SqliteStore>> {
    let pool = db::connect(cfg).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

fn read_document(file: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))
}

async fn open_session(
    cfg: &Config,
    api_key: Option<&str>,
    file: &Path,
    format: Option<&str>,
) -> anyhow::Result<(Arc<Assistant>, Session, bool)> {
    let credential = resolve_credential(api_key)?;
    let bytes = read_document(file)?;
    let format = resolve_format(file, format)?;

    let store = open_store(cfg).await?;
    let cached = store.exists(&content_hash(&bytes)).await?;
    let assistant = Arc::new(Assistant::new(cfg.clone(), store));

    let session = assistant.ingest(bytes, format, &credential).await?;
    Ok((assistant, session, cached))
}

fn print_index_line(session: &Session, cached: bool) {
    if let Some(doc) = session.status().document {
        let verb = if cached { "Reusing" } else { "Built" };
        println!(
            "{} index {} ({} passages, {})",
            verb,
            &doc.document_hash[..12.min(doc.document_hash.len())],
            doc.passage_count,
            doc.model
        );
    }
}

async fn run_ingest(
    cfg: &Config,
    api_key: Option<&str>,
    file: &Path,
    format: Option<&str>,
) -> anyhow::Result<()> {
    let (_assistant, session, cached) = open_session(cfg, api_key, file, format).await?;
    print_index_line(&session, cached);
    Ok(())
}

async fn run_ask(
    cfg: &Config,
    api_key: Option<&str>,
    file: &Path,
    question: &str,
    format: Option<&str>,
) -> anyhow::Result<()> {
    let (assistant, mut session, cached) = open_session(cfg, api_key, file, format).await?;
    print_index_line(&session, cached);

    let answer = assistant.ask(&mut session, question).await?;

    println!();
    println!("{}", answer.text);
    println!();
    println!("Sources:");
    for s in &answer.sources {
        println!(
            "  [{}] score {:.3}, chars {}..{}",
            s.passage.seq, s.score, s.passage.start_char, s.passage.end_char
        );
    }
    Ok(())
}

async fn run_chat(
    cfg: &Config,
    api_key: Option<&str>,
    file: &Path,
    format: Option<&str>,
) -> anyhow::Result<()> {
    let (assistant, mut session, cached) = open_session(cfg, api_key, file, format).await?;
    print_index_line(&session, cached);
    println!("Ask away. :status shows the session, :forget evicts the index, :quit exits.");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();

        match input {
            "" => continue,
            ":quit" | ":q" => break,
            ":status" => {
                let status = session.status();
                match status.document {
                    Some(doc) => println!(
                        "session {}: {} turns over index {} ({} passages)",
                        status.id,
                        status.turn_count,
                        &doc.document_hash[..12.min(doc.document_hash.len())],
                        doc.passage_count
                    ),
                    None => println!("session {}: no active document", status.id),
                }
            }
            ":forget" => {
                assistant.forget(&mut session).await?;
                println!("Index evicted; session cleared.");
                break;
            }
            question => match assistant.ask(&mut session, question).await {
                Ok(answer) => {
                    println!("{}", answer.text);
                    println!();
                }
                Err(err) => {
                    eprintln!("error: {}", err);
                }
            },
        }
    }

    Ok(())
}

async fn run_forget(cfg: &Config, file: &Path) -> anyhow::Result<()> {
    let bytes = read_document(file)?;
    let hash = content_hash(&bytes);

    let store = open_store(cfg).await?;
    if store.exists(&hash).await? {
        store.evict(&hash).await?;
        println!("Evicted index {}", &hash[..12]);
    } else {
        println!("No index for {}", file.display());
    }
    Ok(())
}

async fn run_serve(cfg: &Config, api_key: Option<&str>) -> anyhow::Result<()> {
    let credential = resolve_credential(api_key)?;
    let store = open_store(cfg).await?;
    let assistant = Arc::new(Assistant::new(cfg.clone(), store));
    server::run_server(cfg, assistant, credential).await
}
