use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ledgerdocs_core::{BackendKind, DocumentType, LedgerDocsConfig};
use ledgerdocs_storage::{CloudDocumentStore, DocumentStore, EnvSettings, LocalFileStorage, StaticToken};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;

const DEFAULT_CONFIG_FILE: &str = "ledgerdocs.toml";

#[derive(Parser)]
#[command(name = "ledgerdocs")]
#[command(author, version, about = "Store billing documents and normalize receipts for invoices")]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (default: ./ledgerdocs.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Storage backend, overriding the configuration file
    #[arg(long, global = true, value_parser = parse_backend)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file with its metadata
    Store {
        file: PathBuf,

        /// Document type (receipt, invoice, contract, sow, estimate, change-order, report)
        #[arg(short = 't', long = "type")]
        document_type: DocumentType,

        /// Uploading user
        #[arg(short, long)]
        user: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        client: Option<String>,

        /// Declared content type; sniffed from the bytes when omitted
        #[arg(long)]
        content_type: Option<String>,

        /// Keep an externally assigned id
        #[arg(long)]
        id: Option<String>,
    },

    /// Print a document's metadata, optionally writing its bytes out
    Get {
        id: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List documents, newest first
    List {
        #[arg(short = 't', long = "type")]
        document_type: Option<DocumentType>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        client: Option<String>,

        #[arg(short, long)]
        user: Option<String>,
    },

    /// Merge metadata fields into a stored document
    Update {
        id: String,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        client: Option<String>,

        #[arg(long)]
        client_name: Option<String>,

        /// Replaces the tag list (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Delete a document
    Delete { id: String },

    /// Totals by document type
    Stats,

    /// Rebuild the local id index from the sidecars
    Reindex,

    /// Remove leftovers of interrupted local deletes
    Reap,

    /// Normalize receipt files into embeddable images
    Normalize {
        #[arg(required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Write each rendering into this directory instead of printing data URLs
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_backend(raw: &str) -> Result<BackendKind, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "local" => Ok(BackendKind::Local),
        "cloud" | "sharepoint" => Ok(BackendKind::Cloud),
        other => Err(format!("unknown backend '{other}' (expected local or cloud)")),
    }
}

fn load_config(path: Option<&Path>) -> Result<LedgerDocsConfig> {
    let mut config = match path {
        Some(path) => LedgerDocsConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            LedgerDocsConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => LedgerDocsConfig::default(),
    };
    if let Ok(env) = std::env::var("LEDGERDOCS_ENV") {
        if !env.trim().is_empty() {
            config.cloud.environment = env.trim().to_string();
        }
    }
    Ok(config)
}

fn open_store(config: &LedgerDocsConfig) -> Result<Box<dyn DocumentStore>> {
    Ok(match config.backend {
        BackendKind::Local => Box::new(LocalFileStorage::new(&config.local)),
        BackendKind::Cloud => {
            let token = std::env::var("LEDGERDOCS_GRAPH_TOKEN")
                .context("LEDGERDOCS_GRAPH_TOKEN must be set for the cloud backend")?;
            Box::new(CloudDocumentStore::new(
                config.cloud.clone(),
                Arc::new(EnvSettings),
                Arc::new(StaticToken(token)),
            ))
        }
    })
}

fn local_only(config: &LedgerDocsConfig, command: &str) -> Result<LocalFileStorage> {
    if config.backend != BackendKind::Local {
        bail!("'{command}' only applies to the local backend");
    }
    Ok(LocalFileStorage::new(&config.local))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    match cli.command {
        Commands::Store { file, document_type, user, project, client, content_type, id } => {
            let store = open_store(&config)?;
            let request = commands::StoreRequest { document_type, user, project, client, content_type, id };
            let doc = commands::store_file(store.as_ref(), &file, request).await?;
            commands::print_json(&doc)?;
        }
        Commands::Get { id, output } => {
            let store = open_store(&config)?;
            commands::get_document(store.as_ref(), &id, output.as_deref()).await?;
        }
        Commands::List { document_type, project, client, user } => {
            let store = open_store(&config)?;
            let filter = ledgerdocs_core::DocumentFilter {
                document_type,
                project_id: project,
                client_id: client,
                uploaded_by: user,
            };
            commands::print_json(&store.list(&filter).await?)?;
        }
        Commands::Update { id, project, client, client_name, tags } => {
            let store = open_store(&config)?;
            let patch = ledgerdocs_core::MetadataPatch {
                project_id: project,
                client_id: client,
                client_name,
                tags: (!tags.is_empty()).then_some(tags),
                ..Default::default()
            };
            match store.update_metadata(&id, &patch).await? {
                Some(doc) => commands::print_json(&doc)?,
                None => bail!("no document with id '{id}'"),
            }
        }
        Commands::Delete { id } => {
            let store = open_store(&config)?;
            if !store.delete(&id).await? {
                bail!("no document with id '{id}'");
            }
            println!("deleted {id}");
        }
        Commands::Stats => {
            let store = open_store(&config)?;
            commands::print_json(&store.stats().await?)?;
        }
        Commands::Reindex => {
            let count = local_only(&config, "reindex")?.rebuild_index().await?;
            println!("indexed {count} documents");
        }
        Commands::Reap => {
            let count = local_only(&config, "reap")?.reap_trash().await?;
            println!("reaped {count} trash entries");
        }
        Commands::Normalize { files, output } => {
            commands::normalize_files(&config.normalizer, &files, output.as_deref()).await?;
        }
    }
    Ok(())
}
