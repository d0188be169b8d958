//! # Jorge CLI (`jorge`)
//!
//! ## Usage
//!
//! ```bash
//! jorge --config ./config/jorge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `jorge init` | Create the SQLite database and run schema migrations |
//! | `jorge serve` | Start the HTTP server |
//! | `jorge user add <id>` | Register a user |
//! | `jorge extract <path>` | Print the text extracted from a PDF or PPTX |
//! | `jorge prompt <conversation>` | Print the system prompt the next turn would use |
//! | `jorge chat <conversation> "<message>"` | Run one turn and print the reply |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jorge::config::{self, Config, LogConfig};
use jorge::context::ContextBuilder;
use jorge::extract;
use jorge::llm;
use jorge::migrate;
use jorge::prompt::{Intent, OutputMode};
use jorge::server;
use jorge::store::{ChatStore, SqliteStore};
use jorge::transcript::{TranscriptAssembler, TurnOptions};

/// Jorge: a study chat backend grounded in your course files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/jorge.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "jorge", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/jorge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Manage users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Print the text extracted from a file.
    ///
    /// Runs without a config file. The media type is guessed from the
    /// extension unless given.
    Extract {
        path: PathBuf,

        #[arg(long)]
        media_type: Option<String>,
    },

    /// Print the system prompt the next turn of a conversation would use.
    Prompt {
        conversation_id: String,

        #[arg(long, default_value = "custom")]
        intent: Intent,

        #[arg(long, default_value = "full")]
        mode: OutputMode,
    },

    /// Send one message to a conversation and print the reply.
    Chat {
        conversation_id: String,
        message: String,

        #[arg(long, default_value = "custom")]
        intent: Intent,

        #[arg(long, default_value = "full")]
        mode: OutputMode,

        /// Overrides `[llm] model`.
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a user id.
    Add {
        id: String,

        #[arg(long)]
        name: Option<String>,
    },
}

/// Installs the global subscriber. `RUST_LOG` wins over `[log] level`.
fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.level))
        .unwrap_or_else(|e| {
            eprintln!("invalid log level {:?} ({}); using info", log.level, e);
            EnvFilter::new("info")
        });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn ChatStore>> {
    let pool = jorge::db::connect(cfg).await?;
    migrate::apply_schema(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

fn run_extract(path: &Path, media_type: Option<String>) -> anyhow::Result<()> {
    let media_type = media_type
        .unwrap_or_else(|| extract::media_type_for_filename(&path.to_string_lossy()).to_string());
    if !extract::is_supported(&media_type) {
        eprintln!("unsupported media type {}; nothing to extract", media_type);
    }
    let text = extract::extract_file(&media_type, path)
        .with_context(|| format!("failed to extract {}", path.display()))?;
    println!("{}", text);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Extraction needs no database, so it runs on defaults without a config file.
    let cfg = match &cli.command {
        Commands::Extract { .. } => {
            config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal())
        }
        _ => config::load_config(&cli.config)?,
    };
    init_tracing(&cfg.log);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::User {
            action: UserAction::Add { id, name },
        } => {
            let id = id.trim();
            if id.is_empty() {
                anyhow::bail!("user id is required");
            }
            let store = open_store(&cfg).await?;
            let user = store.create_user(id, name.as_deref()).await?;
            println!("Created user {}", user.id);
        }
        Commands::Prompt {
            conversation_id,
            intent,
            mode,
        } => {
            let store = open_store(&cfg).await?;
            let context = Arc::new(ContextBuilder::new(store.clone()));
            let assembler = TranscriptAssembler::from_config(
                &cfg,
                store,
                context,
                Arc::new(llm::DisabledClient),
            );
            let prompt = assembler
                .preview_prompt(&conversation_id, intent, mode)
                .await?;
            println!("{}", prompt);
        }
        Commands::Chat {
            conversation_id,
            message,
            intent,
            mode,
            model,
        } => {
            let store = open_store(&cfg).await?;
            let context = Arc::new(ContextBuilder::new(store.clone()));
            let inference = llm::create_client(&cfg.llm)?;
            let assembler = TranscriptAssembler::from_config(&cfg, store, context, inference);
            let outcome = assembler
                .send(
                    &conversation_id,
                    &message,
                    &TurnOptions {
                        intent,
                        mode,
                        model,
                    },
                )
                .await?;
            println!("{}", outcome.assistant_message.content);
        }
        Commands::Extract { path, media_type } => {
            run_extract(&path, media_type)?;
        }
    }

    Ok(())
}
