//! statquery CLI
//!
//! Ask questions against the statistical tables described in the metadata
//! directory, or list the tables the catalog knows about.

use anyhow::Result;
use clap::{Parser, Subcommand};
use statquery::workflow::{SelectionMode, UserContext};
use statquery::{AgentConfig, Workflow};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "statquery")]
#[command(about = "Question answering over statistical tables")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a natural language question
    Ask {
        /// The question, in any language
        question: String,

        /// Region used to scope queries (overrides REGION)
        #[arg(short, long)]
        region: Option<String>,

        /// Path to the metadata directory (overrides METADATA_DIR)
        #[arg(short, long)]
        metadata_dir: Option<PathBuf>,

        /// Path to the SQLite database (overrides DB_PATH)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Table selection mode: auto or manual
        #[arg(long)]
        mode: Option<SelectionMode>,

        /// Print the executed SQL and the visited steps
        #[arg(long)]
        explain: bool,
    },

    /// List the tables in the metadata catalog
    Tables {
        /// Path to the metadata directory (overrides METADATA_DIR)
        #[arg(short, long)]
        metadata_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = AgentConfig::from_env()?;

    match args.command {
        Commands::Ask { question, region, metadata_dir, db_path, mode, explain } => {
            if let Some(region) = region {
                config.user_context.region = Some(region);
            }
            if let Some(dir) = metadata_dir {
                config.metadata_dir = dir;
            }
            if let Some(path) = db_path {
                config.db_path = path;
            }
            if let Some(mode) = mode {
                config.selection_mode = mode;
            }
            ask(&config, &question, explain).await
        }
        Commands::Tables { metadata_dir } => {
            if let Some(dir) = metadata_dir {
                config.metadata_dir = dir;
            }
            list_tables(&config)
        }
    }
}

async fn ask(config: &AgentConfig, question: &str, explain: bool) -> Result<()> {
    let workflow = Workflow::from_config(config);
    let user_context: UserContext = config.user_context.clone();

    let mut outcome = workflow.run(question, user_context).await;

    while outcome.needs_clarification {
        println!("\n{}\n", outcome.answer);
        let choices = outcome.context.relevant_tables.len();
        print!("Your choice (1-{}): ", choices);
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            anyhow::bail!("No table chosen");
        }
        outcome = workflow.resume(outcome.context, input.trim()).await;
    }

    println!("\n{}\n", outcome.answer);

    if explain {
        if let Some(table) = &outcome.selected_table {
            match outcome.selection_confidence {
                Some(confidence) => println!("Table: {} (confidence {:.2})", table, confidence),
                None => println!("Table: {}", table),
            }
        }
        if outcome.low_confidence {
            println!("⚠️  Table selection was low-confidence");
        }
        if let Some(sql) = &outcome.sql {
            println!("SQL: {}", sql);
            if !outcome.context.sql_params.is_empty() {
                println!("Params: {:?}", outcome.context.sql_params);
            }
        }
        let path: Vec<&str> = outcome.path.iter().map(|s| s.as_str()).collect();
        println!("Path: {}", path.join(" → "));
    }

    Ok(())
}

fn list_tables(config: &AgentConfig) -> Result<()> {
    let workflow = Workflow::from_config(config);
    let catalog = workflow.metadata().catalog()?;

    if catalog.is_empty() {
        println!("No tables found in {}", config.metadata_dir.display());
        return Ok(());
    }

    println!("{} tables in {}:\n", catalog.len(), config.metadata_dir.display());
    for table in catalog.iter() {
        println!("  {} - {}", table.name, table.description);
        println!("      columns: {}", table.column_names().join(", "));
    }
    Ok(())
}
