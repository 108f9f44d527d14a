mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

// ============ CLI ============
#[derive(Parser)]
#[command(name = "groundgen")]
#[command(version)]
#[command(about = "Document-grounded generation with a GCN + LSTM encoder and a pointer-generator decoder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validates a model configuration and prints its shape
    Info {
        #[arg(short, long)]
        config: PathBuf,
        /// Optional training configuration to validate alongside
        #[arg(short, long)]
        training: Option<PathBuf>,
    },

    /// Trains a tiny model briefly and beam-decodes its corpus
    Demo {
        /// JSONL examples; a built-in corpus is used when absent
        #[arg(short, long)]
        data: Option<PathBuf>,
        /// Passes over the corpus
        #[arg(long, default_value = "30")]
        epochs: usize,
        #[arg(long, default_value = "2")]
        beam_size: usize,
        #[arg(long, default_value = "2")]
        batch_size: usize,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { config, training } => {
            commands::info::execute(&config, training.as_deref())
        }
        Commands::Demo {
            data,
            epochs,
            beam_size,
            batch_size,
            seed,
        } => commands::demo::execute(commands::demo::DemoArgs {
            data: data.as_deref(),
            epochs,
            beam_size,
            batch_size,
            seed,
        }),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}
