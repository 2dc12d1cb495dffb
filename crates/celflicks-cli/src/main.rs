//! celflicks-rooms: command-line view of the Celflicks audio rooms.
//!
//! Lists and watches the room directory, creates rooms, and follows who is
//! present in a room. Talks to Supabase with the credentials from the
//! config file or the `SUPABASE_*` environment variables.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use celflicks_config::schema::LogLevel;
use celflicks_config::CelflicksConfig;

#[derive(Parser)]
#[command(name = "celflicks-rooms", about = "Celflicks audio room directory and presence")]
struct Args {
    /// Config file to use instead of the platform default.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `celflicks_rooms=trace`. Overrides the
    /// config file; `RUST_LOG` overrides both.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Print the current rooms, newest first.
    List,
    /// Print the room list every time it changes.
    Watch,
    /// Create a room hosted by the signed-in user.
    Create {
        title: String,
        /// Supabase Auth user id the access token belongs to.
        #[arg(long)]
        user_id: String,
    },
    /// Follow the participants of a room.
    Who { room_id: String },
    /// Print the effective configuration with secrets redacted.
    Config,
}

fn init_logging(cli_filter: Option<&str>, level: LogLevel) {
    let fallback = cli_filter.unwrap_or(level.as_filter()).to_string();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: Option<&PathBuf>) -> Result<CelflicksConfig, celflicks_common::ConfigError> {
    match path {
        Some(path) => celflicks_config::load_config_from(path),
        None => celflicks_config::load_config(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load(args.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("celflicks-rooms: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(args.log_level.as_deref(), config.logging.level);

    let result = match args.command {
        Command::List => commands::list(&config).await,
        Command::Watch => commands::watch(&config).await,
        Command::Create { title, user_id } => commands::create(&config, &title, &user_id).await,
        Command::Who { room_id } => commands::who(&config, &room_id).await,
        Command::Config => {
            println!("{}", celflicks_config::config_to_json(&config));
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("celflicks-rooms: {e}");
            ExitCode::FAILURE
        }
    }
}
