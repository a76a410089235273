mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::DirectoryFile;
use config::CliConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tombola_draw::{Ineligible, LogNotifier, LotteryError, LotteryService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tombola")]
#[command(about = "Tombola - time-boxed forum lotteries with verifiable draws")]
#[command(version)]
struct Cli {
    /// Data directory for the lottery database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lottery commands
    #[command(subcommand)]
    Lottery(commands::LotteryCommands),

    /// Forum directory: post authors, exclusions, moderators
    #[command(subcommand)]
    Directory(commands::DirectoryCommands),

    /// Draw scheduler commands
    #[command(subcommand)]
    Scheduler(commands::SchedulerCommands),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "tombola={},tombola_core={},tombola_draw={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Get data directory
    let data_dir = cli.data_dir.unwrap_or_else(CliConfig::default_data_dir);

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir).await?;

    let result = match cli.command {
        Commands::Directory(cmd) => commands::handle_directory_command(cmd, &data_dir),
        command => run_with_service(command, &data_dir).await,
    };

    if let Err(e) = result {
        match e.downcast_ref::<LotteryError>() {
            Some(LotteryError::NotEligible(Ineligible::AlreadyJoined)) => {
                eprintln!("Error: {}", e);
                eprintln!("Use 'tombola lottery show <id>' to see participants");
            }
            Some(LotteryError::DrawNotDue { end_time, .. }) => {
                eprintln!("Error: the lottery ends at {}", end_time);
                eprintln!("Only moderators can draw early, pass --user <moderator id>");
            }
            Some(LotteryError::Core(tombola_core::TombolaError::LotteryNotFound(id))) => {
                eprintln!("Error: Lottery '{}' not found", id);
                eprintln!("Use 'tombola lottery list' to see open lotteries");
            }
            _ => {
                eprintln!("Error: {:#}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run_with_service(command: Commands, data_dir: &std::path::Path) -> anyhow::Result<()> {
    let config = CliConfig::load(data_dir)?;
    let directory = Arc::new(DirectoryFile::load(data_dir)?.to_directory());

    let service = LotteryService::open(
        data_dir,
        directory.clone(),
        directory,
        Arc::new(LogNotifier),
        config.engine,
    )
    .await?;

    match command {
        Commands::Lottery(cmd) => commands::handle_lottery_command(cmd, &service).await,
        Commands::Scheduler(cmd) => commands::handle_scheduler_command(cmd, &service).await,
        Commands::Directory(cmd) => commands::handle_directory_command(cmd, data_dir),
    }
}
