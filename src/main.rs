use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

mod models;
mod repositories;
pub mod services;
pub mod settings;
pub mod utils;

use repositories::{
    memory::MemoryLedger,
    notifier::{HttpNotifier, LogNotifier, Notifier},
    postgres::PgLedger,
    LedgerStore,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the services, the HTTP API and the periodic accrual task.
    Serve,
    /// Run one accrual batch and exit.
    Accrue {
        /// Accrual date, defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let settings = settings::Settings::new(&args.config).context("Could not load config file.")?;

    init_logging(&args.log4rs)?;
    log::info!("Starting deposit ledger.");

    let pg = match &settings.postgres.url {
        Some(url) => Some(
            PgLedger::connect(url, settings.postgres.max_connections)
                .await
                .context("Could not connect to database.")?,
        ),
        None => None,
    };
    let store: Arc<dyn LedgerStore> = match &pg {
        Some(pg) => Arc::new(pg.clone()),
        None => {
            log::warn!("No postgres url configured, using the in-memory ledger.");
            Arc::new(MemoryLedger::new())
        }
    };

    let exit = match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let notifier: Arc<dyn Notifier> = match &settings.notifier.url {
                Some(url) => Arc::new(HttpNotifier::new(url.clone())?),
                None => Arc::new(LogNotifier),
            };

            log::info!("Starting services.");
            services::start_services(store, notifier, settings).await?;
            ExitCode::SUCCESS
        }
        Command::Accrue { date } => {
            let handler = services::accruals::AccrualRequestHandler::new(store, &settings.accruals);
            let summary = handler
                .run_daily_accruals(date.unwrap_or_else(services::accruals::today))
                .await?;

            if summary.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    };

    if let Some(pg) = pg {
        pg.close().await;
    }
    log::info!("Deposit ledger stopped.");

    Ok(exit)
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
