use std::fs;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

mod models;
mod repositories;
pub mod services;
pub mod settings;
pub mod utils;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Overrides `http.listen` from the config file.
    #[arg(short, long)]
    listen: Option<String>,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs).expect("Failed to initialize logging.");
    let settings = settings::Settings::load(&args.config).expect("Failed to load settings.");
    log::info!("Starting referral bot core.");

    let pool = PgPoolOptions::new()
        .max_connections(settings.postgres.max_connections)
        .connect(&settings.postgres.url)
        .await
        .expect("Could not connect to database.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Could not run database migrations.");

    let listen = args
        .listen
        .clone()
        .unwrap_or_else(|| settings.http.listen.clone());

    log::info!("Starting services.");
    services::start_services(pool, settings, &listen)
        .await
        .expect("Could not start services.");

    Ok(())
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
