//! CLI entry point for picvault-admin: deployment checks.

use clap::{Parser, Subcommand};
use picvault::config::{load_with_env, Config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "picvault-admin", about = "picvault deployment checks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report which settings are set (values are never printed)
    CheckConfig {
        #[arg(long, default_value = "picvault.yaml")]
        config: PathBuf,
    },
    /// Verify the configured credentials can reach the storage buckets
    CheckStorage {
        #[arg(long, default_value = "picvault.yaml")]
        config: PathBuf,
    },
    /// Verify the metadata store answers a ping
    CheckMetadata {
        #[arg(long, default_value = "picvault.yaml")]
        config: PathBuf,
    },
}

fn load(config: &PathBuf) -> Result<Config, i32> {
    load_with_env(config).map_err(|e| {
        eprintln!("Error reading config: {}", e);
        1
    })
}

fn main() {
    let dotenv_loaded = dotenvy::dotenv().is_ok();
    let cli = Cli::parse();
    let rc = match cli.command {
        Commands::CheckConfig { config } => run_check_config(&config, dotenv_loaded),
        Commands::CheckStorage { config } => run_async(run_check_storage(config)),
        Commands::CheckMetadata { config } => run_async(run_check_metadata(config)),
    };
    std::process::exit(rc);
}

fn run_async(fut: impl std::future::Future<Output = i32>) -> i32 {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt.block_on(fut),
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            1
        }
    }
}

fn run_check_config(config: &PathBuf, dotenv_loaded: bool) -> i32 {
    let config = match load(config) {
        Ok(c) => c,
        Err(rc) => return rc,
    };

    println!("Configuration check");
    println!("-------------------");
    println!(".env loaded: {}", if dotenv_loaded { "yes" } else { "no" });
    println!("storage backend: {}", config.storage.backend);
    println!("metadata engine: {}", config.metadata.engine);
    for (name, set) in config.presence() {
        println!("{:<28} {}", name, if set { "Set" } else { "Not Set" });
    }

    match config.validate() {
        Ok(()) => {
            println!("OK");
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn run_check_storage(config: PathBuf) -> i32 {
    let config = match load(&config) {
        Ok(c) => c,
        Err(rc) => return rc,
    };
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return 1;
    }

    let backends = match picvault::storage::from_config(&config.storage).await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error building storage backend: {}", e);
            return 1;
        }
    };

    let mut rc = 0;
    match backends.primary.probe().await {
        Ok(()) => println!("upload bucket: reachable"),
        Err(e) => {
            eprintln!("upload bucket: {}", e);
            rc = 1;
        }
    }
    if let Some(compressed) = backends.compressed {
        match compressed.probe().await {
            Ok(()) => println!("compressed bucket: reachable"),
            Err(e) => {
                eprintln!("compressed bucket: {}", e);
                rc = 1;
            }
        }
    }
    rc
}

async fn run_check_metadata(config: PathBuf) -> i32 {
    let config = match load(&config) {
        Ok(c) => c,
        Err(rc) => return rc,
    };

    let store = match picvault::metadata::from_config(&config.metadata).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error opening metadata store: {}", e);
            return 1;
        }
    };
    match store.ping().await {
        Ok(()) => {
            println!("metadata store ({}): reachable", config.metadata.engine);
            0
        }
        Err(e) => {
            eprintln!("metadata store ({}): {}", config.metadata.engine, e);
            1
        }
    }
}
