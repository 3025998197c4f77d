use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use strata::cli::commands::{init, resolve, watch};
use strata::cli::{Cli, Commands};
use strata::{Runtime, Settings, logging};

fn load_settings(config: Option<&Path>) -> Result<Settings> {
    let settings = match config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Settings::load().context("Failed to load configuration")?,
    };
    logging::init_with_config(&settings.logging);
    Ok(settings)
}

fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();
    let config = config.as_deref();

    match command {
        // Init runs before any configuration exists
        Commands::Init { force } => {
            logging::init();
            init::run_init(force)
        }
        Commands::Config => init::run_config(&load_settings(config)?),
        Commands::Resolve {
            namespace,
            path,
            write,
        } => {
            let runtime = Runtime::new(load_settings(config)?)?;
            resolve::run_resolve(&runtime, &namespace, &path, write)
        }
        Commands::Cat { namespace, path } => {
            let runtime = Runtime::new(load_settings(config)?)?;
            resolve::run_cat(&runtime, &namespace, &path)
        }
        Commands::List {
            namespace,
            pattern,
            dir,
            recursive,
        } => {
            let runtime = Runtime::new(load_settings(config)?)?;
            resolve::run_list(&runtime, &namespace, &dir, pattern.as_deref(), recursive)
        }
        Commands::Watch {
            namespace,
            names,
            once,
            interval,
        } => {
            let runtime = Runtime::init(load_settings(config)?)?;
            let result = watch::run_watch(&runtime, &namespace, &names, once, interval);
            runtime.shutdown();
            result
        }
    }
}
