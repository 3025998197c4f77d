//! Resolve, cat and list commands.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::namespace::{Namespace, ResolvedBinding};
use crate::runtime::Runtime;

fn namespace(runtime: &Runtime, name: &str) -> Result<Arc<Namespace>> {
    match runtime.namespace(name) {
        Some(namespace) => Ok(namespace),
        None => {
            let known: Vec<_> = runtime.namespaces().map(|(name, _)| name).collect();
            bail!("Unknown namespace '{name}' (configured: {})", known.join(", "))
        }
    }
}

fn print_binding(binding: &ResolvedBinding) {
    println!("path:     {}", binding.logical_path());
    println!("location: {}", binding.location());
    println!("weight:   {}", binding.weight());
    match binding.physical() {
        Some(physical) => println!("physical: {}", physical.display()),
        None => println!("physical: -"),
    }
}

/// Run resolve command - show the provider serving a read or write.
pub fn run_resolve(runtime: &Runtime, ns: &str, path: &str, write: bool) -> Result<()> {
    let namespace = namespace(runtime, ns)?;
    if write {
        let binding = namespace
            .resolve_for_write(path)
            .with_context(|| format!("Cannot write {path} in {ns}"))?;
        print_binding(&binding);
        return Ok(());
    }

    match namespace.resolve_for_read(path) {
        Some(binding) => {
            print_binding(&binding);
            Ok(())
        }
        None => bail!("{path} not found in namespace {ns}"),
    }
}

/// Run cat command - print the served content.
pub fn run_cat(runtime: &Runtime, ns: &str, path: &str) -> Result<()> {
    let namespace = namespace(runtime, ns)?;
    let Some(bytes) = namespace.read_to_vec(path)? else {
        bail!("{path} not found in namespace {ns}");
    };
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    Ok(())
}

/// Run list command - print merged listing.
pub fn run_list(
    runtime: &Runtime,
    ns: &str,
    dir: &str,
    pattern: Option<&str>,
    recursive: bool,
) -> Result<()> {
    let namespace = namespace(runtime, ns)?;
    for path in namespace.list_in(dir, pattern, recursive)? {
        println!("{path}");
    }
    Ok(())
}
