//! Watch command - print resource names as their served content changes.

use anyhow::{Result, bail};

use crate::runtime::Runtime;

pub fn run_watch(
    runtime: &Runtime,
    ns: &str,
    names: &[String],
    once: bool,
    interval: Option<u64>,
) -> Result<()> {
    if let Some(interval) = interval {
        let applied = runtime.set_poll_interval(interval);
        crate::debug_event!("watch", "interval", "{}ms", applied.as_millis());
    }

    let (tx, rx) = crossbeam_channel::unbounded::<String>();
    let mut watchers = Vec::with_capacity(names.len());
    for name in names {
        let tx = tx.clone();
        let watcher = runtime.watch_resource(
            ns,
            name,
            move |changed: &str| {
                let _ = tx.send(changed.to_string());
            },
            !once,
        )?;
        watchers.push(watcher);
    }
    drop(tx);

    eprintln!(
        "Watching {} resource(s) in {ns} every {}ms",
        names.len(),
        runtime.poller().poll_interval().as_millis()
    );

    for changed in rx.iter() {
        let served = runtime
            .namespace(ns)
            .and_then(|namespace| namespace.resolve_for_read(&changed))
            .map(|binding| binding.location())
            .unwrap_or_else(|| "<removed>".to_string());
        println!("{changed}\t{served}");
        if once {
            return Ok(());
        }
    }

    bail!("Poller stopped while watching")
}
