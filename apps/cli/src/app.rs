//! Command orchestration: wires the engine to the local backend and reports
//! transfer events on the terminal.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cirrus_engine::{
    Collaborators, JobHandle, JsonFileStorage, LocalFileSink, TransferEngine, TransferEvent,
    TransferOutcome, UploadSource, offline_entries,
};
use cirrus_local_backend::{LocalBackend, PlainKeyProvider};
use tokio::sync::mpsc;

use crate::Command;
use crate::config::Config;

/// Runs one CLI command to completion.
pub async fn run(config: Config, command: Command) -> anyhow::Result<()> {
    let backend = Arc::new(LocalBackend::open(config.backend_path()).await?);

    match command {
        Command::List { folder } => {
            let files = backend.list(folder.as_deref()).await;
            if files.is_empty() {
                println!("no files");
            }
            for file in files {
                println!(
                    "{}  {:>10}  {}/{}",
                    file.id,
                    human_bytes(file.size),
                    file.parent,
                    file.name
                );
            }
            Ok(())
        }
        Command::Offline => {
            let storage = JsonFileStorage::open(config.state_path()).await?;
            for entry in offline_entries(&storage).await? {
                println!(
                    "{}  {:>10}  {}",
                    entry.id,
                    human_bytes(entry.size),
                    entry.path.display()
                );
            }
            Ok(())
        }
        Command::Prune { min_age_secs } => {
            let removed = backend
                .prune_orphans(Duration::from_secs(min_age_secs))
                .await?;
            println!("removed {removed} orphaned upload(s)");
            Ok(())
        }
        Command::Upload { paths, folder } => {
            let folder = folder.unwrap_or_else(|| config.default_folder.clone());
            let mut engine = build_engine(&config, backend).await?;

            let mut handles = Vec::with_capacity(paths.len());
            for path in paths {
                match engine
                    .enqueue_upload(UploadSource::from_path(&path), &folder)
                    .await
                {
                    Ok(handle) => handles.push(handle),
                    Err(e) => eprintln!("{}: {e}", path.display()),
                }
            }
            drive(&mut engine, handles, ctrl_c(), print_event).await
        }
        Command::Download { id, output } => {
            let mut engine = build_engine(&config, backend).await?;
            let descriptor = engine.resolve(&id).await?;
            let output = output.unwrap_or_else(|| PathBuf::from(&descriptor.name));
            let handle = engine.enqueue_download(descriptor, &output)?;
            drive(&mut engine, vec![handle], ctrl_c(), print_event).await
        }
    }
}

async fn build_engine(
    config: &Config,
    backend: Arc<LocalBackend>,
) -> anyhow::Result<TransferEngine> {
    let storage = JsonFileStorage::open(config.state_path()).await?;
    let engine = TransferEngine::new(
        config.engine.clone(),
        Collaborators {
            api: backend.clone(),
            transport: backend,
            keys: Arc::new(PlainKeyProvider),
            storage: Arc::new(storage),
            sink: Arc::new(LocalFileSink),
        },
    )?;
    Ok(engine)
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Waits for every job, handing each event to `on_event` as it arrives.
/// `interrupt` resolving cancels everything.
///
/// Every event, terminal ones included, reaches `on_event` before this
/// returns.
async fn drive(
    engine: &mut TransferEngine,
    handles: Vec<JobHandle>,
    interrupt: impl Future<Output = ()>,
    mut on_event: impl FnMut(TransferEvent),
) -> anyhow::Result<()> {
    let mut events = engine.take_events();

    let interrupted = pump(&mut events, &mut on_event, async {
        tokio::select! {
            biased;
            _ = interrupt => true,
            _ = count_failed(&handles) => false,
        }
    })
    .await;
    if interrupted {
        tracing::warn!("interrupted, cancelling transfers");
    }

    pump(&mut events, &mut on_event, engine.shutdown()).await;
    let failed = pump(&mut events, &mut on_event, count_failed(&handles)).await;
    if let Some(rx) = events.as_mut() {
        while let Ok(event) = rx.try_recv() {
            on_event(event);
        }
    }

    if interrupted {
        anyhow::bail!("interrupted");
    }
    if failed > 0 {
        anyhow::bail!("{failed} transfer(s) failed");
    }
    Ok(())
}

/// Runs `work` to completion while forwarding events.
async fn pump<F: Future>(
    events: &mut Option<mpsc::Receiver<TransferEvent>>,
    on_event: &mut impl FnMut(TransferEvent),
    work: F,
) -> F::Output {
    tokio::pin!(work);
    loop {
        tokio::select! {
            out = &mut work => return out,
            Some(event) = next_event(events) => on_event(event),
        }
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransferEvent>>) -> Option<TransferEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn count_failed(handles: &[JobHandle]) -> usize {
    let mut failed = 0;
    for handle in handles {
        if matches!(handle.wait().await, TransferOutcome::Failed(_)) {
            failed += 1;
        }
    }
    failed
}

fn print_event(event: TransferEvent) {
    match event {
        TransferEvent::Queued { name, direction, .. } => println!("{name}: queued {direction}"),
        TransferEvent::Started { name, .. } => println!("{name}: started"),
        TransferEvent::Progress(p) => {
            let eta = p
                .eta_secs
                .map(|s| format!(", eta {s:.0}s"))
                .unwrap_or_default();
            println!(
                "{}: {:>3}%  {}/{}  {}/s{eta}",
                p.name,
                p.percentage,
                human_bytes(p.bytes_transferred),
                human_bytes(p.bytes_total),
                human_bytes(p.bytes_per_second as u64),
            );
        }
        TransferEvent::Completed { name, .. } => println!("{name}: done"),
        TransferEvent::Failed { name, reason, .. } => eprintln!("{name}: failed: {reason}"),
        TransferEvent::Cancelled { name, .. } => println!("{name}: cancelled"),
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
