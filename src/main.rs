use std::sync::Arc;

use anyhow::Context;

use speedy_sync::{Config, ReadStatusTracker, StorageMode, SyncCoordinator};

const USAGE: &str = "usage: rss-sync [status | resync | mark-read <url> | folders]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("status");

    let config = Config::load().context("loading sync config")?;
    let coordinator = Arc::new(
        SyncCoordinator::from_config(&config)
            .await
            .context("starting sync coordinator")?,
    );

    match command {
        "status" => {
            let tracker = ReadStatusTracker::load(coordinator.clone()).await?;
            let status = coordinator.status();
            println!("Storage mode: {:?}", coordinator.storage_mode());
            println!("Read items:   {}", tracker.read_count());
            println!("Sync state:   {:?}", status.state);
            if let Some(at) = status.last_successful_sync {
                println!("Last sync:    {}", at.to_rfc3339());
            }
            if let Some(err) = status.last_error {
                println!("Last error:   {}", err);
            }
        }

        "resync" => {
            if coordinator.storage_mode() != StorageMode::Remote {
                anyhow::bail!("resync needs storage_mode = \"remote\" in {:?}", Config::config_path());
            }
            let report = coordinator.force_full_resync().await?;
            println!("Resynced {} keys", report.updated.len());
            for (key, err) in &report.failed {
                eprintln!("  {}: {}", key, err);
            }
            if !report.is_clean() {
                std::process::exit(1);
            }
        }

        "mark-read" => {
            let url = args.get(2).context(USAGE)?;
            let tracker = ReadStatusTracker::load(coordinator.clone()).await?;
            tracker.mark_read(url).await?;
            println!("Marked {} as read", speedy_sync::normalize_link(url));
        }

        "folders" => {
            for folder in coordinator.get_folders().await? {
                println!("{} ({} feeds)", folder.name, folder.feed_urls.len());
                for url in &folder.feed_urls {
                    println!("  {}", url);
                }
            }
        }

        _ => anyhow::bail!(USAGE),
    }

    Ok(())
}
