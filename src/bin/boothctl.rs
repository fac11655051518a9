use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::fs;
use tracing::info;
use twibooth::{
    prepare_download, Compositor, LocalAssetStore, LocalOverlayStore, OverlayLoader,
    OverlayRegistry, TwiboothConfig,
};

/// Manage the overlays and photos of a booth from the command line.
///
/// Works on the same storage directory as a running booth; changes show up
/// in its gallery on the next refresh.
#[derive(Parser, Debug)]
#[command(name = "boothctl")]
#[command(about = "Administer twibooth overlays and photos")]
struct Args {
    /// Path to twibooth configuration file (for storage settings)
    #[arg(short = 'c', long, default_value = "twibooth.toml")]
    config: PathBuf,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Overlay (twibbon) catalogue
    #[command(subcommand)]
    Overlay(OverlayCommand),

    /// Stored photos
    #[command(subcommand)]
    Photo(PhotoCommand),
}

#[derive(Subcommand, Debug)]
enum OverlayCommand {
    /// List overlays, newest first
    List,

    /// Add an overlay from an image file (converted to PNG)
    Add {
        #[arg(short, long)]
        name: String,
        image: PathBuf,
    },

    /// Rename an overlay
    Rename { id: u64, name: String },

    /// Replace the image of an overlay
    Replace { id: u64, image: PathBuf },

    /// Delete an overlay; photos keep their reference
    Delete { id: u64 },
}

#[derive(Subcommand, Debug)]
enum PhotoCommand {
    /// List photos, newest first
    List {
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Page size (defaults to storage.page_size)
        #[arg(long)]
        limit: Option<usize>,

        /// List every photo instead of one page
        #[arg(long, conflicts_with_all = ["offset", "limit"])]
        all: bool,
    },

    /// Delete a photo and its file
    Delete { id: u64 },

    /// Associate a photo with an overlay
    SetOverlay {
        id: u64,

        #[arg(required_unless_present = "none")]
        overlay_id: Option<u64>,

        /// Clear the association instead
        #[arg(long, conflicts_with = "overlay_id")]
        none: bool,
    },

    /// Write a photo to disk, merged with its overlay when it has one
    Download {
        id: u64,

        /// Output file (defaults to the download name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new("twibooth=warn,boothctl=info")
                }),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = TwiboothConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let photos = LocalAssetStore::open(&config.storage)
        .await
        .context("Failed to open photo store")?;
    let overlays = Arc::new(
        LocalOverlayStore::open(&config.storage)
            .await
            .context("Failed to open overlay store")?,
    );

    match args.command {
        Command::Overlay(command) => run_overlay(command, &overlays, args.json).await,
        Command::Photo(command) => {
            let compositor = Compositor::new(
                config.compositor.clone(),
                Arc::clone(&overlays) as Arc<dyn OverlayLoader>,
            );
            run_photo(command, &photos, &overlays, &compositor, args.json).await
        }
    }
}

async fn run_overlay(
    command: OverlayCommand,
    overlays: &LocalOverlayStore,
    json: bool,
) -> Result<()> {
    match command {
        OverlayCommand::List => {
            let list = overlays.list().await?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No overlays");
            }
            for (position, overlay) in list.iter().enumerate() {
                // positions match the booth's 1-9 keys
                println!(
                    "[{}] #{} {} ({}, {})",
                    position + 1,
                    overlay.id,
                    overlay.name,
                    overlay.file_name,
                    overlay.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        OverlayCommand::Add { name, image } => {
            let bytes = read_file(&image).await?;
            let overlay = overlays.create(&name, bytes).await?;
            report(json, &overlay, format!("Added overlay #{} '{}'", overlay.id, overlay.name))?;
        }
        OverlayCommand::Rename { id, name } => {
            let overlay = overlays.update(id, Some(&name), None).await?;
            report(json, &overlay, format!("Renamed overlay #{} to '{}'", overlay.id, overlay.name))?;
        }
        OverlayCommand::Replace { id, image } => {
            let bytes = read_file(&image).await?;
            let overlay = overlays.update(id, None, Some(bytes)).await?;
            report(json, &overlay, format!("Replaced image of overlay #{}", overlay.id))?;
        }
        OverlayCommand::Delete { id } => {
            let overlay = overlays.delete(id).await?;
            report(json, &overlay, format!("Deleted overlay #{} '{}'", overlay.id, overlay.name))?;
        }
    }
    Ok(())
}

async fn run_photo(
    command: PhotoCommand,
    photos: &LocalAssetStore,
    overlays: &LocalOverlayStore,
    compositor: &Compositor,
    json: bool,
) -> Result<()> {
    match command {
        PhotoCommand::List { offset, limit, all } => {
            let (items, has_more) = if all {
                (photos.list_all().await?, false)
            } else {
                let page = photos
                    .list_page(offset, limit.unwrap_or_else(|| photos.page_size()))
                    .await?;
                (page.items, page.has_more)
            };

            if json {
                return print_json(&serde_json::json!({ "items": items, "has_more": has_more }));
            }
            if items.is_empty() {
                println!("No photos");
            }
            for photo in &items {
                let overlay = photo
                    .overlay_id
                    .map(|id| format!("overlay #{}", id))
                    .unwrap_or_else(|| "no overlay".to_string());
                println!(
                    "#{} {} ({}, {})",
                    photo.id,
                    photo.file_name,
                    overlay,
                    photo.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            if has_more {
                println!("... more available (use --offset {})", offset + items.len());
            }
        }
        PhotoCommand::Delete { id } => {
            let photo = photos.delete(id).await?;
            report(json, &photo, format!("Deleted photo #{} ({})", photo.id, photo.file_name))?;
        }
        PhotoCommand::SetOverlay {
            id,
            overlay_id,
            none,
        } => {
            let overlay_id = if none { None } else { overlay_id };
            if let Some(overlay_id) = overlay_id {
                if overlays.get(overlay_id).await?.is_none() {
                    return Err(anyhow!("Overlay {} not found", overlay_id));
                }
            }
            let photo = photos.update_overlay(id, overlay_id).await?;
            let message = match photo.overlay_id {
                Some(overlay_id) => format!("Photo #{} now uses overlay #{}", photo.id, overlay_id),
                None => format!("Photo #{} no longer uses an overlay", photo.id),
            };
            report(json, &photo, message)?;
        }
        PhotoCommand::Download { id, output } => {
            let download = prepare_download(photos, overlays, compositor, id).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&download.file_name));
            fs::write(&path, &download.bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} ({} bytes)", path.display(), download.bytes.len());

            let summary = DownloadSummary {
                path: path.display().to_string(),
                bytes: download.bytes.len(),
                merged: download.merged,
            };
            report(json, &summary, format!("Saved {}", summary.path))?;
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct DownloadSummary {
    path: String,
    bytes: usize,
    merged: bool,
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn report<T: Serialize>(json: bool, value: &T, message: String) -> Result<()> {
    if json {
        print_json(value)
    } else {
        println!("{}", message);
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
