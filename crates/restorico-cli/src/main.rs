use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use restorico_core::config::{DETECTION_MODEL, RESTORATION_MODEL, UPSCALE_MODEL};
use restorico_core::{Config, Raster};
use restorico_models::{Action, HttpFetcher, Integrity, Manifest};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "restorico", about = "Restorico photo restoration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download any missing weight files
    Fetch,
    /// Restore faces and upscale a photo
    Restore {
        /// Input image (jpg/png)
        input: PathBuf,
        /// Output PNG path
        #[arg(short, long, default_value = "restored.png")]
        output: PathBuf,
        /// Upscaler tile size in pixels (0 = whole image)
        #[arg(long)]
        tile: Option<usize>,
        /// Final scale relative to the input
        #[arg(long)]
        outscale: Option<f32>,
        /// Restore only the face closest to the centre
        #[arg(long)]
        only_center_face: bool,
    },
    /// Detect faces and print them as JSON
    Faces {
        /// Input image (jpg/png)
        input: PathBuf,
    },
    /// Show model directory and weight file status
    Status,
    /// Check weight files against pinned SHA-256 digests
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();

    match cli.command {
        Commands::Fetch => {
            let manifest = load_manifest(&config)?;
            let fetcher = HttpFetcher::new().context("failed to build HTTP client")?;
            let report = restorico_models::ensure_weights(&config.model_dir, &manifest.models, &fetcher)
                .await
                .context("weight provisioning failed")?;
            for item in report {
                match item.action {
                    Action::AlreadyPresent => println!("{}: present", item.name),
                    Action::Downloaded { bytes } => {
                        println!("{}: downloaded {} bytes", item.name, bytes)
                    }
                }
            }
        }
        Commands::Restore {
            input,
            output,
            tile,
            outscale,
            only_center_face,
        } => {
            if let Some(tile) = tile {
                config.tile = tile;
            }
            if let Some(outscale) = outscale {
                anyhow::ensure!(outscale > 0.0, "--outscale must be positive");
                config.outscale = outscale;
            }
            config.only_center_face |= only_center_face;

            let written = tokio::task::spawn_blocking(move || restore(&config, &input, &output))
                .await
                .context("restore task panicked")??;
            println!("{}", written.display());
        }
        Commands::Faces { input } => {
            let faces = tokio::task::spawn_blocking(move || detect(&config, &input))
                .await
                .context("detection task panicked")??;
            println!("{}", serde_json::to_string_pretty(&faces)?);
        }
        Commands::Status => {
            let models: Vec<serde_json::Value> = [DETECTION_MODEL, RESTORATION_MODEL, UPSCALE_MODEL]
                .iter()
                .map(|name| {
                    let path = config.model_dir.join(name);
                    let size = std::fs::metadata(&path).ok().map(|m| m.len());
                    serde_json::json!({
                        "name": name,
                        "present": size.is_some(),
                        "size_bytes": size,
                    })
                })
                .collect();
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "model_dir": config.model_dir.display().to_string(),
                "manifest": config.manifest_path.as_ref().map(|p| p.display().to_string()),
                "models": models,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Verify => {
            let manifest = load_manifest(&config)?;
            let report = restorico_models::verify_weights(&config.model_dir, &manifest.models)
                .context("failed to hash weight files")?;
            let mut failed = false;
            for (name, integrity) in report {
                match integrity {
                    Integrity::Verified => println!("{name}: ok"),
                    Integrity::Unpinned => println!("{name}: present (no pinned digest)"),
                    Integrity::Missing => {
                        failed = true;
                        println!("{name}: missing");
                    }
                    Integrity::Mismatch { actual } => {
                        failed = true;
                        println!("{name}: MISMATCH (sha256 {actual})");
                    }
                }
            }
            anyhow::ensure!(!failed, "weight verification failed");
        }
    }

    Ok(())
}

fn load_manifest(config: &Config) -> Result<Manifest> {
    Manifest::load(config.manifest_path.as_deref()).context("failed to load weight manifest")
}

fn restore(config: &Config, input: &Path, output: &Path) -> Result<PathBuf> {
    let image = image::open(input)
        .with_context(|| format!("failed to decode {}", input.display()))?
        .to_rgb8();

    let mut pipeline = restorico_core::load_pipeline(config).context("failed to load models")?;
    let restored = pipeline.run(&image).context("restoration failed")?;

    restored
        .save_with_format(output, image::ImageFormat::Png)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(output.to_path_buf())
}

fn detect(config: &Config, input: &Path) -> Result<Vec<restorico_core::BoundingBox>> {
    let image = image::open(input)
        .with_context(|| format!("failed to decode {}", input.display()))?
        .to_rgb8();

    let mut restorer = restorico_core::load_restorer(config).context("failed to load models")?;
    let raster = Raster::from_rgb_image(&image);
    restorer.faces(&raster).context("face detection failed")
}
