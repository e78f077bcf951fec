//! `ukpack image` commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Subcommand};
use ukpack_core::config::ConfigManager;
use ukpack_runtime::oci::{DirectoryHandler, OciDistributionRegistry, RegistryAuth};

use crate::output;

#[derive(Subcommand)]
pub enum ImageCommand {
    /// Fetch an image into the local OCI store
    Fetch(FetchArgs),
    /// Unpack a stored image into a directory
    Unpack(UnpackArgs),
    /// List images in the local OCI store
    Ls,
}

#[derive(Args)]
pub struct FetchArgs {
    /// Image reference (e.g., "unikraft.org/nginx:1.25")
    pub reference: String,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct UnpackArgs {
    /// Image reference
    pub reference: String,

    /// Destination directory
    pub dest: PathBuf,
}

pub async fn execute(
    cmd: ImageCommand,
    config: Arc<ConfigManager>,
) -> Result<(), Box<dyn std::error::Error>> {
    let handler = DirectoryHandler::new(config.config().paths.oci)?;

    match cmd {
        ImageCommand::Fetch(args) => {
            let registry = OciDistributionRegistry::with_auth(RegistryAuth::from_env());
            let report = |fraction: f64| {
                eprintln!("{} {}", output::format_percent(fraction), args.reference);
            };
            let progress: Option<&(dyn Fn(f64) + Send + Sync)> =
                if args.quiet { None } else { Some(&report) };

            let image = handler.fetch_image(&args.reference, &registry, progress).await?;
            println!(
                "Fetched: {} ({} layer(s))",
                image.reference,
                image.manifest.layers().len()
            );
        }
        ImageCommand::Unpack(args) => {
            let dest = args.dest.clone();
            let image = tokio::task::spawn_blocking(move || {
                handler.unpack_image(&args.reference, &args.dest)
            })
            .await??;
            println!("Unpacked: {} ({})", image.reference, dest.display());
        }
        ImageCommand::Ls => {
            let mut table = output::new_table(&["REFERENCE", "CONFIG", "LAYERS"]);
            for stored in handler.list_manifests()? {
                let reference = stored
                    .reference
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| stored.name.clone());
                table.add_row(vec![
                    reference,
                    output::short_digest(stored.manifest.config().digest()),
                    stored.manifest.layers().len().to_string(),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}
