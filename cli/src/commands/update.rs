//! `ukpack update` command.

use std::sync::Arc;

use clap::Args;
use ukpack_core::config::ConfigManager;
use ukpack_runtime::ManifestManager;

#[derive(Args)]
pub struct UpdateArgs {
    /// Only print the number of cached manifests
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: UpdateArgs,
    config: Arc<ConfigManager>,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = ManifestManager::new(config);

    if !args.quiet {
        println!("Updating manifests from {} source(s)...", manager.sources().len());
    }
    let index = manager.update().await?;

    if args.quiet {
        println!("{}", index.manifests.len());
    } else {
        println!(
            "Cached {} manifest(s) in {}",
            index.manifests.len(),
            manager.local_manifests_dir().display()
        );
    }
    Ok(())
}
