//! `ukpack source` commands.

use std::sync::Arc;

use clap::{Args, Subcommand};
use ukpack_core::config::ConfigManager;
use ukpack_runtime::{ManifestIndex, ManifestManager};

use crate::output;

#[derive(Subcommand)]
pub enum SourceCommand {
    /// Add a manifest source (URL or local path)
    Add(SourceArgs),
    /// Remove a manifest source
    #[command(alias = "remove")]
    Rm(SourceArgs),
    /// List configured manifest sources
    Ls,
}

#[derive(Args)]
pub struct SourceArgs {
    /// Index URL, manifest URL or local path
    pub source: String,
}

pub async fn execute(
    cmd: SourceCommand,
    config: Arc<ConfigManager>,
) -> Result<(), Box<dyn std::error::Error>> {
    let manager = ManifestManager::new(config);

    match cmd {
        SourceCommand::Add(args) => {
            if manager.add_source(&args.source)? {
                println!("Added {}", args.source);
                println!("Run `ukpack update` to refresh the index");
            } else {
                println!("{} is already configured", args.source);
            }
        }
        SourceCommand::Rm(args) => {
            if manager.remove_source(&args.source)? {
                println!("Removed {}", args.source);
            } else {
                return Err(format!("source not configured: {}", args.source).into());
            }
        }
        SourceCommand::Ls => {
            let mut table = output::new_table(&["#", "SOURCE"]);
            for (i, source) in manager.sources().iter().enumerate() {
                table.add_row(vec![(i + 1).to_string(), source.clone()]);
            }
            println!("{table}");

            match ManifestIndex::from_file(&manager.local_manifest_index()) {
                Ok(index) => println!(
                    "\n{} manifest(s) cached, updated {}",
                    index.manifests.len(),
                    output::format_ago(&index.last_updated)
                ),
                Err(e) if e.is_not_found() => println!("\nNo local index; run `ukpack update`"),
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}
