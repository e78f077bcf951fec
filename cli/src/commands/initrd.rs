//! `ukpack initrd` command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use ukpack_core::config::ConfigManager;
use ukpack_runtime::{new_from_path, Initrd, InitrdOptions};

#[derive(Args)]
pub struct InitrdArgs {
    /// Directory, tarball, Dockerfile or existing CPIO archive
    pub path: PathBuf,

    /// Archive path (defaults to a temporary file)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Export the build cache here (Dockerfile only)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// List the archived files after building
    #[arg(short, long)]
    pub list: bool,
}

pub async fn execute(
    args: InitrdArgs,
    config: Arc<ConfigManager>,
) -> Result<(), Box<dyn std::error::Error>> {
    let opts = InitrdOptions {
        output: args.output,
        cache_dir: args.cache_dir,
        buildkit_host: Some(config.config().buildkit_host),
    };

    let mut initrd = new_from_path(&args.path, opts)?;
    let output = initrd.build().await?;

    if args.list {
        for file in initrd.files() {
            println!("{file}");
        }
    }
    println!("Built: {} ({} file(s))", output.display(), initrd.files().len());
    Ok(())
}
