//! CLI command definitions and dispatch.

mod image;
mod initrd;
mod list;
mod pull;
mod source;
mod update;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use ukpack_core::config::{default_config_path, ConfigManager};
use ukpack_core::ComponentType;
use ukpack_runtime::PackageManagers;

/// ukpack - Unikraft package manager.
#[derive(Parser)]
#[command(name = "ukpack", version, about)]
pub struct Cli {
    /// Config file (defaults to $UKPACK_CONFIG or the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Refresh the local manifest index from every configured source
    Update(update::UpdateArgs),
    /// List packages matching a query
    #[command(alias = "ls")]
    List(list::ListArgs),
    /// Manage manifest sources
    #[command(subcommand)]
    Source(source::SourceCommand),
    /// Pull one or more packages
    Pull(pull::PullArgs),
    /// Work with images in the local OCI store
    #[command(subcommand)]
    Image(image::ImageCommand),
    /// Build a CPIO initrd from a directory, tarball or Dockerfile
    Initrd(initrd::InitrdArgs),
}

/// Load configuration from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> Result<Arc<ConfigManager>, Box<dyn std::error::Error>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    Ok(Arc::new(ConfigManager::load(path)?))
}

/// Build the package backends from configuration.
pub(crate) fn open_packages(
    config: Arc<ConfigManager>,
) -> Result<PackageManagers, Box<dyn std::error::Error>> {
    Ok(PackageManagers::from_config(config)?)
}

/// Parse a `--type` flag value.
pub(crate) fn parse_type(value: &str) -> Result<ComponentType, String> {
    value.parse::<ComponentType>().map_err(|e| e.to_string())
}

/// Run `command` against an already loaded configuration.
pub async fn dispatch(
    command: Command,
    config: Arc<ConfigManager>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Update(args) => update::execute(args, config).await,
        Command::List(args) => list::execute(args, config).await,
        Command::Source(cmd) => source::execute(cmd, config).await,
        Command::Pull(args) => pull::execute(args, config).await,
        Command::Image(cmd) => image::execute(cmd, config).await,
        Command::Initrd(args) => initrd::execute(args, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_list_flags() {
        let cli = Cli::parse_from([
            "ukpack", "list", "lib/*", "--type", "lib", "--version", "1.0", "--no-cache",
        ]);
        let Command::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.name.as_deref(), Some("lib/*"));
        assert_eq!(args.types, vec![ComponentType::Lib]);
        assert_eq!(args.version.as_deref(), Some("1.0"));
        assert!(args.no_cache);
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(Cli::try_parse_from(["ukpack", "list", "--type", "bogus"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::parse_from(["ukpack", "update", "--config", "/tmp/ukpack.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/ukpack.yaml")));
    }

    #[test]
    fn test_parse_image_unpack() {
        let cli = Cli::parse_from(["ukpack", "image", "unpack", "unikraft.org/nginx:1.25", "/tmp/rootfs"]);
        assert!(matches!(cli.command, Command::Image(image::ImageCommand::Unpack(_))));
    }

    #[tokio::test]
    async fn test_dispatch_uses_the_given_config() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Arc::new(ConfigManager::with_config(
            tmp.path().join("config.yaml"),
            ukpack_core::config::KitConfig::default(),
        ));
        let cli = Cli::parse_from(["ukpack", "source", "add", "https://manifests.example.org/index.yaml"]);

        dispatch(cli.command, Arc::clone(&config)).await.unwrap();

        assert!(config
            .config()
            .manifests
            .contains(&"https://manifests.example.org/index.yaml".to_string()));
    }

    #[test]
    fn test_parse_type() {
        assert_eq!(parse_type("apps").unwrap(), ComponentType::App);
        assert!(parse_type("nope").is_err());
    }
}
