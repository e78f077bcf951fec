//! `ukpack pull` command.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use ukpack_core::config::ConfigManager;
use ukpack_core::ComponentType;
use ukpack_runtime::pack::ProgressCallback;
use ukpack_runtime::{pull_all, CatalogQuery, PullOptions};

use crate::output;

#[derive(Args)]
pub struct PullArgs {
    /// Packages to pull, as `[type/]name[:version]` or an image reference
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Destination root (defaults to the configured sources directory)
    #[arg(short, long)]
    pub workdir: Option<PathBuf>,

    /// Restrict to a component type
    #[arg(short = 't', long = "type", value_parser = super::parse_type)]
    pub component_type: Option<ComponentType>,

    /// Version or channel to select
    #[arg(long)]
    pub version: Option<String>,

    /// Resolve against sources directly instead of the local cache
    #[arg(long)]
    pub no_cache: bool,

    /// Maximum concurrent pulls
    #[arg(short, long, default_value_t = 4)]
    pub jobs: usize,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,
}

impl PullArgs {
    fn query(&self, name: &str) -> CatalogQuery {
        let mut query = CatalogQuery::new().with_name(name).no_cache(self.no_cache);
        if let Some(t) = self.component_type {
            query = query.with_type(t);
        }
        if let Some(version) = &self.version {
            query = query.with_version(version.clone());
        }
        query
    }
}

pub async fn execute(
    args: PullArgs,
    config: Arc<ConfigManager>,
) -> Result<(), Box<dyn std::error::Error>> {
    let packages = super::open_packages(config)?;

    // Every name must resolve to exactly one package before anything is pulled
    let mut resolved = Vec::with_capacity(args.names.len());
    for name in &args.names {
        resolved.push(packages.resolve_one(&args.query(name)).await?);
    }

    let mut opts = PullOptions {
        workdir: args.workdir.clone(),
        on_progress: None,
    };

    if let [package] = resolved.as_slice() {
        if !args.quiet {
            println!("Pulling {}...", package.id());
            let id = package.id();
            let progress: ProgressCallback = Arc::new(move |fraction: f64| {
                eprintln!("{} {}", output::format_percent(fraction), id);
            });
            opts.on_progress = Some(progress);
        }
        let dest = package.pull(&opts).await?;
        if args.quiet {
            println!("{}", dest.display());
        } else {
            println!("Pulled: {} ({})", package.id(), dest.display());
        }
        return Ok(());
    }

    let reports = pull_all(resolved, &opts, args.jobs).await;
    let mut failed = 0;
    let mut table = output::new_table(&["PACKAGE", "STATUS", "PATH"]);
    for report in &reports {
        match &report.result {
            Ok(dest) => {
                table.add_row(vec![report.id.clone(), "pulled".to_string(), dest.display().to_string()]);
            }
            Err(e) => {
                failed += 1;
                table.add_row(vec![report.id.clone(), "failed".to_string(), e.to_string()]);
            }
        }
    }
    if !args.quiet {
        println!("{table}");
    }

    if failed > 0 {
        return Err(format!("{} of {} pulls failed", failed, reports.len()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_applies_flags_to_each_name() {
        let args = PullArgs {
            names: vec!["musl".to_string(), "lwip".to_string()],
            workdir: None,
            component_type: Some(ComponentType::Lib),
            version: Some("stable".to_string()),
            no_cache: true,
            jobs: 4,
            quiet: false,
        };

        let query = args.query("lwip");
        assert_eq!(query.name.as_deref(), Some("lwip"));
        assert_eq!(query.types, vec![ComponentType::Lib]);
        assert_eq!(query.version.as_deref(), Some("stable"));
        assert!(query.no_cache);
    }
}
