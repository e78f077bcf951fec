//! `ukpack list` command.

use std::sync::Arc;

use clap::Args;
use ukpack_core::config::ConfigManager;
use ukpack_core::ComponentType;
use ukpack_runtime::{CatalogQuery, Package};

use crate::output;

#[derive(Args)]
pub struct ListArgs {
    /// Name or glob, optionally as `type/name:version`
    pub name: Option<String>,

    /// Restrict to a component type (repeatable)
    #[arg(short = 't', long = "type", value_parser = super::parse_type)]
    pub types: Vec<ComponentType>,

    /// Version or channel to select
    #[arg(long)]
    pub version: Option<String>,

    /// Only list manifests from this source
    #[arg(long)]
    pub source: Option<String>,

    /// Query sources directly instead of the local cache
    #[arg(long)]
    pub no_cache: bool,

    /// Only show package ids (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

impl ListArgs {
    pub(crate) fn query(&self) -> CatalogQuery {
        let mut query = CatalogQuery::new().no_cache(self.no_cache);
        if let Some(name) = &self.name {
            query = query.with_name(name.clone());
        }
        for t in &self.types {
            query = query.with_type(*t);
        }
        if let Some(version) = &self.version {
            query = query.with_version(version.clone());
        }
        if let Some(source) = &self.source {
            query = query.with_source(source.clone());
        }
        query
    }
}

pub async fn execute(
    args: ListArgs,
    config: Arc<ConfigManager>,
) -> Result<(), Box<dyn std::error::Error>> {
    let packages = super::open_packages(config)?;
    let found = packages.catalog(&args.query()).await?;

    if args.quiet {
        for package in &found {
            println!("{}", package.id());
        }
        return Ok(());
    }

    let mut table = output::new_table(&["TYPE", "NAME", "VERSION", "FORMAT", "ORIGIN"]);
    for package in &found {
        table.add_row(vec![
            package
                .component_type()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            package.name().to_string(),
            package.version().to_string(),
            package.format().to_string(),
            origin(package),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn origin(package: &Package) -> String {
    match package {
        Package::Manifest(p) => p.manifest().origin.clone(),
        Package::Oci(p) => p.reference().registry.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ListArgs {
        ListArgs {
            name: None,
            types: Vec::new(),
            version: None,
            source: None,
            no_cache: false,
            quiet: false,
        }
    }

    #[test]
    fn test_query_from_flags() {
        let query = ListArgs {
            name: Some("musl".to_string()),
            types: vec![ComponentType::Lib],
            version: Some("1.2.4".to_string()),
            no_cache: true,
            ..args()
        }
        .query();

        assert_eq!(query.name.as_deref(), Some("musl"));
        assert_eq!(query.types, vec![ComponentType::Lib]);
        assert_eq!(query.version.as_deref(), Some("1.2.4"));
        assert!(query.no_cache);
        assert_eq!(query.to_string(), "lib/musl:1.2.4");
    }

    #[test]
    fn test_empty_query_lists_everything() {
        let query = args().query();
        assert!(query.name.is_none());
        assert!(query.types.is_empty());
        assert!(!query.no_cache);
    }
}
