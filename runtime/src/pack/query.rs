//! Catalog queries.

use ukpack_core::component::ComponentType;
use ukpack_core::error::{PackError, Result};

/// Filter applied by package managers when listing packages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogQuery {
    /// Glob over package names; may encode `type/name:version`
    pub name: Option<String>,
    /// Accepted component types (empty means all)
    pub types: Vec<ComponentType>,
    /// Explicit version or channel name
    pub version: Option<String>,
    /// Only manifests originating from this source
    pub source: Option<String>,
    /// Bypass the local cache
    pub no_cache: bool,
}

impl CatalogQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_type(mut self, component_type: ComponentType) -> Self {
        self.types.push(component_type);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Split a structured name into its parts.
    ///
    /// `lib/foo:1.0` becomes name `foo`, version `1.0` and an extra `lib`
    /// type. Names that do not parse are left untouched.
    pub fn normalized(&self) -> CatalogQuery {
        let mut query = self.clone();
        let Some(name) = self.name.as_deref() else {
            return query;
        };

        if let Ok((component_type, bare, version)) = guess_type_name_version(name) {
            query.name = Some(bare);
            if version.is_some() {
                query.version = version;
            }
            if let Some(t) = component_type {
                if !query.types.contains(&t) {
                    query.types.push(t);
                }
            }
        }
        query
    }

    pub fn matches_type(&self, component_type: Option<ComponentType>) -> bool {
        if self.types.is_empty() {
            return true;
        }
        component_type.map_or(false, |t| self.types.contains(&t))
    }
}

impl std::fmt::Display for CatalogQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let [only] = self.types.as_slice() {
            write!(f, "{}/", only)?;
        }
        f.write_str(self.name.as_deref().unwrap_or("*"))?;
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

/// Parse `[type/]name[:version|@version]`.
///
/// The type prefix accepts singular or plural spellings. A prefix that is
/// not a component type, or an empty name, is `InvalidReference`.
pub fn guess_type_name_version(
    input: &str,
) -> Result<(Option<ComponentType>, String, Option<String>)> {
    let input = input.trim();

    let (component_type, rest) = match input.split_once('/') {
        Some((prefix, rest)) => (Some(prefix.parse::<ComponentType>()?), rest),
        None => (None, input),
    };

    let (name, version) = match rest.rsplit_once(|c| c == ':' || c == '@') {
        Some((name, version)) if !version.is_empty() => (name, Some(version.to_string())),
        Some((name, _)) => (name, None),
        None => (rest, None),
    };

    if name.is_empty() || name.contains('/') {
        return Err(PackError::InvalidReference(format!(
            "cannot parse component name from '{}'",
            input
        )));
    }

    Ok((component_type, name.to_string(), version))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_full_form() {
        let (t, n, v) = guess_type_name_version("lib/foo:1.0").unwrap();
        assert_eq!(t, Some(ComponentType::Lib));
        assert_eq!(n, "foo");
        assert_eq!(v.as_deref(), Some("1.0"));
    }

    #[test]
    fn test_guess_plural_type_and_at_version() {
        let (t, n, v) = guess_type_name_version("apps/nginx@stable").unwrap();
        assert_eq!(t, Some(ComponentType::App));
        assert_eq!(n, "nginx");
        assert_eq!(v.as_deref(), Some("stable"));
    }

    #[test]
    fn test_guess_bare_name() {
        let (t, n, v) = guess_type_name_version("musl").unwrap();
        assert_eq!(t, None);
        assert_eq!(n, "musl");
        assert_eq!(v, None);
    }

    #[test]
    fn test_guess_rejects_unknown_prefix() {
        assert!(guess_type_name_version("unikraft.org/nginx:1.25").is_err());
        assert!(guess_type_name_version("lib/").is_err());
    }

    #[test]
    fn test_normalized_keeps_explicit_version_when_name_has_none() {
        let q = CatalogQuery::new()
            .with_name("lib/foo")
            .with_version("staging")
            .normalized();
        assert_eq!(q.name.as_deref(), Some("foo"));
        assert_eq!(q.version.as_deref(), Some("staging"));
        assert_eq!(q.types, vec![ComponentType::Lib]);
    }

    #[test]
    fn test_normalized_leaves_unparseable_names() {
        let q = CatalogQuery::new()
            .with_name("unikraft.org/nginx:1.25")
            .normalized();
        assert_eq!(q.name.as_deref(), Some("unikraft.org/nginx:1.25"));
        assert!(q.types.is_empty());
    }

    #[test]
    fn test_display() {
        let q = CatalogQuery::new()
            .with_name("foo")
            .with_type(ComponentType::Lib)
            .with_version("1.0");
        assert_eq!(q.to_string(), "lib/foo:1.0");
    }
}
