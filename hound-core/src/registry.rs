//! Platform catalog registry
//!
//! Catalogs are TOML files holding an array of `[[platform]]` tables. A default
//! catalog is compiled into the binary; external ones can be layered on top.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};

use crate::{CatalogError, IdentifierKind, Platform, PlatformCategory};

static EMBEDDED_CATALOG: &str = include_str!("../catalog/platforms.toml");

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    platform: Vec<Platform>,
}

/// Read-only set of platform records, in catalog order
#[derive(Debug, Clone, Default)]
pub struct PlatformRegistry {
    platforms: Vec<Platform>,
    by_name: HashMap<String, usize>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from already-constructed records
    pub fn from_platforms(platforms: Vec<Platform>) -> Result<Self, CatalogError> {
        let mut registry = Self::new();
        for platform in platforms {
            registry.insert(platform)?;
        }
        Ok(registry)
    }

    /// The catalog shipped with the crate
    pub fn load_embedded() -> Result<Self, CatalogError> {
        Self::from_toml_str(EMBEDDED_CATALOG)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let mut registry = Self::new();
        registry.merge_toml_str(content)?;
        Ok(registry)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let mut registry = Self::new();
        registry.merge_file(path.as_ref())?;
        Ok(registry)
    }

    /// Load every `*.toml` file in a directory, in file-name order
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let dir = dir.as_ref();
        let io_err = |source| CatalogError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut files: Vec<_> = std::fs::read_dir(dir)
            .map_err(io_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        files.sort();

        let mut registry = Self::new();
        for file in files {
            registry.merge_file(&file)?;
        }
        Ok(registry)
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!("Loading platform catalog from {}", path.display());
        self.merge_toml_str(&content)
    }

    fn merge_toml_str(&mut self, content: &str) -> Result<(), CatalogError> {
        let file: CatalogFile = toml::from_str(content)?;
        for platform in file.platform {
            if !platform.active {
                debug!("Skipping inactive platform {}", platform.name);
                continue;
            }
            self.insert(platform)?;
        }
        Ok(())
    }

    fn insert(&mut self, platform: Platform) -> Result<(), CatalogError> {
        platform.validate().map_err(|reason| CatalogError::Invalid {
            name: platform.name.clone(),
            reason,
        })?;

        let key = platform.name.to_lowercase();
        if self.by_name.contains_key(&key) {
            return Err(CatalogError::Duplicate(platform.name));
        }
        if platform.sentinel.is_none() && platform.detection == crate::DetectionMethod::Pattern {
            warn!("Pattern platform {} has no sentinel identifier", platform.name);
        }

        self.by_name.insert(key, self.platforms.len());
        self.platforms.push(platform);
        Ok(())
    }

    /// Case-insensitive lookup by name
    pub fn get(&self, name: &str) -> Option<&Platform> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| &self.platforms[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Platform> {
        self.platforms.iter()
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    /// Platforms accepting `kind` and passing `filter`
    pub fn select<'a>(
        &'a self,
        kind: IdentifierKind,
        filter: &'a PlatformFilter,
    ) -> impl Iterator<Item = &'a Platform> + 'a {
        self.platforms
            .iter()
            .filter(move |p| p.active && p.supports(kind) && filter.matches(p))
    }
}

/// Caller-supplied platform selection
#[derive(Debug, Clone, Default)]
pub struct PlatformFilter {
    /// Only platforms in these categories (empty = any)
    pub categories: BTreeSet<PlatformCategory>,
    /// Only platforms with these names, case-insensitive (empty = any)
    pub names: BTreeSet<String>,
    pub exclude_nsfw: bool,
}

impl PlatformFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = PlatformCategory>) -> Self {
        self.categories.extend(categories);
        self
    }

    pub fn with_names<S: AsRef<str>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.names
            .extend(names.into_iter().map(|n| n.as_ref().to_lowercase()));
        self
    }

    pub fn exclude_nsfw(mut self, exclude: bool) -> Self {
        self.exclude_nsfw = exclude;
        self
    }

    pub fn matches(&self, platform: &Platform) -> bool {
        if self.exclude_nsfw && platform.nsfw {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&platform.category) {
            return false;
        }
        if !self.names.is_empty() && !self.names.contains(&platform.name.to_lowercase()) {
            return false;
        }
        true
    }
}
