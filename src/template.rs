//! Query templates: lookup per version and placeholder substitution.

use crate::error::{RankevalError, Result};
use lru::LruCache;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use walkdir::WalkDir;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

pub trait TemplateResolver: Send + Sync {
    /// Body of the most specific template name for `version`: the query's own
    /// template, else the group default. `None` when neither is set.
    fn resolve(
        &self,
        default_template: Option<&str>,
        template: Option<&str>,
        version: &str,
    ) -> Result<Option<String>>;
}

fn template_name<'a>(default_template: Option<&'a str>, template: Option<&'a str>) -> Option<&'a str> {
    template.or(default_template)
}

/// Templates on disk. `<root>/<version>/<name>` overrides `<root>/<name>`.
pub struct FileTemplateResolver {
    root: PathBuf,
    cache: Mutex<LruCache<(String, String), String>>,
}

impl FileTemplateResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_capacity(root, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(root: impl Into<PathBuf>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            root: root.into(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, name: &str, version: &str) -> Result<String> {
        let candidates = [self.root.join(version).join(name), self.root.join(name)];
        for path in &candidates {
            if path.is_file() {
                log::debug!("Template {} for version {} -> {}", name, version, path.display());
                return Ok(std::fs::read_to_string(path)?);
            }
        }
        Err(RankevalError::Template(format!(
            "template '{}' not found for version {} under {}",
            name,
            version,
            self.root.display()
        )))
    }
}

impl TemplateResolver for FileTemplateResolver {
    fn resolve(
        &self,
        default_template: Option<&str>,
        template: Option<&str>,
        version: &str,
    ) -> Result<Option<String>> {
        let Some(name) = template_name(default_template, template) else {
            return Ok(None);
        };
        let key = (version.to_string(), name.to_string());
        if let Some(body) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Some(body.clone()));
        }

        let body = self.read(name, version)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, body.clone());
        Ok(Some(body))
    }
}

/// Templates registered in code, optionally per version.
#[derive(Debug, Default)]
pub struct InMemoryTemplateResolver {
    shared: HashMap<String, String>,
    versioned: HashMap<(String, String), String>,
}

impl InMemoryTemplateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, body: &str) {
        self.shared.insert(name.to_string(), body.to_string());
    }

    pub fn insert_for_version(&mut self, version: &str, name: &str, body: &str) {
        self.versioned
            .insert((version.to_string(), name.to_string()), body.to_string());
    }
}

impl TemplateResolver for InMemoryTemplateResolver {
    fn resolve(
        &self,
        default_template: Option<&str>,
        template: Option<&str>,
        version: &str,
    ) -> Result<Option<String>> {
        let Some(name) = template_name(default_template, template) else {
            return Ok(None);
        };
        self.versioned
            .get(&(version.to_string(), name.to_string()))
            .or_else(|| self.shared.get(name))
            .cloned()
            .map(Some)
            .ok_or_else(|| RankevalError::Template(format!("template '{}' not registered", name)))
    }
}

/// Replace every placeholder key in `template`, longest key first so that
/// `$query` never clobbers `$query2`.
pub fn substitute(template: &str, placeholders: &BTreeMap<String, Value>) -> String {
    let mut keys: Vec<&String> = placeholders.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut text = template.to_string();
    for key in keys {
        let replacement = match &placeholders[key] {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        text = text.replace(key.as_str(), &replacement);
    }
    text
}

/// Versions are the sub-directories of the template root, sorted by name.
pub fn discover_versions(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(RankevalError::Config(format!(
            "template root {} is not a directory",
            root.display()
        )));
    }
    let mut versions = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| RankevalError::Config(e.to_string()))?;
        if entry.file_type().is_dir() {
            versions.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(versions)
}
