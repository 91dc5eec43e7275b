//! JSON document loader.
//!
//! Each module is a JSON file. An object of the exact form
//! `{"$import": "other.json"}` is replaced by the value of the referenced
//! module, resolved relative to the importing module. Imported modules are
//! cached: only the identifier a request names is invalidated, its
//! dependencies keep whatever value the cache already holds.
//!
//! Cache keys are module paths relative to the root with `.` and `..`
//! resolved lexically, so every spelling of a file shares one entry.

use super::traits::{EvaluationContext, ModuleLoader};
use crate::error::{BridgeError, Result};
use crate::value::ModuleValue;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Loads modules from JSON files on disk.
#[derive(Debug, Clone, Default)]
pub struct JsonModuleLoader {
    /// Base directory for relative identifiers (current directory when unset).
    root: Option<PathBuf>,
}

impl JsonModuleLoader {
    pub const IMPORT_KEY: &'static str = "$import";

    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve_path(&self, identifier: &str) -> PathBuf {
        let path = Path::new(identifier);
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn base_dir(&self) -> PathBuf {
        self.root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default()
    }

    /// Identifier of `target` as imported from module `importer`.
    fn dependency_identifier(&self, importer: &str, target: &str) -> String {
        let joined = Path::new(importer)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(target);
        self.canonical_identifier(&joined.to_string_lossy())
    }

    fn load(&self, identifier: &str, ctx: &mut EvaluationContext<'_>) -> Result<ModuleValue> {
        let path = self.resolve_path(identifier);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            BridgeError::resolution(identifier, format!("cannot read {}: {}", path.display(), e))
        })?;
        let document: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| BridgeError::resolution(identifier, format!("invalid JSON: {}", e)))?;

        self.link(identifier, document, ctx)
    }

    fn link(
        &self,
        importer: &str,
        value: serde_json::Value,
        ctx: &mut EvaluationContext<'_>,
    ) -> Result<ModuleValue> {
        match value {
            serde_json::Value::Object(map)
                if map.len() == 1 && map.contains_key(Self::IMPORT_KEY) =>
            {
                let target = map
                    .get(Self::IMPORT_KEY)
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| {
                        BridgeError::resolution(
                            importer,
                            format!("{} must be a string path", Self::IMPORT_KEY),
                        )
                    })?;
                let dependency = self.dependency_identifier(importer, target);
                self.import(&dependency, ctx)
            }
            serde_json::Value::Object(map) => {
                let mut entries = std::collections::BTreeMap::new();
                for (key, member) in map {
                    entries.insert(key, self.link(importer, member, ctx)?);
                }
                Ok(ModuleValue::Object(entries))
            }
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| self.link(importer, item, ctx))
                .collect::<Result<Vec<_>>>()
                .map(ModuleValue::Array),
            scalar => Ok(ModuleValue::from(scalar)),
        }
    }

    fn import(&self, dependency: &str, ctx: &mut EvaluationContext<'_>) -> Result<ModuleValue> {
        if let Some(cached) = ctx.cached(dependency) {
            debug!("Reusing cached dependency {}", dependency);
            return Ok((*cached).clone());
        }

        ctx.enter(dependency)?;
        let loaded = self.load(dependency, ctx);
        ctx.leave();

        let value = loaded?;
        ctx.remember(dependency, Arc::new(value.clone()));
        Ok(value)
    }
}

impl ModuleLoader for JsonModuleLoader {
    fn name(&self) -> &'static str {
        "json"
    }

    /// Module path relative to the root when it lies inside it, absolute
    /// otherwise. Relative, absolute and `..` spellings of one file share a key.
    fn canonical_identifier(&self, identifier: &str) -> String {
        let base = self.base_dir();
        let absolute = normalize_lexically(&base.join(identifier));
        let key = match absolute.strip_prefix(normalize_lexically(&base)) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => absolute,
        };
        key.to_string_lossy().into_owned()
    }

    fn evaluate(&self, identifier: &str, ctx: &mut EvaluationContext<'_>) -> Result<ModuleValue> {
        let key = self.canonical_identifier(identifier);
        self.load(&key, ctx)
    }
}

/// Resolve `.` and `..` without touching the filesystem.
///
/// `..` at the top of a relative path is kept; above the filesystem root it
/// is dropped.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    parts.into_iter().collect()
}
