//! Script catalog: resolves script ids to launchable specs.

use std::collections::BTreeMap;

use crate::models::ScriptSpec;
use crate::{AppError, Result};

/// Source of pre-approved scripts.
///
/// Implementations must be safe to share across tasks.
pub trait ScriptCatalog: Send + Sync {
    /// Look up a script by id.
    fn lookup(&self, script_id: &str) -> Option<ScriptSpec>;

    /// Every known script, ordered by id.
    fn scripts(&self) -> Vec<ScriptSpec>;
}

/// Fixed in-memory catalog, typically built from the `[[scripts]]` config table.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    scripts: BTreeMap<String, ScriptSpec>,
}

impl StaticCatalog {
    /// Build a catalog from a list of specs.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] on duplicate ids.
    pub fn new(specs: impl IntoIterator<Item = ScriptSpec>) -> Result<Self> {
        let mut scripts = BTreeMap::new();
        for spec in specs {
            let id = spec.id.clone();
            if scripts.insert(id.clone(), spec).is_some() {
                return Err(AppError::Config(format!("duplicate script id: {id}")));
            }
        }
        Ok(Self { scripts })
    }

    /// Number of registered scripts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

impl ScriptCatalog for StaticCatalog {
    fn lookup(&self, script_id: &str) -> Option<ScriptSpec> {
        self.scripts.get(script_id).cloned()
    }

    fn scripts(&self) -> Vec<ScriptSpec> {
        self.scripts.values().cloned().collect()
    }
}
