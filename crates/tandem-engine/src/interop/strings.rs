//! Constant-string storage
//!
//! Classes that call into the script runtime by name carry a table of
//! constant strings; a bridge method names its target as a slice of that
//! table. The table of each class is interned once as script string values.

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tandem_sdk::{ClassId, InteropError, InteropResult, ManagedRuntime, ScriptDecl, ScriptValue};

/// Per-class interned constant strings
#[derive(Default)]
pub struct ConstStringStorage {
    tables: RwLock<FxHashMap<ClassId, Arc<[ScriptValue]>>>,
}

impl ConstStringStorage {
    /// Empty storage
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, managed: &dyn ManagedRuntime, class: ClassId) -> InteropResult<Arc<[ScriptValue]>> {
        if let Some(table) = self.tables.read().get(&class) {
            return Ok(table.clone());
        }
        let info = managed.class_info(class)?;
        let table: Arc<[ScriptValue]> = info
            .script_strings
            .iter()
            .map(|s| ScriptValue::String(s.clone()))
            .collect();
        self.tables.write().insert(class, table.clone());
        Ok(table)
    }

    /// Segments named by `decl`
    pub fn segments(
        &self,
        managed: &dyn ManagedRuntime,
        class: ClassId,
        decl: ScriptDecl,
    ) -> InteropResult<Vec<Arc<str>>> {
        let table = self.table(managed, class)?;
        let start = decl.offset as usize;
        let end = start + decl.len as usize;
        let slice = table.get(start..end).ok_or_else(|| {
            InteropError::resolution(format!(
                "constant strings {}..{} out of range for class {}",
                start,
                end,
                class.to_raw()
            ))
        })?;
        slice
            .iter()
            .map(|value| match value {
                ScriptValue::String(s) => Ok(s.clone()),
                other => Err(InteropError::type_mismatch("string", other.kind_name())),
            })
            .collect()
    }

    /// Number of interned classes
    pub fn class_count(&self) -> usize {
        self.tables.read().len()
    }
}
