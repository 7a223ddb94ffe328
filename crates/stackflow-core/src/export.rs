//! Output exporter
//!
//! Exports are only published for a stack whose last run succeeded. Anything
//! else (never applied, failed, cancelled, or a value that cannot be resolved)
//! is reported as not ready rather than as a partial map.

use crate::error::{Result, StackError};
use crate::outputs::OutputTable;
use crate::stack::Export;
use crate::state::{RunStatus, StackState};
use std::collections::BTreeMap;

/// Resolved export values by export name
pub type ExportMap = BTreeMap<String, serde_json::Value>;

/// Resolve `exports` against the output table of a finished run
pub fn collect_exports(
    exports: &[Export],
    last_run: Option<RunStatus>,
    outputs: &OutputTable,
) -> Result<ExportMap> {
    match last_run {
        Some(RunStatus::Succeeded) => {}
        Some(status) => {
            return Err(StackError::NotReady(format!("last run {status}")));
        }
        None => {
            return Err(StackError::NotReady("stack has not been applied".to_string()));
        }
    }

    let mut values = ExportMap::new();
    for export in exports {
        let value = export.value.resolve(outputs).map_err(|e| {
            StackError::NotReady(format!("export {} cannot be resolved: {e}", export.name))
        })?;
        values.insert(export.name.clone(), value);
    }
    Ok(values)
}

/// Resolve `exports` against persisted state
pub fn exports_from_state(exports: &[Export], state: Option<&StackState>) -> Result<ExportMap> {
    let Some(state) = state else {
        return Err(StackError::NotReady("stack has not been applied".to_string()));
    };
    collect_exports(exports, state.last_run, &OutputTable::from_state(state))
}
