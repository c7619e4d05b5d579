//! Named index entries.

use std::sync::Arc;

use crate::error::{IndexError, IndexResult};

use super::{SearchParameterInfo, SearchValue};

/// One search value bound to the parameter it was extracted for.
///
/// Entries are created per resource version and discarded once projected.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchIndexEntry {
    /// The parameter definition.
    pub param: Arc<SearchParameterInfo>,
    /// The extracted value.
    pub value: SearchValue,
}

impl SearchIndexEntry {
    /// Creates an entry without checking the value kind.
    pub fn new(param: Arc<SearchParameterInfo>, value: SearchValue) -> Self {
        Self { param, value }
    }

    /// Creates an entry, rejecting values whose kind differs from the
    /// parameter's declared kind.
    pub fn checked(param: Arc<SearchParameterInfo>, value: SearchValue) -> IndexResult<Self> {
        let entry = Self::new(param, value);
        entry.check_kind()?;
        Ok(entry)
    }

    /// Returns the parameter name.
    pub fn name(&self) -> &str {
        &self.param.name
    }

    /// Verifies that the value kind matches the parameter's declared kind.
    pub fn check_kind(&self) -> IndexResult<()> {
        let actual = self.value.kind();
        if actual != self.param.param_type {
            return Err(IndexError::TypeMismatch {
                param_name: self.param.name.clone(),
                expected: self.param.param_type,
                actual,
            });
        }
        Ok(())
    }
}
