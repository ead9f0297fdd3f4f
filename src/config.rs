use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Largest accepted alias or parameter base. The headroom above it is the
/// numbering space for generated aliases and parameters.
pub const MAX_BASE: u32 = 1_000_000_000;

/// Compiler settings shared by every schedule in a dispatch run.
///
/// The bases start high so generated aliases (`cf_1000`, …) and parameter
/// indices (`%1000`, …) stay clear of the ones the host's base query uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub alias_base: u32,
    pub param_base: u32,
    pub alias_prefix: String,
    /// Bind parameters with a type derived from the field's `data_type`
    /// instead of binding everything as a string.
    pub typed_params: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            alias_base: 1000,
            param_base: 1000,
            alias_prefix: "cf_".to_string(),
            typed_params: false,
        }
    }
}

impl FilterConfig {
    pub fn from_json(raw: &str) -> Result<Self, Error> {
        let config: FilterConfig =
            serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.alias_prefix.is_empty() {
            return Err(Error::Config("alias_prefix must not be empty".to_string()));
        }
        if !crate::field::is_sql_identifier(&self.alias_prefix) {
            return Err(Error::Config(format!(
                "alias_prefix {:?} is not a valid SQL identifier",
                self.alias_prefix
            )));
        }
        for (name, base) in [("alias_base", self.alias_base), ("param_base", self.param_base)] {
            if base > MAX_BASE {
                return Err(Error::Config(format!(
                    "{} {} exceeds {}",
                    name, base, MAX_BASE
                )));
            }
        }
        Ok(())
    }

    /// Alias for the condition at `position`, or `None` once the numbering
    /// would leave `u32`.
    pub(crate) fn alias(&self, position: usize) -> Option<String> {
        let offset = u32::try_from(position).ok()?;
        let seed = self.alias_base.checked_add(offset)?;
        Some(format!("{}{}", self.alias_prefix, seed))
    }
}
