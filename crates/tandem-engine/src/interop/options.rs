//! Bridge configuration
//!
//! Options are plain data with serde defaults, so an embedder can load them
//! from a TOML table or build them in code and override single fields.

use serde::Deserialize;

/// Largest shared reference capacity: the free-list index lives in bits
/// 3..31 of the flags word
pub const MAX_REF_CAPACITY: usize = (1 << 29) - 1;

/// Default shared reference capacity
pub const DEFAULT_REF_CAPACITY: usize = 1 << 16;

/// Default name of the script-side namespace object
pub const DEFAULT_NAMESPACE: &str = "managed";

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    /// TOML could not be parsed into options
    #[error("invalid interop configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Capacity out of range
    #[error("ref_capacity must be between 1 and {max}, got {got}")]
    RefCapacity {
        /// Requested capacity
        got: usize,
        /// Largest allowed capacity
        max: usize,
    },

    /// Namespace is not a usable property name
    #[error("namespace must be a non-empty identifier, got '{0}'")]
    Namespace(String),

    /// A preferred overload entry is incomplete
    #[error("preferred overload entry {0} has an empty class, method or descriptor")]
    PreferredOverload(usize),
}

/// Disambiguates a script-visible method name
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PreferredOverload {
    /// Qualified class name
    pub class: String,
    /// Method name
    pub method: String,
    /// Descriptor of the overload to expose
    pub descriptor: String,
}

/// Bridge options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct InteropOptions {
    /// Capacity of the shared reference slab
    pub ref_capacity: usize,
    /// Copy inherited members into every wrapper instead of chaining prototypes
    pub squash_prototypes: bool,
    /// Report identity inconsistencies as errors instead of aborting
    pub hardened: bool,
    /// Global property holding the script-side namespace object
    pub namespace: String,
    /// Overloads to expose when a name would otherwise be ambiguous
    pub preferred_overloads: Vec<PreferredOverload>,
}

impl Default for InteropOptions {
    fn default() -> Self {
        Self {
            ref_capacity: DEFAULT_REF_CAPACITY,
            squash_prototypes: false,
            hardened: false,
            namespace: DEFAULT_NAMESPACE.to_string(),
            preferred_overloads: Vec::new(),
        }
    }
}

impl InteropOptions {
    /// Parse and validate options from TOML
    pub fn from_toml_str(source: &str) -> Result<Self, OptionsError> {
        let options: InteropOptions = toml::from_str(source)?;
        options.validate()?;
        Ok(options)
    }

    /// Check every option is within range
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.ref_capacity == 0 || self.ref_capacity > MAX_REF_CAPACITY {
            return Err(OptionsError::RefCapacity {
                got: self.ref_capacity,
                max: MAX_REF_CAPACITY,
            });
        }
        let mut chars = self.namespace.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$');
        if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
            return Err(OptionsError::Namespace(self.namespace.clone()));
        }
        for (i, entry) in self.preferred_overloads.iter().enumerate() {
            if entry.class.is_empty() || entry.method.is_empty() || entry.descriptor.is_empty() {
                return Err(OptionsError::PreferredOverload(i));
            }
        }
        Ok(())
    }

    /// Preferred overload descriptor for `class.method`, if configured
    pub fn preferred(&self, class: &str, method: &str) -> Option<&str> {
        self.preferred_overloads
            .iter()
            .find(|p| p.class == class && p.method == method)
            .map(|p| p.descriptor.as_str())
    }
}
