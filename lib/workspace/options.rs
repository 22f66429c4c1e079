use serde::{Deserialize, Serialize};
use std::default;

/// The type given to entries created implicitly by `get_or_define_default`.
pub const DEFAULT_TYPE: &str = "uint8";

/// The type reported for bytes which are not covered by any entry.
pub const UNDEFINED_TYPE: &str = "uint8_t";

/// Options which change the behavior of a `Workspace`.
///
/// Options are saved along with the workspace by `dump`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Options {
    default_type: String,
    undefined_type: String,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            default_type: DEFAULT_TYPE.to_string(),
            undefined_type: UNDEFINED_TYPE.to_string(),
        }
    }
}

impl Options {
    /// Create a new set of Options with the default settings.
    pub fn new() -> Options {
        Options::default()
    }

    /// The type of the one-byte entries created when a comment, metadata or
    /// references are attached to an undefined byte.
    pub fn default_type(&self) -> &str {
        &self.default_type
    }

    /// Set the value of the, "Default type," option.
    pub fn set_default_type<S: Into<String>>(&mut self, default_type: S) {
        self.default_type = default_type.into();
    }

    /// The type reported by queries for bytes with no entry.
    pub fn undefined_type(&self) -> &str {
        &self.undefined_type
    }

    /// Set the value of the, "Undefined type," option.
    pub fn set_undefined_type<S: Into<String>>(&mut self, undefined_type: S) {
        self.undefined_type = undefined_type.into();
    }
}

/// Create your options with the builder pattern.
///
/// For more details on the options, see `workspace::Options`
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder for workspace options.
    pub fn new() -> OptionsBuilder {
        OptionsBuilder {
            options: Options::default(),
        }
    }

    /// Set the, "Default type," option. By default this is `uint8`.
    pub fn default_type<S: Into<String>>(mut self, default_type: S) -> OptionsBuilder {
        self.options.set_default_type(default_type);
        self
    }

    /// Set the, "Undefined type," option. By default this is `uint8_t`.
    pub fn undefined_type<S: Into<String>>(mut self, undefined_type: S) -> OptionsBuilder {
        self.options.set_undefined_type(undefined_type);
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

impl default::Default for OptionsBuilder {
    fn default() -> OptionsBuilder {
        OptionsBuilder::new()
    }
}
