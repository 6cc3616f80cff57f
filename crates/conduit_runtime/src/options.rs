//! Component configuration surface.
//!
//! A configurable component publishes a [`ConfigDescriptor`] (the options
//! it understands, with help text and defaults) and a pure function from a
//! generic [`ParsedOptions`] map to its typed configuration. Whatever front
//! end collects the options (a CLI, a config file, a test) only has to fill
//! the map; it never needs to know the component's configuration type.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// One option understood by a configurable component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionSpec {
    /// Option name, e.g. `"target_fps"`.
    pub name: String,
    /// Human-readable description.
    pub help: String,
    /// Value used when the option is not supplied.
    pub default: Option<Value>,
}

impl OptionSpec {
    /// An option without default.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            default: None,
        }
    }

    /// Attach a default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// The options a configurable component accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigDescriptor {
    /// Name of the configured component or subsystem.
    pub component: String,
    /// Accepted options.
    pub options: Vec<OptionSpec>,
}

impl ConfigDescriptor {
    /// A descriptor without options.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            options: Vec::new(),
        }
    }

    /// Add an option.
    #[must_use]
    pub fn option(mut self, option: OptionSpec) -> Self {
        self.options.push(option);
        self
    }

    /// Look up an option by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }
}

/// Generic parsed options: option name to JSON value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOptions {
    values: Map<String, Value>,
}

impl ParsedOptions {
    /// An empty option set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw `name=value` style string pairs, as a command line
    /// produces them. Values that parse as JSON (`42`, `true`, `[1,2]`) keep
    /// their JSON type; everything else is kept as a string.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| {
                let raw = v.as_ref();
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                (k.into(), value)
            })
            .collect();
        Self { values }
    }

    /// Set an option.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set an option in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Returns `true` if the option is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Fill every option missing here with the descriptor's default.
    #[must_use]
    pub fn with_defaults(mut self, descriptor: &ConfigDescriptor) -> Self {
        for option in &descriptor.options {
            if let Some(default) = &option.default {
                self.values
                    .entry(option.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        self
    }

    /// Read an optional value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the value does not deserialize
    /// into `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ConfigError> {
        self.values
            .get(name)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| ConfigError::Invalid {
                    option: name.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Read a value, falling back to `default`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a present value does not
    /// deserialize into `T`.
    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, ConfigError> {
        Ok(self.get(name)?.unwrap_or(default))
    }

    /// Read a value that must be present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if absent, [`ConfigError::Invalid`]
    /// if it does not deserialize into `T`.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, ConfigError> {
        self.get(name)?
            .ok_or_else(|| ConfigError::Missing(name.to_string()))
    }
}

/// A component (or subsystem) configurable from generic options.
pub trait Configurable {
    /// The typed configuration.
    type Config;

    /// Options accepted by [`Configurable::configure`].
    fn descriptor() -> ConfigDescriptor;

    /// Build the configuration. Must not have side effects.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for missing or malformed options.
    fn configure(options: &ParsedOptions) -> Result<Self::Config, ConfigError>;
}
