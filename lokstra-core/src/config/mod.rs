//! Configuration loading and placeholder resolution (spec C1/C2, §4.1/§4.2).

mod flags;
mod loader;
mod placeholder;
pub mod validation;
mod value;

pub use flags::parse_flags;
pub use loader::{load_deployment, ConfigLoadError};
pub use placeholder::{PlaceholderResolver, Resolver};
pub use validation::{validate_keys, ConfigValidationError};
pub use value::{ConfigValue, FromConfigValue};

use std::fmt;

/// Errors raised while reading a typed value out of a [`ConfigValue`] tree
/// or resolving a `${…}` placeholder (spec §4.1 "Errors").
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// `${…` never closed.
    UnclosedPlaceholder { input: String },
    /// `@resolver:` with fewer than two `:`-separated parts.
    MalformedResolverToken { token: String },
    /// Named resolver isn't registered.
    UnknownResolver { name: String },
    /// Key not found by the resolver chain and no `:default` given.
    KeyNotFound { key: String },
    /// `@cfg:KEY` referenced a key absent from the supplied `configs` map.
    CfgKeyMissing { key: String },
    /// A typed accessor (`FromConfigValue`) hit a value of the wrong shape.
    TypeMismatch { key: String, expected: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnclosedPlaceholder { input } => {
                write!(f, "unclosed placeholder in {input:?}")
            }
            ConfigError::MalformedResolverToken { token } => {
                write!(f, "malformed resolver token: {token:?}")
            }
            ConfigError::UnknownResolver { name } => write!(f, "unknown resolver: {name}"),
            ConfigError::KeyNotFound { key } => write!(f, "key not found: {key}"),
            ConfigError::CfgKeyMissing { key } => write!(f, "@cfg key missing: {key}"),
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "config key {key} is not a {expected}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
