// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

#[derive(Debug)]
/// Represents errors that can occur while configuring or installing probes.
///
/// Nothing on the message hot path returns this type. Failures inside advice,
/// listener dispatch or metric updates are absorbed where they happen; only
/// the cold setup paths ([`Instrumentation::install`](crate::Instrumentation::install),
/// [`ShardKeyExtractor::new`](crate::ShardKeyExtractor::new), configuration
/// loading) report errors.
pub enum Error {
    /// A configured join point could not be resolved by the host
    Installation {
        /// Fully-qualified type name of the target
        type_name: String,
        /// Method name of the target
        method: String,
        /// Additional context about the error
        details: String,
    },
    /// Invalid configuration value or unreadable configuration source
    Configuration {
        /// Detailed error message describing the configuration issue
        message: String,
    },
}

impl Error {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if this is an [`Error::Installation`].
    pub fn is_installation(&self) -> bool {
        matches!(self, Error::Installation { .. })
    }

    /// Returns `true` if this is an [`Error::Configuration`].
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration { .. })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Installation {
                type_name,
                method,
                details,
            } => {
                write!(
                    f,
                    "Failed to instrument {}::{}: {}",
                    type_name, method, details
                )
            }
            Error::Configuration { message } => {
                write!(f, "Configuration error: {message}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A Result type specialized for actor-probe setup operations.
pub type Result<T> = std::result::Result<T, Error>;
