//! Error and language registry
//!
//! Built once at startup from the global definitions and every feature's
//! contributions. Construction fails on any collision so a misconfigured
//! feature never reaches the point of serving requests.

use std::collections::HashMap;

use crate::error::{global, ErrorCode};
use crate::features::Feature;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Error key {0} is registered twice")]
    DuplicateErrorKey(&'static str),

    #[error("Language key {0} is registered twice")]
    DuplicateStringKey(&'static str),

    #[error("Error key {key} does not carry the {expected} prefix")]
    WrongPrefix {
        key: &'static str,
        expected: &'static str,
    },

    #[error("Error {key} references language key {message} which has no string")]
    MissingString {
        key: &'static str,
        message: &'static str,
    },
}

#[derive(Debug, Default)]
pub struct Registry {
    errors: HashMap<&'static str, ErrorCode>,
    strings: HashMap<&'static str, &'static str>,
}

impl Registry {
    /// Fold the global definitions and each feature's contributions
    pub fn build(features: &[Box<dyn Feature>]) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        registry.fold("GLOBAL", global::ERRORS, global::STRINGS)?;
        for feature in features {
            registry.fold(feature.error_prefix(), feature.errors(), feature.strings())?;
        }
        registry.check_messages()?;

        tracing::debug!(
            errors = registry.errors.len(),
            strings = registry.strings.len(),
            "Error registry built"
        );
        Ok(registry)
    }

    fn fold(
        &mut self,
        prefix: &'static str,
        errors: &'static [ErrorCode],
        strings: &'static [(&'static str, &'static str)],
    ) -> Result<(), RegistryError> {
        for code in errors {
            if code.prefix() != prefix {
                return Err(RegistryError::WrongPrefix {
                    key: code.key,
                    expected: prefix,
                });
            }
            if self.errors.insert(code.key, *code).is_some() {
                return Err(RegistryError::DuplicateErrorKey(code.key));
            }
        }
        for &(key, text) in strings {
            if self.strings.insert(key, text).is_some() {
                return Err(RegistryError::DuplicateStringKey(key));
            }
        }
        Ok(())
    }

    fn check_messages(&self) -> Result<(), RegistryError> {
        for code in self.errors.values() {
            for message in code.messages {
                if !self.strings.contains_key(message) {
                    return Err(RegistryError::MissingString {
                        key: code.key,
                        message: *message,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn error(&self, key: &str) -> Option<&ErrorCode> {
        self.errors.get(key)
    }

    pub fn string(&self, key: &str) -> Option<&'static str> {
        self.strings.get(key).copied()
    }

    /// Localized messages for `code`; unknown keys pass through unchanged
    pub fn localize(&self, code: &ErrorCode) -> Vec<String> {
        code.messages
            .iter()
            .map(|key| self.string(key).unwrap_or(*key).to_string())
            .collect()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}
