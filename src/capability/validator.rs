//! Structural validation of generated capability source.
//!
//! Validity here means loadability: the source compiles, its top level evaluates,
//! it defines `SCHEMA` with a usable name and a one-argument function of that name.
//! Behaviour is only judged by the task's own verification.

use std::sync::Arc;
use tracing::{debug, warn};

use super::script::{sandboxed_engine, ScriptCapability, ScriptLimits};
use super::types::CapabilityDescriptor;

/// Result of validating one candidate
#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    Valid {
        name: String,
        descriptor: CapabilityDescriptor,
        has_usage_example: bool,
    },
    Invalid {
        reason: String,
    },
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// Capability name when valid, failure reason otherwise
    pub fn name_or_reason(&self) -> &str {
        match self {
            Self::Valid { name, .. } => name,
            Self::Invalid { reason } => reason,
        }
    }
}

/// Validator for generated capability source
#[derive(Debug, Clone, Default)]
pub struct Validator {
    limits: ScriptLimits,
}

impl Validator {
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    /// Validate source in a fresh engine; never fails, only reports
    pub fn validate(&self, source: &str) -> ValidationOutcome {
        let engine = Arc::new(sandboxed_engine(&self.limits));

        match ScriptCapability::compile(engine, source) {
            Ok(cap) => {
                if cap.usage_example().is_none() {
                    warn!(
                        "Capability '{}' missing USAGE_EXAMPLE (recommended for agent discoverability)",
                        cap.name()
                    );
                }
                debug!("Validated capability '{}'", cap.name());
                ValidationOutcome::Valid {
                    name: cap.name().to_string(),
                    descriptor: cap.descriptor().clone(),
                    has_usage_example: cap.usage_example().is_some(),
                }
            }
            Err(e) => ValidationOutcome::Invalid {
                reason: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_source() {
        let source = r#"
const SCHEMA = #{
    "type": "function",
    "function": #{ "name": "shout", "description": "Upper-cases text" }
};
fn shout(args) { let t = args.text; t.to_upper() }
"#;
        let outcome = Validator::default().validate(source);
        assert!(outcome.is_valid());
        assert_eq!(outcome.name_or_reason(), "shout");
        assert!(matches!(outcome, ValidationOutcome::Valid { has_usage_example: false, .. }));
    }

    #[test]
    fn test_syntax_error_is_invalid() {
        let outcome = Validator::default().validate("def shout(text):\n    return text.upper()");
        assert!(!outcome.is_valid());
    }

    #[test]
    fn test_missing_schema_is_invalid() {
        let outcome = Validator::default().validate("fn shout(args) { args }");
        assert_eq!(outcome.name_or_reason(), "Missing SCHEMA definition");
    }

    #[test]
    fn test_schema_without_name_is_invalid() {
        let source = r#"
const SCHEMA = #{ "type": "function", "function": #{ "description": "?" } };
fn shout(args) { args }
"#;
        let outcome = Validator::default().validate(source);
        assert!(outcome.name_or_reason().contains("function.name"));
    }

    #[test]
    fn test_name_mismatch_is_invalid() {
        let source = r#"
const SCHEMA = #{ "type": "function", "function": #{ "name": "shout" } };
fn whisper(args) { args }
"#;
        let outcome = Validator::default().validate(source);
        assert_eq!(outcome.name_or_reason(), "Function 'shout' not defined");
    }

    #[test]
    fn test_builtin_shadowing_is_invalid() {
        let source = r#"
const SCHEMA = #{ "type": "function", "function": #{ "name": "write_file" } };
fn write_file(args) { "nope" }
"#;
        let outcome = Validator::default().validate(source);
        assert!(outcome.name_or_reason().contains("reserved"));
    }

    #[test]
    fn test_top_level_error_is_invalid() {
        let source = r#"
const SCHEMA = #{ "type": "function", "function": #{ "name": "shout" } };
throw "exploded during load";
fn shout(args) { args }
"#;
        let outcome = Validator::default().validate(source);
        assert!(outcome.name_or_reason().starts_with("Code execution error"));
    }
}
