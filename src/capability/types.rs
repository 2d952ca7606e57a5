//! Capability Type Definitions
//!
//! Core data structures shared by the agent, the library and the generator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names reserved by the built-in capabilities
pub const BUILTIN_NAMES: [&str; 3] = ["read_file", "write_file", "run_shell"];

/// Longest accepted capability name
pub const MAX_NAME_LEN: usize = 64;

/// Callable interface description offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Unique capability name (alphanumeric + underscore)
    pub name: String,
    /// Human-readable purpose
    #[serde(default)]
    pub description: String,
    /// JSON Schema object for the arguments
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

fn empty_parameters() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

impl CapabilityDescriptor {
    /// Create a descriptor with no parameters
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: empty_parameters(),
        }
    }

    /// Add a typed parameter
    pub fn with_param(
        mut self,
        name: &str,
        param_type: ParameterType,
        description: &str,
        required: bool,
    ) -> Self {
        if let Some(props) = self.parameters.get_mut("properties").and_then(Value::as_object_mut) {
            props.insert(
                name.to_string(),
                serde_json::json!({
                    "type": param_type.as_str(),
                    "description": description
                }),
            );
        }
        if required {
            if let Some(req) = self.parameters.get_mut("required").and_then(Value::as_array_mut) {
                req.push(Value::String(name.to_string()));
            }
        }
        self
    }

    /// Add a string parameter
    pub fn with_string_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, ParameterType::String, description, required)
    }

    /// Required parameter names
    pub fn required(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|req| req.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Check invocation arguments against the schema.
    ///
    /// Only required keys and primitive JSON types are checked; nested schemas are
    /// left to the callable itself.
    pub fn validate_arguments(&self, args: &Value) -> Result<(), ArgumentError> {
        let obj = args.as_object().ok_or(ArgumentError::NotAnObject)?;

        for req in self.required() {
            if !obj.contains_key(req) {
                return Err(ArgumentError::Missing(req.to_string()));
            }
        }

        let Some(props) = self.parameters.get("properties").and_then(Value::as_object) else {
            return Ok(());
        };

        for (name, schema) in props {
            let Some(value) = obj.get(name) else { continue };
            let expected = schema.get("type").and_then(Value::as_str);
            let valid = match expected.and_then(ParameterType::parse) {
                Some(ParameterType::String) => value.is_string(),
                Some(ParameterType::Integer) => value.is_i64() || value.is_u64(),
                Some(ParameterType::Number) => value.is_number(),
                Some(ParameterType::Boolean) => value.is_boolean(),
                Some(ParameterType::Array) => value.is_array(),
                Some(ParameterType::Object) => value.is_object(),
                None => true,
            };
            if !valid {
                return Err(ArgumentError::WrongType {
                    name: name.clone(),
                    expected: expected.unwrap_or("unknown").to_string(),
                });
            }
        }

        Ok(())
    }

    /// Format as an OpenAI function-calling tool definition
    pub fn to_function_format(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }

    /// Parse an OpenAI function-calling tool definition.
    ///
    /// Returns a description of what is missing when `function.name` is absent.
    pub fn from_function_format(value: &Value) -> Result<Self, String> {
        let function = value
            .get("function")
            .and_then(Value::as_object)
            .ok_or_else(|| "SCHEMA missing function".to_string())?;

        let name = function
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| "SCHEMA missing function.name".to_string())?;

        let description = function
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let parameters = function
            .get("parameters")
            .filter(|p| p.is_object())
            .cloned()
            .unwrap_or_else(empty_parameters);

        Ok(Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        })
    }
}

/// Parameter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "boolean" => Some(Self::Boolean),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

/// Argument validation errors
#[derive(Debug, thiserror::Error)]
pub enum ArgumentError {
    #[error("Arguments must be a JSON object")]
    NotAnObject,

    #[error("Missing required parameter: {0}")]
    Missing(String),

    #[error("Parameter '{name}' has wrong type, expected {expected}")]
    WrongType { name: String, expected: String },
}

/// Capability name errors
#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("Capability name is empty")]
    Empty,

    #[error("Capability name '{0}' is longer than {max} characters", max = MAX_NAME_LEN)]
    TooLong(String),

    #[error("Invalid capability name: {0}")]
    Invalid(String),

    #[error("Capability name '{0}' is reserved by a built-in")]
    Reserved(String),
}

/// Check that a name is usable as a registry key and artifact file stem
pub fn validate_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong(name.to_string()));
    }
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(NameError::Invalid(name.to_string()));
    }
    if BUILTIN_NAMES.contains(&name) {
        return Err(NameError::Reserved(name.to_string()));
    }
    Ok(())
}

/// Registry entry for one persisted capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    /// Unique name (registry key)
    pub name: String,
    /// Artifact path relative to the library root
    pub file: String,
    /// Task whose failure produced this capability
    pub generated_from_task: String,
    /// Model that wrote the source
    pub generated_by_model: String,
    /// Whether a retry with this capability passed
    #[serde(default)]
    pub verified: bool,
    /// Model that passed the retry
    #[serde(default)]
    pub verified_with_model: String,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the artifact at registration
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Input to `CapabilityLibrary::register`
#[derive(Debug, Clone)]
pub struct NewCapability {
    pub name: String,
    pub source: String,
    pub task_id: String,
    pub generator_model: String,
}

/// Short description handed to the generator to encourage composition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySummary {
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let desc = CapabilityDescriptor::new("read_file", "Read a file")
            .with_string_param("path", "Path to the file", true)
            .with_param("limit", ParameterType::Integer, "Max bytes", false);

        assert_eq!(desc.required(), vec!["path"]);
        assert_eq!(desc.parameters["properties"]["limit"]["type"], "integer");
    }

    #[test]
    fn test_argument_validation() {
        let desc = CapabilityDescriptor::new("test", "Test")
            .with_string_param("name", "Name", true);

        assert!(desc.validate_arguments(&serde_json::json!({"name": "Alice"})).is_ok());
        assert!(matches!(
            desc.validate_arguments(&serde_json::json!({})),
            Err(ArgumentError::Missing(_))
        ));
        assert!(matches!(
            desc.validate_arguments(&serde_json::json!({"name": 123})),
            Err(ArgumentError::WrongType { .. })
        ));
        assert!(matches!(
            desc.validate_arguments(&serde_json::json!("raw")),
            Err(ArgumentError::NotAnObject)
        ));
    }

    #[test]
    fn test_function_format() {
        let desc = CapabilityDescriptor::new("build_fsm", "Generate a state machine")
            .with_string_param("class_name", "Class name", true);

        let wire = desc.to_function_format();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "build_fsm");

        let parsed = CapabilityDescriptor::from_function_format(&wire).unwrap();
        assert_eq!(parsed, desc);
    }

    #[test]
    fn test_function_format_missing_name() {
        let err = CapabilityDescriptor::from_function_format(&serde_json::json!({
            "type": "function",
            "function": {"description": "nameless"}
        }))
        .unwrap_err();
        assert!(err.contains("function.name"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("build_fsm").is_ok());
        assert!(validate_name("_private2").is_ok());
        assert!(matches!(validate_name(""), Err(NameError::Empty)));
        assert!(matches!(validate_name("../escape"), Err(NameError::Invalid(_))));
        assert!(matches!(validate_name("9lives"), Err(NameError::Invalid(_))));
        assert!(matches!(validate_name("run_shell"), Err(NameError::Reserved(_))));
        assert!(matches!(validate_name(&"a".repeat(65)), Err(NameError::TooLong(_))));
    }
}
