//! Script Runtime for Generated Capabilities
//!
//! Generated capabilities are Rhai scripts. Each script defines:
//! - `SCHEMA`: an OpenAI function-calling definition (`#{ "type": "function", "function": #{...} }`)
//! - a function with the same name taking one argument map and returning a string
//! - optionally `USAGE_EXAMPLE`: a string shown to the agent
//!
//! # Sandbox
//!
//! Scripts run in an engine with:
//! - No module resolver (no file imports)
//! - No `eval`
//! - Operation, call-depth, expression-depth and container-size limits
//! - `print`/`debug` routed to tracing

use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine, Scope, AST};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::types::{validate_name, CapabilityDescriptor};

/// Name of the descriptor constant a script must define
pub const SCHEMA_CONST: &str = "SCHEMA";

/// Name of the optional usage example constant
pub const USAGE_EXAMPLE_CONST: &str = "USAGE_EXAMPLE";

/// Resource limits for the script engine
#[derive(Debug, Clone)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_levels: 64,
            max_expr_depth: 128,
            max_string_size: 4 * 1024 * 1024, // 4 MB
            max_array_size: 100_000,
            max_map_size: 100_000,
        }
    }
}

/// Build a sandboxed engine with the given limits
pub fn sandboxed_engine(limits: &ScriptLimits) -> Engine {
    let mut engine = Engine::new();

    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");

    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);

    engine.on_print(|text| debug!(target: "toolsmith::script", "print: {}", text));
    engine.on_debug(|text, source, pos| {
        debug!(target: "toolsmith::script", "debug {:?} @ {}: {}", source, pos, text)
    });

    engine
}

/// Script errors
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Code execution error: {0}")]
    Execution(String),

    #[error("Missing SCHEMA definition")]
    MissingSchema,

    #[error("Invalid SCHEMA: {0}")]
    InvalidSchema(String),

    #[error("{0}")]
    InvalidName(#[from] super::types::NameError),

    #[error("Function '{0}' not defined")]
    MissingFunction(String),

    #[error("Function '{name}' must take exactly one argument map, found {found} parameters")]
    WrongArity { name: String, found: usize },

    #[error("{0}")]
    Runtime(String),
}

/// A generated capability compiled into a live callable
pub struct ScriptCapability {
    descriptor: CapabilityDescriptor,
    usage_example: Option<String>,
    engine: Arc<Engine>,
    ast: AST,
}

impl std::fmt::Debug for ScriptCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCapability")
            .field("name", &self.descriptor.name)
            .field("usage_example", &self.usage_example.is_some())
            .finish()
    }
}

impl ScriptCapability {
    /// Compile source, evaluate its top level and check the capability structure.
    ///
    /// The capability function itself is never called here.
    pub fn compile(engine: Arc<Engine>, source: &str) -> Result<Self, ScriptError> {
        let ast = engine
            .compile(source)
            .map_err(|e| ScriptError::Parse(e.to_string()))?;

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| ScriptError::Execution(e.to_string()))?;

        let schema = scope
            .get_value::<Dynamic>(SCHEMA_CONST)
            .ok_or(ScriptError::MissingSchema)?;
        let schema: Value = rhai::serde::from_dynamic(&schema)
            .map_err(|e| ScriptError::InvalidSchema(e.to_string()))?;
        let descriptor =
            CapabilityDescriptor::from_function_format(&schema).map_err(ScriptError::InvalidSchema)?;

        validate_name(&descriptor.name)?;

        let function = ast
            .iter_functions()
            .find(|f| f.name == descriptor.name.as_str())
            .ok_or_else(|| ScriptError::MissingFunction(descriptor.name.clone()))?;
        if function.params.len() != 1 {
            return Err(ScriptError::WrongArity {
                name: descriptor.name.clone(),
                found: function.params.len(),
            });
        }

        let usage_example = scope
            .get_value::<Dynamic>(USAGE_EXAMPLE_CONST)
            .and_then(|d| d.into_string().ok())
            .filter(|s| !s.trim().is_empty());

        Ok(Self {
            descriptor,
            usage_example,
            engine,
            ast,
        })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    pub fn usage_example(&self) -> Option<&str> {
        self.usage_example.as_deref()
    }

    /// Call the capability with a JSON argument object.
    ///
    /// String results are returned as-is; other values are rendered as JSON.
    pub fn invoke(&self, args: &Value) -> Result<String, ScriptError> {
        let arg = rhai::serde::to_dynamic(args).map_err(|e| ScriptError::Runtime(e.to_string()))?;

        let mut scope = Scope::new();
        let out: Dynamic = self
            .engine
            .call_fn(&mut scope, &self.ast, &self.descriptor.name, (arg,))
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        render(out)
    }
}

fn render(out: Dynamic) -> Result<String, ScriptError> {
    if out.is_unit() {
        return Ok(String::new());
    }
    if out.is_string() {
        return out
            .into_string()
            .map_err(|e| ScriptError::Runtime(e.to_string()));
    }
    let value: Value =
        rhai::serde::from_dynamic(&out).map_err(|e| ScriptError::Runtime(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| ScriptError::Runtime(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIB_SOURCE: &str = r#"
const SCHEMA = #{
    "type": "function",
    "function": #{
        "name": "fib_source",
        "description": "Generates a Python fibonacci function.",
        "parameters": #{
            "type": "object",
            "properties": #{
                "func_name": #{ "type": "string", "description": "Function name" }
            },
            "required": ["func_name"]
        }
    }
};

const USAGE_EXAMPLE = "fib_source(#{ func_name: \"fibonacci\" })";

fn fib_source(args) {
    let name = args.func_name;
    "def " + name + "(n):\n    a, b = 0, 1\n    for _ in range(n):\n        a, b = b, a + b\n    return a\n"
}
"#;

    fn engine() -> Arc<Engine> {
        Arc::new(sandboxed_engine(&ScriptLimits::default()))
    }

    #[test]
    fn test_compile_and_invoke() {
        let cap = ScriptCapability::compile(engine(), FIB_SOURCE).unwrap();
        assert_eq!(cap.name(), "fib_source");
        assert_eq!(cap.descriptor().required(), vec!["func_name"]);
        assert!(cap.usage_example().is_some());

        let out = cap
            .invoke(&serde_json::json!({"func_name": "fibonacci"}))
            .unwrap();
        assert!(out.starts_with("def fibonacci(n):"));
    }

    #[test]
    fn test_non_string_result_rendered_as_json() {
        let source = r#"
const SCHEMA = #{ "type": "function", "function": #{ "name": "pair", "description": "Pair" } };
fn pair(args) { #{ left: args.a, right: 2 } }
"#;
        let cap = ScriptCapability::compile(engine(), source).unwrap();
        let out = cap.invoke(&serde_json::json!({"a": 1})).unwrap();
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["left"], 1);
        assert_eq!(value["right"], 2);
    }

    #[test]
    fn test_missing_schema() {
        let err = ScriptCapability::compile(engine(), "fn helper(args) { 1 }").unwrap_err();
        assert!(matches!(err, ScriptError::MissingSchema));
    }

    #[test]
    fn test_missing_function() {
        let source = r#"const SCHEMA = #{ "type": "function", "function": #{ "name": "ghost" } };"#;
        let err = ScriptCapability::compile(engine(), source).unwrap_err();
        assert!(matches!(err, ScriptError::MissingFunction(name) if name == "ghost"));
    }

    #[test]
    fn test_wrong_arity() {
        let source = r#"
const SCHEMA = #{ "type": "function", "function": #{ "name": "two" } };
fn two(a, b) { a + b }
"#;
        let err = ScriptCapability::compile(engine(), source).unwrap_err();
        assert!(matches!(err, ScriptError::WrongArity { found: 2, .. }));
    }

    #[test]
    fn test_runaway_top_level_is_bounded() {
        let limits = ScriptLimits {
            max_operations: 10_000,
            ..Default::default()
        };
        let engine = Arc::new(sandboxed_engine(&limits));
        let err = ScriptCapability::compile(engine, "loop { }").unwrap_err();
        assert!(matches!(err, ScriptError::Execution(_)));
    }

    #[test]
    fn test_imports_are_unavailable() {
        let source = r#"import "secrets" as s; const SCHEMA = #{};"#;
        assert!(ScriptCapability::compile(engine(), source).is_err());
    }

    #[test]
    fn test_runtime_error_is_reported() {
        let source = r#"
const SCHEMA = #{ "type": "function", "function": #{ "name": "boom" } };
fn boom(args) { throw "kaboom"; }
"#;
        let cap = ScriptCapability::compile(engine(), source).unwrap();
        let err = cap.invoke(&serde_json::json!({})).unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }
}
