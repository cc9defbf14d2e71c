//! Tool trait, type-erased wrapper and the name-keyed registry.
//!
//! `Tool` uses RPITIT like `LlmProvider`, so it gets the same treatment:
//! an object-safe `ToolDyn` with a blanket impl, wrapped by `BoxTool`.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};

use bistro_types::llm::ToolDefinition;
use bistro_types::tool::ToolSchema;

// ---------------------------------------------------------------------------
// Tool description and failure
// ---------------------------------------------------------------------------

/// Everything the engine needs to know about a tool besides how to run it.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    /// Status template with `{argument}` placeholders, used by NARRATE.
    pub narration: Option<String>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: ToolSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            narration: None,
        }
    }

    pub fn with_narration(mut self, template: impl Into<String>) -> Self {
        self.narration = Some(template.into());
        self
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_json_schema(),
        }
    }
}

/// A failed tool call, as reported by the executor function.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ToolFailure {
    pub message: String,
    /// HTTP status from the backend, when there was one.
    pub status: Option<u16>,
}

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: format!("HTTP {status}: {}", message.into()),
            status: Some(status),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait and dynamic dispatch
// ---------------------------------------------------------------------------

/// A callable tool. Arguments have already been validated against `spec().schema`.
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    fn call(&self, args: Map<String, Value>) -> impl Future<Output = Result<Value, ToolFailure>> + Send;
}

/// Object-safe version of [`Tool`] with boxed futures.
pub trait ToolDyn: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    fn call_boxed(
        &self,
        args: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolFailure>> + Send + '_>>;
}

impl<T: Tool> ToolDyn for T {
    fn spec(&self) -> &ToolSpec {
        Tool::spec(self)
    }

    fn call_boxed(
        &self,
        args: Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolFailure>> + Send + '_>> {
        Box::pin(self.call(args))
    }
}

/// Type-erased, cheaply clonable tool.
#[derive(Clone)]
pub struct BoxTool {
    inner: Arc<dyn ToolDyn>,
}

impl BoxTool {
    pub fn new<T: Tool + 'static>(tool: T) -> Self {
        Self { inner: Arc::new(tool) }
    }

    pub fn spec(&self) -> &ToolSpec {
        self.inner.spec()
    }

    pub async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolFailure> {
        self.inner.call_boxed(args).await
    }
}

impl std::fmt::Debug for BoxTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTool").field("name", &self.spec().name).finish()
    }
}

/// A tool built from a spec and an async closure.
pub struct FnTool<F> {
    spec: ToolSpec,
    func: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolFailure>> + Send,
{
    pub fn new(spec: ToolSpec, func: F) -> Self {
        Self { spec, func }
    }
}

impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolFailure>> + Send,
{
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn call(&self, args: Map<String, Value>) -> impl Future<Output = Result<Value, ToolFailure>> + Send {
        (self.func)(args)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
}

/// Tools keyed by name. Iteration is sorted by name, so the tool list
/// sent to the model is identical on every request.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, BoxTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), RegistryError> {
        self.register_boxed(BoxTool::new(tool))
    }

    pub fn register_boxed(&mut self, tool: BoxTool) -> Result<(), RegistryError> {
        let name = tool.spec().name.clone();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&BoxTool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    /// Definitions for the model, sorted by tool name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.spec().definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
