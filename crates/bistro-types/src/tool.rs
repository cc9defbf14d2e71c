//! Tool argument schemas.
//!
//! A [`ToolSchema`] lists the typed arguments a tool accepts. It renders to
//! JSON Schema for the model and is checked in `bistro-core` before any
//! executor runs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// JSON type of an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ArgKind {
    pub fn json_type(self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Integer => "integer",
            ArgKind::Number => "number",
            ArgKind::Boolean => "boolean",
            ArgKind::Object => "object",
            ArgKind::Array => "array",
        }
    }
}

/// Extra constraint on string arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgFormat {
    /// `YYYY-MM-DD`
    Date,
    /// `HH:MM`, 24-hour clock
    Time,
    Email,
    Url,
}

impl ArgFormat {
    fn json_format(self) -> &'static str {
        match self {
            ArgFormat::Date => "date",
            ArgFormat::Time => "time",
            ArgFormat::Email => "email",
            ArgFormat::Url => "uri",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    pub kind: ArgKind,
    pub required: bool,
    #[serde(default)]
    pub description: String,
    /// Applied when an optional argument is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ArgFormat>,
    /// Inclusive lower bound for numeric arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
}

impl ArgSpec {
    pub fn required(name: impl Into<String>, kind: ArgKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: description.into(),
            default: None,
            format: None,
            minimum: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ArgKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_format(mut self, format: ArgFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_minimum(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }
}

/// Ordered argument list for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub args: Vec<ArgSpec>,
}

impl ToolSchema {
    pub fn new(args: Vec<ArgSpec>) -> Self {
        Self { args }
    }

    pub fn arg(&self, name: &str) -> Option<&ArgSpec> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Render as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for arg in &self.args {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(arg.kind.json_type()));
            if !arg.description.is_empty() {
                prop.insert("description".into(), json!(arg.description));
            }
            if let Some(format) = arg.format {
                prop.insert("format".into(), json!(format.json_format()));
            }
            if let Some(minimum) = arg.minimum {
                prop.insert("minimum".into(), json!(minimum));
            }
            if let Some(default) = &arg.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(arg.name.clone(), Value::Object(prop));
            if arg.required {
                required.push(json!(arg.name));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}
