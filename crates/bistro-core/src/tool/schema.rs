//! Argument validation against a [`ToolSchema`].
//!
//! Validation normalizes as it checks: defaults fill missing optional
//! arguments, unknown arguments are dropped and whole-valued floats are
//! accepted for integer arguments. Every violation is collected so the
//! model sees all of them at once.

use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};

use bistro_types::tool::{ArgFormat, ArgKind, ArgSpec, ToolSchema};

/// Validate `args`, returning the normalized arguments or every violation found.
pub fn validate(schema: &ToolSchema, args: &Map<String, Value>) -> Result<Map<String, Value>, Vec<String>> {
    let mut normalized = Map::new();
    let mut violations = Vec::new();

    for spec in &schema.args {
        match args.get(&spec.name).filter(|v| !v.is_null()) {
            None if spec.required => {
                violations.push(format!("missing required argument '{}'", spec.name));
            }
            None => {
                if let Some(default) = &spec.default {
                    normalized.insert(spec.name.clone(), default.clone());
                }
            }
            Some(value) => match check(spec, value) {
                Ok(value) => {
                    normalized.insert(spec.name.clone(), value);
                }
                Err(violation) => violations.push(violation),
            },
        }
    }

    for name in args.keys().filter(|name| schema.arg(name).is_none()) {
        tracing::debug!(argument = %name, "Dropping unknown tool argument");
    }

    if violations.is_empty() {
        Ok(normalized)
    } else {
        Err(violations)
    }
}

fn check(spec: &ArgSpec, value: &Value) -> Result<Value, String> {
    let name = &spec.name;
    let value = match spec.kind {
        ArgKind::String => match value.as_str() {
            Some(s) => {
                if let Some(format) = spec.format {
                    check_format(name, format, s)?;
                }
                value.clone()
            }
            None => return Err(type_error(name, spec.kind, value)),
        },
        ArgKind::Integer => {
            if value.is_i64() || value.is_u64() {
                value.clone()
            } else {
                match value.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
                    _ => return Err(type_error(name, spec.kind, value)),
                }
            }
        }
        ArgKind::Number if value.is_number() => value.clone(),
        ArgKind::Boolean if value.is_boolean() => value.clone(),
        ArgKind::Object if value.is_object() => value.clone(),
        ArgKind::Array if value.is_array() => value.clone(),
        _ => return Err(type_error(name, spec.kind, value)),
    };

    if let (Some(minimum), Some(n)) = (spec.minimum, value.as_f64()) {
        if n < minimum {
            return Err(format!("argument '{name}' must be at least {minimum}, got {n}"));
        }
    }

    Ok(value)
}

fn check_format(name: &str, format: ArgFormat, s: &str) -> Result<(), String> {
    let ok = match format {
        ArgFormat::Date => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        ArgFormat::Time => NaiveTime::parse_from_str(s, "%H:%M").is_ok(),
        ArgFormat::Email => match s.split_once('@') {
            Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.contains('@'),
            None => false,
        },
        ArgFormat::Url => s
            .strip_prefix("https://")
            .or_else(|| s.strip_prefix("http://"))
            .is_some_and(|rest| !rest.is_empty()),
    };
    if ok {
        Ok(())
    } else {
        let expected = match format {
            ArgFormat::Date => "a date as YYYY-MM-DD",
            ArgFormat::Time => "a time as HH:MM",
            ArgFormat::Email => "an email address",
            ArgFormat::Url => "an http(s) URL",
        };
        Err(format!("argument '{name}' must be {expected}, got '{s}'"))
    }
}

fn type_error(name: &str, kind: ArgKind, value: &Value) -> String {
    let actual = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("argument '{name}' must be {}, got {actual}", kind.json_type())
}
