//! Status lines announcing an upcoming tool call.

use serde_json::Value;

use bistro_types::turn::ToolCall;

use crate::tool::registry::ToolSpec;

/// Scalar arguments shown by the fallback line.
const MAX_FALLBACK_ARGS: usize = 3;

/// One status line for `call`.
///
/// Uses the tool's narration template when every placeholder can be
/// filled from the arguments, otherwise the humanized tool name followed
/// by up to three scalar arguments.
pub fn narrate(spec: Option<&ToolSpec>, call: &ToolCall) -> String {
    spec.and_then(|s| s.narration.as_deref())
        .and_then(|template| fill_template(template, call))
        .unwrap_or_else(|| fallback(call))
}

/// Replace `{name}` placeholders. `None` if an argument is missing or not scalar.
fn fill_template(template: &str, call: &ToolCall) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}')?;
        let name = &after[..close];
        out.push_str(&scalar(call.arguments.get(name)?)?);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn fallback(call: &ToolCall) -> String {
    let details: Vec<String> = call
        .arguments
        .iter()
        .filter_map(|(name, value)| scalar(value).map(|v| format!("{name}: {v}")))
        .take(MAX_FALLBACK_ARGS)
        .collect();
    let name = humanize(&call.name);
    if details.is_empty() {
        format!("{name}...")
    } else {
        format!("{name} ({})...", details.join(", "))
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `createReservation` and `create_reservation` both become "Create reservation".
fn humanize(name: &str) -> String {
    let mut words = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch == '_' || ch == '-' {
            words.push(' ');
        } else if ch.is_uppercase() {
            if i > 0 {
                words.push(' ');
            }
            words.extend(ch.to_lowercase());
        } else {
            words.push(ch);
        }
    }
    let mut chars = words.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
