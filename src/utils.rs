use std::time::{SystemTime, SystemTimeError};

use serde_json::Value;

use crate::entry::Severity;

/// Formats `name` as a fully-qualified log name under `project_id`.
///
/// A name already qualified under `project_id` is accepted as is, and the short
/// name is percent-encoded unless it already is.
pub fn format_log_name(project_id: &str, name: &str) -> String {
    let path = format!("projects/{}/logs/", project_id);
    let name = name.strip_prefix(&path).unwrap_or(name);

    let already_encoded = matches!(urlencoding::decode(&name), Ok(decoded) if decoded != name);
    if already_encoded {
        format!("{}{}", path, name)
    } else {
        format!("{}{}", path, urlencoding::encode(&name))
    }
}

/// Restricts `filter` to entries of `log_name` unless it already names a log.
pub fn scope_filter(filter: Option<&str>, log_name: &str) -> String {
    match filter {
        Some(filter) if !filter.is_empty() && !filter.contains("logName=") => {
            format!("({}) AND logName=\"{}\"", filter, log_name)
        }
        Some(filter) if !filter.is_empty() => filter.to_owned(),
        _ => format!("logName=\"{}\"", log_name),
    }
}

/// `projectId` → `project_id`, the casing monitored-resource labels use.
pub fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for ch in key.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else if ch == '-' || ch == ' ' {
            out.push('_');
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    out
}

/// Severity of a `tracing-stackdriver` JSON line.
#[inline]
pub fn get_severity(log_entry: &Value) -> Severity {
    log_entry
        .get("severity")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

pub fn extract_trace_id(log_entry: &Value) -> Option<String> {
    log_entry
        .get("span")
        .and_then(|v| v.get("trace_id"))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[inline]
pub fn timestamp() -> Result<u64, SystemTimeError> {
    Ok(SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)?
        .as_secs())
}
