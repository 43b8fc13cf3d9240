//! Best-effort shrinking of serialized entries to a maximum byte size.
//!
//! Text payloads lose characters from their tail. Structured payloads lose
//! characters from the string fields named by [`TruncationFields`], in order,
//! until the entry fits or the list is exhausted. An entry that cannot be
//! shrunk enough is left as it is and submitted anyway.

use serde_json::Value;

/// Fields that usually carry large free text, for the output shapes of the
/// common structured loggers. Always consulted last.
pub const DEFAULT_TRUNCATION_FIELDS: [&str; 5] = [
    // Winston
    "jsonPayload.fields.metadata.structValue.fields.stack.stringValue",
    // Bunyan
    "jsonPayload.fields.msg.stringValue",
    "jsonPayload.fields.err.structValue.fields.stack.stringValue",
    "jsonPayload.fields.err.structValue.fields.message.stringValue",
    // Everyone
    "jsonPayload.fields.message.stringValue",
];

const JSON_PAYLOAD_ROOT: &str = "jsonPayload";

/// Ordered dotted paths to shrink: custom paths first, then the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationFields(Vec<String>);

impl TruncationFields {
    /// Custom paths outside `jsonPayload` or duplicating an earlier path or a
    /// default are dropped.
    pub fn new<I, S>(custom: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fields: Vec<String> = Vec::new();
        for path in custom.into_iter().map(Into::into) {
            if path.starts_with(JSON_PAYLOAD_ROOT)
                && !DEFAULT_TRUNCATION_FIELDS.contains(&path.as_str())
                && !fields.contains(&path)
            {
                fields.push(path);
            }
        }
        fields.extend(DEFAULT_TRUNCATION_FIELDS.iter().map(|s| s.to_string()));

        Self(fields)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Default for TruncationFields {
    fn default() -> Self {
        Self::new(std::iter::empty::<String>())
    }
}

/// Shrinks every entry larger than `max_size`. A `None` limit disables truncation.
pub fn truncate_entries(entries: &mut [Value], max_size: Option<usize>, fields: &TruncationFields) {
    let Some(max_size) = max_size else {
        return;
    };

    for entry in entries.iter_mut() {
        truncate_entry(entry, max_size, fields);
    }
}

pub fn truncate_entry(entry: &mut Value, max_size: usize, fields: &TruncationFields) {
    let size = entry.to_string().len();
    if size <= max_size {
        return;
    }
    let mut overage = size - max_size;

    if let Some(Value::String(text)) = entry.get_mut("textPayload") {
        shrink_tail(text, overage);
        return;
    }

    for path in fields.iter() {
        if let Some(Value::String(value)) = entry.pointer_mut(&to_pointer(path)) {
            if !value.is_empty() {
                overage -= shrink_tail(value, overage);
            }
        }
        if overage == 0 {
            break;
        }
    }

    if overage > 0 {
        tracing::debug!(overage, "entry still exceeds the size limit after truncation");
    }
}

/// Removes up to `count` characters from the end of `text`, returning how
/// many were removed.
fn shrink_tail(text: &mut String, count: usize) -> usize {
    let len = text.chars().count();
    let keep = len.saturating_sub(count);
    let cut = text
        .char_indices()
        .nth(keep)
        .map_or(text.len(), |(index, _)| index);
    text.truncate(cut);

    len - keep
}

/// `a.b.c` → `/a/b/c`, escaped per RFC 6901.
fn to_pointer(path: &str) -> String {
    path.split('.')
        .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
        .collect()
}
