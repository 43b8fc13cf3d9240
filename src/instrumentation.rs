//! Library provenance reported to the service alongside written entries.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value, json};

use crate::entry::{Entry, EntryMetadata, Payload, Severity};

pub const DIAGNOSTIC_INFO_KEY: &str = "logging.googleapis.com/diagnostic";
pub const INSTRUMENTATION_SOURCE_KEY: &str = "instrumentation_source";
pub const LIBRARY_NAME: &str = "rust-gcp-log";
pub const LIBRARY_NAME_PREFIX: &str = "rust";
pub const LIBRARY_VERSION: &str = env!("CARGO_PKG_VERSION");

const MAX_INSTRUMENTATION_COUNT: usize = 3;
const MAX_DIAGNOSTIC_VALUE_LEN: usize = 14;

/// Decorates a batch with provenance information.
///
/// Returns the decorated batch and whether any information was added; when it
/// was, the write is sent with `partialSuccess` so the decoration cannot fail
/// the caller's entries.
pub trait InstrumentationAttacher: Send + Sync {
    fn attach(&self, entries: Vec<Entry>) -> (Vec<Entry>, bool);
}

/// Leaves batches untouched.
#[derive(Debug, Clone, Default)]
pub struct NoInstrumentation;

impl InstrumentationAttacher for NoInstrumentation {
    fn attach(&self, entries: Vec<Entry>) -> (Vec<Entry>, bool) {
        (entries, false)
    }
}

/// Reports this library once per client, either by completing diagnostic
/// info a caller's entry already carries or by appending a diagnostic entry.
#[derive(Debug, Default)]
pub struct DiagnosticInfo {
    reported: AtomicBool,
}

impl DiagnosticInfo {
    pub fn new() -> Self {
        Self::default()
    }

    fn own_source() -> Value {
        json!({ "name": LIBRARY_NAME, "version": LIBRARY_VERSION })
    }

    pub fn diagnostic_entry() -> Entry {
        let mut payload = Map::new();
        payload.insert(
            DIAGNOSTIC_INFO_KEY.to_owned(),
            json!({ INSTRUMENTATION_SOURCE_KEY: [Self::own_source()] }),
        );
        Entry::new(
            EntryMetadata::default().with_severity(Severity::Info),
            payload,
        )
    }

    /// Keeps at most three well-formed sources of this library, clipped to the
    /// service's length limits, with this library's own source included.
    fn sanitize(sources: &[Value]) -> Vec<Value> {
        let mut valid: Vec<Value> = sources
            .iter()
            .filter_map(|source| {
                let name = source.get("name")?.as_str()?;
                if !name.starts_with(LIBRARY_NAME_PREFIX) {
                    return None;
                }
                let version = source.get("version").and_then(Value::as_str).unwrap_or("");
                Some(json!({
                    "name": clip(name),
                    "version": clip(version),
                }))
            })
            .collect();

        let own = Self::own_source();
        if !valid.contains(&own) {
            valid.insert(0, own);
        }
        valid.truncate(MAX_INSTRUMENTATION_COUNT);
        valid
    }
}

fn clip(value: &str) -> String {
    value.chars().take(MAX_DIAGNOSTIC_VALUE_LEN).collect()
}

impl InstrumentationAttacher for DiagnosticInfo {
    fn attach(&self, mut entries: Vec<Entry>) -> (Vec<Entry>, bool) {
        let mut info_added = false;

        for entry in entries.iter_mut() {
            let Payload::Json(payload) = &mut entry.payload else {
                continue;
            };
            let Some(sources) = payload
                .get_mut(DIAGNOSTIC_INFO_KEY)
                .and_then(|info| info.get_mut(INSTRUMENTATION_SOURCE_KEY))
            else {
                continue;
            };
            if let Value::Array(list) = sources {
                *list = Self::sanitize(list);
                info_added = true;
            }
        }

        if info_added {
            self.reported.store(true, Ordering::SeqCst);
        } else if !self.reported.swap(true, Ordering::SeqCst) {
            entries.push(Self::diagnostic_entry());
            info_added = true;
        }

        (entries, info_added)
    }
}
