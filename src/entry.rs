//! Log entries as callers build them, and their serialized wire record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{LoggingError, Result};
use crate::proto_struct::encode_struct;
use crate::resource::MonitoredResource;

/// Metadata key whose presence marks a lone argument to [`Entry::from_input`]
/// as metadata rather than payload.
pub const HTTP_REQUEST_KEY: &str = "httpRequest";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Default,
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Default => "DEFAULT",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Notice => "NOTICE",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Alert => "ALERT",
            Severity::Emergency => "EMERGENCY",
        }
    }

    /// Maps a numeric `google.logging.type.LogSeverity` value.
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Severity::Default,
            100 => Severity::Debug,
            200 => Severity::Info,
            300 => Severity::Notice,
            400 => Severity::Warning,
            500 => Severity::Error,
            600 => Severity::Critical,
            700 => Severity::Alert,
            800 => Severity::Emergency,
            _ => return None,
        })
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "DEFAULT" => Severity::Default,
            "DEBUG" | "TRACE" => Severity::Debug,
            "INFO" => Severity::Info,
            "NOTICE" => Severity::Notice,
            "WARNING" | "WARN" => Severity::Warning,
            "ERROR" => Severity::Error,
            "CRITICAL" => Severity::Critical,
            "ALERT" => Severity::Alert,
            "EMERGENCY" => Severity::Emergency,
            other => {
                return Err(LoggingError::InvalidMetadata(format!(
                    "unknown severity {other:?}"
                )));
            }
        })
    }
}

/// Details of the HTTP request an entry is about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_latency",
        deserialize_with = "deserialize_latency"
    )]
    pub latency: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Protobuf duration text: `1.5s`.
fn serialize_latency<S: Serializer>(latency: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match latency {
        Some(latency) => {
            let nanos = latency.subsec_nanos();
            let text = if nanos == 0 {
                format!("{}s", latency.as_secs())
            } else {
                let fraction = format!("{:09}", nanos);
                format!("{}.{}s", latency.as_secs(), fraction.trim_end_matches('0'))
            };
            s.serialize_str(&text)
        }
        None => s.serialize_none(),
    }
}

fn deserialize_latency<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Latency {
        Text(String),
        Parts {
            #[serde(default)]
            seconds: u64,
            #[serde(default)]
            nanos: u32,
        },
    }

    match Option::<Latency>::deserialize(d)? {
        None => Ok(None),
        Some(Latency::Parts { seconds, nanos }) => Ok(Some(Duration::new(seconds, nanos))),
        Some(Latency::Text(text)) => text
            .trim_end_matches('s')
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| Some(Duration::from_secs_f64(secs)))
            .ok_or_else(|| serde::de::Error::custom(format!("invalid latency {text:?}"))),
    }
}

/// Everything about an entry except its payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<MonitoredResource>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_severity"
    )]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_request: Option<HttpRequest>,
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "deserialize_labels"
    )]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_sampled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location: Option<Value>,
    /// Keys this type does not model, passed through to the record as given.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Any-case names as [`Severity::from_str`] reads them, or the numeric
/// `LogSeverity` codes. Anything else leaves the severity unset.
fn deserialize_severity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Severity>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(name) => name.parse().ok(),
        Value::Number(code) => code.as_u64().and_then(Severity::from_code),
        _ => None,
    })
}

/// Label values are strings on the wire; scalars are rendered, nulls dropped.
fn deserialize_labels<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    let Value::Object(labels) = Value::deserialize(d)? else {
        return Ok(BTreeMap::new());
    };

    Ok(labels
        .into_iter()
        .filter_map(|(key, value)| match value {
            Value::Null => None,
            Value::String(text) => Some((key, text)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

impl EntryMetadata {
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// An entry carries exactly one kind of payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(Map<String, Value>),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Json(Map::new())
    }
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Json(map) => Some(map),
            Payload::Text(_) => None,
        }
    }
}

impl From<Value> for Payload {
    /// Strings become text and objects become structured payloads; `null`
    /// is an empty structured payload and any other value is rendered as JSON text.
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Payload::Text(text),
            Value::Object(map) => Payload::Json(map),
            Value::Null => Payload::default(),
            other => Payload::Text(other.to_string()),
        }
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Payload::Json(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub metadata: EntryMetadata,
    pub payload: Payload,
}

impl Entry {
    /// Builds an entry, stamping the current time and a unique insert id
    /// unless `metadata` already has them.
    pub fn new(metadata: EntryMetadata, payload: impl Into<Payload>) -> Self {
        let mut metadata = metadata;
        metadata.timestamp.get_or_insert_with(Utc::now);
        metadata
            .insert_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string());

        Self {
            metadata,
            payload: payload.into(),
        }
    }

    /// Builds an entry from loosely shaped input.
    ///
    /// With both arguments, `first` is the metadata and `second` the payload.
    /// With only `first`, it is taken as metadata (with an empty structured
    /// payload) when it is an object owning an `httpRequest` key, and as the
    /// payload otherwise. A payload that happens to carry an `httpRequest` key
    /// is therefore read as metadata, its other keys passing through with it.
    ///
    /// Metadata is read leniently: a `null` metadata argument is empty,
    /// severities are matched in any case, and scalar label values are
    /// rendered as strings.
    pub fn from_input(first: Value, second: Option<Value>) -> Result<Self> {
        match second {
            None if first.get(HTTP_REQUEST_KEY).is_some() => {
                Ok(Self::new(parse_metadata(first)?, Payload::default()))
            }
            None => Ok(Self::new(EntryMetadata::default(), first)),
            Some(payload) => Ok(Self::new(parse_metadata(first)?, payload)),
        }
    }

    /// Returns an equivalent entry with `metadata.severity` set.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.metadata.severity = Some(severity);
        self
    }

    /// Serializes the entry into the record submitted to the service.
    ///
    /// Structured payloads are encoded as a protobuf `Struct` under
    /// `jsonPayload`, text under `textPayload`. A bare trace id is qualified
    /// with `project_id`.
    pub fn to_json(&self, remove_circular: bool, project_id: &str) -> Result<Value> {
        let mut record = match serde_json::to_value(&self.metadata)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        for key in ["jsonPayload", "textPayload", "protoPayload"] {
            record.remove(key);
        }

        match &self.payload {
            Payload::Json(map) => {
                record.insert("jsonPayload".into(), encode_struct(map, remove_circular)?);
            }
            Payload::Text(text) => {
                record.insert("textPayload".into(), Value::String(text.clone()));
            }
        }

        if let Some(trace) = &self.metadata.trace {
            if !trace.contains('/') {
                record.insert(
                    "trace".into(),
                    Value::String(format!("projects/{}/traces/{}", project_id, trace)),
                );
            }
        }

        Ok(Value::Object(record))
    }

    /// Parses an entry as returned by the list and tail RPCs.
    pub fn from_api_response(value: Value) -> Result<Self> {
        let Value::Object(mut record) = value else {
            return Err(LoggingError::InvalidMetadata(
                "log entry is not an object".to_owned(),
            ));
        };

        let payload = match (
            record.remove("jsonPayload"),
            record.remove("textPayload"),
            record.remove("protoPayload"),
        ) {
            (Some(json), _, _) | (None, None, Some(json)) => Payload::from(json),
            (None, Some(Value::String(text)), _) => Payload::Text(text),
            _ => Payload::default(),
        };

        Ok(Self {
            metadata: parse_metadata(Value::Object(record))?,
            payload,
        })
    }
}

fn parse_metadata(value: Value) -> Result<EntryMetadata> {
    if value.is_null() {
        return Ok(EntryMetadata::default());
    }
    serde_json::from_value(value).map_err(|err| LoggingError::InvalidMetadata(err.to_string()))
}

/// One or more entries, handled uniformly by every write stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryBatch(Vec<Entry>);

impl EntryBatch {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.0.iter()
    }

    pub fn into_vec(self) -> Vec<Entry> {
        self.0
    }

    /// Stamps `severity` on every entry; cardinality is preserved.
    pub fn with_severity(self, severity: Severity) -> Self {
        self.0
            .into_iter()
            .map(|entry| entry.with_severity(severity))
            .collect()
    }
}

impl From<Entry> for EntryBatch {
    fn from(entry: Entry) -> Self {
        EntryBatch(vec![entry])
    }
}

impl From<Vec<Entry>> for EntryBatch {
    fn from(entries: Vec<Entry>) -> Self {
        EntryBatch(entries)
    }
}

impl FromIterator<Entry> for EntryBatch {
    fn from_iter<I: IntoIterator<Item = Entry>>(iter: I) -> Self {
        EntryBatch(iter.into_iter().collect())
    }
}

impl IntoIterator for EntryBatch {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Severity tagging over a single entry or a batch.
pub fn assign_severity(entries: impl Into<EntryBatch>, severity: Severity) -> EntryBatch {
    entries.into().with_severity(severity)
}
