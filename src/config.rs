use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use derive_builder::Builder;

use crate::callback::CompletionHandler;
use crate::error::Result;

const MAX_BATCH: usize = 10;
const BUFFER_SIZE: usize = 1_000;
const MAX_DELAY: Duration = Duration::from_secs(2);

/// Batching of the `tracing` bridge.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into, strip_option))]
pub struct WriterConfig {
    #[builder(default = MAX_BATCH)]
    pub max_batch: usize,
    #[builder(default = MAX_DELAY)]
    pub max_delay: Duration,
    #[builder(default = BUFFER_SIZE)]
    pub buffer_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_batch: MAX_BATCH,
            max_delay: MAX_DELAY,
            buffer_size: BUFFER_SIZE,
        }
    }
}

/// Settings shared by every log of a [`crate::Logging`] client.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into, strip_option))]
pub struct LoggingConfig {
    /// Overrides the project id the credentials would resolve to.
    #[builder(default)]
    pub project_id: Option<String>,
    /// Retry count forwarded to the transport when a call does not set one.
    #[builder(default)]
    pub max_retries: Option<u32>,
    /// Report this library to the service with a one-off diagnostic entry.
    #[builder(default = true)]
    pub instrumentation: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            max_retries: None,
            instrumentation: true,
        }
    }
}

/// Per-log settings.
#[derive(Clone, Default, Builder)]
#[builder(pattern = "owned", setter(into, strip_option))]
pub struct LogOptions {
    /// Replace over-nested payload values with `"[Circular]"` instead of
    /// failing the write.
    #[builder(default)]
    pub remove_circular: bool,
    /// Serialized size above which entries are truncated.
    #[builder(default)]
    pub max_entry_size: Option<usize>,
    /// Extra `jsonPayload.*` paths to shrink before the built-in ones.
    #[builder(default)]
    pub json_fields_to_truncate: Vec<String>,
    #[builder(default, setter(custom))]
    pub default_completion_handler: Option<CompletionHandler>,
}

impl LogOptionsBuilder {
    /// Handler receiving the outcome of detached writes and deletes.
    pub fn default_completion_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Result<()>) + Send + Sync + 'static,
    {
        self.default_completion_handler = Some(Some(Arc::new(handler)));
        self
    }
}

impl fmt::Debug for LogOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogOptions")
            .field("remove_circular", &self.remove_circular)
            .field("max_entry_size", &self.max_entry_size)
            .field("json_fields_to_truncate", &self.json_fields_to_truncate)
            .field(
                "default_completion_handler",
                &self.default_completion_handler.is_some(),
            )
            .finish()
    }
}
