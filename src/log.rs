//! A handle on one named log.

use std::collections::BTreeMap;

use futures::stream::BoxStream;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::callback::{CompletionHandler, complete, with_callback};
use crate::config::LogOptions;
use crate::entry::{Entry, EntryBatch, Severity, assign_severity};
use crate::error::Result;
use crate::logging::{EntriesPage, EntriesQuery, Logging, TailQuery};
use crate::resource::MonitoredResource;
use crate::service::{CallOptions, WriteLogEntriesRequest};
use crate::truncate::{TruncationFields, truncate_entries};
use crate::utils::{format_log_name, scope_filter};

/// Per-call settings of [`Log::write`].
///
/// The log name, the entries and the resolved resource of a request always
/// come from the write itself and cannot be overridden here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    pub dry_run: bool,
    pub partial_success: bool,
    /// Resource for entries that do not name their own.
    pub resource: Option<MonitoredResource>,
    /// Labels added to every entry that does not set them.
    pub labels: BTreeMap<String, String>,
    pub call_options: CallOptions,
}

#[derive(Clone)]
pub struct Log {
    logging: Logging,
    name: String,
    remove_circular: bool,
    max_entry_size: Option<usize>,
    truncation_fields: TruncationFields,
    default_completion_handler: Option<CompletionHandler>,
}

impl Log {
    pub fn new(logging: Logging, name: impl Into<String>, options: LogOptions) -> Self {
        Self {
            logging,
            name: name.into(),
            remove_circular: options.remove_circular,
            max_entry_size: options.max_entry_size,
            truncation_fields: TruncationFields::new(options.json_fields_to_truncate),
            default_completion_handler: options.default_completion_handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn truncation_fields(&self) -> &TruncationFields {
        &self.truncation_fields
    }

    /// `projects/{project}/logs/{name}` for the currently resolved project.
    pub async fn formatted_name(&self) -> Result<String> {
        let project_id = self.logging.project_id().await?;
        Ok(format_log_name(&project_id, &self.name))
    }

    /// Builds an entry from metadata and payload, or from a single value; see
    /// [`Entry::from_input`] for how a single value is interpreted.
    pub fn entry(&self, metadata_or_payload: Value, payload: Option<Value>) -> Result<Entry> {
        Entry::from_input(metadata_or_payload, payload)
    }

    /// Writes one entry or a batch.
    ///
    /// The outcome is returned to the caller only. The default completion
    /// handler of [`LogOptions`] observes [`Log::write_detached`] alone, and
    /// [`Log::write_with`] reports to its own callback instead.
    pub async fn write(&self, entries: impl Into<EntryBatch>, options: WriteOptions) -> Result<()> {
        let entries = entries.into();

        let project_id = self.logging.project_id().await?;
        let log_name = format_log_name(&project_id, &self.name);
        let resource = self.logging.resolve_resource(options.resource).await;

        let (entries, info_added) = self.logging.instrumentation().attach(entries.into_vec());
        let mut records = entries
            .iter()
            .map(|entry| entry.to_json(self.remove_circular, &project_id))
            .collect::<Result<Vec<_>>>()?;
        truncate_entries(&mut records, self.max_entry_size, &self.truncation_fields);

        let request = WriteLogEntriesRequest {
            log_name,
            resource,
            labels: options.labels,
            entries: records,
            partial_success: options.partial_success || info_added,
            dry_run: options.dry_run,
        };
        let call_options = CallOptions {
            max_retries: options
                .call_options
                .max_retries
                .or(self.logging.max_retries()),
            ..options.call_options
        };

        tracing::debug!(
            log_name = %request.log_name,
            entries = request.entries.len(),
            partial_success = request.partial_success,
            "writing log entries"
        );
        self.logging
            .service()
            .write_log_entries(request, call_options)
            .await
    }

    /// [`Log::write`], reporting the outcome to `callback`.
    pub async fn write_with<F>(
        &self,
        entries: impl Into<EntryBatch>,
        options: WriteOptions,
        callback: F,
    ) where
        F: FnOnce(Result<()>),
    {
        with_callback(self.write(entries, options), callback).await
    }

    /// Starts a write in the background. The outcome goes to the default
    /// completion handler; without one, failures are only logged.
    pub fn write_detached(
        &self,
        entries: impl Into<EntryBatch>,
        options: WriteOptions,
    ) -> JoinHandle<()> {
        let log = self.clone();
        let entries = entries.into();

        tokio::spawn(async move {
            let result = log.write(entries, options).await;
            complete(result, log.default_completion_handler.as_ref(), "write");
        })
    }

    /// Deletes the log and all of its entries. As with [`Log::write`], only
    /// [`Log::delete_detached`] reports to the default completion handler.
    pub async fn delete(&self, options: CallOptions) -> Result<()> {
        let log_name = self.formatted_name().await?;
        tracing::debug!(%log_name, "deleting log");
        self.logging.service().delete_log(&log_name, options).await
    }

    pub async fn delete_with<F>(&self, options: CallOptions, callback: F)
    where
        F: FnOnce(Result<()>),
    {
        with_callback(self.delete(options), callback).await
    }

    pub fn delete_detached(&self, options: CallOptions) -> JoinHandle<()> {
        let log = self.clone();

        tokio::spawn(async move {
            let result = log.delete(options).await;
            complete(result, log.default_completion_handler.as_ref(), "delete");
        })
    }

    /// One page of this log's entries. The filter is narrowed to this log
    /// unless it already names one.
    pub async fn get_entries(&self, query: EntriesQuery) -> Result<EntriesPage> {
        let log_name = self.formatted_name().await?;
        let filter = scope_filter(query.filter.as_deref(), &log_name);

        self.logging
            .get_entries(EntriesQuery {
                filter: Some(filter),
                ..query
            })
            .await
    }

    pub fn get_entries_stream(&self, query: EntriesQuery) -> BoxStream<'static, Result<Entry>> {
        self.logging.get_entries_stream(EntriesQuery {
            log: query.log.clone().or_else(|| Some(self.name.clone())),
            ..query
        })
    }

    pub fn tail_entries(&self, query: TailQuery) -> BoxStream<'static, Result<Entry>> {
        self.logging.tail_entries(TailQuery {
            log: query.log.clone().or_else(|| Some(self.name.clone())),
            ..query
        })
    }
}

macro_rules! severity_writers {
    ($($(#[$doc:meta])* $name:ident => $severity:ident;)*) => {
        impl Log {
            $(
                $(#[$doc])*
                pub async fn $name(
                    &self,
                    entries: impl Into<EntryBatch>,
                    options: WriteOptions,
                ) -> Result<()> {
                    self.write(assign_severity(entries, Severity::$severity), options)
                        .await
                }
            )*
        }
    };
}

severity_writers! {
    /// Writes with severity `EMERGENCY`: one or more systems are unusable.
    emergency => Emergency;
    /// Writes with severity `ALERT`: a person must take action immediately.
    alert => Alert;
    /// Writes with severity `CRITICAL`: severe problems or brief outages.
    critical => Critical;
    /// Writes with severity `ERROR`.
    error => Error;
    /// Writes with severity `WARNING`.
    warning => Warning;
    /// Writes with severity `NOTICE`: normal but significant events.
    notice => Notice;
    /// Writes with severity `INFO`.
    info => Info;
    /// Writes with severity `DEBUG`.
    debug => Debug;
}
