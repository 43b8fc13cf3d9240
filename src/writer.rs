//! Bridges `tracing-stackdriver` JSON lines into batched [`Log::write`] calls.

use std::io::Write;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::WriterConfig;
use crate::entry::{Entry, EntryBatch, EntryMetadata};
use crate::log::{Log, WriteOptions};
use crate::utils::{extract_trace_id, get_severity};

/// Events emitted by this crate are not forwarded, or every batch would log itself.
const SELF_TARGET: &str = env!("CARGO_CRATE_NAME");

/// The `io::Write` end handed to the formatting layer.
#[derive(Debug, Clone)]
pub struct LogWriter {
    sender: mpsc::Sender<Value>,
}

/// Stops the background batcher; see [`LogWriterGuard::shutdown`].
#[derive(Debug)]
pub struct LogWriterGuard {
    shutdown_trigger: Option<oneshot::Sender<()>>,
    shutdown_handle: Option<JoinHandle<()>>,
}

/// Starts the batcher writing to `log`. Must be called within a Tokio runtime.
pub fn spawn(log: Log, config: WriterConfig) -> (LogWriter, LogWriterGuard) {
    let (tx, rx) = mpsc::channel::<Value>(config.buffer_size.max(1));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let handle = tokio::spawn(run_batch_writer(rx, shutdown_rx, config, log));

    (
        LogWriter { sender: tx },
        LogWriterGuard {
            shutdown_trigger: Some(shutdown_tx),
            shutdown_handle: Some(handle),
        },
    )
}

async fn run_batch_writer(
    mut receiver: mpsc::Receiver<Value>,
    mut shutdown: oneshot::Receiver<()>,
    config: WriterConfig,
    log: Log,
) {
    let max_batch = config.max_batch.max(1);
    let mut buffer = Vec::with_capacity(max_batch);
    let mut flush_deadline: Option<Pin<Box<Sleep>>> = None;

    loop {
        let mut deadline_fut = flush_deadline.as_mut().map(|d| d.as_mut());

        tokio::select! {
            _ = &mut shutdown => break,

            line = receiver.recv() => {
                let Some(line) = line else { break };
                buffer.push(line);

                if flush_deadline.is_none() {
                    flush_deadline = Some(Box::pin(tokio::time::sleep(config.max_delay)));
                }

                if buffer.len() >= max_batch {
                    flush_batch(&log, std::mem::take(&mut buffer)).await;
                    flush_deadline = None;
                }
            }

            Some(()) = async { Some(deadline_fut.as_mut()?.await) }, if deadline_fut.is_some() => {
                if !buffer.is_empty() {
                    flush_batch(&log, std::mem::take(&mut buffer)).await;
                }
                flush_deadline = None;
            }
        }
    }

    // lines already queued when shutdown was requested
    while let Ok(line) = receiver.try_recv() {
        buffer.push(line);
    }
    for batch in buffer.chunks(max_batch) {
        flush_batch(&log, batch.to_vec()).await;
    }

    tracing::debug!("log writer shut down");
}

async fn flush_batch(log: &Log, lines: Vec<Value>) {
    let entries: EntryBatch = lines.into_iter().map(line_to_entry).collect();
    if let Err(err) = log.write(entries, WriteOptions::default()).await {
        tracing::error!(log_name = log.name(), "failed to write log batch: {err}");
    }
}

/// Maps a formatted event onto an entry: severity, time and trace become
/// metadata and the whole line is the payload.
fn line_to_entry(line: Value) -> Entry {
    let timestamp = line
        .get("time")
        .and_then(Value::as_str)
        .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
        .map(|time| time.with_timezone(&Utc));

    let metadata = EntryMetadata {
        severity: Some(get_severity(&line)),
        timestamp,
        trace: extract_trace_id(&line),
        ..Default::default()
    };

    Entry::new(metadata, line)
}

fn is_own_event(line: &Value) -> bool {
    line.get("target")
        .and_then(Value::as_str)
        .and_then(|target| target.strip_prefix(SELF_TARGET))
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

impl LogWriterGuard {
    /// Flushes whatever is buffered and waits for the batcher to finish.
    pub async fn shutdown(mut self) {
        if let Some(shutdown_tx) = self.shutdown_trigger.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.shutdown_handle.take() {
            if let Err(err) = handle.await {
                tracing::error!("log writer task panicked: {err:?}");
            }
        }
    }
}

impl Drop for LogWriterGuard {
    /// Signals the batcher without waiting; pending lines are flushed in the background.
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_trigger.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for line in serde_json::Deserializer::from_slice(buf).into_iter::<Value>() {
            let line =
                line.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            if is_own_event(&line) {
                continue;
            }

            if let Err(e) = self.sender.try_send(line) {
                tracing::warn!("dropped log line: {e}");
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
