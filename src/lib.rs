use derive_builder::Builder;
use tracing_subscriber::Registry;

pub mod auth;
mod callback;
mod config;
mod entry;
mod error;
mod http_service;
mod instrumentation;
mod log;
mod logging;
mod proto_struct;
mod resource;
pub mod service;
mod truncate;
mod utils;
pub mod writer;

pub use callback::{CompletionHandler, with_callback};
pub use config::{
    LogOptions, LogOptionsBuilder, LoggingConfig, LoggingConfigBuilder, WriterConfig,
    WriterConfigBuilder,
};
pub use entry::{
    Entry, EntryBatch, EntryMetadata, HttpRequest, Payload, Severity, assign_severity,
};
pub use error::{LoggingError, ResponseError, ResponseErrorInner, Result};
pub use http_service::HttpLoggingService;
pub use instrumentation::{DiagnosticInfo, InstrumentationAttacher, NoInstrumentation};
pub use log::{Log, WriteOptions};
pub use logging::{EntriesPage, EntriesQuery, Logging, TailQuery};
pub use resource::{EnvResourceDetector, MonitoredResource, ResourceDetector};
pub use service::CallOptions;
pub use truncate::{DEFAULT_TRUNCATION_FIELDS, TruncationFields, truncate_entries, truncate_entry};
pub use utils::{extract_trace_id, format_log_name, get_severity, scope_filter};
pub use writer::{LogWriter, LogWriterGuard};

/// Settings of the `tracing` layer that ships events to Cloud Logging.
#[derive(Builder, Clone)]
#[builder(pattern = "owned", setter(into, strip_option))]
pub struct GCloudLayerConfig {
    log_name: String,
    logger_credential: Vec<u8>,
    #[builder(default)]
    config: WriterConfig,
    #[builder(default)]
    logging: LoggingConfig,
    #[builder(default)]
    log_options: LogOptions,
}

impl GCloudLayerConfig {
    /// Builds the layer and the guard that flushes it on shutdown.
    ///
    /// Must be called within a Tokio runtime.
    pub fn build_layer(
        self,
    ) -> Result<(tracing_stackdriver::Layer<Registry, LogWriter>, LogWriterGuard), LoggingError>
    {
        let GCloudLayerConfig {
            log_name,
            logger_credential,
            config,
            logging,
            log_options,
        } = self;

        let log = Logging::from_service_account(logger_credential, logging)?
            .log(log_name, log_options);
        let (writer, guard) = writer::spawn(log, config);

        Ok((tracing_stackdriver::layer().with_writer(writer), guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_layer_from_service_account() {
        let credential = std::fs::read("test_fixtures/service-account-key.json").unwrap();
        let (_layer, guard) = GCloudLayerConfigBuilder::default()
            .log_name("app")
            .logger_credential(credential)
            .build()
            .unwrap()
            .build_layer()
            .unwrap();

        guard.shutdown().await;
    }

    #[test]
    fn rejects_malformed_credentials() {
        let result = GCloudLayerConfigBuilder::default()
            .log_name("app")
            .logger_credential(b"{}".to_vec())
            .build()
            .unwrap()
            .build_layer();

        assert!(matches!(result, Err(LoggingError::Auth(_))));
    }
}
