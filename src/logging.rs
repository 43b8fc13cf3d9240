//! The parent client shared by every [`Log`] handle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use tokio::sync::OnceCell;

use crate::auth::{LOGGING_SCOPES, ProjectIdProvider, ServiceAccount, StaticProjectId};
use crate::config::{LogOptions, LoggingConfig};
use crate::entry::Entry;
use crate::error::{LoggingError, Result};
use crate::http_service::HttpLoggingService;
use crate::instrumentation::{DiagnosticInfo, InstrumentationAttacher, NoInstrumentation};
use crate::log::Log;
use crate::resource::{EnvResourceDetector, MonitoredResource, ResourceDetector};
use crate::service::{
    CallOptions, ListLogEntriesRequest, LoggingService, TailLogEntriesRequest,
};
use crate::utils::{format_log_name, scope_filter};

const DEFAULT_ORDER_BY: &str = "timestamp desc";
/// Reads without a time restriction only look this far back.
const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// A read of stored entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntriesQuery {
    pub filter: Option<String>,
    /// Short or qualified log name to restrict the read to.
    pub log: Option<String>,
    pub order_by: Option<String>,
    pub page_size: Option<u32>,
    pub page_token: Option<String>,
    pub resource_names: Vec<String>,
    /// Stop a stream after this many entries.
    pub max_results: Option<usize>,
    pub call_options: CallOptions,
}

impl EntriesQuery {
    pub fn with_filter(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..Default::default()
        }
    }
}

/// A live tail of newly written entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TailQuery {
    pub filter: Option<String>,
    pub log: Option<String>,
    pub resource_names: Vec<String>,
    pub buffer_window: Option<Duration>,
}

/// One page of [`Logging::get_entries`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntriesPage {
    pub entries: Vec<Entry>,
    pub next_page_token: Option<String>,
}

struct LoggingInner {
    service: Arc<dyn LoggingService>,
    auth: Arc<dyn ProjectIdProvider>,
    detector: Arc<dyn ResourceDetector>,
    instrumentation: Arc<dyn InstrumentationAttacher>,
    project_id: OnceCell<String>,
    detected_resource: OnceCell<MonitoredResource>,
    max_retries: Option<u32>,
}

/// Client for one project's logs.
///
/// Cloning is cheap; clones share the resolved project id and the detected
/// monitored resource, each of which is resolved at most once.
#[derive(Clone)]
pub struct Logging {
    inner: Arc<LoggingInner>,
}

impl Logging {
    pub fn new(
        service: impl LoggingService + 'static,
        auth: impl ProjectIdProvider + 'static,
        config: LoggingConfig,
    ) -> Self {
        Self::with_detector(service, auth, EnvResourceDetector, config)
    }

    pub fn with_detector(
        service: impl LoggingService + 'static,
        auth: impl ProjectIdProvider + 'static,
        detector: impl ResourceDetector + 'static,
        config: LoggingConfig,
    ) -> Self {
        let auth: Arc<dyn ProjectIdProvider> = match config.project_id {
            Some(project_id) => Arc::new(StaticProjectId(project_id)),
            None => Arc::new(auth),
        };
        let instrumentation: Arc<dyn InstrumentationAttacher> = if config.instrumentation {
            Arc::new(DiagnosticInfo::new())
        } else {
            Arc::new(NoInstrumentation)
        };

        Self {
            inner: Arc::new(LoggingInner {
                service: Arc::new(service),
                auth,
                detector: Arc::new(detector),
                instrumentation,
                project_id: OnceCell::new(),
                detected_resource: OnceCell::new(),
                max_retries: config.max_retries,
            }),
        }
    }

    /// Client talking to the REST API with service-account credentials.
    pub fn from_service_account(
        credential_bytes: impl AsRef<[u8]>,
        config: LoggingConfig,
    ) -> Result<Self> {
        let account = ServiceAccount::from_bytes(credential_bytes.as_ref(), &LOGGING_SCOPES)?;
        let service = HttpLoggingService::new(account.clone());

        Ok(Self::new(service, account, config))
    }

    /// Handle for the log called `name`.
    pub fn log(&self, name: impl Into<String>, options: LogOptions) -> Log {
        Log::new(self.clone(), name, options)
    }

    pub(crate) fn service(&self) -> &dyn LoggingService {
        self.inner.service.as_ref()
    }

    pub(crate) fn instrumentation(&self) -> &dyn InstrumentationAttacher {
        self.inner.instrumentation.as_ref()
    }

    pub(crate) fn max_retries(&self) -> Option<u32> {
        self.inner.max_retries
    }

    pub async fn project_id(&self) -> Result<String> {
        self.inner
            .project_id
            .get_or_try_init(|| async {
                let project_id = self.inner.auth.project_id().await?;
                tracing::debug!(%project_id, "resolved project id");
                Ok::<_, LoggingError>(project_id)
            })
            .await
            .cloned()
    }

    /// The resource of the running environment, detected on first use.
    pub async fn detected_resource(&self) -> MonitoredResource {
        self.inner
            .detected_resource
            .get_or_init(|| async {
                let resource = self.inner.detector.detect().await;
                tracing::debug!(
                    resource_type = %resource.resource_type,
                    "detected monitored resource"
                );
                resource
            })
            .await
            .clone()
    }

    /// The resource to attach to a write: the explicit one with its label keys
    /// normalized, otherwise the detected one.
    pub async fn resolve_resource(&self, explicit: Option<MonitoredResource>) -> MonitoredResource {
        match explicit {
            Some(resource) => resource.normalize_labels(),
            None => self.detected_resource().await,
        }
    }

    async fn list_request(&self, query: &EntriesQuery) -> Result<ListLogEntriesRequest> {
        let project_id = self.project_id().await?;

        let mut filter = query.filter.clone().filter(|f| !f.is_empty());
        if let Some(log) = &query.log {
            filter = Some(scope_filter(
                filter.as_deref(),
                &format_log_name(&project_id, log),
            ));
        }
        let since = format!(
            "timestamp >= \"{}\"",
            (Utc::now() - chrono::Duration::hours(DEFAULT_LOOKBACK_HOURS))
                .to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        let filter = match filter {
            None => since,
            Some(filter) if !filter.contains("timestamp") => format!("{} AND {}", filter, since),
            Some(filter) => filter,
        };

        let mut resource_names = query.resource_names.clone();
        let project = format!("projects/{}", project_id);
        if !resource_names.contains(&project) {
            resource_names.push(project);
        }

        Ok(ListLogEntriesRequest {
            resource_names,
            filter: Some(filter),
            order_by: Some(
                query
                    .order_by
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ORDER_BY.to_owned()),
            ),
            page_size: query.page_size,
            page_token: query.page_token.clone(),
        })
    }

    /// Fetches one page of entries.
    pub async fn get_entries(&self, query: EntriesQuery) -> Result<EntriesPage> {
        let request = self.list_request(&query).await?;
        let response = self
            .service()
            .list_log_entries(request, query.call_options)
            .await?;

        Ok(EntriesPage {
            entries: response
                .entries
                .into_iter()
                .map(Entry::from_api_response)
                .collect::<Result<_>>()?,
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    /// Streams entries, fetching further pages only as they are consumed.
    pub fn get_entries_stream(&self, query: EntriesQuery) -> BoxStream<'static, Result<Entry>> {
        struct Cursor {
            logging: Logging,
            query: EntriesQuery,
            request: Option<ListLogEntriesRequest>,
        }

        let max_results = query.max_results;
        let cursor = Cursor {
            logging: self.clone(),
            query,
            request: None,
        };

        let pages = stream::try_unfold(Some(cursor), |cursor| async move {
            let Some(mut cursor) = cursor else {
                return Ok(None);
            };
            let request = match cursor.request.take() {
                Some(request) => request,
                None => cursor.logging.list_request(&cursor.query).await?,
            };
            let response = cursor
                .logging
                .service()
                .list_log_entries(request.clone(), cursor.query.call_options.clone())
                .await?;

            let next = response
                .next_page_token
                .filter(|token| !token.is_empty())
                .map(|token| Cursor {
                    request: Some(ListLogEntriesRequest {
                        page_token: Some(token),
                        ..request
                    }),
                    ..cursor
                });

            Ok::<_, LoggingError>(Some((response.entries, next)))
        });

        let entries = pages
            .map_ok(|page| stream::iter(page.into_iter().map(Entry::from_api_response)))
            .try_flatten();

        match max_results {
            Some(max) => entries.take(max).boxed(),
            None => entries.boxed(),
        }
    }

    /// Streams entries as they are written.
    pub fn tail_entries(&self, query: TailQuery) -> BoxStream<'static, Result<Entry>> {
        let logging = self.clone();

        stream::once(async move {
            let project_id = logging.project_id().await?;
            let filter = match &query.log {
                Some(log) => Some(scope_filter(
                    query.filter.as_deref(),
                    &format_log_name(&project_id, log),
                )),
                None => query.filter.clone(),
            };
            let mut resource_names = query.resource_names.clone();
            if resource_names.is_empty() {
                resource_names.push(format!("projects/{}", project_id));
            }

            Ok::<_, LoggingError>(logging.service().tail_log_entries(TailLogEntriesRequest {
                resource_names,
                filter,
                buffer_window: query.buffer_window,
            }))
        })
        .try_flatten()
        .map_ok(|response| stream::iter(response.entries.into_iter().map(Entry::from_api_response)))
        .try_flatten()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::auth::AuthError;
    use crate::config::LoggingConfigBuilder;
    use crate::resource::testing::CountingDetector;
    use crate::service::testing::RecordingService;
    use crate::service::{ListLogEntriesResponse, TailLogEntriesResponse};

    struct FailingAuth;

    #[async_trait]
    impl ProjectIdProvider for FailingAuth {
        async fn project_id(&self) -> crate::auth::Result<String> {
            Err(AuthError::MissingProjectId)
        }
    }

    fn logging_with(service: RecordingService) -> (Logging, Arc<RecordingService>) {
        let service = Arc::new(service);
        let logging = Logging::with_detector(
            service.clone(),
            StaticProjectId("proj1".into()),
            CountingDetector::default(),
            LoggingConfig::default(),
        );
        (logging, service)
    }

    #[tokio::test]
    async fn detects_resource_once() {
        let detections = Arc::new(AtomicUsize::new(0));
        let logging = Logging::with_detector(
            RecordingService::default(),
            StaticProjectId("p".into()),
            CountingDetector(detections.clone()),
            LoggingConfig::default(),
        );

        for _ in 0..5 {
            assert_eq!(logging.resolve_resource(None).await, MonitoredResource::new_global());
        }
        let clone = logging.clone();
        clone.resolve_resource(None).await;

        assert_eq!(detections.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn explicit_resource_skips_detection() {
        let detections = Arc::new(AtomicUsize::new(0));
        let logging = Logging::with_detector(
            RecordingService::default(),
            StaticProjectId("p".into()),
            CountingDetector(detections.clone()),
            LoggingConfig::default(),
        );

        let resource = logging
            .resolve_resource(Some(
                MonitoredResource::new("gce_instance").with_label("instanceId", "7"),
            ))
            .await;

        assert_eq!(resource.labels["instance_id"], "7");
        assert_eq!(detections.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn config_project_id_overrides_credentials() {
        let logging = Logging::new(
            RecordingService::default(),
            FailingAuth,
            LoggingConfigBuilder::default()
                .project_id("override")
                .build()
                .unwrap(),
        );
        assert_eq!(logging.project_id().await.unwrap(), "override");
    }

    #[tokio::test]
    async fn project_id_failure_propagates() {
        let logging = Logging::new(
            RecordingService::default(),
            FailingAuth,
            LoggingConfig::default(),
        );
        let err = logging.project_id().await.unwrap_err();
        assert!(matches!(err, LoggingError::Auth(AuthError::MissingProjectId)));
    }

    #[tokio::test]
    async fn get_entries_applies_client_defaults() {
        let (logging, service) = logging_with(RecordingService::with_pages(vec![
            ListLogEntriesResponse {
                entries: vec![json!({"textPayload": "hi", "severity": "ERROR"})],
                next_page_token: Some(String::new()),
            },
        ]));

        let page = logging
            .get_entries(EntriesQuery::with_filter("severity=ERROR"))
            .await
            .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].payload.as_text(), Some("hi"));
        assert_eq!(page.next_page_token, None);

        let request = service.lists.lock().unwrap()[0].clone();
        assert_eq!(request.resource_names, vec!["projects/proj1".to_owned()]);
        assert_eq!(request.order_by.as_deref(), Some(DEFAULT_ORDER_BY));
        let filter = request.filter.unwrap();
        assert!(filter.starts_with("severity=ERROR AND timestamp >= \""));
    }

    #[tokio::test]
    async fn get_entries_keeps_time_restricted_filter() {
        let (logging, service) = logging_with(RecordingService::default());
        let filter = r#"timestamp >= "2020-01-01T00:00:00Z""#;

        logging
            .get_entries(EntriesQuery::with_filter(filter))
            .await
            .unwrap();

        let request = service.lists.lock().unwrap()[0].clone();
        assert_eq!(request.filter.as_deref(), Some(filter));
    }

    #[tokio::test]
    async fn stream_pages_lazily() {
        let (logging, service) = logging_with(RecordingService::with_pages(vec![
            ListLogEntriesResponse {
                entries: vec![json!({"textPayload": "a"}), json!({"textPayload": "b"})],
                next_page_token: Some("next".into()),
            },
            ListLogEntriesResponse {
                entries: vec![json!({"textPayload": "c"})],
                next_page_token: None,
            },
        ]));

        let entries: Vec<Entry> = logging
            .get_entries_stream(EntriesQuery {
                log: Some("syslog".into()),
                ..Default::default()
            })
            .try_collect()
            .await
            .unwrap();

        let texts: Vec<_> = entries.iter().filter_map(|e| e.payload.as_text()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);

        let lists = service.lists.lock().unwrap().clone();
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[1].page_token.as_deref(), Some("next"));
        assert!(
            lists[0]
                .filter
                .as_deref()
                .unwrap()
                .starts_with(r#"logName="projects/proj1/logs/syslog" AND timestamp"#)
        );
    }

    #[tokio::test]
    async fn stream_honors_max_results() {
        let (logging, service) = logging_with(RecordingService::with_pages(vec![
            ListLogEntriesResponse {
                entries: vec![json!({"textPayload": "a"}), json!({"textPayload": "b"})],
                next_page_token: Some("next".into()),
            },
        ]));

        let entries: Vec<Entry> = logging
            .get_entries_stream(EntriesQuery {
                max_results: Some(1),
                ..Default::default()
            })
            .try_collect()
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(service.lists.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tail_scopes_to_log() {
        let service = RecordingService::default();
        *service.tail_responses.lock().unwrap() = vec![TailLogEntriesResponse {
            entries: vec![json!({"jsonPayload": {"k": "v"}})],
            suppression_info: vec![],
        }];
        let (logging, service) = logging_with(service);

        let entries: Vec<Entry> = logging
            .tail_entries(TailQuery {
                log: Some("syslog".into()),
                ..Default::default()
            })
            .try_collect()
            .await
            .unwrap();

        assert_eq!(entries[0].payload.as_json().unwrap()["k"], "v");
        let request = service.tails.lock().unwrap()[0].clone();
        assert_eq!(
            request.filter.as_deref(),
            Some(r#"logName="projects/proj1/logs/syslog""#)
        );
        assert_eq!(request.resource_names, vec!["projects/proj1".to_owned()]);
    }
}
