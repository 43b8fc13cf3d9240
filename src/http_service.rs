use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::TokenSource;
use crate::error::{LoggingError, ResponseError, ResponseErrorInner, Result};
use crate::proto_struct::decode_struct;
use crate::service::{
    CallOptions, ListLogEntriesRequest, ListLogEntriesResponse, LoggingService,
    TailLogEntriesRequest, TailLogEntriesResponse, WriteLogEntriesRequest,
};

/// Google Cloud Logging REST API root.
const BASE_URL: &str = "https://logging.googleapis.com/v2";
/// Delay before the first retry; later retries wait proportionally longer.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// [`LoggingService`] over the Cloud Logging REST API.
#[derive(Clone)]
pub struct HttpLoggingService {
    base_url: Arc<str>,
    tokens: Arc<dyn TokenSource>,
    http_client: Client,
}

impl HttpLoggingService {
    pub fn new(tokens: impl TokenSource + 'static) -> Self {
        Self {
            base_url: Arc::from(BASE_URL),
            tokens: Arc::new(tokens),
            http_client: Client::new(),
        }
    }

    /// Points the service at another API root, e.g. an emulator.
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        self.base_url = Arc::from(base_url.as_ref().trim_end_matches('/'));
        self
    }

    /// Sends one call, retrying retryable failures `options.max_retries` times
    /// with linear backoff.
    async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: &CallOptions,
    ) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned + Send,
    {
        let url = format!("{}/{}", self.base_url, path);
        let max_retries = options.max_retries.unwrap_or(0);
        let mut attempt = 0;

        loop {
            match self.call_once(method.clone(), &url, body, options).await {
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    tracing::debug!(%url, attempt, "retrying logging call: {err}");
                    tokio::time::sleep(RETRY_DELAY * attempt).await;
                }
                result => return result,
            }
        }
    }

    async fn call_once<B, T>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        options: &CallOptions,
    ) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned + Send,
    {
        let access_token = self.tokens.access_token().await?;

        let mut request = self
            .http_client
            .request(method, url)
            .header("Authorization", access_token);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            // https://cloud.google.com/logging/docs/reference/v2/rest/v2/entries/write#response-body
            let error = serde_json::from_slice::<ResponseError>(&bytes)
                .map(|ResponseError { error }| error)
                .unwrap_or_else(|_| ResponseErrorInner {
                    code: Some(i64::from(status.as_u16())),
                    message: String::from_utf8_lossy(&bytes).into_owned(),
                    status: status.canonical_reason().unwrap_or_default().to_owned(),
                });
            return Err(LoggingError::Response(error));
        }

        let body: &[u8] = if bytes.is_empty() { b"{}" } else { &bytes };
        Ok(serde_json::from_slice(body)?)
    }
}

/// The REST API takes `jsonPayload` as plain JSON rather than `Struct` form.
fn to_rest_entry(mut entry: Value) -> Value {
    if let Some(payload) = entry.get_mut("jsonPayload") {
        *payload = Value::Object(decode_struct(payload));
    }
    entry
}

#[async_trait]
impl LoggingService for HttpLoggingService {
    async fn write_log_entries(
        &self,
        mut request: WriteLogEntriesRequest,
        options: CallOptions,
    ) -> Result<()> {
        request.entries = request.entries.into_iter().map(to_rest_entry).collect();

        self.call::<_, Value>(Method::POST, "entries:write", Some(&request), &options)
            .await
            .map(|_| ())
    }

    async fn delete_log(&self, log_name: &str, options: CallOptions) -> Result<()> {
        self.call::<Value, Value>(Method::DELETE, log_name, None, &options)
            .await
            .map(|_| ())
    }

    async fn list_log_entries(
        &self,
        request: ListLogEntriesRequest,
        options: CallOptions,
    ) -> Result<ListLogEntriesResponse> {
        self.call(Method::POST, "entries:list", Some(&request), &options)
            .await
    }

    fn tail_log_entries(
        &self,
        _request: TailLogEntriesRequest,
    ) -> BoxStream<'static, Result<TailLogEntriesResponse>> {
        stream::iter([Err(LoggingError::Unsupported(
            "entries:tail is a streaming RPC the REST transport cannot carry",
        ))])
        .boxed()
    }
}
