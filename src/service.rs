//! The RPC surface of the logging service this crate is written against.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::resource::MonitoredResource;

/// Transport-level settings. They travel beside a request, never inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub max_retries: Option<u32>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteLogEntriesRequest {
    pub log_name: String,
    pub resource: MonitoredResource,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub entries: Vec<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial_success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListLogEntriesRequest {
    pub resource_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListLogEntriesResponse {
    #[serde(default)]
    pub entries: Vec<Value>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TailLogEntriesRequest {
    pub resource_names: Vec<String>,
    pub filter: Option<String>,
    pub buffer_window: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailLogEntriesResponse {
    #[serde(default)]
    pub entries: Vec<Value>,
    #[serde(default)]
    pub suppression_info: Vec<Value>,
}

/// Write, delete, list and tail RPCs of the logging service.
///
/// Retries, timeouts and pagination cursors are the implementation's concern;
/// callers only pass [`CallOptions`] through.
#[async_trait]
pub trait LoggingService: Send + Sync {
    async fn write_log_entries(
        &self,
        request: WriteLogEntriesRequest,
        options: CallOptions,
    ) -> Result<()>;

    async fn delete_log(&self, log_name: &str, options: CallOptions) -> Result<()>;

    async fn list_log_entries(
        &self,
        request: ListLogEntriesRequest,
        options: CallOptions,
    ) -> Result<ListLogEntriesResponse>;

    fn tail_log_entries(
        &self,
        request: TailLogEntriesRequest,
    ) -> BoxStream<'static, Result<TailLogEntriesResponse>>;
}

#[async_trait]
impl<T: LoggingService + ?Sized> LoggingService for std::sync::Arc<T> {
    async fn write_log_entries(
        &self,
        request: WriteLogEntriesRequest,
        options: CallOptions,
    ) -> Result<()> {
        (**self).write_log_entries(request, options).await
    }

    async fn delete_log(&self, log_name: &str, options: CallOptions) -> Result<()> {
        (**self).delete_log(log_name, options).await
    }

    async fn list_log_entries(
        &self,
        request: ListLogEntriesRequest,
        options: CallOptions,
    ) -> Result<ListLogEntriesResponse> {
        (**self).list_log_entries(request, options).await
    }

    fn tail_log_entries(
        &self,
        request: TailLogEntriesRequest,
    ) -> BoxStream<'static, Result<TailLogEntriesResponse>> {
        (**self).tail_log_entries(request)
    }
}
