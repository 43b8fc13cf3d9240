//! Completion-handler style for the async operations.
//!
//! Every operation is a plain `async fn` returning a [`Result`]. Callers that
//! prefer to be called back wrap the future with [`with_callback`].

use std::future::Future;
use std::sync::Arc;

use crate::error::Result;

/// Observes the outcome of a write or delete that nobody awaits directly.
pub type CompletionHandler = Arc<dyn Fn(&Result<()>) + Send + Sync>;

/// Runs `operation` to completion and hands its outcome to `callback`.
pub async fn with_callback<T, Fut, F>(operation: Fut, callback: F)
where
    Fut: Future<Output = Result<T>>,
    F: FnOnce(Result<T>),
{
    callback(operation.await)
}

/// Routes a detached outcome to `handler`, or reports a failure nobody will
/// otherwise see.
pub(crate) fn complete(result: Result<()>, handler: Option<&CompletionHandler>, operation: &str) {
    match (handler, result) {
        (Some(handler), result) => handler(&result),
        (None, Err(err)) => tracing::error!("Unhandled {operation} failure: {err}"),
        (None, Ok(())) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoggingError;
    use std::sync::Mutex;

    #[tokio::test]
    async fn callback_receives_outcome() {
        let seen = Mutex::new(None);
        with_callback(async { Ok::<_, LoggingError>(7) }, |res| {
            *seen.lock().unwrap() = Some(res.unwrap());
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), Some(7));
    }

    #[test]
    fn complete_prefers_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let handler: CompletionHandler = Arc::new(move |res: &Result<()>| {
            recorded.lock().unwrap().push(res.is_ok());
        });

        complete(Ok(()), Some(&handler), "write");
        complete(Err(LoggingError::Unsupported("x")), Some(&handler), "write");
        complete(Err(LoggingError::Unsupported("x")), None, "write");

        assert_eq!(*calls.lock().unwrap(), vec![true, false]);
    }
}
