//! Invocation dispatch.
//!
//! Every C entry into a plugin runs on one dedicated worker thread, the
//! work queue, shared by all plugins. Async callers suspend on a oneshot
//! until their job completes. Cancellation cannot cross the ABI: a timeout
//! resolves the caller with [`PluginError::Timeout`] while the native call
//! runs to completion and its result is discarded.

use std::collections::HashMap;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{PluginError, PluginResult};
use crate::loader::LoadedPlugin;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// The serial work queue plugin calls execute on.
///
/// One OS thread, runs jobs in submission order at an interactive priority
/// (callers are usually user-initiated requests waiting on the result).
#[derive(Clone)]
pub struct WorkQueue {
    jobs: Sender<Job>,
}

impl WorkQueue {
    /// Start the worker thread.
    #[must_use]
    pub fn new() -> Self {
        let (jobs, incoming) = mpsc::channel::<Job>();
        // The thread exits when every queue handle is dropped.
        let _ = std::thread::Builder::new()
            .name("osaurus-plugin-work".into())
            .spawn(move || {
                while let Ok(job) = incoming.recv() {
                    // A panicking job must not take the queue down with it.
                    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
                }
            });
        Self { jobs }
    }

    /// Submit a job. Returns `false` if the worker has shut down.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.jobs.send(Box::new(job)).is_ok()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue").finish_non_exhaustive()
    }
}

/// Host-injected additions to a tool payload.
///
/// Both keys are reserved: plugins must not rely on callers providing them.
#[derive(Debug, Clone, Default)]
pub struct InvokeInjection {
    /// The plugin's configured secrets; injected as `_secrets` only when
    /// non-empty.
    pub secrets: HashMap<String, String>,
    /// Active working directory; injected as
    /// `_context: {"working_directory": ...}` only when set.
    pub working_directory: Option<String>,
}

/// Augment a caller payload with the host-injected keys.
pub(crate) fn inject_payload(mut payload: JsonValue, injection: &InvokeInjection) -> JsonValue {
    let Some(object) = payload.as_object_mut() else {
        return payload;
    };
    if !injection.secrets.is_empty() {
        object.insert(
            "_secrets".into(),
            serde_json::to_value(&injection.secrets).unwrap_or(JsonValue::Null),
        );
    }
    if let Some(working_directory) = &injection.working_directory {
        object.insert(
            "_context".into(),
            serde_json::json!({ "working_directory": working_directory }),
        );
    }
    payload
}

/// Dispatches plugin calls onto the work queue with an optional timeout.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: WorkQueue,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher over a fresh work queue.
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            queue: WorkQueue::new(),
            timeout,
        }
    }

    /// The underlying work queue, for fire-and-forget submissions.
    #[must_use]
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Run `f` on the work queue and await its result.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Timeout`] if the configured timeout elapses
    /// first (the job still runs), or [`PluginError::DispatchUnavailable`]
    /// if the queue has shut down.
    pub async fn run<T: Send + 'static>(
        &self,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> PluginResult<T> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        if !self.queue.submit(move || {
            let _ = reply_tx.send(f());
        }) {
            return Err(PluginError::DispatchUnavailable);
        }

        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reply_rx).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(PluginError::DispatchUnavailable),
                Err(_) => {
                    debug!(?timeout, "plugin call timed out; result will be discarded");
                    Err(PluginError::Timeout(timeout))
                }
            },
            None => reply_rx.await.map_err(|_| PluginError::DispatchUnavailable),
        }
    }

    /// Invoke a plugin capability and return its response JSON.
    ///
    /// The payload is the caller's JSON object augmented with `_secrets`
    /// and `_context` per [`InvokeInjection`].
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::PluginReturnedNull`] for a NULL response,
    /// distinct from a handler error, which comes back as the plugin's own
    /// `{"error": ...}` payload.
    pub async fn invoke(
        &self,
        plugin: &Arc<LoadedPlugin>,
        kind: &str,
        id: &str,
        payload: JsonValue,
        injection: &InvokeInjection,
    ) -> PluginResult<String> {
        let payload_json = inject_payload(payload, injection).to_string();
        let plugin = Arc::clone(plugin);
        let kind = kind.to_owned();
        let id = id.to_owned();

        let response = self
            .run(move || plugin.invoke_raw(&kind, &id, &payload_json))
            .await??;
        response.ok_or(PluginError::PluginReturnedNull)
    }

    /// Deliver an HTTP request to the plugin's route handler.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::RouteHandlerNotAvailable`] for plugins without
    /// one, [`PluginError::PluginReturnedNull`] for a NULL response, or
    /// [`PluginError::Timeout`].
    pub async fn handle_route(
        &self,
        plugin: &Arc<LoadedPlugin>,
        request_json: String,
    ) -> PluginResult<String> {
        if !plugin.supports_routes() {
            return Err(PluginError::RouteHandlerNotAvailable);
        }
        let plugin = Arc::clone(plugin);

        let response = self
            .run(move || plugin.handle_route_raw(&request_json))
            .await??;
        response.ok_or(PluginError::PluginReturnedNull)
    }

    /// Fire a config-change notification at the plugin, without waiting.
    pub fn notify_config_changed(
        &self,
        plugin: &Arc<LoadedPlugin>,
        key: &str,
        value: Option<&str>,
    ) {
        let plugin = Arc::clone(plugin);
        let key = key.to_owned();
        let value = value.map(ToOwned::to_owned);
        let _ = self.queue.submit(move || {
            plugin.notify_config_changed(&key, value.as_deref());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_run_returns_job_result() {
        let dispatcher = Dispatcher::new(None);
        let value = dispatcher.run(|| 41 + 1).await.unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let dispatcher = Dispatcher::new(None);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut futures = Vec::new();
        for i in 0..10 {
            let order = Arc::clone(&order);
            futures.push(dispatcher.run(move || order.lock().unwrap().push(i)));
        }
        for future in futures {
            future.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_timeout_resolves_caller_but_job_completes() {
        let dispatcher = Dispatcher::new(Some(Duration::from_millis(20)));
        let completed = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&completed);
        let result = dispatcher
            .run(move || {
                std::thread::sleep(Duration::from_millis(120));
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(matches!(result, Err(PluginError::Timeout(_))));

        // The abandoned call still runs to completion on the queue.
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        // And the queue keeps serving later callers.
        let value = dispatcher.run(|| 7).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_injection_adds_reserved_keys() {
        let injection = InvokeInjection {
            secrets: HashMap::from([("api_key".to_string(), "sk".to_string())]),
            working_directory: Some("/work".into()),
        };

        let payload = inject_payload(json!({"city": "Osaka"}), &injection);
        assert_eq!(payload["city"], "Osaka");
        assert_eq!(payload["_secrets"]["api_key"], "sk");
        assert_eq!(payload["_context"]["working_directory"], "/work");
    }

    #[test]
    fn test_injection_is_conditional() {
        let injection = InvokeInjection::default();
        let payload = inject_payload(json!({"k": 1}), &injection);
        assert!(payload.get("_secrets").is_none());
        assert!(payload.get("_context").is_none());

        // Non-object payloads pass through untouched.
        let payload = inject_payload(json!([1, 2]), &injection);
        assert_eq!(payload, json!([1, 2]));
    }
}
