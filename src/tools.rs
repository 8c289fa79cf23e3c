//! Tool registry and batched dispatcher.
//!
//! Backends tend to emit several tool-call requests for one model turn in
//! quick succession. Incoming calls are therefore queued behind a coalescing
//! window that re-arms on every arrival; when it elapses the whole batch
//! executes concurrently and the results go back to the backend together,
//! followed by a single continue-generation signal.

use crate::{Error, Result};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Default coalescing window for batched tool execution.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(50);

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String>> + Send + 'static>>;

type ToolHandler = dyn Fn(Value) -> ToolFuture + Send + Sync;

/// A callable tool: name, description, JSON-schema parameters, and an
/// optional local handler.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    handler: Option<Arc<ToolHandler>>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    /// A declaration-only tool; its calls must be handled by an external
    /// tool-call callback.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: None,
        }
    }

    /// A tool with a raw-arguments handler.
    #[must_use]
    pub fn with_handler<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Some(Arc::new(move |args| Box::pin(handler(args)))),
        }
    }

    /// A tool whose parameter schema is derived from `TArgs` and whose
    /// handler receives deserialized arguments.
    #[must_use]
    pub fn from_fn<TArgs, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Self
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(TArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let schema = schemars::schema_for!(TArgs);
        let parameters = serde_json::to_value(&schema).unwrap_or(Value::Null);
        let handler = Arc::new(handler);
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Some(Arc::new(move |value| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let args: TArgs = serde_json::from_value(value)
                        .map_err(|e| Error::Tool(format!("bad arguments: {e}")))?;
                    handler(args).await
                })
            })),
        }
    }

    #[must_use]
    pub const fn has_handler(&self) -> bool {
        self.handler.is_some()
    }
}

/// A tool-call request normalized from any wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Opaque identifier assigned by the remote backend.
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Wire-facing declaration advertised during session setup.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Name-keyed tool mapping; the last registration for a name wins.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolSpec>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec: ToolSpec) {
        let mut tools = self
            .tools
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        tools.insert(spec.name.clone(), spec);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolSpec> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    #[must_use]
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let tools = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        let mut decls: Vec<ToolDeclaration> = tools
            .values()
            .map(|spec| ToolDeclaration {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.parameters.clone(),
            })
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// Destination for batch results; implemented by each protocol adapter.
#[async_trait::async_trait]
pub trait ToolResultSink: Send + Sync {
    /// Transmit one tool result in the backend's wire format.
    async fn submit_tool_result(
        &self,
        call_id: &str,
        output: &str,
        is_error: bool,
    ) -> Result<()>;

    /// Ask the backend to resume generation. Sent once per batch; a no-op
    /// for backends that resume on their own.
    async fn continue_generation(&self) -> Result<()>;
}

#[derive(Default)]
struct Batch {
    pending: Vec<ToolInvocation>,
    sink: Option<Arc<dyn ToolResultSink>>,
    timer: Option<JoinHandle<()>>,
}

/// Coalesces rapidly-arriving tool calls into one concurrent execution round.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    window: Duration,
    batch: Mutex<Batch>,
}

impl ToolDispatcher {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, window: Duration) -> Self {
        Self {
            registry,
            window,
            batch: Mutex::new(Batch::default()),
        }
    }

    /// Queue a call. The coalescing timer re-arms on every arrival, so the
    /// batch fires exactly once, `window` after the last arrival.
    pub async fn enqueue(self: Arc<Self>, call: ToolInvocation, sink: Arc<dyn ToolResultSink>) {
        let mut batch = self.batch.lock().await;
        if let Some(timer) = batch.timer.take() {
            timer.abort();
        }
        batch.pending.push(call);
        batch.sink = Some(sink);
        let this = Arc::clone(&self);
        batch.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(this.window).await;
            this.run_batch().await;
        }));
    }

    /// Pending calls waiting for the window to elapse.
    pub async fn pending_len(&self) -> usize {
        self.batch.lock().await.pending.len()
    }

    async fn run_batch(&self) {
        // Steal the batch under the lock; once `timer` is cleared the task
        // can no longer be aborted by a late arrival.
        let (calls, sink) = {
            let mut batch = self.batch.lock().await;
            batch.timer = None;
            (std::mem::take(&mut batch.pending), batch.sink.take())
        };
        let Some(sink) = sink else { return };
        if calls.is_empty() {
            return;
        }

        tracing::debug!(batch_size = calls.len(), "executing tool batch");
        let handles: Vec<JoinHandle<Result<String>>> = calls
            .iter()
            .map(|call| tokio::spawn(execute(Arc::clone(&self.registry), call.clone())))
            .collect();

        let mut results = Vec::with_capacity(calls.len());
        for (call, handle) in calls.iter().zip(handles) {
            let (output, is_error) = match handle.await {
                Ok(Ok(output)) => (output, false),
                Ok(Err(err)) => (format!("error: {err}"), true),
                Err(join_err) if join_err.is_panic() => {
                    tracing::warn!(tool = %call.name, "tool handler panicked");
                    (format!("error: tool '{}' panicked", call.name), true)
                }
                Err(_) => (format!("error: tool '{}' was cancelled", call.name), true),
            };
            results.push((call.call_id.clone(), output, is_error));
        }

        for (call_id, output, is_error) in &results {
            if let Err(err) = sink.submit_tool_result(call_id, output, *is_error).await {
                tracing::warn!(%call_id, error = %err, "failed to submit tool result");
            }
        }
        if let Err(err) = sink.continue_generation().await {
            tracing::warn!(error = %err, "failed to send continue signal");
        }
    }
}

async fn execute(registry: Arc<ToolRegistry>, call: ToolInvocation) -> Result<String> {
    let spec = registry
        .get(&call.name)
        .ok_or_else(|| Error::Tool(format!("unknown tool: {}", call.name)))?;
    let Some(handler) = spec.handler else {
        return Err(Error::Tool(format!(
            "tool '{}' has no local handler",
            call.name
        )));
    };
    handler(call.arguments).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        results: StdMutex<Vec<(String, String, bool)>>,
        continues: StdMutex<u32>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                results: StdMutex::new(Vec::new()),
                continues: StdMutex::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ToolResultSink for RecordingSink {
        async fn submit_tool_result(
            &self,
            call_id: &str,
            output: &str,
            is_error: bool,
        ) -> Result<()> {
            self.results.lock().unwrap().push((
                call_id.to_string(),
                output.to_string(),
                is_error,
            ));
            Ok(())
        }

        async fn continue_generation(&self) -> Result<()> {
            *self.continues.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn invocation(id: &str, name: &str) -> ToolInvocation {
        ToolInvocation {
            call_id: id.to_string(),
            name: name.to_string(),
            arguments: serde_json::json!({}),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tool_yields_error_string_result() {
        let registry = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(ToolDispatcher::new(registry, DEFAULT_COALESCE_WINDOW));
        let sink = RecordingSink::new();

        Arc::clone(&dispatcher).enqueue(invocation("c1", "missing"), sink.clone()).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        let results = sink.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].1.contains("unknown tool"));
        assert!(results[0].2);
        assert_eq!(*sink.continues.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn window_rearms_on_each_arrival() {
        let registry = Arc::new(ToolRegistry::new());
        registry.register(ToolSpec::with_handler(
            "echo",
            "echo",
            serde_json::json!({"type": "object"}),
            |args| async move { Ok(args.to_string()) },
        ));
        let dispatcher = Arc::new(ToolDispatcher::new(
            registry,
            Duration::from_millis(50),
        ));
        let sink = RecordingSink::new();

        Arc::clone(&dispatcher).enqueue(invocation("c1", "echo"), sink.clone()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        Arc::clone(&dispatcher).enqueue(invocation("c2", "echo"), sink.clone()).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        // 60 ms after the first arrival, but only 30 ms after the last: the
        // batch must not have fired yet.
        assert_eq!(sink.results.lock().unwrap().len(), 0);
        assert_eq!(dispatcher.pending_len().await, 2);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sink.results.lock().unwrap().len(), 2);
        assert_eq!(*sink.continues.lock().unwrap(), 1);
    }

    #[test]
    fn registry_last_registration_wins() {
        let registry = ToolRegistry::new();
        registry.register(ToolSpec::new("t", "first", serde_json::json!({})));
        registry.register(ToolSpec::new("t", "second", serde_json::json!({})));
        assert_eq!(registry.get("t").unwrap().description, "second");
        assert_eq!(registry.declarations().len(), 1);
    }
}
