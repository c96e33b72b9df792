// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::client::McpClient;
use crate::error::McpError;

type ClientFactory = Box<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<McpClient, McpError>> + Send>> + Send + Sync,
>;

/// Wraps an [`McpClient`] with exponential-backoff retry: on a transient
/// request failure the connection is rebuilt from the factory and the call
/// is retried.  Non-transient errors (remote errors, protocol violations)
/// return immediately.
pub struct ReconnectingClient {
    factory: ClientFactory,
    client: tokio::sync::Mutex<Option<Arc<McpClient>>>,
    max_retries: u32,
    base_delay: Duration,
}

impl ReconnectingClient {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<McpClient, McpError>> + Send + 'static,
    {
        Self {
            factory: Box::new(move || Box::pin(factory())),
            client: tokio::sync::Mutex::new(None),
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_policy(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    async fn current_client(&self) -> Result<Arc<McpClient>, McpError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            if client.is_alive() {
                return Ok(client.clone());
            }
        }
        debug!("building fresh mcp client");
        let client = Arc::new((self.factory)().await?);
        client.initialize().await?;
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn drop_client(&self) {
        if let Some(client) = self.client.lock().await.take() {
            client.close().await;
        }
    }

    /// Call a tool with retry.  Backoff doubles per attempt starting at the
    /// base delay.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, McpError> {
        self.with_retries(|client| {
            let args = args.clone();
            let name = name.to_string();
            async move { client.call_tool(&name, args).await }
        })
        .await
    }

    /// List tools with the same retry policy.
    pub async fn list_tools(&self) -> Result<Vec<crate::client::McpToolDef>, McpError> {
        self.with_retries(|client| async move { client.list_tools().await })
            .await
    }

    async fn with_retries<T, F, Fut>(&self, op: F) -> Result<T, McpError>
    where
        F: Fn(Arc<McpClient>) -> Fut,
        Fut: Future<Output = Result<T, McpError>>,
    {
        let mut delay = self.base_delay;
        let mut last_err = McpError::Closed;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, ?delay, "mcp retry after transient failure");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            let client = match self.current_client().await {
                Ok(c) => c,
                Err(e) if e.is_transient() => {
                    last_err = e;
                    continue;
                }
                Err(e) => return Err(e),
            };
            match op(client).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    self.drop_client().await;
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::transport::McpTransport;

    /// Transport that fails transiently for the first N constructions.
    struct FlakyTransport {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl McpTransport for FlakyTransport {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, McpError> {
            if self.fail {
                return Err(McpError::Closed);
            }
            match method {
                "initialize" => Ok(json!({ "capabilities": { "tools": {} } })),
                "tools/call" => Ok(json!({ "content": [
                    { "type": "text", "text": "ok" }
                ]})),
                _ => Ok(json!({})),
            }
        }
        async fn notify(&self, _m: &str, _p: Value) -> Result<(), McpError> {
            Ok(())
        }
        async fn close(&self) {}
        fn is_alive(&self) -> bool {
            !self.fail
        }
        fn notifications(
            &self,
        ) -> Option<tokio::sync::mpsc::UnboundedReceiver<(String, Value)>> {
            None
        }
    }

    fn flaky_factory(
        failures_before_success: usize,
    ) -> (
        impl Fn() -> Pin<Box<dyn Future<Output = Result<McpClient, McpError>> + Send>>
            + Send
            + Sync
            + 'static,
        Arc<AtomicUsize>,
    ) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let factory = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let fail = n < failures_before_success;
            Box::pin(async move {
                Ok(McpClient::new("flaky", Box::new(FlakyTransport { fail })))
            })
                as Pin<Box<dyn Future<Output = Result<McpClient, McpError>> + Send>>
        };
        (factory, attempts)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let (factory, attempts) = flaky_factory(2);
        let client =
            ReconnectingClient::new(factory).with_policy(3, Duration::from_millis(1));
        let result = client.call_tool("alpha", json!({})).await.unwrap();
        assert_eq!(result["success"], json!(true));
        assert!(attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_transient_error() {
        let (factory, _) = flaky_factory(100);
        let client =
            ReconnectingClient::new(factory).with_policy(2, Duration::from_millis(1));
        let result = client.call_tool("alpha", json!({})).await;
        assert!(matches!(result, Err(e) if e.is_transient()));
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        struct RemoteErrTransport;
        #[async_trait::async_trait]
        impl McpTransport for RemoteErrTransport {
            async fn request(&self, method: &str, _p: Value) -> Result<Value, McpError> {
                if method == "initialize" {
                    return Ok(json!({ "capabilities": {} }));
                }
                Err(McpError::Remote {
                    code: -32601,
                    message: "nope".into(),
                })
            }
            async fn notify(&self, _m: &str, _p: Value) -> Result<(), McpError> {
                Ok(())
            }
            async fn close(&self) {}
            fn is_alive(&self) -> bool {
                true
            }
            fn notifications(
                &self,
            ) -> Option<tokio::sync::mpsc::UnboundedReceiver<(String, Value)>> {
                None
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let client = ReconnectingClient::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(McpClient::new("r", Box::new(RemoteErrTransport))) }
        })
        .with_policy(3, Duration::from_millis(1));

        let result = client.call_tool("alpha", json!({})).await;
        assert!(matches!(result, Err(McpError::Remote { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
