// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::client::McpClient;
use crate::error::McpError;

/// Identity of a pooled connection: transport type plus endpoint plus
/// command arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub transport: String,
    pub endpoint: String,
    pub args: Vec<String>,
}

impl PoolKey {
    pub fn stdio(command: &str, args: &[String]) -> Self {
        Self {
            transport: "stdio".into(),
            endpoint: command.into(),
            args: args.to_vec(),
        }
    }

    pub fn url(transport: &str, url: &str) -> Self {
        Self {
            transport: transport.into(),
            endpoint: url.into(),
            args: Vec::new(),
        }
    }
}

/// Shared client pool: returns a live client for a key or builds one via
/// the supplied factory.  Dead clients are evicted on get.
#[derive(Default)]
pub struct ConnectionPool {
    clients: tokio::sync::Mutex<HashMap<PoolKey, Arc<McpClient>>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a healthy client or create one.  The factory result is
    /// initialized before being cached.
    pub async fn get_or_connect<F, Fut>(
        &self,
        key: PoolKey,
        factory: F,
    ) -> Result<Arc<McpClient>, McpError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<McpClient, McpError>>,
    {
        let mut clients = self.clients.lock().await;
        if let Some(existing) = clients.get(&key) {
            if existing.is_alive() {
                return Ok(existing.clone());
            }
            debug!(?key, "evicting dead pooled client");
            clients.remove(&key);
        }
        let client = Arc::new(factory().await?);
        client.initialize().await?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    pub async fn remove(&self, key: &PoolKey) -> Option<Arc<McpClient>> {
        self.clients.lock().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every pooled client.  Spawned subprocesses are terminated by
    /// their transports.
    pub async fn shutdown(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().collect();
        for (_, client) in clients {
            client.close().await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
