// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod backend;
pub mod mock;
pub mod openai;
pub mod types;

pub use backend::{LLMBackend, ResponseStream};
pub use mock::{MockBackend, ScriptedBackend};
pub use openai::OpenAiCompatBackend;
pub use types::{
    CompletionRequest, Message, ResponseEvent, Role, ToolCallRecord, ToolSchema, Usage,
};

use std::sync::Arc;

use anyhow::bail;
use troupe_config::BackendConfig;

/// Construct a backend from config.
///
/// The API key is resolved from the environment variable named by
/// `api_key_env` at construction time; the value itself is never logged.
pub fn from_config(cfg: &BackendConfig) -> anyhow::Result<Arc<dyn LLMBackend>> {
    match cfg.kind.as_str() {
        "openai" => {
            let api_key = cfg
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok());
            Ok(Arc::new(OpenAiCompatBackend::new(
                cfg.model.clone(),
                api_key,
                cfg.base_url
                    .as_deref()
                    .unwrap_or("https://api.openai.com/v1"),
                cfg.max_tokens,
                cfg.temperature,
            )))
        }
        "mock" => Ok(Arc::new(MockBackend)),
        other => bail!("unknown backend kind: {other}"),
    }
}
