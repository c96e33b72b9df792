// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! RFC and plan authoring tools.
//!
//! An RFC is a structured requirements document; a plan is its executable
//! decomposition into tasks.  Artifacts are opaque to the rest of the
//! runtime and live under the output root (`rfc/` and `plans/`).  The
//! authoring flow is: `create_rfc` → the model refines it in conversation →
//! `prepare_plan_from_rfc` hands the RFC content back with generation
//! guidance → `save_generated_plan` validates and stores the plan JSON the
//! model produced.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::policy::PathPolicy;
use crate::tool::{InvocationContext, Tool, ToolCall, ToolOutput};

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

pub struct CreateRfcTool {
    policy: Arc<PathPolicy>,
}

impl CreateRfcTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for CreateRfcTool {
    fn name(&self) -> &str {
        "create_rfc"
    }

    fn description(&self) -> &str {
        "Creates a new RFC document with the given title and stores it under \
         the output root. Returns the rfc_id used by prepare_plan_from_rfc."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Short feature title, e.g. 'dark mode'"
                },
                "summary": {
                    "type": "string",
                    "description": "One-paragraph summary of the feature"
                },
                "requirements": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Initial requirement bullet points"
                }
            },
            "required": ["title"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["authoring", "rfc"]
    }

    fn category(&self) -> &str {
        "authoring"
    }

    async fn execute(&self, call: &ToolCall, ctx: &InvocationContext) -> ToolOutput {
        let title = match call.args.get("title").and_then(|v| v.as_str()) {
            Some(t) if !t.trim().is_empty() => t.trim().to_string(),
            _ => return ToolOutput::err(&call.id, "missing required parameter 'title'"),
        };
        let summary = call
            .args
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let requirements: Vec<String> = call
            .args
            .get("requirements")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|r| r.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let rfc_id = format!("RFC-{}", short_id());
        let rel_path = format!("rfc/{rfc_id}.json");
        let path = match self.policy.resolve_write(&rel_path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(rfc_id = %rfc_id, title = %title, "create_rfc tool");

        let doc = json!({
            "rfc_id": rfc_id,
            "title": title,
            "summary": summary,
            "requirements": requirements,
            "status": "draft",
            "author_agent": ctx.agent_id,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("create dir error: {e}"));
            }
        }
        if let Err(e) = tokio::fs::write(&path, doc.to_string()).await {
            return ToolOutput::err(&call.id, format!("write error: {e}"));
        }

        ToolOutput::ok(
            &call.id,
            json!({ "rfc_id": rfc_id, "title": title, "path": rel_path }),
        )
    }
}

pub struct PreparePlanFromRfcTool {
    policy: Arc<PathPolicy>,
}

impl PreparePlanFromRfcTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for PreparePlanFromRfcTool {
    fn name(&self) -> &str {
        "prepare_plan_from_rfc"
    }

    fn description(&self) -> &str {
        "Loads an RFC and returns its content together with plan-generation \
         guidance. Produce the plan JSON in your next step and store it with \
         save_generated_plan."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "rfc_id": {
                    "type": "string",
                    "description": "Id returned by create_rfc, e.g. RFC-1a2b3c4d"
                }
            },
            "required": ["rfc_id"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["authoring", "plan"]
    }

    fn category(&self) -> &str {
        "authoring"
    }

    async fn execute(&self, call: &ToolCall, _ctx: &InvocationContext) -> ToolOutput {
        let rfc_id = match call.args.get("rfc_id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'rfc_id'"),
        };
        let rel_path = format!("rfc/{rfc_id}.json");
        let path = match self.policy.resolve_read(&rel_path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) => {
                let mut ctx_fields = serde_json::Map::new();
                ctx_fields.insert("rfc_id".to_string(), json!(rfc_id));
                return ToolOutput::err_with(
                    &call.id,
                    format!("rfc not found: {e}"),
                    ctx_fields,
                );
            }
        };
        let rfc: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => return ToolOutput::err(&call.id, format!("rfc parse error: {e}")),
        };

        ToolOutput::ok(
            &call.id,
            json!({
                "rfc_id": rfc_id,
                "rfc": rfc,
                "guidance": "Generate a plan JSON object with fields: name (string), \
                             rfc_id (string), tasks (array of {id, description, \
                             depends_on: [task ids], agent: optional agent id}). \
                             Then call save_generated_plan with it.",
            }),
        )
    }
}

pub struct SaveGeneratedPlanTool {
    policy: Arc<PathPolicy>,
}

impl SaveGeneratedPlanTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for SaveGeneratedPlanTool {
    fn name(&self) -> &str {
        "save_generated_plan"
    }

    fn description(&self) -> &str {
        "Validates and stores a generated plan JSON under the output root. \
         The plan must contain a non-empty tasks array."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "plan_name": {
                    "type": "string",
                    "description": "Filename stem for the stored plan"
                },
                "plan": {
                    "type": "object",
                    "description": "The plan object produced from the RFC"
                }
            },
            "required": ["plan_name", "plan"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["authoring", "plan"]
    }

    fn category(&self) -> &str {
        "authoring"
    }

    async fn execute(&self, call: &ToolCall, _ctx: &InvocationContext) -> ToolOutput {
        let plan_name = match call.args.get("plan_name").and_then(|v| v.as_str()) {
            Some(n) if !n.trim().is_empty() => sanitize_name(n),
            _ => return ToolOutput::err(&call.id, "missing required parameter 'plan_name'"),
        };
        let plan = match call.args.get("plan") {
            Some(p) if p.is_object() => p.clone(),
            _ => return ToolOutput::err(&call.id, "schema: plan must be a JSON object"),
        };

        let tasks = match plan.get("tasks").and_then(|t| t.as_array()) {
            Some(t) if !t.is_empty() => t.clone(),
            _ => {
                return ToolOutput::err(
                    &call.id,
                    "schema: plan must contain a non-empty tasks array",
                )
            }
        };
        for (i, task) in tasks.iter().enumerate() {
            if task.get("description").and_then(|d| d.as_str()).is_none() {
                return ToolOutput::err(
                    &call.id,
                    format!("schema: tasks[{i}] is missing a description"),
                );
            }
        }

        let rel_path = format!("plans/{plan_name}.json");
        let path = match self.policy.resolve_write(&rel_path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(plan = %plan_name, tasks = tasks.len(), "save_generated_plan tool");

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("create dir error: {e}"));
            }
        }
        if let Err(e) = tokio::fs::write(&path, plan.to_string()).await {
            return ToolOutput::err(&call.id, format!("write error: {e}"));
        }

        ToolOutput::ok(
            &call.id,
            json!({
                "plan_name": plan_name,
                "path": rel_path,
                "task_count": tasks.len(),
                "plan": plan,
            }),
        )
    }
}

/// Keep plan filenames to a safe character set.
fn sanitize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Arc<PathPolicy>) {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let policy = Arc::new(PathPolicy::new(dir.path(), &out));
        (dir, policy)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "r1".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn create_rfc_writes_document_and_returns_id() {
        let (dir, policy) = setup();
        let tool = CreateRfcTool::new(policy);
        let out = tool
            .execute(
                &call("create_rfc", json!({ "title": "dark mode" })),
                &InvocationContext::new("s", "p"),
            )
            .await;
        assert!(!out.is_error);
        let rfc_id = out.result["rfc_id"].as_str().unwrap();
        assert!(rfc_id.starts_with("RFC-"));
        let stored = dir.path().join("out/rfc").join(format!("{rfc_id}.json"));
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(stored).unwrap()).unwrap();
        assert_eq!(doc["title"], json!("dark mode"));
        assert_eq!(doc["author_agent"], json!("p"));
    }

    #[tokio::test]
    async fn prepare_plan_round_trips_rfc_content() {
        let (_dir, policy) = setup();
        let create = CreateRfcTool::new(policy.clone());
        let created = create
            .execute(
                &call(
                    "create_rfc",
                    json!({ "title": "dark mode", "requirements": ["toggle in settings"] }),
                ),
                &InvocationContext::default(),
            )
            .await;
        let rfc_id = created.result["rfc_id"].as_str().unwrap();

        let prepare = PreparePlanFromRfcTool::new(policy);
        let out = prepare
            .execute(
                &call("prepare_plan_from_rfc", json!({ "rfc_id": rfc_id })),
                &InvocationContext::default(),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(out.result["rfc"]["title"], json!("dark mode"));
        assert!(out.result["guidance"].as_str().unwrap().contains("tasks"));
    }

    #[tokio::test]
    async fn prepare_plan_unknown_rfc_is_error_with_context() {
        let (_dir, policy) = setup();
        let tool = PreparePlanFromRfcTool::new(policy);
        let out = tool
            .execute(
                &call("prepare_plan_from_rfc", json!({ "rfc_id": "RFC-missing0" })),
                &InvocationContext::default(),
            )
            .await;
        assert!(out.is_error);
        assert_eq!(out.result["rfc_id"], json!("RFC-missing0"));
    }

    #[tokio::test]
    async fn save_plan_requires_tasks_array() {
        let (_dir, policy) = setup();
        let tool = SaveGeneratedPlanTool::new(policy);
        let out = tool
            .execute(
                &call(
                    "save_generated_plan",
                    json!({ "plan_name": "p1", "plan": { "name": "p1" } }),
                ),
                &InvocationContext::default(),
            )
            .await;
        assert!(out.is_error);
        assert!(out.error_text().unwrap().starts_with("schema: "));
    }

    #[tokio::test]
    async fn save_plan_stores_and_echoes_plan_object() {
        let (dir, policy) = setup();
        let tool = SaveGeneratedPlanTool::new(policy);
        let plan = json!({
            "name": "dark-mode",
            "tasks": [
                { "id": "t1", "description": "add theme toggle", "depends_on": [] }
            ]
        });
        let out = tool
            .execute(
                &call(
                    "save_generated_plan",
                    json!({ "plan_name": "dark-mode", "plan": plan }),
                ),
                &InvocationContext::default(),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(out.result["task_count"], json!(1));
        assert_eq!(out.result["plan"]["name"], json!("dark-mode"));
        assert!(dir.path().join("out/plans/dark-mode.json").exists());
    }

    #[tokio::test]
    async fn save_plan_sanitizes_hostile_name() {
        let (dir, policy) = setup();
        let tool = SaveGeneratedPlanTool::new(policy);
        let plan = json!({ "tasks": [{ "description": "x" }] });
        let out = tool
            .execute(
                &call(
                    "save_generated_plan",
                    json!({ "plan_name": "a/b c", "plan": plan }),
                ),
                &InvocationContext::default(),
            )
            .await;
        assert!(!out.is_error);
        assert!(dir.path().join("out/plans/a-b-c.json").exists());
    }
}
