// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod fs;
pub mod health;
pub mod mail;
pub mod rfc;
pub mod search;

use std::sync::Arc;

use troupe_mail::Mailbox;

use crate::policy::PathPolicy;
use crate::registry::{ToolRegistry, ToolSetDef};

/// Register the full built-in tool suite plus the standard named sets.
///
/// Set names are what agent descriptors reference in their selectors:
/// - `readonly`     — filesystem reads and search
/// - `filesystem`   — readonly plus writes
/// - `authoring`    — RFC and plan tools
/// - `communication`— mailbox tools
/// - `monitoring`   — health check
/// - `standard`     — everything above
pub fn register_builtin(
    registry: &ToolRegistry,
    policy: Arc<PathPolicy>,
    mailbox: Arc<Mailbox>,
) -> anyhow::Result<()> {
    registry.register(fs::ReadFileTool::new(policy.clone()))?;
    registry.register(fs::WriteFileTool::new(policy.clone()))?;
    registry.register(fs::ListDirTool::new(policy.clone()))?;
    registry.register(search::SearchWorkspaceTool::new(policy.clone()))?;
    registry.register(health::SystemHealthCheckTool::new())?;
    registry.register(rfc::CreateRfcTool::new(policy.clone()))?;
    registry.register(rfc::PreparePlanFromRfcTool::new(policy.clone()))?;
    registry.register(rfc::SaveGeneratedPlanTool::new(policy))?;
    registry.register(mail::SendMailTool::new(mailbox.clone()))?;
    registry.register(mail::CheckMailTool::new(mailbox.clone()))?;
    registry.register(mail::ReplyMailTool::new(mailbox.clone()))?;
    registry.register(mail::ArchiveMailTool::new(mailbox))?;

    registry.register_set(
        "readonly",
        ToolSetDef {
            tools: vec![
                "read_file".into(),
                "list_dir".into(),
                "search_workspace".into(),
            ],
            ..Default::default()
        },
    );
    registry.register_set(
        "filesystem",
        ToolSetDef {
            includes: vec!["readonly".into()],
            tools: vec!["write_file".into()],
            ..Default::default()
        },
    );
    registry.register_set(
        "authoring",
        ToolSetDef {
            tools: vec![
                "create_rfc".into(),
                "prepare_plan_from_rfc".into(),
                "save_generated_plan".into(),
            ],
            ..Default::default()
        },
    );
    registry.register_set(
        "communication",
        ToolSetDef {
            extends_tags: vec!["mail".into()],
            ..Default::default()
        },
    );
    registry.register_set(
        "monitoring",
        ToolSetDef {
            tools: vec!["system_health_check".into()],
            ..Default::default()
        },
    );
    registry.register_set(
        "standard",
        ToolSetDef {
            includes: vec![
                "filesystem".into(),
                "authoring".into(),
                "communication".into(),
                "monitoring".into(),
            ],
            ..Default::default()
        },
    );

    registry.validate_sets()
}
