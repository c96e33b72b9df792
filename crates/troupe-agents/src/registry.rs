// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Static catalog of agent personas.
//!
//! Five agents ship by default.  Alice is the conversational front door;
//! Patricia turns feature requests into RFCs and plans; Tessa writes test
//! strategies; Debbie diagnoses problems; Eamonn breaks plans into
//! executable work.  Mail addressed to either an id or a friendly name
//! resolves case-insensitively.

use std::collections::HashMap;

use troupe_tools::ToolSelectors;

use crate::descriptor::{AgentDescriptor, ContinuationPolicy, ModelPrefs};

/// Catalog of agent descriptors, frozen after construction.
pub struct AgentRegistry {
    agents: Vec<AgentDescriptor>,
    /// Lowercased id and name → index into `agents`.
    by_alias: HashMap<String, usize>,
    default_id: String,
}

impl AgentRegistry {
    /// Build the standard catalog.
    pub fn standard() -> Self {
        Self::from_descriptors(standard_catalog(), "a")
    }

    pub fn from_descriptors(agents: Vec<AgentDescriptor>, default_id: &str) -> Self {
        let mut by_alias = HashMap::new();
        for (i, agent) in agents.iter().enumerate() {
            by_alias.insert(agent.id.to_ascii_lowercase(), i);
            by_alias.insert(agent.name.to_ascii_lowercase(), i);
        }
        Self {
            agents,
            by_alias,
            default_id: default_id.to_string(),
        }
    }

    /// Resolve an id or friendly name, case-insensitively.
    pub fn resolve(&self, id_or_name: &str) -> Option<&AgentDescriptor> {
        self.by_alias
            .get(&id_or_name.trim().to_ascii_lowercase())
            .map(|&i| &self.agents[i])
    }

    pub fn get(&self, id: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn default_agent(&self) -> &AgentDescriptor {
        self.get(&self.default_id)
            .expect("default agent must exist in the catalog")
    }

    pub fn all(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    /// One line per agent, used to tell each agent who else is available.
    pub fn roster_block(&self) -> String {
        self.agents
            .iter()
            .map(|a| format!("- {} ({}): {}", a.name, a.id, a.role))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn standard_catalog() -> Vec<AgentDescriptor> {
    vec![
        AgentDescriptor {
            id: "a".into(),
            name: "Alice".into(),
            role: "general assistant and conversation entry point".into(),
            prompt_file: "alice".into(),
            tool_selectors: ToolSelectors {
                sets: vec!["readonly".into(), "communication".into(), "monitoring".into()],
                ..Default::default()
            },
            continuation: ContinuationPolicy::default(),
            model_prefs: ModelPrefs::default(),
        },
        AgentDescriptor {
            id: "p".into(),
            name: "Patricia".into(),
            role: "planner; turns feature requests into RFCs and executable plans".into(),
            prompt_file: "patricia".into(),
            tool_selectors: ToolSelectors {
                sets: vec![
                    "readonly".into(),
                    "authoring".into(),
                    "communication".into(),
                ],
                ..Default::default()
            },
            // Plan authoring chains several tools; some backends emit them
            // one per turn, so Patricia uses the conservative explicit-signal
            // mode with the plan pipeline on the auto-continue list.
            continuation: ContinuationPolicy {
                require_explicit_signal: true,
                single_tool_per_step: true,
                auto_continue_tools: vec![
                    "create_rfc".into(),
                    "prepare_plan_from_rfc".into(),
                ],
                ..Default::default()
            },
            model_prefs: ModelPrefs::default(),
        },
        AgentDescriptor {
            id: "t".into(),
            name: "Tessa".into(),
            role: "test specialist; designs verification strategies".into(),
            prompt_file: "tessa".into(),
            tool_selectors: ToolSelectors {
                sets: vec!["readonly".into(), "communication".into()],
                ..Default::default()
            },
            continuation: ContinuationPolicy::default(),
            model_prefs: ModelPrefs::default(),
        },
        AgentDescriptor {
            id: "d".into(),
            name: "Debbie".into(),
            role: "debugger; diagnoses failures and runs health checks".into(),
            prompt_file: "debbie".into(),
            tool_selectors: ToolSelectors {
                sets: vec![
                    "readonly".into(),
                    "communication".into(),
                    "monitoring".into(),
                ],
                ..Default::default()
            },
            continuation: ContinuationPolicy::default(),
            model_prefs: ModelPrefs::default(),
        },
        AgentDescriptor {
            id: "e".into(),
            name: "Eamonn".into(),
            role: "task decomposer; breaks plans into executable work items".into(),
            prompt_file: "eamonn".into(),
            tool_selectors: ToolSelectors {
                sets: vec!["filesystem".into(), "communication".into()],
                deny: vec!["system_health_check".into()],
                ..Default::default()
            },
            continuation: ContinuationPolicy::default(),
            model_prefs: ModelPrefs::default(),
        },
    ]
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
