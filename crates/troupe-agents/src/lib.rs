// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod descriptor;
pub mod prompts;
pub mod registry;

pub use descriptor::{AgentDescriptor, ContinuationPolicy, ModelPrefs};
pub use prompts::PromptLoader;
pub use registry::AgentRegistry;
