// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail};
use tracing::warn;

use crate::tool::{InvocationContext, Tool, ToolCall, ToolOutput};
use crate::validate::validate_args;

/// A tool schema — kept here so the tools crate stays independent from the
/// model crate; the backend layer maps this into its wire shape.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Per-agent tool filters, applied as a cascade by
/// [`ToolRegistry::resolve_for`].
#[derive(Debug, Clone, Default)]
pub struct ToolSelectors {
    /// Named sets (expanded transitively).
    pub sets: Vec<String>,
    /// Tools whose tags intersect this list are included.
    pub tags: Vec<String>,
    /// When non-empty, the result is intersected with these names.
    pub allow: Vec<String>,
    /// Always removed, last.
    pub deny: Vec<String>,
}

/// Declarative tool grouping.  Sets may include other sets; cycles are a
/// startup error caught by [`ToolRegistry::validate_sets`].
#[derive(Debug, Clone, Default)]
pub struct ToolSetDef {
    pub includes: Vec<String>,
    pub tools: Vec<String>,
    /// Tools carrying any of these tags are pulled into the set.
    pub extends_tags: Vec<String>,
}

#[derive(Default)]
struct Inner {
    tools: HashMap<String, Arc<dyn Tool>>,
    sets: HashMap<String, ToolSetDef>,
}

/// Central registry holding all available tools.
///
/// Process-wide and constructed once at startup; MCP-imported tools are
/// added and removed dynamically, so the maps sit behind a `RwLock` —
/// reads are concurrent, registration is exclusive.
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a tool.  A duplicate name is rejected: the registry is left
    /// unchanged, a warning is logged, and an error is returned.
    pub fn register(&self, tool: impl Tool + 'static) -> anyhow::Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) -> anyhow::Result<()> {
        let name = tool.name().to_string();
        let mut inner = self.inner.write().unwrap();
        if inner.tools.contains_key(&name) {
            warn!(tool = %name, "duplicate tool registration rejected");
            bail!("tool '{name}' is already registered");
        }
        inner.tools.insert(name, tool);
        Ok(())
    }

    /// Remove a tool (used when an MCP server unregisters).
    pub fn unregister(&self, name: &str) -> bool {
        self.inner.write().unwrap().tools.remove(name).is_some()
    }

    /// Remove every tool whose name starts with `prefix`.  Returns the
    /// number removed.  Used to drop all imports from one MCP server.
    pub fn unregister_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.write().unwrap();
        let doomed: Vec<String> = inner
            .tools
            .keys()
            .filter(|n| n.starts_with(prefix))
            .cloned()
            .collect();
        for name in &doomed {
            inner.tools.remove(name);
        }
        doomed.len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.inner.read().unwrap().tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().unwrap().tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Define a named set.  Redefinition replaces the previous definition.
    pub fn register_set(&self, name: impl Into<String>, def: ToolSetDef) {
        self.inner.write().unwrap().sets.insert(name.into(), def);
    }

    /// Expand every registered set, failing on the first cyclic include.
    /// Called once at startup; a cycle is fatal.
    pub fn validate_sets(&self) -> anyhow::Result<()> {
        let inner = self.inner.read().unwrap();
        for name in inner.sets.keys() {
            expand_set(&inner, name, &mut Vec::new())?;
        }
        Ok(())
    }

    /// Apply the selector cascade:
    /// (a) union of tools from `selectors.sets` after transitive expansion,
    /// (b) union with tools whose tags intersect `selectors.tags`,
    /// (c) if `allow` is non-empty, intersect with it,
    /// (d) subtract `deny`.
    /// Deny beats allow beats sets/tags.
    pub fn resolve_for(&self, selectors: &ToolSelectors) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        let inner = self.inner.read().unwrap();
        let mut selected: HashSet<String> = HashSet::new();

        for set_name in &selectors.sets {
            if !inner.sets.contains_key(set_name) {
                warn!(set = %set_name, "unknown tool set in selectors");
                continue;
            }
            selected.extend(expand_set(&inner, set_name, &mut Vec::new())?);
        }

        if !selectors.tags.is_empty() {
            for (name, tool) in &inner.tools {
                if tool
                    .tags()
                    .iter()
                    .any(|t| selectors.tags.iter().any(|s| s == t))
                {
                    selected.insert(name.clone());
                }
            }
        }

        if !selectors.allow.is_empty() {
            selected.retain(|name| selectors.allow.iter().any(|a| a == name));
        }

        for denied in &selectors.deny {
            selected.remove(denied);
        }

        let mut tools: Vec<Arc<dyn Tool>> = selected
            .into_iter()
            .filter_map(|name| inner.tools.get(&name).cloned())
            .collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(tools)
    }

    /// Schemas for the tools a selector set admits, sorted by name.
    pub fn definitions_for(&self, selectors: &ToolSelectors) -> anyhow::Result<Vec<ToolSchema>> {
        Ok(self
            .resolve_for(selectors)?
            .iter()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect())
    }

    /// Schemas for ALL registered tools, sorted by name.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let inner = self.inner.read().unwrap();
        let mut schemas: Vec<ToolSchema> = inner
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Validate arguments and execute a tool call.
    ///
    /// - Unknown tool → error result, no execution.
    /// - Arguments failing the parameter schema → `schema: …` error result,
    ///   no execution.
    /// - A panic inside the tool is caught and converted to an
    ///   `internal: …` error result.
    pub async fn invoke(&self, call: &ToolCall, ctx: &InvocationContext) -> ToolOutput {
        let tool = match self.get(&call.name) {
            Some(t) => t,
            None => {
                return ToolOutput::err(&call.id, format!("unknown tool: {}", call.name));
            }
        };

        if let Err(detail) = validate_args(&call.args, &tool.parameters_schema()) {
            return ToolOutput::err(&call.id, format!("schema: {detail}"));
        }

        // Run the tool in its own task so a panic is isolated to the call
        // rather than unwinding through the turn loop.
        let owned_call = call.clone();
        let owned_ctx = ctx.clone();
        let handle =
            tokio::spawn(async move { tool.execute(&owned_call, &owned_ctx).await });
        match handle.await {
            Ok(output) => output,
            Err(e) => ToolOutput::err(&call.id, format!("internal: tool panicked: {e}")),
        }
    }
}

/// Depth-first transitive expansion with cycle detection.
/// `stack` holds the in-progress chain; revisiting a member is a cycle.
fn expand_set(
    inner: &Inner,
    name: &str,
    stack: &mut Vec<String>,
) -> anyhow::Result<HashSet<String>> {
    if stack.iter().any(|s| s == name) {
        stack.push(name.to_string());
        return Err(anyhow!("cyclic tool set reference: {}", stack.join(" -> ")));
    }
    let def = match inner.sets.get(name) {
        Some(d) => d,
        None => return Ok(HashSet::new()),
    };

    stack.push(name.to_string());
    let mut out: HashSet<String> = def.tools.iter().cloned().collect();
    for tag in &def.extends_tags {
        for (tool_name, tool) in &inner.tools {
            if tool.tags().contains(&tag.as_str()) {
                out.insert(tool_name.clone());
            }
        }
    }
    for include in &def.includes {
        out.extend(expand_set(inner, include, stack)?);
    }
    stack.pop();
    Ok(out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
