// src/tools/registry.rs
// Auto-discovery and registration of tools across domains

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{info, warn};

use super::{Tool, ToolDefinition};

/// Outcome of a discovery pass
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub domains: Vec<String>,
    pub tools_found: usize,
    pub tools_registered: usize,
    pub tools_failed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Aggregate registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatistics {
    pub total_tools: usize,
    pub domains: BTreeMap<String, usize>,
}

/// Registry of all locally registered tools, keyed by unique name
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    domains: RwLock<BTreeMap<String, Vec<String>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            domains: RwLock::new(BTreeMap::new()),
        }
    }

    /// Walk the embedded manifest of builtin domain modules and register
    /// everything they export. Name conflicts are recorded as errors and the
    /// first-registered tool stays in place.
    pub fn discover(&self) -> DiscoveryReport {
        let started = Instant::now();
        let mut report = DiscoveryReport {
            domains: Vec::new(),
            tools_found: 0,
            tools_registered: 0,
            tools_failed: 0,
            errors: Vec::new(),
            duration_ms: 0,
        };

        for (domain, tools) in super::builtin::manifest() {
            report.domains.push(domain.to_string());
            for tool in tools {
                report.tools_found += 1;
                match self.register(tool) {
                    Ok(()) => report.tools_registered += 1,
                    Err(message) => {
                        report.tools_failed += 1;
                        report.errors.push(message);
                    }
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "[Registry] Discovered {} tools across {} domains ({} failed) in {}ms",
            report.tools_registered,
            report.domains.len(),
            report.tools_failed,
            report.duration_ms
        );
        report
    }

    /// Register one tool; errors on a name conflict
    pub fn register(&self, tool: Arc<dyn Tool>) -> std::result::Result<(), String> {
        let definition = tool.definition().clone();
        let mut tools = self.tools.write().unwrap();
        if tools.contains_key(&definition.name) {
            let message = format!(
                "tool name conflict: '{}' already registered, keeping the first",
                definition.name
            );
            warn!("[Registry] {}", message);
            return Err(message);
        }

        tools.insert(definition.name.clone(), tool);
        self.domains
            .write()
            .unwrap()
            .entry(definition.domain.clone())
            .or_default()
            .push(definition.name);
        Ok(())
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().unwrap().get(name).cloned()
    }

    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .read()
            .unwrap()
            .values()
            .map(|tool| tool.definition().clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn get_tool_definitions_by_domains(&self, domains: &[String]) -> Vec<ToolDefinition> {
        self.get_tool_definitions()
            .into_iter()
            .filter(|definition| domains.contains(&definition.domain))
            .collect()
    }

    pub fn get_available_domains(&self) -> Vec<String> {
        self.domains.read().unwrap().keys().cloned().collect()
    }

    pub fn get_statistics(&self) -> RegistryStatistics {
        let domains = self
            .domains
            .read()
            .unwrap()
            .iter()
            .map(|(domain, tools)| (domain.clone(), tools.len()))
            .collect();
        RegistryStatistics {
            total_tools: self.tools.read().unwrap().len(),
            domains,
        }
    }

    pub fn count(&self) -> usize {
        self.tools.read().unwrap().len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
