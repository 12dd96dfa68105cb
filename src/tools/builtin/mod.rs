// src/tools/builtin/mod.rs
// Embedded manifest of builtin tool domains. Each module exports the tools
// of one domain; discovery walks this manifest at startup.

pub mod diagnostics;
pub mod memory;
pub mod session;

use std::sync::Arc;

use super::Tool;

/// The discovery manifest: (domain name, tools)
pub fn manifest() -> Vec<(&'static str, Vec<Arc<dyn Tool>>)> {
    vec![
        ("memory", memory::tools()),
        ("session", session::tools()),
        ("diagnostics", diagnostics::tools()),
    ]
}
