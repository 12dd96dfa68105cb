// src/session/render.rs
// ASCII renderers for the session fork tree

use super::tree::SessionTreeNode;

const MAX_TITLE: usize = 40;

/// Decorations appended after each node title
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub show_messages: bool,
    pub show_cost: bool,
    pub show_time: bool,
}

impl RenderOptions {
    pub fn full() -> Self {
        Self {
            show_messages: true,
            show_cost: true,
            show_time: true,
        }
    }
}

/// Connector-style tree:
/// ```text
/// session-a (current)
/// ├── session-b
/// │   └── session-d
/// └── session-c
/// ```
pub fn render_tree(roots: &[SessionTreeNode], options: RenderOptions) -> String {
    let mut out = String::new();
    for root in roots {
        out.push_str(&format!("{}\n", node_label(root, options)));
        for child in &root.children {
            render_tree_node(child, "", &mut out, options);
        }
    }
    out
}

fn render_tree_node(
    node: &SessionTreeNode,
    prefix: &str,
    out: &mut String,
    options: RenderOptions,
) {
    let connector = if node.is_last { "└── " } else { "├── " };
    out.push_str(&format!("{prefix}{connector}{}\n", node_label(node, options)));

    let child_prefix = format!("{prefix}{}", if node.is_last { "    " } else { "│   " });
    for child in &node.children {
        render_tree_node(child, &child_prefix, out, options);
    }
}

/// Plain indentation, two spaces per depth level
pub fn render_indented(roots: &[SessionTreeNode], options: RenderOptions) -> String {
    let mut out = String::new();
    for root in roots {
        render_indented_node(root, &mut out, options);
    }
    out
}

fn render_indented_node(node: &SessionTreeNode, out: &mut String, options: RenderOptions) {
    out.push_str(&format!(
        "{}{}\n",
        "  ".repeat(node.depth),
        node_label(node, options)
    ));
    for child in &node.children {
        render_indented_node(child, out, options);
    }
}

/// Tree wrapped in a box frame, for terminal summaries
pub fn render_boxed(roots: &[SessionTreeNode], title: &str, options: RenderOptions) -> String {
    let body = render_tree(roots, options);
    let lines: Vec<&str> = body.lines().collect();
    let width = lines
        .iter()
        .map(|l| l.chars().count())
        .chain(std::iter::once(title.chars().count()))
        .max()
        .unwrap_or(0)
        .max(20);

    let mut out = String::new();
    out.push_str(&format!("┌─{}─┐\n", "─".repeat(width)));
    out.push_str(&format!("│ {title:<width$} │\n"));
    out.push_str(&format!("├─{}─┤\n", "─".repeat(width)));
    for line in lines {
        let pad = width - line.chars().count();
        out.push_str(&format!("│ {line}{} │\n", " ".repeat(pad)));
    }
    out.push_str(&format!("└─{}─┘\n", "─".repeat(width)));
    out
}

fn node_label(node: &SessionTreeNode, options: RenderOptions) -> String {
    let mut label = truncate_title(&node.title);
    if node.is_current {
        label.push_str(" ●");
    }
    if node.shared {
        label.push_str(" [shared]");
    }

    let mut decorations = Vec::new();
    if options.show_messages {
        decorations.push(format!("{} msgs", node.message_count));
    }
    if options.show_cost {
        decorations.push(format!("${:.2}", node.cost));
    }
    if options.show_time {
        decorations.push(node.time.updated.format("%Y-%m-%d %H:%M").to_string());
    }
    if !decorations.is_empty() {
        label.push_str(&format!(" ({})", decorations.join(", ")));
    }
    label
}

fn truncate_title(title: &str) -> String {
    if title.chars().count() <= MAX_TITLE {
        title.to_string()
    } else {
        let truncated: String = title.chars().take(MAX_TITLE - 1).collect();
        format!("{truncated}…")
    }
}
