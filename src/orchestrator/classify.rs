// src/orchestrator/classify.rs
// Objective classification and complexity estimation

use serde::{Deserialize, Serialize};

/// Coarse objective types, decided by keyword counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveType {
    Widget,
    Flow,
    App,
    Integration,
    Generic,
}

impl ObjectiveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveType::Widget => "widget",
            ObjectiveType::Flow => "flow",
            ObjectiveType::App => "app",
            ObjectiveType::Integration => "integration",
            ObjectiveType::Generic => "generic",
        }
    }
}

const WIDGET_KEYWORDS: &[&str] = &["widget", "dashboard", "chart", "portal", "ui", "display", "card"];
const FLOW_KEYWORDS: &[&str] = &["flow", "workflow", "approval", "trigger", "automation", "notify", "pipeline"];
const APP_KEYWORDS: &[&str] = &["app", "application", "scoped", "module", "table", "form"];
const INTEGRATION_KEYWORDS: &[&str] = &["integration", "rest", "api", "webhook", "import", "export", "sync", "connect"];

/// Count keyword hits per type and pick the strongest; ties and zero hits
/// fall back to `Generic`.
pub fn classify_objective(objective: &str) -> ObjectiveType {
    let lowered = objective.to_lowercase();
    let count = |keywords: &[&str]| -> usize {
        keywords.iter().filter(|k| lowered.contains(*k)).count()
    };

    let scores = [
        (ObjectiveType::Widget, count(WIDGET_KEYWORDS)),
        (ObjectiveType::Flow, count(FLOW_KEYWORDS)),
        (ObjectiveType::App, count(APP_KEYWORDS)),
        (ObjectiveType::Integration, count(INTEGRATION_KEYWORDS)),
    ];

    let best = scores.iter().max_by_key(|(_, count)| *count).unwrap();
    if best.1 == 0 {
        return ObjectiveType::Generic;
    }
    let tied = scores.iter().filter(|(_, count)| *count == best.1).count();
    if tied > 1 {
        ObjectiveType::Generic
    } else {
        best.0
    }
}

/// Weighted feature presence mapped into [0, 1]
pub fn estimate_complexity(objective: &str) -> f64 {
    let lowered = objective.to_lowercase();
    let mut score: f64 = 0.0;

    // Length buckets
    let words = lowered.split_whitespace().count();
    if words > 10 {
        score += 0.1;
    }
    if words > 25 {
        score += 0.1;
    }

    // Multi-step phrasing
    for marker in ["then", "after", "and then", "followed by", "finally"] {
        if lowered.contains(marker) {
            score += 0.1;
            break;
        }
    }
    // Multiple deliverables
    if lowered.matches(" and ").count() >= 2 {
        score += 0.15;
    }
    // Cross-system work
    for marker in INTEGRATION_KEYWORDS {
        if lowered.contains(marker) {
            score += 0.15;
            break;
        }
    }
    // Data modelling
    for marker in ["table", "schema", "records", "fields", "database"] {
        if lowered.contains(marker) {
            score += 0.15;
            break;
        }
    }
    // Access control
    for marker in ["role", "permission", "acl", "security"] {
        if lowered.contains(marker) {
            score += 0.15;
            break;
        }
    }
    // Testing expectations called out explicitly
    if lowered.contains("test") {
        score += 0.1;
    }

    score.clamp(0.0, 1.0)
}

/// Suggested agent sequence per objective type
pub fn suggest_agent_sequence(objective_type: ObjectiveType) -> Vec<&'static str> {
    match objective_type {
        ObjectiveType::Widget => vec!["researcher", "designer", "builder", "tester", "documenter"],
        ObjectiveType::Flow => vec!["researcher", "flow-designer", "builder", "tester", "documenter"],
        ObjectiveType::App => vec!["researcher", "architect", "builder", "tester", "documenter"],
        ObjectiveType::Integration => {
            vec!["researcher", "integration-designer", "builder", "tester", "documenter"]
        }
        ObjectiveType::Generic => vec!["researcher", "builder", "tester"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_widget() {
        assert_eq!(
            classify_objective("Create an incident dashboard widget for the portal"),
            ObjectiveType::Widget
        );
    }

    #[test]
    fn test_classify_flow() {
        assert_eq!(
            classify_objective("Build an approval workflow that triggers notifications"),
            ObjectiveType::Flow
        );
    }

    #[test]
    fn test_classify_integration() {
        assert_eq!(
            classify_objective("Sync records to the external REST api via webhook"),
            ObjectiveType::Integration
        );
    }

    #[test]
    fn test_classify_generic_on_no_hits() {
        assert_eq!(classify_objective("Do the thing"), ObjectiveType::Generic);
    }

    #[test]
    fn test_classify_generic_on_tie() {
        // One widget keyword, one flow keyword
        assert_eq!(
            classify_objective("widget flow"),
            ObjectiveType::Generic
        );
    }

    #[test]
    fn test_complexity_bounds() {
        assert_eq!(estimate_complexity(""), 0.0);
        let heavy = "Create a scoped app with tables and roles, integrate the rest api, \
                     then sync records and add tests, and document everything, and train \
                     the team on the new workflow with many more words to pad the length \
                     of this objective well past the long bucket";
        let score = estimate_complexity(heavy);
        assert!(score > 0.5);
        assert!(score <= 1.0);
    }

    #[test]
    fn test_complexity_monotonic_features() {
        let simple = estimate_complexity("Create a widget");
        let multi_step = estimate_complexity("Create a widget then test it");
        assert!(multi_step > simple);
    }

    #[test]
    fn test_agent_sequences_end_to_end() {
        for objective_type in [
            ObjectiveType::Widget,
            ObjectiveType::Flow,
            ObjectiveType::App,
            ObjectiveType::Integration,
        ] {
            let sequence = suggest_agent_sequence(objective_type);
            assert_eq!(sequence.first(), Some(&"researcher"));
            assert_eq!(sequence.last(), Some(&"documenter"));
        }
        assert_eq!(
            suggest_agent_sequence(ObjectiveType::Generic),
            vec!["researcher", "builder", "tester"]
        );
    }
}
