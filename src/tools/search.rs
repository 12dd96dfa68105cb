// src/tools/search.rs
// Keyword/prefix scored search over tool names and descriptions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use super::ToolDefinition;

const MAX_DESCRIPTION: usize = 200;
const MAX_KEYWORDS: usize = 10;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "that", "this", "are", "was", "can",
    "will", "into", "over", "all", "any", "has", "have", "its", "not", "you",
    "your", "use", "used", "using", "tool", "tools",
];

/// One searchable entry; `deferred` tools stay hidden until enabled
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolIndexEntry {
    pub id: String,
    pub description: String,
    pub category: String,
    pub keywords: Vec<String>,
    pub deferred: bool,
}

/// A scored search hit
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub entry: ToolIndexEntry,
    pub score: u32,
}

/// Availability buckets reported by `get_tool_status`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolStatusReport {
    pub available: Vec<String>,
    pub enabled: Vec<String>,
    pub deferred: Vec<String>,
}

/// In-memory search index over registered tools. Grows monotonically
/// between clears; re-indexing an id replaces its entry.
pub struct ToolSearchIndex {
    entries: RwLock<HashMap<String, ToolIndexEntry>>,
}

impl ToolSearchIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Index one tool definition
    pub fn index_tool(&self, definition: &ToolDefinition, deferred: bool) {
        self.index_raw(
            &definition.name,
            &definition.description,
            &definition.domain,
            deferred,
        );
    }

    /// Index from raw parts (used for fleet-discovered tools)
    pub fn index_raw(&self, id: &str, description: &str, category: &str, deferred: bool) {
        let entry = ToolIndexEntry {
            id: id.to_string(),
            description: truncate(description, MAX_DESCRIPTION),
            category: category.to_string(),
            keywords: extract_keywords(id, description),
            deferred,
        };
        self.entries.write().unwrap().insert(entry.id.clone(), entry);
    }

    pub fn remove(&self, id: &str) {
        self.entries.write().unwrap().remove(id);
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<ToolIndexEntry> {
        self.entries.read().unwrap().get(id).cloned()
    }

    /// Lazy-mode rule: an id the index does not know is deferred, never
    /// implicitly available.
    pub fn is_deferred(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap()
            .get(id)
            .map(|entry| entry.deferred)
            .unwrap_or(true)
    }

    /// Score all entries against `query` and return the top `limit`,
    /// dropping zero scores.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        let words: Vec<&str> = query
            .split_whitespace()
            .filter(|w| w.len() > 2)
            .collect();

        let entries = self.entries.read().unwrap();
        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter_map(|entry| {
                let score = score_entry(entry, &query, &words);
                (score > 0).then(|| SearchHit {
                    entry: entry.clone(),
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.cmp(&a.score).then(a.entry.id.cmp(&b.entry.id)));
        hits.truncate(limit);
        hits
    }

    /// Bucket every indexed tool for a session's enabled set
    pub fn get_tool_status(&self, enabled: &std::collections::HashSet<String>) -> ToolStatusReport {
        let mut report = ToolStatusReport::default();
        let entries = self.entries.read().unwrap();
        let mut ids: Vec<&ToolIndexEntry> = entries.values().collect();
        ids.sort_by(|a, b| a.id.cmp(&b.id));

        for entry in ids {
            if !entry.deferred {
                report.available.push(entry.id.clone());
            } else if enabled.contains(&entry.id) {
                report.enabled.push(entry.id.clone());
            } else {
                report.deferred.push(entry.id.clone());
            }
        }
        report
    }
}

impl Default for ToolSearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn score_entry(entry: &ToolIndexEntry, query: &str, words: &[&str]) -> u32 {
    let id = entry.id.to_lowercase();
    let description = entry.description.to_lowercase();
    let category = entry.category.to_lowercase();
    let mut score = 0;

    if id == *query {
        score += 100;
    }
    if id.contains(query) {
        score += 50;
    }
    if id.starts_with(query) {
        score += 30;
    }
    if description.contains(query) {
        score += 20;
    }
    if entry.keywords.iter().any(|k| k == query) {
        score += 40;
    }
    if entry.keywords.iter().any(|k| k.contains(query)) {
        score += 15;
    }
    if category.contains(query) {
        score += 25;
    }

    for word in words {
        if id.contains(word) {
            score += 10;
        }
        if description.contains(word) {
            score += 5;
        }
        if entry.keywords.iter().any(|k| k.contains(word)) {
            score += 8;
        }
    }

    score
}

/// Split the id on underscores (keeping parts longer than 2 chars) and take
/// up to 10 stopword-filtered content words from the description.
fn extract_keywords(id: &str, description: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();

    for part in id.split('_') {
        let part = part.to_lowercase();
        if part.len() > 2 && !keywords.contains(&part) {
            keywords.push(part);
        }
    }

    let mut content_words = 0;
    for word in description.split_whitespace() {
        if content_words >= MAX_KEYWORDS {
            break;
        }
        let cleaned: String = word
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if cleaned.len() > 2 && !STOPWORDS.contains(&cleaned.as_str()) && !keywords.contains(&cleaned)
        {
            keywords.push(cleaned);
            content_words += 1;
        }
    }

    keywords
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn index_fixture() -> ToolSearchIndex {
        let index = ToolSearchIndex::new();
        index.index_raw(
            "snow_query_incidents",
            "Query open incidents from the incident table",
            "itsm",
            true,
        );
        index.index_raw(
            "snow_create_incident",
            "Create a new incident record",
            "itsm",
            true,
        );
        index.index_raw(
            "catalog_order_item",
            "Order a catalog item for a user",
            "catalog",
            true,
        );
        index.index_raw(
            "memory_session_status",
            "Read the current session status lists",
            "memory",
            false,
        );
        index
    }

    #[test]
    fn test_exact_id_match_ranks_first() {
        let index = index_fixture();
        let hits = index.search("snow_query_incidents", 10);
        assert_eq!(hits[0].entry.id, "snow_query_incidents");
        // exact(100) + contains(50) + startswith(30) at minimum
        assert!(hits[0].score >= 180);
    }

    #[test]
    fn test_keyword_search_finds_related_tools() {
        let index = index_fixture();
        let hits = index.search("incident", 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert!(ids.contains(&"snow_query_incidents"));
        assert!(ids.contains(&"snow_create_incident"));
        assert!(!ids.contains(&"memory_session_status"));
    }

    #[test]
    fn test_category_match_scores() {
        let index = index_fixture();
        let hits = index.search("itsm", 10);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_zero_scores_are_dropped() {
        let index = index_fixture();
        assert!(index.search("kubernetes", 10).is_empty());
        assert!(index.search("", 10).is_empty());
    }

    #[test]
    fn test_limit_is_applied() {
        let index = index_fixture();
        let hits = index.search("incident", 1);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_keyword_extraction() {
        let keywords = extract_keywords(
            "snow_query_incidents",
            "Query the open incidents for a ServiceNow instance",
        );
        assert!(keywords.contains(&"snow".to_string()));
        assert!(keywords.contains(&"query".to_string()));
        assert!(keywords.contains(&"incidents".to_string()));
        assert!(keywords.contains(&"servicenow".to_string()));
        // stopwords filtered
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"for".to_string()));
    }

    #[test]
    fn test_unknown_id_is_deferred() {
        let index = index_fixture();
        assert!(index.is_deferred("never_indexed_tool"));
        assert!(index.is_deferred("snow_query_incidents"));
        assert!(!index.is_deferred("memory_session_status"));
    }

    #[test]
    fn test_description_truncated_at_200() {
        let index = ToolSearchIndex::new();
        let long = "word ".repeat(100);
        index.index_raw("long_tool", &long, "misc", true);
        assert!(index.get("long_tool").unwrap().description.chars().count() <= 200);
    }

    #[test]
    fn test_status_buckets() {
        let index = index_fixture();
        let mut enabled = HashSet::new();
        enabled.insert("snow_query_incidents".to_string());

        let report = index.get_tool_status(&enabled);
        assert_eq!(report.available, vec!["memory_session_status"]);
        assert_eq!(report.enabled, vec!["snow_query_incidents"]);
        assert_eq!(report.deferred.len(), 2);
    }

    #[test]
    fn test_index_grows_monotonically_and_clears() {
        let index = index_fixture();
        let before = index.len();
        index.index_raw("new_tool", "Another tool", "misc", true);
        assert_eq!(index.len(), before + 1);

        index.clear();
        assert!(index.is_empty());
    }
}
