//! PageScanner: interactable enumeration and bounded visible-text snapshots.

use serde::Serialize;
use std::fmt;
use wasm_bindgen::JsCast;
use web_sys::{Element, HtmlElement};

use crate::dom_utils::{self, DomError};

/// Structural allowlist for nodes that can receive direct interaction.
const INTERACTABLE_SELECTOR: &str = "button, a, input, select, textarea, \
     [role=\"button\"], [role=\"link\"], [role=\"menuitem\"], [role=\"tab\"], \
     [role=\"textbox\"], [role=\"searchbox\"], [contenteditable=\"true\"], \
     [onclick], [data-clickable], .cursor-pointer, [type=\"search\"], [type=\"text\"]";

pub const DEFAULT_SNAPSHOT_LIMIT: usize = 10_000;

/// Elements whose text never renders.
const NON_VISIBLE_SELECTOR: &str = "script, style, noscript, template";

/// Immutable plain-text extraction of the visible page, capped in length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PageSnapshot(String);

impl PageSnapshot {
    /// Builds a snapshot from raw text: whitespace runs collapse to a single
    /// space and the result is cut to `limit` characters.
    pub fn from_raw(raw: &str, limit: usize) -> Self {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let text = match collapsed.char_indices().nth(limit) {
            Some((byte_idx, _)) => collapsed[..byte_idx].to_string(),
            None => collapsed,
        };
        PageSnapshot(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Display for PageSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct PageScanner {
    agent_root_id: String,
    snapshot_limit: usize,
}

impl PageScanner {
    pub fn new(agent_root_id: impl Into<String>, snapshot_limit: usize) -> Self {
        Self {
            agent_root_id: agent_root_id.into(),
            snapshot_limit,
        }
    }

    pub fn agent_root_id(&self) -> &str {
        &self.agent_root_id
    }

    /// Every allowlisted node outside the agent UI, in document order.
    /// `querySelectorAll` with a selector union yields each node once.
    pub fn list_interactables(&self) -> Result<Vec<Element>, DomError> {
        let (_window, document) = dom_utils::get_window_document()?;
        let elements = dom_utils::query_all(&document, INTERACTABLE_SELECTOR)?
            .into_iter()
            .filter(|el| !dom_utils::is_inside_agent_root(el, &self.agent_root_id))
            .collect();
        Ok(elements)
    }

    /// Captures the visible text of the page minus the agent's own UI.
    pub fn snapshot(&self) -> Result<PageSnapshot, DomError> {
        let (_window, document) = dom_utils::get_window_document()?;
        let body = dom_utils::body(&document)?;

        // Work on a detached clone so the live page is never touched.
        let clone = body
            .clone_node_with_deep(true)?
            .dyn_into::<HtmlElement>()
            .map_err(|_| DomError::Js { message: "Body clone is not an HtmlElement".to_string() })?;
        if let Some(agent_root) = clone.query_selector(&format!("#{}", self.agent_root_id))? {
            agent_root.remove();
        }
        // A detached clone has no layout, so innerText would include these.
        let non_visible = clone.query_selector_all(NON_VISIBLE_SELECTOR)?;
        for i in 0..non_visible.length() {
            if let Some(node) = non_visible.item(i) {
                if let Some(parent) = node.parent_node() {
                    parent.remove_child(&node)?;
                }
            }
        }

        let mut raw = clone.inner_text();
        if raw.trim().is_empty() {
            raw = clone.text_content().unwrap_or_default();
        }
        Ok(PageSnapshot::from_raw(&raw, self.snapshot_limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_collapses_whitespace() {
        let snap = PageSnapshot::from_raw("  Home \n\n\t Products   Cart\u{a0}(2) ", 100);
        assert_eq!(snap.as_str(), "Home Products Cart (2)");
    }

    #[test]
    fn test_snapshot_truncates_to_exact_limit() {
        let raw = "abcde".repeat(10_000);
        let snap = PageSnapshot::from_raw(&raw, DEFAULT_SNAPSHOT_LIMIT);
        assert_eq!(snap.char_len(), 10_000);
    }

    #[test]
    fn test_snapshot_truncation_counts_characters_not_bytes() {
        let raw = "tìm kiếm ".repeat(50);
        let snap = PageSnapshot::from_raw(&raw, 7);
        assert_eq!(snap.as_str(), "tìm kiế");
    }

    #[test]
    fn test_short_snapshot_untouched() {
        let snap = PageSnapshot::from_raw("Add to Cart", DEFAULT_SNAPSHOT_LIMIT);
        assert_eq!(snap.as_str(), "Add to Cart");
        assert_eq!(serde_json::to_string(&snap).unwrap(), "\"Add to Cart\"");
    }
}
