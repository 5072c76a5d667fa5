//! ElementResolver: maps a free-text description to a single live element.
//!
//! Three tiers, the first tier producing a candidate wins:
//! 1. direct attribute match over the interactable set,
//! 2. promotion of text-bearing containers to their nearest clickable ancestor,
//! 3. for search intent, the first visible text-entry control.
//!
//! Within a tier the candidate with the shortest rendered text wins, ties
//! broken by document order. Resolution is uncached: every call reads the
//! live tree afresh.

use std::cmp::Ordering;
use tracing::debug;
use wasm_bindgen::JsCast;
use web_sys::{Element, HtmlElement, Node, Window};

use crate::dom_utils::{self, DomError};
use crate::scanner::PageScanner;

/// Words that mark a query as search intent (English, Vietnamese).
const SEARCH_INTENT_WORDS: [&str; 3] = ["search", "tìm", "kiếm"];

const CLICKABLE_ROLES: [&str; 7] = ["button", "link", "menuitem", "tab", "option", "checkbox", "radio"];
const CLICKABLE_TAGS: [&str; 5] = ["a", "button", "select", "details", "summary"];
const CLICKABLE_DATA_ATTRIBUTES: [&str; 4] = ["data-clickable", "data-action", "data-toggle", "data-target"];

const SEARCH_ENTRY_SELECTOR: &str = "input[type=\"search\"], input[type=\"text\"], input:not([type]), \
     textarea, [role=\"searchbox\"], [role=\"textbox\"]";

/// Rank given to candidates without rendered text; they only matched on an attribute.
const EMPTY_TEXT_RANK: usize = 1000;

/// Which tier produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    DirectMatch,
    ContainerPromotion,
    SearchFallback,
}

/// True when the query asks for a search box in one of the supported languages.
pub fn is_search_intent(query: &str) -> bool {
    let lower = query.to_lowercase();
    SEARCH_INTENT_WORDS.iter().any(|w| lower.contains(w))
}

/// Attribute values consulted by the direct-match tier.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MatchFields {
    pub text: String,
    pub aria_label: String,
    pub placeholder: String,
    pub name: String,
    pub title: String,
    pub value: String,
    pub input_type: String,
}

impl MatchFields {
    fn read(element: &Element) -> Self {
        let attr = |name: &str| element.get_attribute(name).unwrap_or_default();
        MatchFields {
            text: dom_utils::text_content(element),
            aria_label: attr("aria-label"),
            placeholder: attr("placeholder"),
            name: attr("name"),
            title: attr("title"),
            value: dom_utils::element_value(element).unwrap_or_else(|| attr("value")),
            input_type: attr("type"),
        }
    }

    /// Case-insensitive containment against every consulted field, plus the
    /// `type="search"` shortcut for search-intent queries.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        let contains = |field: &str| field.to_lowercase().contains(&needle);
        contains(&self.text)
            || contains(&self.aria_label)
            || contains(&self.placeholder)
            || contains(&self.name)
            || contains(&self.title)
            || contains(&self.value)
            || (is_search_intent(query) && self.input_type.eq_ignore_ascii_case("search"))
    }
}

/// Length used for ranking: shorter rendered text means a tighter match.
fn rank_len(text: &str) -> usize {
    match text.chars().count() {
        0 => EMPTY_TEXT_RANK,
        n => n,
    }
}

fn same_node(a: &Element, b: &Element) -> bool {
    let b: &Node = b;
    a.is_same_node(Some(b))
}

/// `a` before `b` in document order.
fn document_order(a: &Element, b: &Element) -> Ordering {
    if same_node(a, b) {
        return Ordering::Equal;
    }
    let position = a.compare_document_position(b);
    if position & Node::DOCUMENT_POSITION_FOLLOWING != 0 {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Independent clickability test used when promoting containers.
pub fn is_clickable(window: &Window, element: &Element) -> bool {
    if element.has_attribute("onclick")
        || element
            .dyn_ref::<HtmlElement>()
            .map(|h| h.onclick().is_some())
            .unwrap_or(false)
    {
        return true;
    }
    if dom_utils::has_pointer_cursor(window, element) {
        return true;
    }
    if let Some(role) = element.get_attribute("role") {
        if CLICKABLE_ROLES.contains(&role.as_str()) {
            return true;
        }
    }
    let tag = element.tag_name().to_ascii_lowercase();
    if CLICKABLE_TAGS.contains(&tag.as_str()) {
        return true;
    }
    if let Some(tabindex) = element.get_attribute("tabindex") {
        if tabindex.trim() != "-1" {
            return true;
        }
    }
    CLICKABLE_DATA_ATTRIBUTES.iter().any(|a| element.has_attribute(a))
}

#[derive(Debug, Clone)]
pub struct ElementResolver {
    scanner: PageScanner,
}

impl ElementResolver {
    pub fn new(scanner: PageScanner) -> Self {
        Self { scanner }
    }

    pub fn resolve(&self, query: &str) -> Result<Option<Element>, DomError> {
        Ok(self.resolve_with_tier(query)?.map(|(el, _)| el))
    }

    pub fn resolve_with_tier(&self, query: &str) -> Result<Option<(Element, ResolutionTier)>, DomError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }
        let (window, document) = dom_utils::get_window_document()?;

        let direct: Vec<Element> = self
            .scanner
            .list_interactables()?
            .into_iter()
            .filter(|el| MatchFields::read(el).matches(query))
            .collect();
        if let Some(best) = pick_smallest(direct) {
            debug!("Resolved {:?} by direct match: <{}>", query, best.tag_name());
            return Ok(Some((best, ResolutionTier::DirectMatch)));
        }

        let promoted = self.promote_containers(&window, &document, query)?;
        if let Some(best) = pick_smallest(promoted) {
            debug!("Resolved {:?} by container promotion: <{}>", query, best.tag_name());
            return Ok(Some((best, ResolutionTier::ContainerPromotion)));
        }

        if is_search_intent(query) {
            let entry = dom_utils::query_all(&document, SEARCH_ENTRY_SELECTOR)?
                .into_iter()
                .filter(|el| !dom_utils::is_inside_agent_root(el, self.scanner.agent_root_id()))
                .find(|el| dom_utils::is_visible(&window, el));
            if let Some(entry) = entry {
                debug!("Resolved {:?} by search fallback: <{}>", query, entry.tag_name());
                return Ok(Some((entry, ResolutionTier::SearchFallback)));
            }
        }

        debug!("No element matches {:?}", query);
        Ok(None)
    }

    /// Nodes whose text contains the query and that have element children are
    /// walked upwards (stopping below `<body>`) to their first clickable ancestor.
    fn promote_containers(
        &self,
        window: &Window,
        document: &web_sys::Document,
        query: &str,
    ) -> Result<Vec<Element>, DomError> {
        let needle = query.to_lowercase();
        let body = dom_utils::body(document)?;
        let body: &Element = body.as_ref();
        let mut promoted: Vec<Element> = Vec::new();

        for container in dom_utils::query_all(document, "*")? {
            if container.child_element_count() == 0
                || dom_utils::is_inside_agent_root(&container, self.scanner.agent_root_id())
                || !dom_utils::text_content(&container).to_lowercase().contains(&needle)
            {
                continue;
            }
            let mut current = Some(container);
            while let Some(el) = current {
                if same_node(&el, body) {
                    break;
                }
                if is_clickable(window, &el) {
                    if !promoted.iter().any(|p| same_node(p, &el)) {
                        promoted.push(el);
                    }
                    break;
                }
                current = el.parent_element();
            }
        }
        Ok(promoted)
    }
}

/// Smallest rendered text wins; ties go to whichever comes first in the document.
fn pick_smallest(mut candidates: Vec<Element>) -> Option<Element> {
    if candidates.len() > 1 {
        let mut ranked: Vec<(usize, Element)> = candidates
            .drain(..)
            .map(|el| (rank_len(&dom_utils::rendered_text(&el)), el))
            .collect();
        ranked.sort_by(|(la, a), (lb, b)| la.cmp(lb).then_with(|| document_order(a, b)));
        return ranked.into_iter().next().map(|(_, el)| el);
    }
    candidates.pop()
}
