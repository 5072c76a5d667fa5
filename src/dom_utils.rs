use gloo_timers::future::TimeoutFuture;
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement, HtmlInputElement, HtmlTextAreaElement, Window};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomError {
    #[error("JsError: Failed to get window object")]
    NoWindow,
    #[error("JsError: Failed to get document object")]
    NoDocument,
    #[error("JsError: Document has no body")]
    NoBody,
    #[error("JsError: {message}")]
    Js { message: String },
}

impl From<JsValue> for DomError {
    fn from(value: JsValue) -> Self {
        DomError::Js {
            message: value
                .as_string()
                .or_else(|| {
                    value
                        .dyn_ref::<js_sys::Error>()
                        .map(|e| String::from(e.message()))
                })
                .unwrap_or_else(|| "Unknown JsValue error".to_string()),
        }
    }
}

impl From<DomError> for JsValue {
    fn from(err: DomError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

// Helper function to get window and document
pub fn get_window_document() -> Result<(Window, Document), DomError> {
    let window = web_sys::window().ok_or(DomError::NoWindow)?;
    let document = window.document().ok_or(DomError::NoDocument)?;
    Ok((window, document))
}

pub fn body(document: &Document) -> Result<HtmlElement, DomError> {
    document.body().ok_or(DomError::NoBody)
}

/// Collects a selector match into a `Vec`, in document order.
pub fn query_all(document: &Document, selector: &str) -> Result<Vec<Element>, DomError> {
    let node_list = document.query_selector_all(selector)?;
    let mut elements = Vec::with_capacity(node_list.length() as usize);
    for i in 0..node_list.length() {
        if let Some(element) = node_list.item(i).and_then(|n| n.dyn_into::<Element>().ok()) {
            elements.push(element);
        }
    }
    Ok(elements)
}

/// True when `element` lives inside the agent's own UI subtree.
pub fn is_inside_agent_root(element: &Element, agent_root_id: &str) -> bool {
    element
        .closest(&format!("#{}", agent_root_id))
        .ok()
        .flatten()
        .is_some()
}

/// Rendered text of the element (`innerText` for HTML elements, `textContent` otherwise).
pub fn rendered_text(element: &Element) -> String {
    match element.dyn_ref::<HtmlElement>() {
        Some(html) => html.inner_text(),
        None => element.text_content().unwrap_or_default(),
    }
}

pub fn text_content(element: &Element) -> String {
    element.text_content().unwrap_or_default()
}

/// The element's current `value`, for form controls that have one.
pub fn element_value(element: &Element) -> Option<String> {
    if let Some(input) = element.dyn_ref::<HtmlInputElement>() {
        return Some(input.value());
    }
    element.dyn_ref::<HtmlTextAreaElement>().map(|t| t.value())
}

/// Inputs, textareas and `contenteditable` hosts.
pub fn is_text_entry(element: &Element) -> bool {
    is_value_control(element)
        || element
            .dyn_ref::<HtmlElement>()
            .map(|h| h.is_content_editable())
            .unwrap_or(false)
}

/// Inputs and textareas, the controls that carry a `value` property.
pub fn is_value_control(element: &Element) -> bool {
    matches!(element.tag_name().to_ascii_lowercase().as_str(), "input" | "textarea")
}

pub fn is_visible(window: &Window, element: &Element) -> bool {
    let rect = element.get_bounding_client_rect();
    if rect.width() <= 0.0 || rect.height() <= 0.0 {
        return false;
    }
    match window.get_computed_style(element) {
        Ok(Some(style)) => {
            style.get_property_value("visibility").unwrap_or_default() != "hidden"
                && style.get_property_value("display").unwrap_or_default() != "none"
        }
        _ => true,
    }
}

pub fn has_pointer_cursor(window: &Window, element: &Element) -> bool {
    matches!(
        window.get_computed_style(element),
        Ok(Some(style)) if style.get_property_value("cursor").unwrap_or_default() == "pointer"
    )
}

/// Viewport coordinates of the element's center.
pub fn element_center(element: &Element) -> (f64, f64) {
    let rect = element.get_bounding_client_rect();
    (rect.left() + rect.width() / 2.0, rect.top() + rect.height() / 2.0)
}

pub async fn sleep(ms: u32) {
    if ms > 0 {
        TimeoutFuture::new(ms).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dom_error_display() {
        assert_eq!(DomError::NoWindow.to_string(), "JsError: Failed to get window object");
        assert_eq!(DomError::NoBody.to_string(), "JsError: Document has no body");
        assert_eq!(
            DomError::Js { message: "js error".to_string() }.to_string(),
            "JsError: js error"
        );
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod browser_tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    // Helper to create and append element for testing
    fn setup_element(document: &Document, tag: &str, attributes: &[(&str, &str)]) -> Element {
        let el = document.create_element(tag).unwrap();
        for (key, value) in attributes {
            el.set_attribute(key, value).unwrap();
        }
        document.body().unwrap().append_child(&el).unwrap();
        el
    }

    #[wasm_bindgen_test]
    fn test_dom_error_from_js_value() {
        let dom_error: DomError = JsValue::from_str("generic js error").into();
        assert_eq!(dom_error, DomError::Js { message: "generic js error".to_string() });
    }

    #[wasm_bindgen_test]
    fn test_text_entry_classification() {
        let (_window, document) = get_window_document().unwrap();
        let input = setup_element(&document, "input", &[]);
        let area = setup_element(&document, "textarea", &[]);
        let editable = setup_element(&document, "div", &[("contenteditable", "true")]);
        let plain = setup_element(&document, "div", &[]);

        assert!(is_text_entry(&input));
        assert!(is_text_entry(&area));
        assert!(is_text_entry(&editable));
        assert!(!is_value_control(&editable));
        assert!(!is_text_entry(&plain));

        for el in [input, area, editable, plain] {
            el.remove();
        }
    }

    #[wasm_bindgen_test]
    fn test_hidden_element_is_not_visible() {
        let (window, document) = get_window_document().unwrap();
        let shown = setup_element(&document, "input", &[]);
        let hidden = setup_element(&document, "input", &[("style", "display:none")]);

        assert!(is_visible(&window, &shown));
        assert!(!is_visible(&window, &hidden));

        shown.remove();
        hidden.remove();
    }

    #[wasm_bindgen_test]
    fn test_agent_root_membership() {
        let (_window, document) = get_window_document().unwrap();
        let root = setup_element(&document, "div", &[("id", "dom-utils-agent-root")]);
        let inner = document.create_element("button").unwrap();
        root.append_child(&inner).unwrap();

        assert!(is_inside_agent_root(&inner, "dom-utils-agent-root"));
        assert!(!is_inside_agent_root(&root, "some-other-root"));

        root.remove();
    }
}
