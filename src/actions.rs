//! ActionExecutor: performs click / type / scroll / submit against the live page.
//!
//! Each element action runs the same sequence: resolve, scroll into view,
//! cursor move-and-show, pause, press, pause, release, synthesize the
//! interaction, settle, re-snapshot. The cursor is hidden on every exit path.

use async_trait::async_trait;
use js_sys::{Function, Object, Reflect};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    Element, Event, EventInit, HtmlElement, HtmlInputElement, HtmlTextAreaElement, KeyboardEvent,
    KeyboardEventInit, MouseEvent, MouseEventInit, ScrollBehavior, ScrollIntoViewOptions,
    ScrollLogicalPosition, ScrollToOptions, Window,
};

use crate::config::ActionTimings;
use crate::cursor::{CursorChannel, CursorGuard, CursorState};
use crate::dom_utils::{self, DomError};
use crate::resolver::ElementResolver;
use crate::scanner::{PageScanner, PageSnapshot};
use crate::tools::{Action, ScrollDirection, ToolInvocation};

/// Fraction of the viewport height moved by one up/down scroll.
const SCROLL_STEP_RATIO: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("Element with text \"{target}\" not found.")]
    ElementNotFound { target: String },
    #[error("Input field \"{target}\" not found.")]
    NotTextEntry { target: String },
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Round limit reached; tool call not executed.")]
    RoundLimitReached,
    #[error(transparent)]
    Dom(#[from] DomError),
}

impl From<JsValue> for ActionError {
    fn from(value: JsValue) -> Self {
        ActionError::Dom(DomError::from(value))
    }
}

/// Structured outcome of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success {
        message: String,
        snapshot: Option<PageSnapshot>,
    },
    Failure {
        error: String,
    },
}

impl ToolResult {
    pub fn success(message: impl Into<String>, snapshot: PageSnapshot) -> Self {
        ToolResult::Success {
            message: message.into(),
            snapshot: Some(snapshot),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }

    /// Payload handed back to the engine as the function response.
    pub fn to_response(&self) -> Value {
        match self {
            ToolResult::Success { message, snapshot } => {
                let mut body = json!({ "success": true, "message": message });
                if let Some(snapshot) = snapshot {
                    body["visiblePageContentAfterAction"] = json!(snapshot.as_str());
                }
                body
            }
            ToolResult::Failure { error } => json!({ "error": error }),
        }
    }
}

impl From<ActionError> for ToolResult {
    fn from(err: ActionError) -> Self {
        ToolResult::Failure { error: err.to_string() }
    }
}

/// The page as seen by the agent loop.
#[async_trait(?Send)]
pub trait PageDriver {
    /// Fresh snapshot of the visible page.
    fn snapshot(&self) -> Result<PageSnapshot, DomError>;

    /// Runs one tool call. Failures come back as [`ToolResult::Failure`].
    async fn execute(&self, call: &ToolInvocation) -> ToolResult;
}

pub struct ActionExecutor {
    scanner: PageScanner,
    resolver: ElementResolver,
    cursor: CursorChannel,
    timings: ActionTimings,
}

impl ActionExecutor {
    pub fn new(scanner: PageScanner, cursor: CursorChannel, timings: ActionTimings) -> Self {
        Self {
            resolver: ElementResolver::new(scanner.clone()),
            scanner,
            cursor,
            timings,
        }
    }

    pub fn cursor(&self) -> &CursorChannel {
        &self.cursor
    }

    pub async fn perform(&self, action: &Action) -> Result<ToolResult, ActionError> {
        match action {
            Action::Click { target_text } => self.click(target_text).await,
            Action::Type { target_label, value } => self.type_text(target_label, value).await,
            Action::Scroll { direction } => self.scroll(*direction).await,
            Action::Submit { target_label } => self.submit(target_label).await,
        }
    }

    pub async fn click(&self, target_text: &str) -> Result<ToolResult, ActionError> {
        let (window, _document) = dom_utils::get_window_document()?;
        let element = self.locate(target_text)?;

        let _guard = CursorGuard::new(&self.cursor);
        self.present(&element, format!("Clicking \"{}\"", target_text)).await;
        let element = self.refresh(element, target_text, Self::locate)?;

        synthesize_click(&window, &element)?;

        dom_utils::sleep(self.timings.click_settle_ms).await;
        let snapshot = self.scanner.snapshot()?;
        Ok(ToolResult::success(
            format!("Clicked element containing \"{}\".", target_text),
            snapshot,
        ))
    }

    pub async fn type_text(&self, target_label: &str, value: &str) -> Result<ToolResult, ActionError> {
        let element = self.locate_text_entry(target_label)?;

        let _guard = CursorGuard::new(&self.cursor);
        self.present(&element, format!("Typing \"{}\"", value)).await;
        let element = self.refresh(element, target_label, Self::locate_text_entry)?;

        focus(&element)?;
        write_value(&element, value)?;
        let init = EventInit::new();
        init.set_bubbles(true);
        element.dispatch_event(&Event::new_with_event_init_dict("input", &init)?)?;

        dom_utils::sleep(self.timings.type_settle_ms).await;
        let snapshot = self.scanner.snapshot()?;
        Ok(ToolResult::success(
            format!("Typed \"{}\" into \"{}\"", value, target_label),
            snapshot,
        ))
    }

    pub async fn scroll(&self, direction: ScrollDirection) -> Result<ToolResult, ActionError> {
        let (window, document) = dom_utils::get_window_document()?;
        let options = ScrollToOptions::new();
        options.set_behavior(ScrollBehavior::Smooth);

        match direction {
            ScrollDirection::Top => {
                options.set_top(0.0);
                window.scroll_to_with_scroll_to_options(&options);
            }
            ScrollDirection::Bottom => {
                let height = dom_utils::body(&document)?.scroll_height().max(
                    document
                        .document_element()
                        .map(|root| root.scroll_height())
                        .unwrap_or(0),
                );
                options.set_top(f64::from(height));
                window.scroll_to_with_scroll_to_options(&options);
            }
            ScrollDirection::Up | ScrollDirection::Down => {
                let viewport = window.inner_height()?.as_f64().unwrap_or(0.0);
                let amount = viewport * SCROLL_STEP_RATIO;
                options.set_top(if direction == ScrollDirection::Down { amount } else { -amount });
                window.scroll_by_with_scroll_to_options(&options);
            }
        }

        dom_utils::sleep(self.timings.scroll_settle_ms).await;
        let snapshot = self.scanner.snapshot()?;
        Ok(ToolResult::success(format!("Scrolled {}", direction), snapshot))
    }

    pub async fn submit(&self, target_label: &str) -> Result<ToolResult, ActionError> {
        let element = self.locate_text_entry(target_label)?;

        let _guard = CursorGuard::new(&self.cursor);
        self.present(&element, "Pressing Enter").await;
        let element = self.refresh(element, target_label, Self::locate_text_entry)?;

        focus(&element)?;
        for kind in ["keydown", "keyup"] {
            element.dispatch_event(&enter_event(kind)?.into())?;
        }

        dom_utils::sleep(self.timings.submit_settle_ms).await;
        let snapshot = self.scanner.snapshot()?;
        Ok(ToolResult::success(
            format!("Pressed Enter on \"{}\"", target_label),
            snapshot,
        ))
    }

    fn locate(&self, query: &str) -> Result<Element, ActionError> {
        self.resolver
            .resolve(query)?
            .ok_or_else(|| ActionError::ElementNotFound { target: query.to_string() })
    }

    fn locate_text_entry(&self, query: &str) -> Result<Element, ActionError> {
        let element = self.locate(query)?;
        if dom_utils::is_text_entry(&element) {
            Ok(element)
        } else {
            Err(ActionError::NotTextEntry { target: query.to_string() })
        }
    }

    /// The page may re-render during the cursor pauses; a detached target is
    /// looked up again rather than acted on.
    /// `locate` must be the same lookup that produced `element`, so a
    /// replacement still passes its checks.
    fn refresh<F>(&self, element: Element, query: &str, locate: F) -> Result<Element, ActionError>
    where
        F: Fn(&Self, &str) -> Result<Element, ActionError>,
    {
        if element.is_connected() {
            return Ok(element);
        }
        info!("Target {:?} detached during presentation, resolving again", query);
        locate(self, query)
    }

    /// Scrolls the target into view and plays the cursor sequence.
    async fn present(&self, element: &Element, label: impl Into<String>) {
        let options = ScrollIntoViewOptions::new();
        options.set_behavior(ScrollBehavior::Smooth);
        options.set_block(ScrollLogicalPosition::Center);
        element.scroll_into_view_with_scroll_into_view_options(&options);

        let (x, y) = dom_utils::element_center(element);
        let state = CursorState::at(x, y, label);
        self.cursor.publish(state.clone());
        dom_utils::sleep(self.timings.cursor_move_ms).await;
        self.cursor.publish(state.clone().clicking(true));
        dom_utils::sleep(self.timings.cursor_press_ms).await;
        self.cursor.publish(state.clicking(false));
    }
}

#[async_trait(?Send)]
impl PageDriver for ActionExecutor {
    fn snapshot(&self) -> Result<PageSnapshot, DomError> {
        self.scanner.snapshot()
    }

    async fn execute(&self, call: &ToolInvocation) -> ToolResult {
        info!("Tool: {} {}", call.name, call.arguments);
        let outcome = match Action::try_from(call) {
            Ok(action) => self.perform(&action).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!("Tool {} failed: {}", call.name, e);
                self.cursor.hide();
                ToolResult::from(e)
            }
        }
    }
}

/// Press, release, then one native activation. `HTMLElement.click()` fires
/// the single `click` event, so no click is dispatched by hand for HTML
/// elements.
fn synthesize_click(window: &Window, element: &Element) -> Result<(), DomError> {
    let init = MouseEventInit::new();
    init.set_view(Some(window));
    init.set_bubbles(true);
    init.set_cancelable(true);
    init.set_buttons(1);

    for kind in ["mousedown", "mouseup"] {
        element.dispatch_event(&MouseEvent::new_with_mouse_event_init_dict(kind, &init)?.into())?;
    }

    match element.dyn_ref::<HtmlElement>() {
        Some(html) => {
            html.click();
            if dom_utils::is_text_entry(element) {
                html.focus()?;
            }
        }
        None => {
            // SVG and other non-HTML nodes have no click() method.
            element.dispatch_event(&MouseEvent::new_with_mouse_event_init_dict("click", &init)?.into())?;
        }
    }
    Ok(())
}

fn focus(element: &Element) -> Result<(), DomError> {
    if let Some(html) = element.dyn_ref::<HtmlElement>() {
        html.focus()?;
    }
    Ok(())
}

fn enter_event(kind: &str) -> Result<KeyboardEvent, DomError> {
    let init = KeyboardEventInit::new();
    init.set_key("Enter");
    init.set_code("Enter");
    init.set_bubbles(true);
    init.set_cancelable(true);
    // Legacy fields still read by older keyboard handlers.
    let raw: &JsValue = init.as_ref();
    Reflect::set(raw, &JsValue::from_str("keyCode"), &JsValue::from(13))?;
    Reflect::set(raw, &JsValue::from_str("which"), &JsValue::from(13))?;
    Ok(KeyboardEvent::new_with_keyboard_event_init_dict(kind, &init)?)
}

/// Writes through the prototype's `value` setter so that instance-level
/// overrides installed by frameworks still see the change as a real edit.
fn write_value(element: &Element, value: &str) -> Result<(), DomError> {
    if !dom_utils::is_value_control(element) {
        element.set_text_content(Some(value));
        return Ok(());
    }
    let interface = if element.is_instance_of::<HtmlTextAreaElement>() {
        "HTMLTextAreaElement"
    } else {
        "HTMLInputElement"
    };
    let target: &JsValue = element.as_ref();
    match native_value_setter(interface)? {
        Some(setter) => {
            setter.call1(target, &JsValue::from_str(value))?;
        }
        None => {
            if let Some(input) = element.dyn_ref::<HtmlInputElement>() {
                input.set_value(value);
            } else if let Some(area) = element.dyn_ref::<HtmlTextAreaElement>() {
                area.set_value(value);
            }
        }
    }
    Ok(())
}

fn native_value_setter(interface: &str) -> Result<Option<Function>, DomError> {
    let constructor = Reflect::get(&js_sys::global(), &JsValue::from_str(interface))?;
    let prototype = Reflect::get(&constructor, &JsValue::from_str("prototype"))?;
    let Some(prototype) = prototype.dyn_ref::<Object>() else {
        return Ok(None);
    };
    let descriptor = Object::get_own_property_descriptor(prototype, &JsValue::from_str("value"));
    if descriptor.is_undefined() {
        return Ok(None);
    }
    Ok(Reflect::get(&descriptor, &JsValue::from_str("set"))?
        .dyn_into::<Function>()
        .ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response_carries_snapshot() {
        let result = ToolResult::success("Scrolled down", PageSnapshot::from_raw("Footer  links", 100));
        assert!(result.is_success());
        assert_eq!(
            result.to_response(),
            json!({
                "success": true,
                "message": "Scrolled down",
                "visiblePageContentAfterAction": "Footer links"
            })
        );
    }

    #[test]
    fn test_success_without_snapshot_omits_field() {
        let result = ToolResult::Success { message: "ok".into(), snapshot: None };
        assert_eq!(result.to_response(), json!({"success": true, "message": "ok"}));
    }

    #[test]
    fn test_errors_become_failure_results() {
        let not_found: ToolResult = ActionError::ElementNotFound { target: "Add to Cart".into() }.into();
        assert!(!not_found.is_success());
        assert_eq!(
            not_found.to_response(),
            json!({"error": "Element with text \"Add to Cart\" not found."})
        );

        let not_input: ToolResult = ActionError::NotTextEntry { target: "Search".into() }.into();
        assert_eq!(not_input.to_response(), json!({"error": "Input field \"Search\" not found."}));

        let unknown: ToolResult = ActionError::UnknownTool("hover".into()).into();
        assert_eq!(unknown.to_response(), json!({"error": "Unknown tool: hover"}));
    }

    #[test]
    fn test_dom_errors_pass_through_transparently() {
        let err = ActionError::from(DomError::NoBody);
        assert_eq!(err.to_string(), "JsError: Document has no body");
    }
}
