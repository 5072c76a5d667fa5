//! Ephemeral on-screen cursor.
//!
//! The action executor publishes [`CursorState`] into a [`CursorChannel`];
//! the presenter subscribes and mirrors the latest state into an overlay
//! element. Latest write wins, no history is kept.

use std::rc::Rc;
use tokio::sync::watch;
use tracing::debug;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement};

use crate::dom_utils::{self, DomError};

const CURSOR_ELEMENT_ID: &str = "page-agent-cursor";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorState {
    pub visible: bool,
    pub x: f64,
    pub y: f64,
    pub label: Option<String>,
    pub is_clicking: bool,
}

impl CursorState {
    pub fn hidden() -> Self {
        Self::default()
    }

    pub fn at(x: f64, y: f64, label: impl Into<String>) -> Self {
        Self {
            visible: true,
            x,
            y,
            label: Some(label.into()),
            is_clicking: false,
        }
    }

    pub fn clicking(mut self, is_clicking: bool) -> Self {
        self.is_clicking = is_clicking;
        self
    }

    /// Inline style for the overlay root.
    pub fn overlay_style(&self) -> String {
        if !self.visible {
            return "display:none".to_string();
        }
        format!(
            "position:fixed;left:{:.1}px;top:{:.1}px;transform:translate(-50%,-50%) scale({});\
             pointer-events:none;z-index:10000000;transition:all 500ms ease-in-out;",
            self.x,
            self.y,
            if self.is_clicking { "0.9" } else { "1" }
        )
    }
}

/// Single-slot notification channel between executor and presenter.
#[derive(Debug, Clone)]
pub struct CursorChannel {
    tx: Rc<watch::Sender<CursorState>>,
}

impl Default for CursorChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorChannel {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(CursorState::hidden());
        Self { tx: Rc::new(tx) }
    }

    pub fn publish(&self, state: CursorState) {
        // send_replace never fails, even with no presenter attached.
        self.tx.send_replace(state);
    }

    pub fn hide(&self) {
        self.publish(CursorState::hidden());
    }

    pub fn current(&self) -> CursorState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CursorState> {
        self.tx.subscribe()
    }
}

/// Hides the cursor when dropped, so every exit path leaves the overlay clean.
pub struct CursorGuard<'a> {
    channel: &'a CursorChannel,
}

impl<'a> CursorGuard<'a> {
    pub fn new(channel: &'a CursorChannel) -> Self {
        Self { channel }
    }
}

impl Drop for CursorGuard<'_> {
    fn drop(&mut self) {
        self.channel.hide();
    }
}

/// Renders cursor states into a fixed overlay inside the agent root.
pub struct CursorPresenter {
    agent_root_id: String,
}

impl CursorPresenter {
    pub fn new(agent_root_id: impl Into<String>) -> Self {
        Self {
            agent_root_id: agent_root_id.into(),
        }
    }

    /// Spawns the render loop on the page's task queue. It ends when every
    /// sender is gone.
    pub fn attach(self, channel: &CursorChannel) {
        let mut rx = channel.subscribe();
        wasm_bindgen_futures::spawn_local(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                if let Err(e) = self.render(&state) {
                    debug!("Cursor render failed: {}", e);
                }
            }
        });
    }

    pub fn render(&self, state: &CursorState) -> Result<(), DomError> {
        let (_window, document) = dom_utils::get_window_document()?;
        let overlay = self.overlay(&document)?;
        overlay.set_attribute("style", &state.overlay_style())?;
        overlay.set_attribute("data-clicking", if state.is_clicking { "true" } else { "false" })?;

        let label = overlay
            .query_selector("[data-role=\"label\"]")?
            .and_then(|el| el.dyn_into::<HtmlElement>().ok());
        if let Some(label) = label {
            match &state.label {
                Some(text) if state.visible => {
                    label.set_inner_text(text);
                    label.style().set_property("display", "block")?;
                }
                _ => label.style().set_property("display", "none")?,
            }
        }
        Ok(())
    }

    fn overlay(&self, document: &Document) -> Result<Element, DomError> {
        if let Some(existing) = document.get_element_by_id(CURSOR_ELEMENT_ID) {
            return Ok(existing);
        }
        let host = ensure_agent_root(document, &self.agent_root_id)?;
        let overlay = document.create_element("div")?;
        overlay.set_id(CURSOR_ELEMENT_ID);
        overlay.set_inner_html(
            "<svg width=\"32\" height=\"32\" viewBox=\"0 0 24 24\" fill=\"#e0e7ff\" stroke=\"#4f46e5\" \
             stroke-width=\"2\"><path d=\"M4 4l7 17 2.5-7.5L21 11z\"/></svg>\
             <div data-role=\"label\" style=\"position:absolute;top:32px;left:16px;background:#4f46e5;\
             color:#fff;font:12px sans-serif;padding:4px 8px;border-radius:4px;white-space:nowrap;\"></div>",
        );
        host.append_child(&overlay)?;
        Ok(overlay)
    }
}

/// Returns the agent's reserved root, creating it under `<body>` if absent.
pub fn ensure_agent_root(document: &Document, agent_root_id: &str) -> Result<Element, DomError> {
    if let Some(root) = document.get_element_by_id(agent_root_id) {
        return Ok(root);
    }
    let root = document.create_element("div")?;
    root.set_id(agent_root_id);
    dom_utils::body(document)?.append_child(&root)?;
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_cursor_has_no_overlay() {
        assert_eq!(CursorState::hidden().overlay_style(), "display:none");
    }

    #[test]
    fn test_clicking_cursor_is_scaled_down() {
        let moving = CursorState::at(10.0, 20.0, "Clicking \"Buy\"");
        assert!(moving.overlay_style().contains("left:10.0px;top:20.0px"));
        assert!(moving.overlay_style().contains("scale(1)"));
        assert!(moving.clicking(true).overlay_style().contains("scale(0.9)"));
    }

    #[test]
    fn test_channel_keeps_latest_state_only() {
        let channel = CursorChannel::new();
        let rx = channel.subscribe();
        channel.publish(CursorState::at(1.0, 1.0, "first"));
        channel.publish(CursorState::at(2.0, 2.0, "second").clicking(true));
        assert_eq!(rx.borrow().label.as_deref(), Some("second"));
        assert!(channel.current().is_clicking);
    }

    #[test]
    fn test_guard_hides_cursor_on_drop() {
        let channel = CursorChannel::new();
        {
            let _guard = CursorGuard::new(&channel);
            channel.publish(CursorState::at(5.0, 5.0, "Typing"));
            assert!(channel.current().visible);
        }
        assert_eq!(channel.current(), CursorState::hidden());
    }
}
