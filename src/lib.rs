use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{info, warn, Level};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

pub mod actions;
pub mod agent;
pub mod config;
pub mod cursor;
pub mod dom_utils;
pub mod llm;
pub mod logging;
pub mod resolver;
pub mod scanner;
pub mod tools;

use crate::actions::ActionExecutor;
use crate::agent::{AgentError, AgentLoop, Conversation, ConversationTurn, Speaker};
use crate::config::{AgentConfig, SessionContext};
use crate::cursor::{CursorChannel, CursorPresenter};
use crate::llm::ReasoningEngine;
use crate::scanner::PageScanner;

/// Page-resident agent exposed to the content script.
#[wasm_bindgen]
pub struct PageAgent {
    inner: Rc<Inner>,
}

struct Inner {
    session: RefCell<SessionContext>,
    conversation: RefCell<Conversation>,
    busy: Cell<bool>,
    surface_open: Cell<bool>,
    cursor: CursorChannel,
    /// Replaces the Gemini client built from the session credential.
    engine_override: Option<Rc<dyn ReasoningEngine>>,
}

/// Clears the busy flag however the turn ends.
struct BusyGuard<'a>(&'a Cell<bool>);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[wasm_bindgen]
impl PageAgent {
    /// Builds the agent from the host's JSON config (empty string for defaults).
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str) -> Result<PageAgent, JsValue> {
        let config = AgentConfig::from_json(config_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid agent config: {}", e)))?;

        let (_window, document) = dom_utils::get_window_document()?;
        cursor::ensure_agent_root(&document, &config.agent_root_id)?;
        let channel = CursorChannel::new();
        CursorPresenter::new(config.agent_root_id.clone()).attach(&channel);

        info!("PageAgent ready (model {}, root #{})", config.model, config.agent_root_id);
        Ok(PageAgent {
            inner: Rc::new(Inner {
                conversation: RefCell::new(Conversation::new(config.greeting.as_deref())),
                session: RefCell::new(SessionContext::new(config)),
                busy: Cell::new(false),
                surface_open: Cell::new(true),
                cursor: channel,
                engine_override: None,
            }),
        })
    }

    /// Runs one user turn. Resolves with the agent's answer, which is also
    /// appended to the conversation log unless the surface has been closed.
    /// Rejects only when a turn is already in progress.
    pub fn send(&self, text: String) -> js_sys::Promise {
        let inner = self.inner.clone();
        future_to_promise(async move {
            if inner.busy.replace(true) {
                warn!("Rejected message while a turn is running");
                return Err(JsValue::from_str(&AgentError::Busy.user_message()));
            }
            let _busy = BusyGuard(&inner.busy);
            let answer = inner.handle_turn(&text).await;
            Ok(JsValue::from_str(&answer))
        })
    }

    #[wasm_bindgen(js_name = setCredential)]
    pub fn set_credential(&self, api_key: Option<String>) {
        self.inner.session.borrow_mut().set_credential(api_key);
    }

    #[wasm_bindgen(js_name = setEnabled)]
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.session.borrow_mut().set_enabled(enabled);
    }

    /// Closing the surface does not cancel a running turn.
    #[wasm_bindgen(js_name = setSurfaceOpen)]
    pub fn set_surface_open(&self, open: bool) {
        self.inner.surface_open.set(open);
    }

    /// The conversation log as a JSON array of `{role, text, timestamp}`.
    pub fn history(&self) -> Result<String, JsValue> {
        serde_json::to_string(&*self.inner.conversation.borrow())
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }
}

#[cfg(feature = "mock-llm")]
impl PageAgent {
    /// Same as [`PageAgent::new`] but every turn talks to `engine`.
    pub fn with_engine(config_json: &str, engine: Rc<dyn ReasoningEngine>) -> Result<PageAgent, JsValue> {
        let mut agent = PageAgent::new(config_json)?;
        match Rc::get_mut(&mut agent.inner) {
            Some(inner) => inner.engine_override = Some(engine),
            None => return Err(JsValue::from_str("PageAgent already shared")),
        }
        Ok(agent)
    }
}

impl Inner {
    async fn handle_turn(&self, text: &str) -> String {
        let history = self.conversation.borrow().engine_history();
        self.conversation
            .borrow_mut()
            .push(ConversationTurn::new(Speaker::User, text));

        let answer = match self.run_turn(text, &history).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Turn failed: {}", e);
                e.user_message()
            }
        };

        if self.surface_open.get() {
            self.conversation
                .borrow_mut()
                .push(ConversationTurn::new(Speaker::Agent, answer.clone()));
        } else {
            info!("Surface closed, discarding answer");
        }
        answer
    }

    async fn run_turn(&self, text: &str, history: &[llm::Content]) -> Result<String, AgentError> {
        let (config, engine) = {
            let mut session = self.session.borrow_mut();
            if !session.config().enabled {
                return Err(AgentError::Disabled);
            }
            let engine: Rc<dyn ReasoningEngine> = match &self.engine_override {
                Some(engine) => engine.clone(),
                None => session.engine()?,
            };
            (session.config().clone(), engine)
        };

        let scanner = PageScanner::new(config.agent_root_id.clone(), config.snapshot_limit);
        let executor = ActionExecutor::new(scanner, self.cursor.clone(), config.timings.clone());
        let outcome = AgentLoop::new(engine.as_ref(), &executor, config.max_rounds)
            .run_turn(text, history)
            .await?;
        Ok(outcome.answer)
    }
}

#[wasm_bindgen(start)]
pub fn run() -> Result<(), JsValue> {
    #[cfg(debug_assertions)]
    console_error_panic_hook::set_once(); // Better panic messages in browser

    let level = if cfg!(debug_assertions) { Level::DEBUG } else { Level::INFO };
    logging::init(level);
    info!("PageAgent module initialized");
    Ok(())
}
