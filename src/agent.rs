//! AgentLoop: one user turn as an explicit state machine.
//!
//! ```text
//! Sent -> AwaitingEngine -> { ExecutingTools -> AwaitingEngine }* -> Responding -> Done
//! ```
//!
//! Every tool call in an engine reply is answered by exactly one result, and
//! all results of a reply travel back together before the next round.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::actions::{ActionError, PageDriver, ToolResult};
use crate::dom_utils::DomError;
use crate::llm::{Content, EngineError, EngineRequest, FunctionDeclaration, Part, ReasoningEngine, Role};
use crate::scanner::PageSnapshot;
use crate::tools::{self, ToolInvocation};

pub const PAGE_CONTENT_START: &str = "[VISIBLE PAGE CONTENT START]";
pub const PAGE_CONTENT_END: &str = "[VISIBLE PAGE CONTENT END]";
pub const USER_REQUEST_MARKER: &str = "[USER REQUEST]";

/// Final answer when a turn produced no prose.
pub const FALLBACK_ANSWER: &str = "Done.";
/// Turn answer for any engine or turn-level failure.
pub const CONNECTION_TROUBLE: &str = "I'm having trouble connecting right now. Please try again.";
pub const AGENT_DISABLED: &str = "The assistant is disabled for this page.";
pub const AGENT_BUSY: &str = "I'm still working on your previous request.";

pub const SYSTEM_INSTRUCTION: &str = r#"
You are an advanced "Autonomous Website Agent". You exist within the user's browser and can interact with the website just like a human user.

LANGUAGE:
- ALWAYS respond in the SAME LANGUAGE as the user's message.
- If the user writes in Vietnamese (Tiếng Việt), respond in Vietnamese. If the user writes in English, respond in English.

CAPABILITIES:
1. Read Screen: you receive the text content of the current page.
2. Interact: you can click buttons and links, and type into input fields, using the provided tools.
3. Navigate: you can scroll up and down.

YOUR GOAL:
Help the user perform tasks on the website.
- "Find headphones" / "Tìm tai nghe": look for a search input, type the search term, then submit the search.
- "Buy the keyboard" / "Mua bàn phím": find the product and click its "Add to Cart" / "Thêm vào giỏ" button.
- "Go to cart" / "Vào giỏ hàng": find the cart icon or link and click it.

RULES:
- Prioritize DOM interaction. Use the tools to physically interact with page elements based on their text labels.
- clickElement finds the closest matching text. If several elements share a label (for example many "Add to Cart" buttons), open the product detail page first by clicking the product name, then click "Add to Cart" there.

TOOLS:
1. clickElement(targetText): clicks a button, link, or element by its visible text.
2. typeInput(targetLabel, value): finds an input field by placeholder or label and types text.
3. scroll(direction): 'up', 'down', 'top' or 'bottom'.
4. pressEnter(targetLabel): presses Enter on an input field to submit a form or search.

Search workflow example:
- User: "Tìm kiếm laptop gaming"
- Step 1: typeInput("Search", "laptop gaming")
- Step 2: pressEnter("Search") or clickElement("Tìm kiếm") if there is a search button.

RESPONSE:
- Briefly confirm your action in the same language as the user.
- The prompt includes the current page content enclosed in tags like [VISIBLE PAGE CONTENT START]. NEVER include these tags or the page content in your response. Only output your conversational response.
- CHAINING ACTIONS: every tool result contains the NEW page content after the action. Use it to decide your next step immediately within the same turn.
"#;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AgentError {
    #[error("Agent is disabled")]
    Disabled,
    #[error("A turn is already in progress")]
    Busy,
    #[error("Engine communication failed: {0}")]
    Engine(#[from] EngineError),
    #[error("Failed to capture page snapshot: {0}")]
    Snapshot(#[from] DomError),
}

impl AgentError {
    /// Conversational text shown to the user in place of an answer.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Disabled => AGENT_DISABLED.to_string(),
            AgentError::Busy => AGENT_BUSY.to_string(),
            AgentError::Engine(EngineError::MissingCredential) => EngineError::MissingCredential.to_string(),
            AgentError::Engine(_) | AgentError::Snapshot(_) => CONNECTION_TROUBLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationTurn {
    pub role: Speaker,
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: f64,
    /// The greeting placeholder is shown but never sent to the engine.
    #[serde(skip)]
    pub is_greeting: bool,
}

impl ConversationTurn {
    pub fn new(role: Speaker, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: now_millis(),
            is_greeting: false,
        }
    }
}

#[cfg(target_arch = "wasm32")]
fn now_millis() -> f64 {
    js_sys::Date::now()
}

#[cfg(not(target_arch = "wasm32"))]
fn now_millis() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

/// Append-only, in-memory conversation log.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new(greeting: Option<&str>) -> Self {
        let mut conversation = Self::default();
        if let Some(text) = greeting {
            let mut turn = ConversationTurn::new(Speaker::Agent, text);
            turn.is_greeting = true;
            conversation.turns.push(turn);
        }
        conversation
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Prior turns in engine format. The greeting is excluded, as is any user
    /// turn that never got an answer (its reply was discarded while the
    /// surface was closed), so roles keep alternating.
    pub fn engine_history(&self) -> Vec<Content> {
        let turns: Vec<&ConversationTurn> = self.turns.iter().filter(|t| !t.is_greeting).collect();
        turns
            .iter()
            .enumerate()
            .filter(|(i, t)| {
                t.role != Speaker::User || turns.get(i + 1).is_some_and(|next| next.role == Speaker::Agent)
            })
            .map(|(_, t)| Content {
                role: match t.role {
                    Speaker::User => Role::User,
                    Speaker::Agent => Role::Model,
                },
                parts: vec![Part::text(t.text.clone())],
            })
            .collect()
    }
}

/// Wraps the snapshot and the raw request in the delimiter envelope.
pub fn build_prompt(snapshot: &PageSnapshot, user_text: &str) -> String {
    format!(
        "{}\n{}\n{}\n\n{}\n{}",
        PAGE_CONTENT_START, snapshot, PAGE_CONTENT_END, USER_REQUEST_MARKER, user_text
    )
}

/// Strips echoed envelope markers and substitutes the fallback for empty prose.
pub fn sanitize_answer(raw: &str) -> String {
    let cleaned = [PAGE_CONTENT_START, PAGE_CONTENT_END, USER_REQUEST_MARKER]
        .iter()
        .fold(raw.to_string(), |acc, marker| acc.replace(marker, ""));
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        FALLBACK_ANSWER.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Loop position, kept explicit so every transition is visible in one place.
#[derive(Debug)]
enum LoopState {
    Sent,
    AwaitingEngine,
    ExecutingTools(Vec<ToolInvocation>),
    Responding,
    Done(String),
}

/// Result of a completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub answer: String,
    /// Engine round trips made.
    pub rounds: u32,
    /// Tool results produced, including locally answered ones.
    pub tool_results: Vec<(ToolInvocation, ToolResult)>,
}

pub struct AgentLoop<'a, E: ReasoningEngine + ?Sized, D: PageDriver + ?Sized> {
    engine: &'a E,
    driver: &'a D,
    max_rounds: Option<u32>,
    declarations: Vec<FunctionDeclaration>,
}

impl<'a, E: ReasoningEngine + ?Sized, D: PageDriver + ?Sized> AgentLoop<'a, E, D> {
    pub fn new(engine: &'a E, driver: &'a D, max_rounds: Option<u32>) -> Self {
        Self {
            engine,
            driver,
            max_rounds,
            declarations: tools::declarations(),
        }
    }

    /// Runs one user turn to completion. `history` holds the prior turns in
    /// engine format and is not modified.
    pub async fn run_turn(&self, user_text: &str, history: &[Content]) -> Result<TurnOutcome, AgentError> {
        let mut transcript: Vec<Content> = history.to_vec();
        let mut prose = String::new();
        let mut rounds = 0u32;
        let mut tool_rounds = 0u32;
        let mut tool_results = Vec::new();
        let mut state = LoopState::Sent;

        loop {
            state = match state {
                LoopState::Sent => {
                    let snapshot = self.driver.snapshot()?;
                    transcript.push(Content::user_text(build_prompt(&snapshot, user_text)));
                    LoopState::AwaitingEngine
                }
                LoopState::AwaitingEngine => {
                    let request = EngineRequest {
                        system_instruction: SYSTEM_INSTRUCTION,
                        contents: &transcript,
                        tools: &self.declarations,
                    };
                    rounds += 1;
                    let reply = self.engine.generate(&request).await.map_err(|e| {
                        error!("Engine round {} failed: {}", rounds, e);
                        AgentError::from(e)
                    })?;

                    match reply {
                        None => {
                            warn!("Engine reply had no candidates, ending turn");
                            LoopState::Responding
                        }
                        Some(content) => {
                            prose.push_str(&content.prose());
                            let calls = content.tool_invocations();
                            transcript.push(content);
                            if calls.is_empty() {
                                LoopState::Responding
                            } else if self.max_rounds.is_some_and(|cap| tool_rounds >= cap) {
                                warn!("Round limit reached with {} pending tool calls", calls.len());
                                for call in calls {
                                    tool_results.push((call, ToolResult::from(ActionError::RoundLimitReached)));
                                }
                                LoopState::Responding
                            } else {
                                LoopState::ExecutingTools(calls)
                            }
                        }
                    }
                }
                LoopState::ExecutingTools(calls) => {
                    tool_rounds += 1;
                    let mut parts = Vec::with_capacity(calls.len());
                    for call in calls {
                        debug!("Executing {} {}", call.name, call.arguments);
                        let result = self.driver.execute(&call).await;
                        parts.push(Part::function_response(call.name.clone(), result.to_response()));
                        tool_results.push((call, result));
                    }
                    transcript.push(Content { role: Role::User, parts });
                    LoopState::AwaitingEngine
                }
                LoopState::Responding => LoopState::Done(sanitize_answer(&prose)),
                LoopState::Done(answer) => {
                    info!("Turn finished: {} rounds, {} tool calls", rounds, tool_results.len());
                    return Ok(TurnOutcome { answer, rounds, tool_results });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedEngine;
    use async_trait::async_trait;
    use futures::executor::block_on;
    use serde_json::json;
    use std::cell::RefCell;

    /// Records tool calls and answers each with a canned success.
    struct RecordingDriver {
        page: RefCell<String>,
        calls: RefCell<Vec<ToolInvocation>>,
    }

    impl RecordingDriver {
        fn new(page: &str) -> Self {
            Self {
                page: RefCell::new(page.to_string()),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    #[async_trait(?Send)]
    impl PageDriver for RecordingDriver {
        fn snapshot(&self) -> Result<PageSnapshot, DomError> {
            Ok(PageSnapshot::from_raw(&self.page.borrow(), 10_000))
        }

        async fn execute(&self, call: &ToolInvocation) -> ToolResult {
            self.calls.borrow_mut().push(call.clone());
            if call.name == "clickElement" {
                *self.page.borrow_mut() = "Cart (1 item)".to_string();
            }
            ToolResult::success(format!("ran {}", call.name), self.snapshot().unwrap())
        }
    }

    fn click(target: &str) -> ToolInvocation {
        ToolInvocation::new("clickElement", json!({ "targetText": target }))
    }

    #[test]
    fn test_prose_only_reply_runs_no_tools() {
        let engine = ScriptedEngine::new();
        engine.push_text("Done");
        let driver = RecordingDriver::new("Home Products");

        let outcome = block_on(AgentLoop::new(&engine, &driver, None).run_turn("hello", &[])).unwrap();

        assert_eq!(outcome.answer, "Done");
        assert_eq!(outcome.rounds, 1);
        assert!(driver.calls.borrow().is_empty());
    }

    #[test]
    fn test_one_tool_call_then_answer() {
        let engine = ScriptedEngine::new();
        engine.push_calls(None, &[click("Add to Cart")]).push_text("OK");
        let driver = RecordingDriver::new("Mug Add to Cart");

        let outcome = block_on(AgentLoop::new(&engine, &driver, None).run_turn("buy the mug", &[])).unwrap();

        assert_eq!(outcome.answer, "OK");
        assert_eq!(driver.calls.borrow().len(), 1);
        assert_eq!(outcome.tool_results.len(), 1);

        // Second request: prompt, model call, batched function response.
        let requests = engine.requests();
        assert_eq!(requests.len(), 2);
        let last = &requests[1];
        assert_eq!(last.len(), 3);
        let response = last[2].parts[0].function_response.as_ref().unwrap();
        assert_eq!(response.name, "clickElement");
        assert_eq!(response.response["visiblePageContentAfterAction"], "Cart (1 item)");
    }

    #[test]
    fn test_all_calls_in_a_reply_are_batched_in_order() {
        let engine = ScriptedEngine::new();
        engine
            .push_calls(
                Some("Searching... "),
                &[
                    ToolInvocation::new("typeInput", json!({"targetLabel": "Search", "value": "mug"})),
                    ToolInvocation::new("pressEnter", json!({"targetLabel": "Search"})),
                ],
            )
            .push_text("Here are the results.");
        let driver = RecordingDriver::new("Search");

        let outcome = block_on(AgentLoop::new(&engine, &driver, None).run_turn("find mug", &[])).unwrap();

        assert_eq!(outcome.answer, "Searching... Here are the results.");
        let names: Vec<String> = driver.calls.borrow().iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["typeInput", "pressEnter"]);

        let batch = &engine.requests()[1][2];
        assert_eq!(batch.role, Role::User);
        assert_eq!(batch.parts.len(), 2);
    }

    #[test]
    fn test_prompt_envelope_and_history() {
        let engine = ScriptedEngine::new();
        engine.push_text("Sure");
        let driver = RecordingDriver::new("Welcome   to   the shop");
        let history = vec![Content::user_text("hi"), Content::model_text("hello")];

        block_on(AgentLoop::new(&engine, &driver, None).run_turn("go to cart", &history)).unwrap();

        let first = &engine.requests()[0];
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], history[0]);
        assert_eq!(
            first[2].parts[0].text.as_deref(),
            Some("[VISIBLE PAGE CONTENT START]\nWelcome to the shop\n[VISIBLE PAGE CONTENT END]\n\n[USER REQUEST]\ngo to cart")
        );
    }

    #[test]
    fn test_engine_failure_is_turn_error() {
        let engine = ScriptedEngine::new();
        engine.push_error(EngineError::Network("offline".into()));
        let driver = RecordingDriver::new("page");

        let err = block_on(AgentLoop::new(&engine, &driver, None).run_turn("hi", &[])).unwrap_err();

        assert_eq!(err, AgentError::Engine(EngineError::Network("offline".into())));
        assert_eq!(err.user_message(), CONNECTION_TROUBLE);
    }

    #[test]
    fn test_missing_candidates_keeps_accumulated_prose() {
        let engine = ScriptedEngine::new();
        engine.push_calls(Some("Clicking now."), &[click("Home")]).push_empty();
        let driver = RecordingDriver::new("Home");

        let outcome = block_on(AgentLoop::new(&engine, &driver, None).run_turn("home", &[])).unwrap();

        assert_eq!(outcome.answer, "Clicking now.");
        assert_eq!(driver.calls.borrow().len(), 1);
    }

    #[test]
    fn test_no_prose_falls_back() {
        let engine = ScriptedEngine::new();
        engine.push_calls(None, &[click("Home")]).push_calls(None, &[]);
        let driver = RecordingDriver::new("Home");

        let outcome = block_on(AgentLoop::new(&engine, &driver, None).run_turn("home", &[])).unwrap();
        assert_eq!(outcome.answer, FALLBACK_ANSWER);
    }

    #[test]
    fn test_round_cap_answers_pending_calls_locally() {
        let engine = ScriptedEngine::new();
        engine
            .push_calls(Some("one "), &[click("A")])
            .push_calls(Some("two"), &[click("B"), click("C")]);
        let driver = RecordingDriver::new("A B C");

        let outcome = block_on(AgentLoop::new(&engine, &driver, Some(1)).run_turn("click all", &[])).unwrap();

        assert_eq!(outcome.answer, "one two");
        assert_eq!(driver.calls.borrow().len(), 1);
        assert_eq!(outcome.tool_results.len(), 3);
        assert_eq!(
            outcome.tool_results[2].1,
            ToolResult::Failure { error: "Round limit reached; tool call not executed.".into() }
        );
        assert_eq!(engine.requests().len(), 2);
    }

    #[test]
    fn test_sanitize_strips_markers() {
        assert_eq!(
            sanitize_answer("[VISIBLE PAGE CONTENT START] Added to cart. [USER REQUEST]"),
            "Added to cart."
        );
        assert_eq!(sanitize_answer("  [VISIBLE PAGE CONTENT END]  "), FALLBACK_ANSWER);
        assert_eq!(sanitize_answer(""), FALLBACK_ANSWER);
    }

    #[test]
    fn test_history_excludes_greeting() {
        let mut conversation = Conversation::new(Some("Xin chào!"));
        conversation.push(ConversationTurn::new(Speaker::User, "click Home"));
        conversation.push(ConversationTurn::new(Speaker::Agent, "Done."));

        assert_eq!(conversation.turns().len(), 3);
        let history = conversation.engine_history();
        assert_eq!(history, vec![Content::user_text("click Home"), Content::model_text("Done.")]);
    }

    #[test]
    fn test_history_skips_unanswered_user_turns() {
        let mut conversation = Conversation::new(None);
        conversation.push(ConversationTurn::new(Speaker::User, "scroll down"));
        conversation.push(ConversationTurn::new(Speaker::User, "go to cart"));
        conversation.push(ConversationTurn::new(Speaker::Agent, "Opened the cart."));
        conversation.push(ConversationTurn::new(Speaker::User, "checkout"));

        assert_eq!(conversation.turns().len(), 4);
        assert_eq!(
            conversation.engine_history(),
            vec![Content::user_text("go to cart"), Content::model_text("Opened the cart.")]
        );
    }

    #[test]
    fn test_user_messages_for_turn_errors() {
        assert_eq!(
            AgentError::Engine(EngineError::MissingCredential).user_message(),
            "No API key configured. Please set your Gemini API key in the extension settings."
        );
        assert_eq!(AgentError::Snapshot(DomError::NoBody).user_message(), CONNECTION_TROUBLE);
        assert_eq!(AgentError::Disabled.user_message(), AGENT_DISABLED);
    }
}
