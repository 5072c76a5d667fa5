//! Configuration handed over by the host page, and the per-session engine context.

use serde::Deserialize;
use std::rc::Rc;
use tracing::info;

use crate::llm::{EngineError, GeminiEngine};
use crate::scanner::DEFAULT_SNAPSHOT_LIMIT;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_AGENT_ROOT_ID: &str = "page-agent-root";
pub const DEFAULT_MAX_ROUNDS: u32 = 25;

/// Pauses used by the action executor, in milliseconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionTimings {
    pub cursor_move_ms: u32,
    pub cursor_press_ms: u32,
    pub click_settle_ms: u32,
    pub type_settle_ms: u32,
    pub scroll_settle_ms: u32,
    pub submit_settle_ms: u32,
}

impl Default for ActionTimings {
    fn default() -> Self {
        Self {
            cursor_move_ms: 800,
            cursor_press_ms: 300,
            click_settle_ms: 1000,
            type_settle_ms: 500,
            scroll_settle_ms: 500,
            submit_settle_ms: 1500,
        }
    }
}

impl ActionTimings {
    /// No pauses at all; used by tests.
    pub fn instant() -> Self {
        Self {
            cursor_move_ms: 0,
            cursor_press_ms: 0,
            click_settle_ms: 0,
            type_settle_ms: 0,
            scroll_settle_ms: 0,
            submit_settle_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Activation flag; a disabled agent answers every turn with an error.
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
    /// Cap on engine replies carrying tool calls per turn. `None` is unbounded.
    pub max_rounds: Option<u32>,
    pub request_timeout_ms: u32,
    pub snapshot_limit: usize,
    pub agent_root_id: String,
    pub greeting: Option<String>,
    pub timings: ActionTimings,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            max_rounds: Some(DEFAULT_MAX_ROUNDS),
            request_timeout_ms: 60_000,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            agent_root_id: DEFAULT_AGENT_ROOT_ID.to_string(),
            greeting: None,
            timings: ActionTimings::default(),
        }
    }
}

impl AgentConfig {
    /// Parses the host's JSON config. An empty string yields the defaults.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }

    /// The credential, ignoring blank keys.
    pub fn credential(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

/// Explicit session state: configuration plus the engine handle built from
/// the current credential. Changing the credential drops the handle.
pub struct SessionContext {
    config: AgentConfig,
    engine: Option<Rc<GeminiEngine>>,
}

impl SessionContext {
    pub fn new(config: AgentConfig) -> Self {
        Self { config, engine: None }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    pub fn set_credential(&mut self, api_key: Option<String>) {
        if self.config.api_key != api_key {
            info!("Engine credential changed, dropping cached client");
            self.config.api_key = api_key;
            self.engine = None;
        }
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Engine handle for the current credential, built on first use.
    pub fn engine(&mut self) -> Result<Rc<GeminiEngine>, EngineError> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }
        let key = self.config.credential().ok_or(EngineError::MissingCredential)?;
        let engine = Rc::new(GeminiEngine::new(key, &self.config));
        self.engine = Some(engine.clone());
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AgentConfig::from_json("").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert!(config.enabled);
        assert_eq!(config.snapshot_limit, 10_000);
        assert_eq!(config.timings.click_settle_ms, 1000);
        assert_eq!(config.timings.submit_settle_ms, 1500);
    }

    #[test]
    fn test_partial_config_overrides() {
        let config = AgentConfig::from_json(
            r#"{"enabled": false, "apiKey": "k-123", "maxRounds": null, "timings": {"clickSettleMs": 10}}"#,
        )
        .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.credential(), Some("k-123"));
        assert_eq!(config.max_rounds, None);
        assert_eq!(config.timings.click_settle_ms, 10);
        assert_eq!(config.timings.cursor_move_ms, 800);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_blank_credential_is_missing() {
        let config = AgentConfig { api_key: Some("   ".into()), ..Default::default() };
        assert_eq!(config.credential(), None);
    }

    #[test]
    fn test_missing_credential_fails_engine() {
        let mut session = SessionContext::new(AgentConfig::default());
        assert!(matches!(session.engine(), Err(EngineError::MissingCredential)));
    }

    #[test]
    fn test_credential_change_invalidates_engine() {
        let mut session = SessionContext::new(AgentConfig {
            api_key: Some("first-key".into()),
            ..Default::default()
        });
        let first = session.engine().unwrap();
        assert!(Rc::ptr_eq(&first, &session.engine().unwrap()));

        session.set_credential(Some("first-key".into()));
        assert!(session.has_engine());

        session.set_credential(Some("second-key".into()));
        assert!(!session.has_engine());
        let second = session.engine().unwrap();
        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(second.api_key(), "second-key");
    }
}
