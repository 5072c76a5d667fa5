//! Tool catalogue exposed to the reasoning engine.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

use crate::actions::ActionError;
use crate::llm::FunctionDeclaration;

pub const CLICK_ELEMENT: &str = "clickElement";
pub const TYPE_INPUT: &str = "typeInput";
pub const SCROLL: &str = "scroll";
pub const PRESS_ENTER: &str = "pressEnter";

/// A tool call as issued by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Top => "top",
            ScrollDirection::Bottom => "bottom",
        })
    }
}

/// A validated tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click { target_text: String },
    Type { target_label: String, value: String },
    Scroll { direction: ScrollDirection },
    Submit { target_label: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClickArgs {
    target_text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeArgs {
    target_label: String,
    value: String,
}

#[derive(Deserialize)]
struct ScrollArgs {
    direction: ScrollDirection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PressEnterArgs {
    target_label: String,
}

fn parse_args<T: for<'de> Deserialize<'de>>(tool: &str, args: &Value) -> Result<T, ActionError> {
    serde_json::from_value(args.clone()).map_err(|e| ActionError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

impl TryFrom<&ToolInvocation> for Action {
    type Error = ActionError;

    fn try_from(call: &ToolInvocation) -> Result<Self, Self::Error> {
        let name = call.name.as_str();
        match name {
            CLICK_ELEMENT => {
                let args: ClickArgs = parse_args(name, &call.arguments)?;
                Ok(Action::Click { target_text: args.target_text })
            }
            TYPE_INPUT => {
                let args: TypeArgs = parse_args(name, &call.arguments)?;
                Ok(Action::Type {
                    target_label: args.target_label,
                    value: args.value,
                })
            }
            SCROLL => {
                let args: ScrollArgs = parse_args(name, &call.arguments)?;
                Ok(Action::Scroll { direction: args.direction })
            }
            PRESS_ENTER => {
                let args: PressEnterArgs = parse_args(name, &call.arguments)?;
                Ok(Action::Submit { target_label: args.target_label })
            }
            other => Err(ActionError::UnknownTool(other.to_string())),
        }
    }
}

/// Function declarations for the four tools.
pub fn declarations() -> Vec<FunctionDeclaration> {
    vec![
        FunctionDeclaration {
            name: CLICK_ELEMENT.to_string(),
            description: "Click on an element on the page identified by its visible text or label.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "targetText": {
                        "type": "STRING",
                        "description": "The visible text on the button, link, or element to click (e.g., 'Add to Cart', 'Home', 'Headphones')."
                    }
                },
                "required": ["targetText"]
            }),
        },
        FunctionDeclaration {
            name: TYPE_INPUT.to_string(),
            description: "Type text into an input field identified by its placeholder or label.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "targetLabel": {
                        "type": "STRING",
                        "description": "The placeholder text or label of the input field (e.g., 'Search...')."
                    },
                    "value": {
                        "type": "STRING",
                        "description": "The text to type into the field."
                    }
                },
                "required": ["targetLabel", "value"]
            }),
        },
        FunctionDeclaration {
            name: SCROLL.to_string(),
            description: "Scroll the page up, down, to top, or to bottom.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "direction": {
                        "type": "STRING",
                        "enum": ["up", "down", "top", "bottom"],
                        "description": "Direction to scroll: 'up', 'down', 'top' (scroll to top of page), or 'bottom' (scroll to bottom of page)."
                    }
                },
                "required": ["direction"]
            }),
        },
        FunctionDeclaration {
            name: PRESS_ENTER.to_string(),
            description: "Press the Enter key on an input field to submit a form or search. Use this after typing into a search box.".to_string(),
            parameters: json!({
                "type": "OBJECT",
                "properties": {
                    "targetLabel": {
                        "type": "STRING",
                        "description": "The placeholder text or label of the input field to press Enter on (e.g., 'Search...')."
                    }
                },
                "required": ["targetLabel"]
            }),
        },
    ]
}
