use serde::{Deserialize, Serialize};

use crate::store::TodoItem;

/// One line of the agent's stdout stream. Line-delimited JSON, discriminated
/// by `type`. Unknown record types are skipped by the adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thought {
        content: String,
    },
    ToolUse {
        tool_name: String,
        #[serde(default)]
        tool_input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },
    TodoUpdate {
        todos: Vec<TodoItem>,
    },
    Final(FinalResult),
}

/// The single authoritative record for an agent run. Appears exactly once,
/// as the last meaningful line of stdout.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FinalResult {
    pub success: bool,
    pub num_turns: Option<u32>,
    pub cost_usd: Option<f64>,
    pub model: Option<String>,
    pub session_id: Option<String>,
    pub summary: Option<String>,
    pub suggested_commit_message: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TodoStatus;

    #[test]
    fn parses_thought() {
        let event: AgentEvent =
            serde_json::from_str(r#"{"type":"thought","content":"reading the issue"}"#).unwrap();
        assert_eq!(
            event,
            AgentEvent::Thought {
                content: "reading the issue".into()
            }
        );
    }

    #[test]
    fn parses_tool_use_and_result() {
        let event: AgentEvent = serde_json::from_str(
            r#"{"type":"tool_use","tool_name":"bash","tool_input":{"command":"ls"}}"#,
        )
        .unwrap();
        assert!(matches!(event, AgentEvent::ToolUse { ref tool_name, .. } if tool_name == "bash"));

        let event: AgentEvent =
            serde_json::from_str(r#"{"type":"tool_result","result":"ok","is_error":false}"#)
                .unwrap();
        assert!(matches!(event, AgentEvent::ToolResult { is_error: false, .. }));
    }

    #[test]
    fn parses_todo_update() {
        let event: AgentEvent = serde_json::from_str(
            r#"{"type":"todo_update","todos":[{"id":"1","status":"in_progress","content":"fix"}]}"#,
        )
        .unwrap();
        let AgentEvent::TodoUpdate { todos } = event else {
            panic!("expected todo update");
        };
        assert_eq!(todos[0].status, TodoStatus::InProgress);
    }

    #[test]
    fn parses_final_record() {
        let event: AgentEvent = serde_json::from_str(
            r#"{"type":"final","success":true,"num_turns":12,"cost_usd":0.42,
                "model":"claude-3","session_id":"s-1","summary":"done",
                "suggested_commit_message":"fix: login redirect"}"#,
        )
        .unwrap();
        let AgentEvent::Final(result) = event else {
            panic!("expected final");
        };
        assert!(result.success);
        assert_eq!(result.num_turns, Some(12));
        assert_eq!(
            result.suggested_commit_message.as_deref(),
            Some("fix: login redirect")
        );
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(serde_json::from_str::<AgentEvent>(r#"{"type":"banter","content":"hi"}"#).is_err());
    }
}
