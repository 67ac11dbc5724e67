//! Permission arbitration flows end to end.

mod common;

use claude_acp_agent::playback::{BackendScript, ControlCall};
use claude_acp_agent::{AgentError, PermissionOutcome, PermissionResult};
use common::*;
use serde_json::json;

async fn session_in_mode(h: &Harness, mode: &str) -> String {
    let session_id = open_session(h).await;
    if mode != "default" {
        h.agent
            .set_session_config_option(&session_id, "mode", mode)
            .await
            .unwrap();
    }
    session_id
}

#[tokio::test]
async fn default_menu_allow_once() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = open_session(&h).await;

    h.client.select("allow");
    let result = h
        .agent
        .authorize_tool_use(&session_id, "Bash", "toolu_1", json!({"command": "ls"}))
        .await
        .unwrap();

    match result {
        PermissionResult::Allow {
            updated_permissions,
            ..
        } => assert!(updated_permissions.is_empty()),
        other => panic!("Expected allow, got {:?}", other),
    }

    let requests = h.client.permission_requests.borrow();
    assert_eq!(requests.len(), 1);
    let ids: Vec<&str> = requests[0]
        .options
        .iter()
        .map(|o| o.option_id.as_str())
        .collect();
    assert_eq!(ids, ["allow_always", "allow", "reject"]);
}

#[tokio::test]
async fn default_menu_allow_always_attaches_persistence_hint() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = open_session(&h).await;

    h.client.select("allow_always");
    let result = h
        .agent
        .authorize_tool_use(&session_id, "Bash", "toolu_1", json!({"command": "ls"}))
        .await
        .unwrap();

    match result {
        PermissionResult::Allow {
            updated_permissions,
            ..
        } => {
            let hint = serde_json::to_value(&updated_permissions).unwrap();
            assert_eq!(hint[0]["type"], "addRules");
            assert_eq!(hint[0]["rules"][0]["toolName"], "Bash");
            assert_eq!(hint[0]["behavior"], "allow");
        }
        other => panic!("Expected allow, got {:?}", other),
    }
}

#[tokio::test]
async fn default_menu_reject_denies() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = open_session(&h).await;

    h.client.select("reject");
    let result = h
        .agent
        .authorize_tool_use(&session_id, "Bash", "toolu_1", json!({}))
        .await
        .unwrap();
    assert!(matches!(result, PermissionResult::Deny { .. }));
}

#[tokio::test]
async fn cancelled_menu_raises_hard_error() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = open_session(&h).await;

    h.client.push_outcome(PermissionOutcome::Cancelled);
    let result = h
        .agent
        .authorize_tool_use(&session_id, "Bash", "toolu_1", json!({}))
        .await;
    assert!(matches!(result, Err(AgentError::Aborted(_))));
}

#[tokio::test]
async fn bypass_mode_auto_allows_without_round_trip() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = session_in_mode(&h, "bypassPermissions").await;

    let result = h
        .agent
        .authorize_tool_use(&session_id, "Bash", "toolu_1", json!({"command": "rm x"}))
        .await
        .unwrap();
    assert!(matches!(result, PermissionResult::Allow { .. }));
    assert!(h.client.permission_requests.borrow().is_empty());
}

#[tokio::test]
async fn accept_edits_auto_allows_file_mutation_tools_only() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = session_in_mode(&h, "acceptEdits").await;

    let result = h
        .agent
        .authorize_tool_use(
            &session_id,
            "mcp__acp__Edit",
            "toolu_1",
            json!({"file_path": "a.rs"}),
        )
        .await
        .unwrap();
    assert!(matches!(result, PermissionResult::Allow { .. }));
    assert!(h.client.permission_requests.borrow().is_empty());

    // Non-edit tools still round-trip.
    h.client.select("allow");
    h.agent
        .authorize_tool_use(&session_id, "Bash", "toolu_2", json!({}))
        .await
        .unwrap();
    assert_eq!(h.client.permission_requests.borrow().len(), 1);
}

fn two_questions() -> serde_json::Value {
    json!({
        "questions": [
            {
                "question": "Which database?",
                "header": "Database",
                "options": [
                    {"label": "Postgres", "description": "relational"},
                    {"label": "Redis", "description": "key-value"}
                ]
            },
            {
                "question": "Which region?",
                "options": [
                    {"label": "us-east", "description": "Virginia"},
                    {"label": "eu-west", "description": "Ireland"}
                ]
            }
        ]
    })
}

#[tokio::test]
async fn ask_user_question_collects_answers_in_order() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = open_session(&h).await;

    h.client.select("ask:0:1");
    h.client.select("ask:1:0");
    let result = h
        .agent
        .authorize_tool_use(&session_id, "AskUserQuestion", "toolu_q", two_questions())
        .await
        .unwrap();

    match result {
        PermissionResult::Allow { updated_input, .. } => {
            assert_eq!(updated_input["answers"]["Which database?"], "Redis");
            assert_eq!(updated_input["answers"]["Which region?"], "us-east");
        }
        other => panic!("Expected allow, got {:?}", other),
    }

    let requests = h.client.permission_requests.borrow();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tool_call.tool_call_id, "toolu_q:0");
    assert_eq!(requests[0].tool_call.title, "Ask user: Database");
    assert_eq!(requests[1].tool_call.tool_call_id, "toolu_q:1");
    // Each menu ends with the synthetic cancel entry.
    assert_eq!(
        requests[1].options.last().unwrap().option_id,
        "ask:1:cancel"
    );
}

#[tokio::test]
async fn ask_user_question_cancel_on_second_question_denies() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = open_session(&h).await;

    h.client.select("ask:0:0");
    h.client.select("ask:1:cancel");
    let result = h
        .agent
        .authorize_tool_use(&session_id, "AskUserQuestion", "toolu_q", two_questions())
        .await
        .unwrap();

    match result {
        PermissionResult::Deny { message, .. } => {
            assert!(message.contains("declined"));
        }
        other => panic!("Expected deny, got {:?}", other),
    }
}

#[tokio::test]
async fn ask_user_question_without_questions_denies() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = open_session(&h).await;

    let result = h
        .agent
        .authorize_tool_use(&session_id, "AskUserQuestion", "toolu_q", json!({}))
        .await
        .unwrap();
    assert!(matches!(result, PermissionResult::Deny { .. }));
    assert!(h.client.permission_requests.borrow().is_empty());
}

#[tokio::test]
async fn exit_plan_menu_order_and_keep_planning() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = open_session(&h).await;

    h.client.select("plan");
    let result = h
        .agent
        .authorize_tool_use(
            &session_id,
            "ExitPlanMode",
            "toolu_p",
            json!({"plan": "1. build"}),
        )
        .await
        .unwrap();
    assert!(matches!(result, PermissionResult::Deny { .. }));

    let requests = h.client.permission_requests.borrow();
    let ids: Vec<&str> = requests[0]
        .options
        .iter()
        .map(|o| o.option_id.as_str())
        .collect();
    assert_eq!(ids, ["clearAndBypass", "bypassPermissions", "default", "plan"]);
    assert_eq!(requests[0].tool_call.title, "Ready to code?");
}

#[tokio::test]
async fn exit_plan_manual_approval_switches_mode() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = session_in_mode(&h, "plan").await;

    h.client.select("default");
    let result = h
        .agent
        .authorize_tool_use(
            &session_id,
            "ExitPlanMode",
            "toolu_p",
            json!({"plan": "1. build"}),
        )
        .await
        .unwrap();

    match result {
        PermissionResult::Allow {
            updated_permissions,
            ..
        } => {
            let hint = serde_json::to_value(&updated_permissions).unwrap();
            assert_eq!(hint[0]["type"], "setMode");
            assert_eq!(hint[0]["mode"], "default");
        }
        other => panic!("Expected allow, got {:?}", other),
    }

    // Mode is now default: setting it again is a no-op.
    let notifications_before = h.client.ext_methods().len();
    h.agent
        .set_session_config_option(&session_id, "mode", "default")
        .await
        .unwrap();
    assert_eq!(h.client.ext_methods().len(), notifications_before);
}

#[tokio::test]
async fn exit_plan_clear_and_bypass_replaces_backend() {
    let h = harness(vec![BackendScript::default(), BackendScript::default()]);
    let session_id = session_in_mode(&h, "plan").await;

    h.client.select("clearAndBypass");
    let result = h
        .agent
        .authorize_tool_use(
            &session_id,
            "ExitPlanMode",
            "toolu_p",
            json!({"plan": "1. build the thing"}),
        )
        .await
        .unwrap();
    assert!(matches!(result, PermissionResult::Allow { .. }));

    // A fresh conversation was launched with no resume.
    assert_eq!(h.launcher.launched.borrow().len(), 2);
    {
        let options = h.launcher.launch_options.borrow();
        assert!(options[1].resume.is_none());
        assert_eq!(
            options[1].mode,
            claude_acp_agent::PermissionMode::BypassPermissions
        );
    }

    // The old conversation was closed; the new one got the plan resubmitted.
    let old = h.launcher.backend(0);
    assert!(old
        .calls
        .borrow()
        .iter()
        .any(|call| matches!(call, ControlCall::Close)));

    let fresh = h.launcher.backend(1);
    let sent = fresh.calls.borrow();
    let plan_message = sent
        .iter()
        .find_map(|call| match call {
            ControlCall::SendUserMessage(message) => Some(message.clone()),
            _ => None,
        })
        .expect("plan must be resubmitted to the fresh conversation");
    let text = plan_message["message"]["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Implement the following plan with full permissions:"));
    assert!(text.contains("1. build the thing"));

    // The session is now in bypass mode: tools auto-allow.
    let allowed = h
        .agent
        .authorize_tool_use(&session_id, "Bash", "toolu_next", json!({}))
        .await
        .unwrap();
    assert!(matches!(allowed, PermissionResult::Allow { .. }));
}

#[tokio::test]
async fn exit_plan_options_hide_bypass_when_ineligible() {
    let h = harness_with_config(
        vec![BackendScript::default()],
        claude_acp_agent::AgentConfig {
            allow_bypass: false,
            ..Default::default()
        },
    );
    let session_id = open_session(&h).await;

    h.client.select("plan");
    h.agent
        .authorize_tool_use(&session_id, "ExitPlanMode", "toolu_p", json!({"plan": "x"}))
        .await
        .unwrap();

    let requests = h.client.permission_requests.borrow();
    let ids: Vec<&str> = requests[0]
        .options
        .iter()
        .map(|o| o.option_id.as_str())
        .collect();
    assert_eq!(ids, ["default", "plan"]);
}

#[tokio::test]
async fn subagent_alias_rewrite_applies_exactly_once() {
    let h = harness(vec![BackendScript::default()]);
    let session_id = session_in_mode(&h, "bypassPermissions").await;

    let input = json!({"subagent_type": "explore-high", "prompt": "map the repo"});
    let first = h
        .agent
        .authorize_tool_use(&session_id, "Task", "toolu_1", input)
        .await
        .unwrap();
    let PermissionResult::Allow { updated_input, .. } = first else {
        panic!("Expected allow");
    };
    assert_eq!(updated_input["subagent_type"], "Explore");
    let prompt = updated_input["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("Use high exploration thoroughness for this task."));

    // Feeding the rewritten input back through does not stack prefaces.
    let second = h
        .agent
        .authorize_tool_use(&session_id, "Task", "toolu_2", updated_input)
        .await
        .unwrap();
    let PermissionResult::Allow { updated_input, .. } = second else {
        panic!("Expected allow");
    };
    let prompt = updated_input["prompt"].as_str().unwrap();
    assert_eq!(prompt.matches("exploration thoroughness").count(), 1);
}
