//! Permission arbitration
//!
//! One decision per tool invocation attempt. Most tools get the standard
//! three-option menu (or an auto-allow under bypass / accept-edits); two
//! tools run multi-step sub-protocols with the client: the ask-user-question
//! tool answers its questions strictly in order, and the exit-plan-mode tool
//! arbitrates the transition out of planning, including the
//! clear-context-and-bypass path that replaces the backend conversation.

use crate::agent::ClaudeAcpAgent;
use crate::backend::LaunchOptions;
use crate::config::PermissionMode;
use crate::error::{AgentError, Result};
use crate::events::SdkUserMessage;
use crate::permissions::{
    allow_rule_hint, default_tool_options, exit_plan_options, normalize_tool_input, set_mode_hint,
    PermissionOption, PermissionOptionKind, PermissionOutcome, PermissionRequest,
    PermissionResult, PermissionToolCall,
};
use crate::session::Session;
use crate::tool_classification::{base_tool_name, is_edit_tool, tool_info};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::rc::Rc;

impl ClaudeAcpAgent {
    /// Decide one tool invocation attempt.
    ///
    /// Returns the decision for the backend; a cancelled client round-trip
    /// raises [`AgentError::Aborted`], which fails the surrounding turn
    /// without tearing down the session.
    pub async fn authorize_tool_use(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_use_id: &str,
        input: Value,
    ) -> Result<PermissionResult> {
        let Ok(session) = self.session(session_id) else {
            return Ok(PermissionResult::deny("Session not found"));
        };

        let input = normalize_tool_input(tool_name, &input);

        match base_tool_name(tool_name) {
            "AskUserQuestion" => {
                self.ask_user_question(session_id, tool_use_id, input).await
            }
            "ExitPlanMode" => {
                self.exit_plan_mode(&session, session_id, tool_name, tool_use_id, input)
                    .await
            }
            _ => {
                let mode = { session.borrow().config.mode };
                if mode == PermissionMode::BypassPermissions
                    || (mode == PermissionMode::AcceptEdits && is_edit_tool(tool_name))
                {
                    return Ok(PermissionResult::allow_with(
                        input,
                        allow_rule_hint(tool_name),
                    ));
                }
                self.default_tool_permission(session_id, tool_name, tool_use_id, input)
                    .await
            }
        }
    }

    /// The standard three-option menu.
    async fn default_tool_permission(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_use_id: &str,
        input: Value,
    ) -> Result<PermissionResult> {
        let info = tool_info(tool_name, &input);
        let outcome = self
            .client
            .request_permission(PermissionRequest {
                session_id: session_id.to_string(),
                tool_call: PermissionToolCall {
                    tool_call_id: tool_use_id.to_string(),
                    title: info.title,
                    raw_input: input.clone(),
                },
                options: default_tool_options(),
            })
            .await?;

        match outcome {
            PermissionOutcome::Cancelled => Err(AgentError::Aborted(
                "permission request cancelled".to_string(),
            )),
            PermissionOutcome::Selected { option_id } => match option_id.as_str() {
                "allow_always" => Ok(PermissionResult::allow_with(
                    input,
                    allow_rule_hint(tool_name),
                )),
                "allow" => Ok(PermissionResult::allow(input)),
                _ => Ok(PermissionResult::deny(
                    "User refused permission to run tool",
                )),
            },
        }
    }

    /// Ask-user-question sub-protocol: one client round-trip per question,
    /// strictly in order; the allow result carries an `answers` map from
    /// question text to chosen option label.
    async fn ask_user_question(
        &self,
        session_id: &str,
        tool_use_id: &str,
        input: Value,
    ) -> Result<PermissionResult> {
        let Some(questions) = input.get("questions").and_then(|q| q.as_array()).cloned() else {
            return Ok(PermissionResult::deny(
                "AskUserQuestion requires at least one question",
            ));
        };
        if questions.is_empty() {
            return Ok(PermissionResult::deny(
                "AskUserQuestion requires at least one question",
            ));
        }

        let mut answers = Map::new();

        for (question_index, question) in questions.iter().enumerate() {
            let Some(question_object) = question.as_object() else {
                return Ok(PermissionResult::deny(
                    "AskUserQuestion question payload is invalid",
                ));
            };
            let question_text = question_object
                .get("question")
                .and_then(|q| q.as_str())
                .unwrap_or_default();
            let header = question_object
                .get("header")
                .and_then(|h| h.as_str())
                .filter(|h| !h.is_empty());
            let raw_options = question_object
                .get("options")
                .and_then(|o| o.as_array())
                .cloned()
                .unwrap_or_default();
            if question_text.is_empty() || raw_options.is_empty() {
                return Ok(PermissionResult::deny(
                    "AskUserQuestion requires question text and options",
                ));
            }

            // (option id, display name, answer label)
            let mut options: Vec<(String, String, String)> = Vec::new();
            for (option_index, option) in raw_options.iter().enumerate() {
                let label = option.get("label").and_then(|l| l.as_str());
                let description = option.get("description").and_then(|d| d.as_str());
                if let (Some(label), Some(description)) = (label, description) {
                    options.push((
                        format!("ask:{}:{}", question_index, option_index),
                        format!("{} - {}", label, description),
                        label.to_string(),
                    ));
                }
            }
            if options.is_empty() {
                return Ok(PermissionResult::deny("AskUserQuestion options are invalid"));
            }

            let cancel_option_id = format!("ask:{}:cancel", question_index);
            let mut menu: Vec<PermissionOption> = options
                .iter()
                .map(|(option_id, name, _)| {
                    PermissionOption::new(option_id, name, PermissionOptionKind::AllowOnce)
                })
                .collect();
            menu.push(PermissionOption::new(
                &cancel_option_id,
                "Cancel",
                PermissionOptionKind::RejectOnce,
            ));

            let outcome = self
                .client
                .request_permission(PermissionRequest {
                    session_id: session_id.to_string(),
                    tool_call: PermissionToolCall {
                        tool_call_id: format!("{}:{}", tool_use_id, question_index),
                        title: match header {
                            Some(header) => format!("Ask user: {}", header),
                            None => "Ask user question".to_string(),
                        },
                        raw_input: question.clone(),
                    },
                    options: menu,
                })
                .await?;

            match outcome {
                PermissionOutcome::Cancelled => {
                    return Err(AgentError::Aborted("ask-user-question cancelled".to_string()))
                }
                PermissionOutcome::Selected { option_id } if option_id == cancel_option_id => {
                    return Ok(PermissionResult::deny(
                        "User declined to answer AskUserQuestion",
                    ));
                }
                PermissionOutcome::Selected { option_id } => {
                    let Some((_, _, label)) =
                        options.iter().find(|(id, _, _)| *id == option_id)
                    else {
                        return Ok(PermissionResult::deny(
                            "Selected AskUserQuestion option was not recognized",
                        ));
                    };
                    answers.insert(question_text.to_string(), Value::String(label.clone()));
                }
            }
        }

        let mut updated = input.as_object().cloned().unwrap_or_default();
        updated.insert("answers".to_string(), Value::Object(answers));
        Ok(PermissionResult::allow(Value::Object(updated)))
    }

    /// Exit-plan-mode sub-protocol.
    async fn exit_plan_mode(
        &self,
        session: &Rc<RefCell<Session>>,
        session_id: &str,
        tool_name: &str,
        tool_use_id: &str,
        input: Value,
    ) -> Result<PermissionResult> {
        let info = tool_info(tool_name, &input);
        let outcome = self
            .client
            .request_permission(PermissionRequest {
                session_id: session_id.to_string(),
                tool_call: PermissionToolCall {
                    tool_call_id: tool_use_id.to_string(),
                    title: info.title,
                    raw_input: input.clone(),
                },
                options: exit_plan_options(self.config.allow_bypass),
            })
            .await?;

        let option_id = match outcome {
            PermissionOutcome::Cancelled => {
                return Err(AgentError::Aborted("exit-plan-mode cancelled".to_string()))
            }
            PermissionOutcome::Selected { option_id } => option_id,
        };

        if option_id == "clearAndBypass" {
            self.note_mode_state(session, PermissionMode::BypassPermissions);
            self.emit_mode_update(session_id, PermissionMode::BypassPermissions)
                .await?;
            let plan_text = input
                .get("plan")
                .and_then(|p| p.as_str())
                .unwrap_or_default()
                .to_string();
            self.reset_conversation(session, session_id, &plan_text)
                .await?;
            return Ok(PermissionResult::allow_with(
                input,
                set_mode_hint(PermissionMode::BypassPermissions),
            ));
        }

        match PermissionMode::parse(&option_id) {
            Some(mode) if mode != PermissionMode::Plan => {
                // The backend applies the approved mode itself when the plan
                // tool is allowed; only the local state and the client need
                // telling.
                let changed = self.note_mode_state(session, mode);
                if changed {
                    self.emit_mode_update(session_id, mode).await?;
                }
                Ok(PermissionResult::allow_with(input, set_mode_hint(mode)))
            }
            _ => Ok(PermissionResult::deny(
                "User rejected request to exit plan mode.",
            )),
        }
    }

    /// Replace the backend conversation with a fresh one (no prior turns)
    /// and resubmit the approved plan as a new instruction.
    pub(crate) async fn reset_conversation(
        &self,
        session: &Rc<RefCell<Session>>,
        session_id: &str,
        plan_text: &str,
    ) -> Result<()> {
        let (cwd, include_partial, max_thinking_tokens, old_control) = {
            let session = session.borrow();
            (
                session.cwd.clone(),
                session.config.enable_partial_messages,
                session.config.max_thinking_tokens,
                Rc::clone(&session.control),
            )
        };

        let conn = self
            .launcher
            .launch(LaunchOptions {
                cwd,
                session_id: session_id.to_string(),
                resume: None,
                fork_session: false,
                mode: PermissionMode::BypassPermissions,
                allow_bypass: self.config.allow_bypass,
                include_partial_messages: include_partial,
                max_thinking_tokens,
                ..LaunchOptions::default()
            })
            .await?;

        if let Err(err) = old_control.close().await {
            tracing::error!("Failed to close replaced backend for {}: {}", session_id, err);
        }
        session.borrow_mut().replace_backend(conn);

        let control = { Rc::clone(&session.borrow().control) };
        control
            .send_user_message(SdkUserMessage::text(
                session_id,
                format!(
                    "Implement the following plan with full permissions:\n\n{}",
                    plan_text
                ),
            ))
            .await
    }
}
