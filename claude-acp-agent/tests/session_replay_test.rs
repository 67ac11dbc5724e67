//! Loading a persisted session: checkpoint reconstruction and history
//! replay through the translator.

mod common;

use agent_client_protocol::{ContentBlock, SessionUpdate};
use claude_acp_agent::playback::{BackendScript, RecordingClient, ScriptedLauncher};
use claude_acp_agent::{AgentConfig, ClaudeAcpAgent, NewSessionParams};
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

fn write_transcript(dir: &std::path::Path, cwd: &str, session_id: &str, lines: &[&str]) {
    let encoded: String = cwd
        .chars()
        .map(|c| if c == '/' { '-' } else { c })
        .collect();
    let project_dir = dir.join("projects").join(encoded);
    std::fs::create_dir_all(&project_dir).unwrap();
    let mut file = std::fs::File::create(project_dir.join(format!("{}.jsonl", session_id))).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
}

#[tokio::test]
async fn load_session_replays_history_and_checkpoints() {
    let transcripts = tempfile::tempdir().unwrap();
    write_transcript(
        transcripts.path(),
        "/tmp/project",
        "sess_old",
        &[
            r#"{"type":"user","uuid":"u1","message":{"role":"user","content":[{"type":"text","text":"hello"},{"type":"text","text":"world"}]}}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"hi there"}]}}"#,
            r#"{"type":"assistant","isSidechain":true,"message":{"role":"assistant","content":[{"type":"text","text":"hidden"}]}}"#,
            r#"{"type":"user","uuid":"u2","message":{"role":"user","content":[{"type":"text","text":"more"},{"type":"text","text":"words"}]}}"#,
        ],
    );

    let client = Rc::new(RecordingClient::new());
    let launcher = Rc::new(ScriptedLauncher::new(vec![BackendScript::default()]));
    let agent = ClaudeAcpAgent::new(client.clone(), launcher.clone(), AgentConfig::default())
        .with_transcripts_dir(transcripts.path().to_path_buf());

    let result = agent
        .load_session(
            "sess_old",
            NewSessionParams {
                cwd: PathBuf::from("/tmp/project"),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(result.session_id, "sess_old");

    // Checkpoints were reconstructed from the transcript.
    assert_eq!(
        agent.resolve_rewind_target("sess_old", "first").unwrap(),
        "u1"
    );
    assert_eq!(
        agent.resolve_rewind_target("sess_old", "latest").unwrap(),
        "u2"
    );

    // Replay produced chunks for both roles; sidechain rows are skipped.
    let texts: Vec<(bool, String)> = client
        .updates()
        .into_iter()
        .filter_map(|update| match update {
            SessionUpdate::AgentMessageChunk(chunk) => match chunk.content {
                ContentBlock::Text(text) => Some((true, text.text)),
                _ => None,
            },
            SessionUpdate::UserMessageChunk(chunk) => match chunk.content {
                ContentBlock::Text(text) => Some((false, text.text)),
                _ => None,
            },
            _ => None,
        })
        .collect();

    assert!(texts.contains(&(true, "hi there".to_string())));
    assert!(texts.contains(&(false, "hello".to_string())));
    assert!(!texts.iter().any(|(_, text)| text == "hidden"));
}

#[tokio::test]
async fn rewind_passes_resolved_target_to_backend() {
    let transcripts = tempfile::tempdir().unwrap();
    write_transcript(
        transcripts.path(),
        "/tmp/project",
        "sess_old",
        &[r#"{"type":"user","uuid":"u1","message":{"role":"user","content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}}"#],
    );

    let client = Rc::new(RecordingClient::new());
    let launcher = Rc::new(ScriptedLauncher::new(vec![BackendScript::default()]));
    let agent = ClaudeAcpAgent::new(client, launcher.clone(), AgentConfig::default())
        .with_transcripts_dir(transcripts.path().to_path_buf());

    agent
        .resume_session(
            "sess_old",
            NewSessionParams {
                cwd: PathBuf::from("/tmp/project"),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let report = agent.rewind_files("sess_old", "latest", true).await.unwrap();
    assert!(report.feasible);

    let backend = launcher.backend(0);
    assert!(backend.calls.borrow().iter().any(|call| matches!(
        call,
        claude_acp_agent::playback::ControlCall::RewindTo { message_id, dry_run }
            if message_id == "u1" && *dry_run
    )));
}
