//! End-to-end turns of the video agent against scripted services.

mod common;

use futures::StreamExt;
use std::sync::Arc;

use common::{search_turn, two_hits, BlockingTools, Event, Harness};
use jockey_graph::jockey::{JockeyNode, JockeyOptions, SessionUpdate, SIMPLE_VIDEO_SEARCH};
use jockey_graph::{
    EngineConfig, ErrorAction, ErrorKind, ErrorOrigin, ExecutionEvent, ScriptedToolExecutor,
    SessionError, SessionStatus, ToolError,
};

// =============================================================================
// Happy path
// =============================================================================

/// Search request: supervisor -> planner -> video-search -> reflect -> END
#[tokio::test]
async fn test_two_clip_search_turn() {
    let harness = Harness::scripted(
        ScriptedToolExecutor::new().returns(SIMPLE_VIDEO_SEARCH, two_hits()),
    );
    search_turn(&harness.decisions);
    harness.decisions.push("summary", "Here are two dunk clips.");
    let manager = harness.default_manager();

    let handle = manager
        .start(SessionUpdate::user_input("find two clips of a dunk"))
        .expect("session starts");
    let id = handle.session_id.clone();
    let Some(ExecutionEvent::Completed { state, .. }) = handle.finish().await else {
        panic!("turn should complete");
    };

    assert_eq!(state.history.len(), 1 + 3);
    let speakers: Vec<_> = state.history.iter().filter_map(|m| m.name.as_deref()).collect();
    assert_eq!(speakers, vec!["human", "planner", "video-search", "reflect"]);
    assert_eq!(state.result_cache["call_1"].len(), 2);
    assert_eq!(state.active_plan, None);
    assert!(!state.plan_made);
    assert_eq!(state.next_node, None);
    assert_eq!(harness.decisions.remaining(), 0);

    let snapshot = manager.get_state(&id).await.unwrap().expect("session exists");
    assert_eq!(snapshot.status, SessionStatus::Idle);
    assert_eq!(snapshot.pending, None);
    // input, supervisor, planner, video-search, reflect
    assert_eq!(snapshot.step, 5);
    assert_eq!(snapshot.state, state);
}

/// Events arrive in execution order and end with the terminal one.
#[tokio::test]
async fn test_event_stream_follows_the_graph() {
    let harness = Harness::scripted(
        ScriptedToolExecutor::new().returns(SIMPLE_VIDEO_SEARCH, two_hits()),
    );
    search_turn(&harness.decisions);
    harness.decisions.push("summary", "Done.");
    let manager = harness.default_manager();

    let handle = manager
        .start(SessionUpdate::user_input("find two clips of a dunk"))
        .unwrap();
    let events: Vec<Event> = handle.events.collect().await;

    let completed: Vec<JockeyNode> = events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::NodeCompleted { node, .. } => Some(*node),
            _ => None,
        })
        .collect();
    assert_eq!(
        completed,
        vec![
            JockeyNode::Supervisor,
            JockeyNode::Planner,
            JockeyNode::VideoSearch,
            JockeyNode::Reflect
        ]
    );
    assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { node: JockeyNode::Supervisor, .. })));
    assert!(matches!(events.last(), Some(ExecutionEvent::Completed { .. })));
}

/// A follow-up turn on the same session reuses the cache numbering.
#[tokio::test]
async fn test_second_turn_extends_result_cache() {
    let harness = Harness::scripted(
        ScriptedToolExecutor::new()
            .returns(SIMPLE_VIDEO_SEARCH, two_hits())
            .returns(SIMPLE_VIDEO_SEARCH, two_hits()),
    );
    let manager = harness.default_manager();

    search_turn(&harness.decisions);
    harness.decisions.push("summary", "First.");
    let handle = manager.start(SessionUpdate::user_input("find dunks")).unwrap();
    let id = handle.session_id.clone();
    handle.finish().await;

    search_turn(&harness.decisions);
    harness.decisions.push("select-results", r#"["call_1"]"#);
    harness.decisions.push("summary", "Second.");
    let handle = manager
        .send(&id, SessionUpdate::user_input("more like these"))
        .await
        .unwrap();
    let Some(ExecutionEvent::Completed { state, .. }) = handle.finish().await else {
        panic!("second turn should complete");
    };

    assert_eq!(state.result_cache.len(), 2);
    assert_eq!(state.result_cache["call_2"].len(), 2);
    assert_eq!(state.history.len(), 8);
}

// =============================================================================
// Failures
// =============================================================================

/// An undeclared routing value halts the run; the last checkpoint is the
/// one written before the router ran.
#[tokio::test]
async fn test_undeclared_route_keeps_pre_router_checkpoint() {
    let harness = Harness::scripted(ScriptedToolExecutor::new());
    harness.decisions.push("route", "DO-SOMETHING-UNDEFINED");
    let manager = harness.default_manager();

    let handle = manager.start(SessionUpdate::user_input("do it")).unwrap();
    let id = handle.session_id.clone();
    let Some(ExecutionEvent::Failed { error, .. }) = handle.finish().await else {
        panic!("run should fail");
    };
    assert_eq!(error.kind, ErrorKind::MalformedDecisionOutput);
    assert_eq!(error.origin, ErrorOrigin::Router);
    assert_eq!(error.node, "supervisor");

    let snapshot = manager.get_state(&id).await.unwrap().unwrap();
    assert_eq!(snapshot.step, 1);
    assert_eq!(snapshot.pending, Some(JockeyNode::Supervisor));
    assert_eq!(snapshot.status, SessionStatus::InProgress);
    assert_eq!(snapshot.state.history.len(), 1);
    assert_eq!(snapshot.last_error, Some(error));
}

/// Resuming a failed session with an empty patch changes nothing before
/// the pending node runs again.
#[tokio::test]
async fn test_empty_patch_resume_leaves_state_untouched() {
    let harness = Harness::scripted(ScriptedToolExecutor::new());
    harness.decisions.push("route", "DO-SOMETHING-UNDEFINED");
    harness.decisions.push("route", "DO-SOMETHING-UNDEFINED");
    let manager = harness.default_manager();

    let handle = manager.start(SessionUpdate::user_input("do it")).unwrap();
    let id = handle.session_id.clone();
    handle.finish().await;
    let before = manager.get_state(&id).await.unwrap().unwrap();

    let handle = manager
        .resume(&id, SessionUpdate::default())
        .await
        .unwrap()
        .expect("failed sessions are resumable");
    assert!(matches!(handle.finish().await, Some(ExecutionEvent::Failed { .. })));

    let after = manager.get_state(&id).await.unwrap().unwrap();
    assert_eq!(after.step, before.step);
    assert_eq!(after.state, before.state);
}

/// Tool failures halt by default and carry the tool name.
#[tokio::test]
async fn test_tool_failure_halts_with_function() {
    let harness = Harness::scripted(ScriptedToolExecutor::new().fails(
        SIMPLE_VIDEO_SEARCH,
        ToolError::Status {
            tool: SIMPLE_VIDEO_SEARCH.into(),
            status: 503,
            body: "index warming up".into(),
        },
    ));
    search_turn(&harness.decisions);
    let manager = harness.default_manager();

    let handle = manager.start(SessionUpdate::user_input("find dunks")).unwrap();
    let id = handle.session_id.clone();
    let Some(ExecutionEvent::Failed { error, .. }) = handle.finish().await else {
        panic!("run should fail");
    };
    assert_eq!(error.kind, ErrorKind::ExternalCallFailure);
    assert_eq!(error.origin, ErrorOrigin::Worker);
    assert_eq!(error.function.as_deref(), Some(SIMPLE_VIDEO_SEARCH));

    let snapshot = manager.get_state(&id).await.unwrap().unwrap();
    assert_eq!(snapshot.pending, Some(JockeyNode::VideoSearch));
    assert_eq!(
        snapshot.state.pending_tool_call.as_deref(),
        Some(SIMPLE_VIDEO_SEARCH)
    );
}

/// With report-and-continue, the failure is recorded and the reflector
/// explains it.
#[tokio::test]
async fn test_report_and_continue_reaches_reflect() {
    let harness = Harness::scripted(ScriptedToolExecutor::new().fails(
        SIMPLE_VIDEO_SEARCH,
        ToolError::Timeout {
            tool: SIMPLE_VIDEO_SEARCH.into(),
        },
    ));
    search_turn(&harness.decisions);
    harness.decisions.push("summary", "The search timed out, please retry.");
    let manager = harness.manager(
        JockeyOptions::default(),
        EngineConfig::default().with_external_call_action(ErrorAction::ReportAndContinue),
    );

    let handle = manager.start(SessionUpdate::user_input("find dunks")).unwrap();
    let events: Vec<Event> = handle.events.collect().await;

    let reported = events
        .iter()
        .find_map(|event| match event {
            ExecutionEvent::ErrorReported { error, .. } => Some(error.clone()),
            _ => None,
        })
        .expect("failure is reported");
    assert_eq!(reported.node, "video-search");

    let Some(ExecutionEvent::Completed { state, .. }) = events.last() else {
        panic!("run should complete");
    };
    let speakers: Vec<_> = state.history.iter().filter_map(|m| m.name.as_deref()).collect();
    assert_eq!(speakers, vec!["human", "planner", "error", "reflect"]);
    assert_eq!(state.pending_tool_call, None);
}

/// The step cap is reported as resource exhaustion at the node that would
/// have run next.
#[tokio::test]
async fn test_step_cap_is_resource_exhaustion() {
    let harness = Harness::scripted(ScriptedToolExecutor::new());
    search_turn(&harness.decisions);
    let manager = harness.manager(
        JockeyOptions::default(),
        EngineConfig::default().with_max_steps(2),
    );

    let handle = manager.start(SessionUpdate::user_input("find dunks")).unwrap();
    let id = handle.session_id.clone();
    let Some(ExecutionEvent::Failed { error, .. }) = handle.finish().await else {
        panic!("run should fail");
    };
    assert_eq!(error.kind, ErrorKind::ResourceExhaustion);
    assert_eq!(error.node, "video-search");

    let snapshot = manager.get_state(&id).await.unwrap().unwrap();
    assert_eq!(snapshot.step, 3);
    assert_eq!(snapshot.pending, Some(JockeyNode::VideoSearch));
}

// =============================================================================
// Concurrency and cancellation
// =============================================================================

/// A second turn on a busy session is rejected; cancelling stops the run
/// before the next node and a later resume finishes it.
#[tokio::test]
async fn test_busy_session_and_cancellation() {
    let tools = Arc::new(BlockingTools::default());
    let harness = Harness::new(tools.clone());
    search_turn(&harness.decisions);
    let manager = harness.default_manager();

    let handle = manager.start(SessionUpdate::user_input("find dunks")).unwrap();
    let id = handle.session_id.clone();
    tools.started.notified().await;

    let err = manager
        .send(&id, SessionUpdate::user_input("hurry up"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Busy(ref busy) if *busy == id));
    assert!(manager.get_state(&id).await.unwrap().unwrap().running);

    assert!(manager.cancel(&id));
    tools.release.notify_one();
    assert!(matches!(handle.finish().await, Some(ExecutionEvent::Interrupted { .. })));

    let snapshot = manager.get_state(&id).await.unwrap().unwrap();
    assert!(!snapshot.running);
    assert_eq!(snapshot.pending, Some(JockeyNode::Reflect));
    assert_eq!(snapshot.status, SessionStatus::InProgress);
    assert_eq!(snapshot.state.result_cache["call_1"].len(), 2);

    harness.decisions.push("summary", "Two dunks.");
    let handle = manager
        .resume(&id, SessionUpdate::default())
        .await
        .unwrap()
        .expect("interrupted sessions are resumable");
    assert!(matches!(handle.finish().await, Some(ExecutionEvent::Completed { .. })));
}

/// Different sessions run side by side.
#[tokio::test]
async fn test_sessions_are_independent() {
    let harness = Harness::scripted(ScriptedToolExecutor::new());
    harness.decisions.push("route", "reflect");
    harness.decisions.push("route", "reflect");
    harness.decisions.push("summary", "Hello!");
    harness.decisions.push("summary", "Hello!");
    let manager = harness.default_manager();

    let first = manager.start(SessionUpdate::user_input("hi")).unwrap();
    let second = manager.start(SessionUpdate::user_input("hi")).unwrap();
    assert_ne!(first.session_id, second.session_id);

    let (a, b) = tokio::join!(first.finish(), second.finish());
    for outcome in [a, b] {
        let Some(ExecutionEvent::Completed { state, .. }) = outcome else {
            panic!("both sessions complete");
        };
        assert_eq!(state.history.len(), 2);
    }
}
