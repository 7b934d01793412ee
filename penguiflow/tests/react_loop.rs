//! End-to-end: single-tool happy path through the full runtime.
//!
//! One plan step calling `weather.current`, then a finish. Asserts the event
//! sequence, the answer gate tagging, the trajectory shape, and the typed
//! run-event encoding.


use std::sync::Arc;

use serde_json::json;

use flow_event::EventKind;
use penguiflow::streaming::RunEventAdapter;
use penguiflow::{
    Action, FnTool, MockLlm, PenguiFlow, PlannedCall, Query, RunOutcome, SideEffects, Tool,
    ToolDescriptor,
};

fn weather_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDescriptor::new("current", "Current weather for a city")
            .with_schemas(
                json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                }),
                json!({
                    "type": "object",
                    "properties": {"temp_c": {"type": "number"}, "desc": {"type": "string"}}
                }),
            )
            .with_side_effects(SideEffects::Read),
        |args, _ctx| async move {
            assert_eq!(args["city"], "paris");
            Ok(json!({"temp_c": 12, "desc": "cloudy"}))
        },
    ))
}

fn flow() -> PenguiFlow {
    let llm = MockLlm::plan_then_finish(
        vec![PlannedCall::new("weather.current", json!({"city": "paris"}))],
        "It is 12C and cloudy in Paris.",
    );
    PenguiFlow::builder()
        .with_llm(Arc::new(llm))
        .register_tool("weather", weather_tool())
        .build()
        .expect("wiring")
}

#[tokio::test]
async fn single_tool_happy_path_events_and_trajectory() {
    let flow = flow();
    let handle = flow.run(Query::new("weather in paris", "sess-1"));
    let trace_id = handle.trace_id().to_string();
    let mut sub = handle.events().await;

    let outcome = handle.join().await;
    match &outcome {
        RunOutcome::Finished {
            answer,
            answer_action_seq,
        } => {
            assert!(answer.contains("cloudy"));
            assert_eq!(*answer_action_seq, 0);
        }
        other => panic!("expected finished, got {other:?}"),
    }

    let mut events = Vec::new();
    while let Some(event) = sub.recv().await {
        events.push(event);
    }

    // seq is contiguous from 0 with unique event ids.
    let mut ids = std::collections::HashSet::new();
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64);
        assert_eq!(event.trace_id, trace_id);
        assert!(ids.insert(event.event_id.clone()));
    }

    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    let expected_order = [
        EventKind::StepStart,
        EventKind::ToolCallStart,
        EventKind::ToolCallArgs,
        EventKind::ToolCallEnd,
        EventKind::ToolCallResult,
        EventKind::StepEnd,
        EventKind::Chunk,
        EventKind::Done,
    ];
    let mut cursor = 0;
    for kind in kinds {
        if cursor < expected_order.len() && kind == expected_order[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(cursor, expected_order.len(), "lifecycle events out of order");

    let step_starts: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::StepStart)
        .collect();
    assert_eq!(step_starts.len(), 1);
    assert_eq!(step_starts[0].payload["action_seq"], 0);

    let chunks: Vec<_> = events.iter().filter(|e| e.kind == EventKind::Chunk).collect();
    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert_eq!(chunk.payload["channel"], "answer");
        assert_eq!(chunk.payload["action_seq"], 0);
        assert_eq!(chunk.payload["final"], true);
    }

    let done = events.last().expect("terminal event");
    assert_eq!(done.kind, EventKind::Done);
    assert_eq!(done.payload["answer_action_seq"], 0);

    // Trajectory: one plan step with the identity-redacted result, then the
    // finish.
    let steps = flow.trajectory().steps(&trace_id);
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].index, 0);
    assert!(matches!(steps[0].action, Action::Plan { .. }));
    let observation = steps[0].observation.as_ref().expect("plan observation");
    assert_eq!(observation["parallel"], false);
    assert_eq!(
        observation["tool_results"][0]["output"],
        json!({"temp_c": 12, "desc": "cloudy"})
    );
    assert!(observation["tool_results"][0].get("error").is_none());
    assert!(matches!(steps[1].action, Action::Finish { .. }));
}

#[tokio::test]
async fn typed_run_events_cover_the_happy_path() {
    let flow = flow();
    let handle = flow.run(Query::new("weather in paris", "sess-1"));
    let mut sub = handle.events().await;
    assert!(matches!(handle.join().await, RunOutcome::Finished { .. }));

    let mut adapter = RunEventAdapter::new();
    let mut typed = Vec::new();
    while let Some(event) = sub.recv().await {
        typed.extend(adapter.encode(event));
    }

    let types: Vec<&str> = typed.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types.first(), Some(&"RUN_STARTED"));
    assert_eq!(types.last(), Some(&"RUN_FINISHED"));
    for required in [
        "TOOL_CALL_START",
        "TOOL_CALL_ARGS",
        "TOOL_CALL_END",
        "TOOL_CALL_RESULT",
        "TEXT_MESSAGE_START",
        "TEXT_MESSAGE_CONTENT",
        "TEXT_MESSAGE_END",
    ] {
        assert!(types.contains(&required), "missing {required}: {types:?}");
    }
    assert!(
        typed.iter().all(|e| e["type"] != "TEXT_MESSAGE_CONTENT"
            || e["delta"].as_str().unwrap().len() < 1024),
        "artifact-sized content must never stream inline"
    );
}
