//! Artifact pipeline end to end: schema-marked fields spill to the store,
//! oversize observations become references, bytes never reach the
//! trajectory or the model.


use std::sync::Arc;

use serde_json::json;

use flow_event::EventKind;
use penguiflow::{
    ArtifactStore, FnTool, MockLlm, PenguiFlow, PlannedCall, Query, RunOutcome, Tool,
    ToolDescriptor,
};

const TWO_MIB: usize = 2 * 1024 * 1024;

fn report_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDescriptor::new("render", "Renders a large text report")
            .with_schemas(
                json!({"type": "object"}),
                json!({
                    "type": "object",
                    "properties": {
                        "body": {"type": "string", "x-artifact": true, "title": "report"},
                        "pages": {"type": "integer"}
                    }
                }),
            ),
        |_args, _ctx| async move {
            Ok(json!({"body": "x".repeat(TWO_MIB), "pages": 42}))
        },
    ))
}

fn log_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDescriptor::new("tail", "Returns recent log lines")
            .with_schemas(json!({"type": "object"}), json!({"type": "object"})),
        |_args, _ctx| async move { Ok(json!({"log": "y".repeat(40_000)})) },
    ))
}

#[tokio::test]
async fn marked_two_mib_field_becomes_stored_artifact() {
    let llm = MockLlm::plan_then_finish(
        vec![PlannedCall::new("report.render", json!({}))],
        "report rendered",
    );
    let flow = PenguiFlow::builder()
        .with_llm(Arc::new(llm))
        .register_tool("report", report_tool())
        .build()
        .expect("wiring");

    let handle = flow.run(Query::new("render the report", "sess-art"));
    let trace_id = handle.trace_id().to_string();
    let mut sub = handle.events().await;
    assert!(matches!(handle.join().await, RunOutcome::Finished { .. }));

    let mut stored_events = Vec::new();
    while let Some(event) = sub.recv().await {
        if event.kind == EventKind::ArtifactStored {
            stored_events.push(event);
        }
    }
    assert_eq!(stored_events.len(), 1, "exactly one artifact_stored");
    let stored = &stored_events[0];
    assert_eq!(stored.payload["mime_type"], "text/plain");
    assert_eq!(stored.payload["size_bytes"], TWO_MIB);

    // The trajectory holds {artifact, summary, preview} and never the body.
    let steps = flow.trajectory().steps(&trace_id);
    let observation = steps[0].observation.as_ref().expect("observation");
    let body = &observation["tool_results"][0]["output"]["body"];
    let artifact_id = body["artifact"]["id"].as_str().expect("artifact ref");
    assert_eq!(body["artifact"]["size_bytes"], TWO_MIB);
    assert!(body["summary"].as_str().unwrap().contains("stored as artifact"));
    assert!(body["preview"].as_str().unwrap().len() <= 280);
    assert!(observation.to_string().len() < 10_000);
    assert_eq!(observation["tool_results"][0]["output"]["pages"], 42);

    // Bytes are retrievable out of band.
    let bytes = flow.artifacts().get(artifact_id).await.expect("artifact bytes");
    assert_eq!(bytes.len(), TWO_MIB);

    // The side channel keeps the compact reference, not the bytes.
    let call_id = observation["tool_results"][0]["call_id"].as_str().unwrap();
    let side = flow
        .dispatcher()
        .side_channel(call_id)
        .expect("side channel recorded");
    assert_eq!(side["body"]["artifact_id"], artifact_id);
}

#[tokio::test]
async fn oversize_unmarked_observation_becomes_reference() {
    let llm = MockLlm::plan_then_finish(
        vec![PlannedCall::new("logs.tail", json!({}))],
        "logs summarized",
    );
    let flow = PenguiFlow::builder()
        .with_llm(Arc::new(llm))
        .register_tool("logs", log_tool())
        .build()
        .expect("wiring");

    let handle = flow.run(Query::new("tail the logs", "sess-logs"));
    let trace_id = handle.trace_id().to_string();
    assert!(matches!(handle.join().await, RunOutcome::Finished { .. }));

    // Oversize observations are always converted to a reference, never
    // inlined truncated.
    let steps = flow.trajectory().steps(&trace_id);
    let output = &steps[0].observation.as_ref().unwrap()["tool_results"][0]["output"];
    let artifact_id = output["artifact"]["id"].as_str().expect("auto-stored ref");
    assert!(artifact_id.starts_with("observation.logs.tail_"));
    assert!(output["preview"].as_str().unwrap().len() <= 280);
    assert!(!output.to_string().contains(&"y".repeat(1_000)));
    assert!(flow.artifacts().exists(artifact_id).await);
}
