//! Pause/resume round trip: an interactive pause snapshots the run, the
//! user's submission becomes the next observation, and the answer gate
//! carries over unchanged.


use std::sync::Arc;

use serde_json::json;

use flow_event::EventKind;
use penguiflow::{Action, MockLlm, PenguiFlow, Query, RunOutcome, TaskStatus};

fn paused_flow() -> PenguiFlow {
    let llm = MockLlm::scripted(vec![
        Action::pause(
            "awaiting form input",
            json!({"component": "form", "fields": ["region"]}),
        ),
        Action::finish("Region preference saved: EU."),
    ]);
    PenguiFlow::builder()
        .with_llm(Arc::new(llm))
        .with_state_store(penguiflow::StateStoreHandle::in_memory())
        .build()
        .expect("wiring")
}

#[tokio::test]
async fn pause_then_resume_preserves_the_gate() {
    let flow = paused_flow();
    let handle = flow.run(Query::new("set my region", "sess-form"));
    let trace_id = handle.trace_id().to_string();
    let mut sub = handle.events().await;

    let outcome = handle.join().await;
    let token = match outcome {
        RunOutcome::Paused {
            resume_token,
            reason,
        } => {
            assert_eq!(reason, "awaiting form input");
            resume_token
        }
        other => panic!("expected paused, got {other:?}"),
    };
    assert_eq!(
        flow.session().find_task(&trace_id).unwrap().status,
        TaskStatus::Paused
    );

    // The pause event carries the token; the closing done carries the pause
    // object.
    let mut pause_events = 0;
    let mut saw_pause_done = false;
    while let Some(event) = sub.recv().await {
        match event.kind {
            EventKind::Pause => {
                pause_events += 1;
                assert_eq!(event.payload["resume_token"], token.as_str());
                assert_eq!(event.payload["payload"]["component"], "form");
            }
            EventKind::Done => {
                saw_pause_done = true;
                assert!(event.payload["answer_action_seq"].is_null());
                assert_eq!(event.payload["pause"]["resume_token"], token.as_str());
            }
            _ => {}
        }
    }
    assert_eq!(pause_events, 1);
    assert!(saw_pause_done);

    // Resume with the form submission.
    let resumed = flow
        .resume(&token, Some(json!({"region": "EU"})))
        .await
        .expect("resume");
    assert_eq!(resumed.trace_id(), trace_id);
    let outcome = resumed.join().await;
    match outcome {
        RunOutcome::Finished {
            answer,
            answer_action_seq,
        } => {
            assert!(answer.contains("EU"));
            // The gate picks up where the snapshot left it.
            assert_eq!(answer_action_seq, 0);
        }
        other => panic!("expected finished, got {other:?}"),
    }

    // The resumed step's observation is exactly the submitted result.
    let steps = flow.trajectory().steps(&trace_id);
    assert!(matches!(steps[0].action, Action::Pause { .. }));
    assert_eq!(
        steps[1].observation.as_ref().unwrap(),
        &json!({"region": "EU"})
    );
    assert!(matches!(steps[2].action, Action::Finish { .. }));
    assert_eq!(
        flow.session().find_task(&trace_id).unwrap().status,
        TaskStatus::Completed
    );

    // Tokens are single-use; a second resume reads as not-found.
    assert!(flow.resume(&token, None).await.is_err());
    assert!(flow.resume("pfr_bogus", None).await.is_err());
}

#[tokio::test]
async fn resumed_run_streams_to_late_subscribers() {
    let flow = paused_flow();
    let handle = flow.run(Query::new("set my region", "sess-late"));
    let trace_id = handle.trace_id().to_string();
    let token = match handle.join().await {
        RunOutcome::Paused { resume_token, .. } => resume_token,
        other => panic!("expected paused, got {other:?}"),
    };

    let resumed = flow
        .resume(&token, Some(json!({"region": "EU"})))
        .await
        .expect("resume");
    let mut sub = resumed.events().await;
    assert!(matches!(resumed.join().await, RunOutcome::Finished { .. }));

    // The subscription replays the paused phase and ends after the final
    // done of the resumed phase.
    let mut dones = Vec::new();
    while let Some(event) = sub.recv().await {
        if event.kind == EventKind::Done {
            dones.push(event);
        }
    }
    assert_eq!(dones.len(), 2);
    assert!(dones[0].payload["answer_action_seq"].is_null());
    assert_eq!(dones[1].payload["answer_action_seq"], 0);
    assert_eq!(dones[1].trace_id, trace_id);
}
