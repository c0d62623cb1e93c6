//! Kernel end-to-end tests over the SQLite store: dependency chains with
//! decision gates, scenario gating, and snapshot persistence.

mod helpers;

use arranger::domain::models::workflow::{ExitGate, PhaseDefinition, PhaseEntry};
use arranger::domain::models::{Artifact, InstanceStatus, PhaseStatus, WorkflowDefinition};
use arranger::domain::ports::InstanceStore;
use arranger::services::{BusEvent, WorkflowRuntimeEvent};

use helpers::harness;

fn phase(id: &str, deps: &[&str], exit: ExitGate) -> PhaseDefinition {
    PhaseDefinition {
        id: id.into(),
        title: id.into(),
        dependencies: deps.iter().map(ToString::to_string).collect(),
        scenario_tags: Vec::new(),
        entry: PhaseEntry::default(),
        exit,
    }
}

#[tokio::test]
async fn dependency_chain_with_decision_and_artifact_gates() {
    let h = harness().await;
    h.kernel
        .register_definition(WorkflowDefinition {
            id: "wf".into(),
            name: "wf".into(),
            version: "1".into(),
            phases: vec![
                phase(
                    "phase_a",
                    &[],
                    ExitGate {
                        require_decisions: vec!["d_a".into()],
                        ..Default::default()
                    },
                ),
                phase(
                    "phase_b",
                    &["phase_a"],
                    ExitGate {
                        require_artifacts: vec!["art_b".into()],
                        ..Default::default()
                    },
                ),
            ],
            description: None,
        })
        .await
        .unwrap();

    let instance = h
        .kernel
        .create_instance("wf", None, serde_json::Map::new())
        .await
        .unwrap();
    assert_eq!(instance.phase("phase_a").unwrap().status, PhaseStatus::Active);
    assert_eq!(instance.phase("phase_b").unwrap().status, PhaseStatus::Pending);

    h.kernel
        .record_decision(&instance.id, "phase_a", "d_a")
        .await
        .unwrap();
    let state = h.kernel.get_instance(&instance.id).await.unwrap();
    assert_eq!(state.phase("phase_a").unwrap().status, PhaseStatus::Completed);
    assert_eq!(state.phase("phase_b").unwrap().status, PhaseStatus::Active);

    h.kernel
        .record_artifact(&instance.id, "phase_b", Artifact::new("art_b"))
        .await
        .unwrap();
    let state = h.kernel.get_instance(&instance.id).await.unwrap();
    assert_eq!(state.phase("phase_b").unwrap().status, PhaseStatus::Completed);
    assert_eq!(state.status, InstanceStatus::Completed);

    // The snapshot in the store matches the in-memory state.
    let snapshot = h.instances.get(&instance.id).await.unwrap().unwrap();
    assert_eq!(snapshot.status, InstanceStatus::Completed);
    assert_eq!(
        snapshot.phase("phase_a").unwrap().decisions,
        vec!["d_a".to_string()]
    );
}

#[tokio::test]
async fn scenario_gated_phase_waits_for_metadata() {
    let h = harness().await;
    let mut doc_outline = phase("doc_outline", &["intake"], ExitGate::default());
    doc_outline.scenario_tags = vec!["doc_work".into()];
    h.kernel
        .register_definition(WorkflowDefinition {
            id: "wf".into(),
            name: "wf".into(),
            version: "1".into(),
            phases: vec![phase("intake", &[], ExitGate::default()), doc_outline],
            description: None,
        })
        .await
        .unwrap();

    let mut metadata = serde_json::Map::new();
    metadata.insert("scenario".into(), serde_json::json!(["new_feature"]));
    let instance = h.kernel.create_instance("wf", None, metadata).await.unwrap();

    let doc = instance.phase("doc_outline").unwrap().clone();
    assert_eq!(instance.phase("intake").unwrap().status, PhaseStatus::Completed);
    assert_eq!(doc.status, PhaseStatus::Pending);
    assert_eq!(
        doc.metadata.get("scenario_pending"),
        Some(&serde_json::Value::Bool(true))
    );
    assert_eq!(instance.status, InstanceStatus::Running);

    let mut patch = serde_json::Map::new();
    patch.insert("scenario".into(), serde_json::json!(["doc_work"]));
    h.kernel
        .update_instance_metadata(&instance.id, patch)
        .await
        .unwrap();

    let state = h.kernel.get_instance(&instance.id).await.unwrap();
    assert_eq!(
        state.phase("doc_outline").unwrap().status,
        PhaseStatus::Completed
    );
    assert_eq!(state.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn phase_enter_ordering_follows_dependencies() {
    let h = harness().await;
    let mut rx = h.bus.subscribe();
    h.kernel
        .register_definition(WorkflowDefinition {
            id: "wf".into(),
            name: "wf".into(),
            version: "1".into(),
            phases: vec![
                phase("a", &[], ExitGate::default()),
                phase("b", &["a"], ExitGate::default()),
                phase("c", &["b"], ExitGate::default()),
            ],
            description: None,
        })
        .await
        .unwrap();
    let _instance = h
        .kernel
        .create_instance("wf", None, serde_json::Map::new())
        .await
        .unwrap();

    // For every phase, phase_enter comes strictly after phase_complete of
    // its dependency.
    let mut order = Vec::new();
    while let Ok(published) = rx.try_recv() {
        if let BusEvent::Workflow(event) = published.event {
            match event {
                WorkflowRuntimeEvent::PhaseEnter { phase_id, .. } => {
                    order.push(format!("enter:{phase_id}"));
                }
                WorkflowRuntimeEvent::PhaseComplete { phase_id, .. } => {
                    order.push(format!("complete:{phase_id}"));
                }
                _ => {}
            }
        }
    }
    let position = |needle: &str| order.iter().position(|o| o == needle).unwrap();
    assert!(position("complete:a") < position("enter:b"));
    assert!(position("complete:b") < position("enter:c"));
}

#[tokio::test]
async fn invalid_definitions_rejected_on_registration() {
    let h = harness().await;
    // Unknown dependency.
    let result = h
        .kernel
        .register_definition(WorkflowDefinition {
            id: "bad".into(),
            name: "bad".into(),
            version: "1".into(),
            phases: vec![phase("a", &["ghost"], ExitGate::default())],
            description: None,
        })
        .await;
    assert!(result.is_err());
    // The template is not activated.
    assert!(h.kernel.definition("bad").await.is_none());
}

#[tokio::test]
async fn dispose_removes_instance_and_snapshot() {
    let h = harness().await;
    h.kernel
        .register_definition(WorkflowDefinition {
            id: "wf".into(),
            name: "wf".into(),
            version: "1".into(),
            phases: vec![phase(
                "a",
                &[],
                ExitGate {
                    require_decisions: vec!["never".into()],
                    ..Default::default()
                },
            )],
            description: None,
        })
        .await
        .unwrap();
    let instance = h
        .kernel
        .create_instance("wf", Some("sess-1".into()), serde_json::Map::new())
        .await
        .unwrap();
    assert!(h.instances.get(&instance.id).await.unwrap().is_some());

    h.kernel.dispose_instance(&instance.id).await.unwrap();
    assert!(h.kernel.get_instance(&instance.id).await.is_err());
    assert!(h.instances.get(&instance.id).await.unwrap().is_none());
    assert!(h.kernel.find_instance_by_session("sess-1").await.is_none());
}
