//! Commit audit trail tests

use std::sync::Arc;

use secrecy::ExposeSecret;

use autodeploy::deploy::audit::{CommitAuditTrail, ValueKind};
use autodeploy::deploy::fsm::LifecycleState;
use autodeploy::errors::ControlError;
use autodeploy::models::deployment::{CommitInfo, Deployment};
use autodeploy::models::template::{FieldKind, TemplateField};
use autodeploy::store::{CommitStore, DeploymentStore, InMemoryStore, Store};

fn deployed() -> Deployment {
    let mut deployment = Deployment::new("abc-123", "web", "main")
        .with_data("replicas", "2")
        .with_data("image", "nginx:1.27")
        .with_secret("password", "hunter2");
    deployment.state = LifecycleState::Deployed;
    deployment
}

fn commit(hash: &str) -> CommitInfo {
    CommitInfo {
        message: "autodeploy(abc-123): application deployment updated".to_string(),
        hash: hash.to_string(),
    }
}

async fn trail() -> (Arc<InMemoryStore>, CommitAuditTrail) {
    let store = Arc::new(InMemoryStore::new());
    store
        .put_template_fields(
            "web",
            vec![
                TemplateField::new("replicas", "Replicas", FieldKind::Number),
                TemplateField::new("password", "Database password", FieldKind::Secret),
            ],
        )
        .await;
    let dyn_store: Arc<dyn Store> = store.clone();
    (store, CommitAuditTrail::new(dyn_store))
}

#[tokio::test]
async fn test_record_appends_history() {
    let (_store, trail) = trail().await;
    let deployment = deployed();

    trail.record(&deployment, &commit("aaaaaaa")).await.unwrap();
    trail.record(&deployment, &commit("bbbbbbb")).await.unwrap();

    let history = trail.history("abc-123").await.unwrap();
    let hashes: Vec<&str> = history.iter().map(|c| c.hash.as_str()).collect();
    assert_eq!(hashes, vec!["aaaaaaa", "bbbbbbb"]);
    assert_eq!(history[0].snapshot.data["replicas"], "2");
}

#[tokio::test]
async fn test_diff_against_commit() {
    let (_store, trail) = trail().await;
    let mut deployment = deployed();
    trail.record(&deployment, &commit("aaaaaaa")).await.unwrap();

    assert!(trail.diff(&deployment, "aaaaaaa").await.unwrap().is_empty());

    deployment.data.insert("replicas".to_string(), "4".to_string());
    let changes = trail.diff(&deployment, "aaaaaaa").await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].label, "Replicas");
    assert_eq!(changes[0].previous.as_deref(), Some("2"));
    assert_eq!(changes[0].current.as_deref(), Some("4"));

    let deployment = deployment.with_secret("password", "correct horse");
    let changes = trail.diff(&deployment, "aaaaaaa").await.unwrap();
    let secret = changes.iter().find(|c| c.kind == ValueKind::Secret).unwrap();
    assert_eq!(secret.label, "Database password");
    assert_eq!(secret.current.as_deref(), Some("correct horse"));
}

#[tokio::test]
async fn test_diff_unknown_commit() {
    let (_store, trail) = trail().await;
    let err = trail.diff(&deployed(), "deadbeef").await.unwrap_err();
    assert!(matches!(err, ControlError::NotFound(_)));
}

#[tokio::test]
async fn test_restore_rolls_back_and_requests_update() {
    let (store, trail) = trail().await;
    let original = deployed();
    trail.record(&original, &commit("aaaaaaa")).await.unwrap();

    let changed = original
        .clone()
        .with_data("replicas", "9")
        .with_data("debug", "true")
        .with_secret("password", "changed");
    store.upsert_deployment(changed).await.unwrap();

    let restored = trail.restore("abc-123", "aaaaaaa").await.unwrap();
    assert!(restored.update);
    assert_eq!(restored.data, original.data);
    assert_eq!(restored.secret["password"].expose_secret(), "hunter2");

    let stored = store.get_deployment("abc-123").await.unwrap().unwrap();
    assert!(stored.update);
    assert!(!stored.data.contains_key("debug"));
    assert_eq!(store.list_commits("abc-123").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_restore_requires_live_deployment() {
    let (store, trail) = trail().await;
    let pending = Deployment::new("abc-123", "web", "main");
    trail.record(&pending, &commit("aaaaaaa")).await.unwrap();
    store.upsert_deployment(pending).await.unwrap();

    let err = trail.restore("abc-123", "aaaaaaa").await.unwrap_err();
    assert!(matches!(err, ControlError::IllegalState(_)));
}
