//! Deployment generator tests

use autodeploy::deploy::ports::DEFAULT_GROUP;
use autodeploy::errors::ControlError;
use autodeploy::models::deployment::Deployment;
use autodeploy::store::{DeploymentStore, PortStore};

use crate::support::{write, Fixture, POOL};

fn web() -> Deployment {
    Deployment::new("abc-123", "web", "main")
        .with_data("replicas", "2")
        .with_secret("password", "hunter2")
}

fn read(fixture: &Fixture, uuid: &str, relative: &str) -> String {
    std::fs::read_to_string(fixture.output(uuid).join(relative)).unwrap()
}

/// Namespaces admitted by the first policy of `netpol.yaml`
fn ingress_sources(fixture: &Fixture, uuid: &str) -> Vec<String> {
    let manifest = read(fixture, uuid, "netpol.yaml");
    let policies: Vec<serde_yaml::Value> = serde_yaml::Deserializer::from_str(&manifest)
        .map(|doc| serde::Deserialize::deserialize(doc).unwrap())
        .collect();
    policies[0]["spec"]["ingress"][0]["from"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|f| {
            f["namespaceSelector"]["matchLabels"]["kubernetes.io/metadata.name"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn test_generate_web_end_to_end() {
    let fixture = Fixture::new();
    let deployment = web();

    let mut tree = fixture.gate.open().await.unwrap();
    let outcome = fixture
        .generator
        .generate(&mut tree, &deployment, false)
        .await
        .unwrap();
    tree.close();

    assert_eq!(outcome.uuid, "abc-123");
    assert_eq!(outcome.template, "web");
    assert!(outcome
        .commit
        .message
        .starts_with("autodeploy(abc-123): application deployment created"));
    assert_eq!(outcome.commit.hash.len(), 40);
    assert_eq!(outcome.tree_digest.len(), 64);

    // one reservation, inside the pool
    let ports = fixture.store.list_ports(DEFAULT_GROUP).await.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].claim, "http");
    assert!(POOL.contains(ports[0].port));

    let rendered = read(&fixture, "abc-123", "deployment.yaml");
    assert!(rendered.contains("replicas: 2"));
    assert!(rendered.contains(&format!("port: {}", ports[0].port)));

    // the claims file is not part of the output
    assert!(!fixture.output("abc-123").join("port-claims.json").exists());

    assert_eq!(ingress_sources(&fixture, "abc-123"), vec!["abc-123", "utility-ns", "ingress-ns"]);

    let kustomization: serde_yaml::Value =
        serde_yaml::from_str(&read(&fixture, "abc-123", "kustomization.yaml")).unwrap();
    assert_eq!(kustomization["resources"][0].as_str(), Some("netpol.yaml"));
}

#[tokio::test]
async fn test_sealed_secret_invariant() {
    let fixture = Fixture::new();

    let mut tree = fixture.gate.open().await.unwrap();
    fixture.generator.generate(&mut tree, &web(), false).await.unwrap();

    let output = fixture.output("abc-123");
    assert!(!output.join("db-unsealedsecret.yaml").exists());
    let sealed = std::fs::read_to_string(output.join("db-sealedsecret.yaml")).unwrap();
    assert!(sealed.starts_with("sealed: "));
    assert!(!sealed.contains("hunter2"));

    let seals = fixture
        .runner
        .commands()
        .into_iter()
        .filter(|c| c.program == "kubeseal")
        .count();
    assert_eq!(seals, 1);
}

#[tokio::test]
async fn test_forbidden_overwrite_leaves_directory_untouched() {
    let fixture = Fixture::new();
    let mut tree = fixture.gate.open().await.unwrap();
    let output = fixture.output("abc-123");
    write(&output, "keep.txt", "hand-written");

    let err = fixture
        .generator
        .generate(&mut tree, &web(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, ControlError::Forbidden(_)));
    assert_eq!(std::fs::read_to_string(output.join("keep.txt")).unwrap(), "hand-written");
    assert!(!output.join("deployment.yaml").exists());
    assert_eq!(fixture.runner.commit_count(), 0);
}

#[tokio::test]
async fn test_idempotent_regeneration() {
    let fixture = Fixture::new();
    let deployment = web();

    let mut tree = fixture.gate.open().await.unwrap();
    fixture.generator.generate(&mut tree, &deployment, false).await.unwrap();
    let first = fixture.generator.generate(&mut tree, &deployment, true).await.unwrap();
    let second = fixture.generator.generate(&mut tree, &deployment, true).await.unwrap();

    assert_eq!(first.tree_digest, second.tree_digest);
    assert!(first
        .commit
        .message
        .starts_with("autodeploy(abc-123): application deployment updated"));
    assert_eq!(fixture.store.list_ports_for_deployment("abc-123").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_replace_picks_up_configuration_changes() {
    let fixture = Fixture::new();

    let mut tree = fixture.gate.open().await.unwrap();
    let before = fixture.generator.generate(&mut tree, &web(), false).await.unwrap();

    let mut paused = web();
    paused.paused = true;
    let after = fixture.generator.generate(&mut tree, &paused, true).await.unwrap();

    assert_ne!(before.tree_digest, after.tree_digest);
    assert!(read(&fixture, "abc-123", "deployment.yaml").contains("replicas: 0"));
}

#[tokio::test]
async fn test_linked_deployments_reach_target() {
    let fixture = Fixture::new();
    let mut api = Deployment::new("api-1", "web", "main");
    api.ingress_targets.push("abc-123".to_string());
    fixture.store.upsert_deployment(api).await.unwrap();

    let mut tree = fixture.gate.open().await.unwrap();
    fixture.generator.generate(&mut tree, &web(), false).await.unwrap();

    assert_eq!(
        ingress_sources(&fixture, "abc-123"),
        vec!["api-1", "abc-123", "utility-ns", "ingress-ns"]
    );
}

#[tokio::test]
async fn test_side_channel_template_skips_network_policy() {
    let fixture = Fixture::new();
    let browser = Deployment::new("fb-1", "filebrowser", "main").with_data("target", "abc-123");

    let mut tree = fixture.gate.open().await.unwrap();
    fixture.generator.generate(&mut tree, &browser, false).await.unwrap();

    assert!(!fixture.output("fb-1").join("netpol.yaml").exists());
    assert_eq!(read(&fixture, "fb-1", "deployment.yaml").trim_end(), "target: abc-123");
}

#[tokio::test]
async fn test_unknown_template_is_not_found() {
    let fixture = Fixture::new();
    let deployment = Deployment::new("x-1", "missing", "main");

    let mut tree = fixture.gate.open().await.unwrap();
    let err = fixture
        .generator
        .generate(&mut tree, &deployment, false)
        .await
        .unwrap_err();
    assert!(matches!(err, ControlError::NotFound(_)));
}

#[tokio::test]
async fn test_sealing_failure_aborts_generation() {
    let fixture = Fixture::new();
    fixture.runner.fail_on("kubeseal");

    let mut tree = fixture.gate.open().await.unwrap();
    let err = fixture
        .generator
        .generate(&mut tree, &web(), false)
        .await
        .unwrap_err();

    assert!(matches!(err, ControlError::GenerationFailed(_)));
    assert_eq!(fixture.runner.commit_count(), 0);
}

#[tokio::test]
async fn test_remove_pushes_deletion() {
    let fixture = Fixture::new();

    let mut tree = fixture.gate.open().await.unwrap();
    fixture.generator.generate(&mut tree, &web(), false).await.unwrap();
    let commit = fixture.generator.remove(&mut tree, "abc-123").await.unwrap();

    assert!(!fixture.output("abc-123").exists());
    assert!(commit
        .message
        .starts_with("autodeploy(abc-123): application deployment deleted"));

    let err = fixture.generator.remove(&mut tree, "abc-123").await.unwrap_err();
    assert!(matches!(err, ControlError::NotFound(_)));
}

#[tokio::test]
async fn test_dotted_secret_name_is_sealed() {
    let fixture = Fixture::new();
    write(
        &fixture.tmp.path().join("templates"),
        "web/redis.v2-unsealedsecret.yaml",
        "password: {{ secret.password }}\n",
    );

    let mut tree = fixture.gate.open().await.unwrap();
    fixture.generator.generate(&mut tree, &web(), false).await.unwrap();

    let output = fixture.output("abc-123");
    assert!(!output.join("redis.v2-unsealedsecret.yaml").exists());
    let sealed = std::fs::read_to_string(output.join("redis.v2-sealedsecret.yaml")).unwrap();
    assert!(!sealed.contains("hunter2"));

    let leaked = std::fs::read_dir(&output)
        .unwrap()
        .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap_or_default())
        .any(|contents| contents.contains("hunter2"));
    assert!(!leaked);
}
