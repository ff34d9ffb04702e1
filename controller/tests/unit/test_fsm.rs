//! Lifecycle state machine tests

use chrono::{TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};

use autodeploy::deploy::fsm::{LifecycleEvent, LifecycleState};
use autodeploy::errors::ControlError;
use autodeploy::models::deployment::Deployment;

#[test]
fn test_new_deployment_is_pending() {
    let deployment = Deployment::new("abc-123", "web", "main");
    assert_eq!(deployment.state, LifecycleState::Pending);
    assert!(!deployment.state.is_live());
    assert!(deployment.timestamps.creation_dispatched_at.is_none());
}

#[test]
fn test_apply_stamps_each_transition() {
    let mut deployment = Deployment::new("abc-123", "web", "main");
    let at = |minute| Utc.with_ymd_and_hms(2026, 1, 1, 12, minute, 0).unwrap();

    assert_ok!(deployment.apply(LifecycleEvent::DispatchCreation, at(0)));
    assert_ok!(deployment.apply(LifecycleEvent::CreationSucceeded, at(1)));
    assert_ok!(deployment.apply(LifecycleEvent::DispatchUpdate, at(2)));
    assert_ok!(deployment.apply(LifecycleEvent::UpdateSucceeded, at(3)));
    assert_ok!(deployment.apply(LifecycleEvent::DispatchDeletion, at(4)));

    let ts = &deployment.timestamps;
    assert_eq!(ts.creation_dispatched_at, Some(at(0)));
    assert_eq!(ts.deployed_at, Some(at(1)));
    assert_eq!(ts.update_dispatched_at, Some(at(2)));
    assert_eq!(ts.deployment_updated_at, Some(at(3)));
    assert_eq!(ts.deletion_dispatched_at, Some(at(4)));
    assert_eq!(deployment.state, LifecycleState::DeletionDispatched);
}

#[test]
fn test_rejected_transition_changes_nothing() {
    let mut deployment = Deployment::new("abc-123", "web", "main");

    let err = deployment
        .apply(LifecycleEvent::DispatchDeletion, Utc::now())
        .unwrap_err();

    assert!(matches!(err, ControlError::InvalidTransition(_)));
    assert_eq!(deployment.state, LifecycleState::Pending);
    assert!(deployment.timestamps.deletion_dispatched_at.is_none());
}

#[test]
fn test_update_may_be_redispatched() {
    let mut deployment = Deployment::new("abc-123", "web", "main");
    deployment.state = LifecycleState::UpdateDispatched;

    deployment.apply(LifecycleEvent::DispatchUpdate, Utc::now()).unwrap();
    assert_eq!(deployment.state, LifecycleState::UpdateDispatched);
}

#[test]
fn test_creation_dispatched_cannot_be_deleted() {
    let mut deployment = Deployment::new("abc-123", "web", "main");
    deployment.state = LifecycleState::CreationDispatched;

    assert_err!(deployment.apply(LifecycleEvent::DispatchDeletion, Utc::now()));
    assert_err!(deployment.apply(LifecycleEvent::DispatchUpdate, Utc::now()));
}
