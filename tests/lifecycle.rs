// tests/lifecycle.rs
//
// End-to-end lifecycle scenarios against the in-memory store.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Datelike, Duration, Utc};
use servicedesk_api::engine::{Engine, EngineError};
use servicedesk_api::models::{
    Category, CustomerStatus, EmployeeRole, InternalStatus, Priority, TimelineAction, UserRef,
};
use servicedesk_api::notify::{NotifyError, PushData, PushMessage, PushSender};
use servicedesk_api::storage::MemObjectStorage;
use servicedesk_api::store::memory::MemStore;
use servicedesk_api::store::Store;

/// Captures every delivered push so tests can assert on fan-out.
#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSender {
    fn titles_for(&self, token: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == token)
            .map(|(_, title)| title.clone())
            .collect()
    }
}

#[async_trait]
impl PushSender for RecordingSender {
    async fn send(
        &self,
        token: &str,
        message: &PushMessage,
        _data: &PushData,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((token.to_string(), message.title.clone()));
        Ok(())
    }
}

struct Harness {
    engine: Engine,
    store: MemStore,
    files: Arc<MemObjectStorage>,
    sender: Arc<RecordingSender>,
}

fn harness() -> Harness {
    let store = MemStore::new();
    let files = Arc::new(MemObjectStorage::new());
    let sender = Arc::new(RecordingSender::default());
    let engine = Engine::new(
        Arc::new(store.clone()),
        sender.clone(),
        files.clone(),
        "test-bucket".to_string(),
    );
    Harness {
        engine,
        store,
        files,
        sender,
    }
}

fn create_input(customer_id: i64, project_id: i64) -> servicedesk_api::engine::lifecycle::CreateIssue {
    servicedesk_api::engine::lifecycle::CreateIssue {
        customer_id,
        project_id,
        description: "conveyor belt misaligned".to_string(),
        priority: Some(Priority::High),
        category: Some(Category::HardwareIssue),
        attachment_urls: vec![],
    }
}

#[tokio::test]
async fn ticket_numbers_are_sequential_within_the_year() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;

    let first = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    let second = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();

    let year = Utc::now().year();
    assert_eq!(first.ticket_no, format!("{year}-001"));
    assert_eq!(second.ticket_no, format!("{year}-002"));
    assert_eq!(first.internal_status, InternalStatus::New);
    assert_eq!(first.customer_status, CustomerStatus::UnderReview);
}

#[tokio::test]
async fn creation_writes_a_visible_timeline_entry_and_back_reference() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();

    let timeline = h.store.timeline(issue.id, true).await.unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].action, TimelineAction::IssueCreated);
    assert!(timeline[0].visible_to_customer);
    assert_eq!(timeline[0].to_internal_status, Some(InternalStatus::New));

    let stored = h.store.issue(issue.id).await.unwrap().unwrap();
    assert_eq!(stored.latest_status_id, Some(timeline[0].id));
}

#[tokio::test]
async fn creating_against_someone_elses_project_fails() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let other = h.store.add_customer("Globex", "it@globex.test").await;
    let foreign_project = h.store.add_project(other.id, "Press").await;

    let err = h
        .engine
        .create_issue(create_input(customer.id, foreign_project.id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn second_assignment_reports_the_current_owner() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head_a = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;
    let head_b = h
        .store
        .add_employee("Hari", EmployeeRole::Head, Some("MECHANICAL"))
        .await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    let deadline = Utc::now() + Duration::days(7);

    h.engine
        .assign_to_department(manager.id, issue.id, head_a.id, deadline)
        .await
        .unwrap();

    let err = h
        .engine
        .assign_to_department(manager.id, issue.id, head_b.id, deadline)
        .await
        .unwrap_err();
    match err {
        EngineError::Conflict(msg) => assert!(msg.contains("Hema"), "got: {msg}"),
        other => panic!("expected conflict, got {other:?}"),
    }

    // the failed second attempt must not leave a row behind
    let assignments = h.store.assignments_for_issue(issue.id).await;
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].employee_id, head_a.id);
}

#[tokio::test]
async fn assignment_moves_the_issue_to_assigned_and_open() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();

    let stored = h.store.issue(issue.id).await.unwrap().unwrap();
    assert_eq!(stored.internal_status, InternalStatus::Assigned);
    assert_eq!(stored.customer_status, CustomerStatus::Open);
}

#[tokio::test]
async fn inactive_head_cannot_receive_assignments() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;
    h.store.set_employee_active(head.id, false).await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    let err = h
        .engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    // nothing changed
    let stored = h.store.issue(issue.id).await.unwrap().unwrap();
    assert_eq!(stored.internal_status, InternalStatus::New);
    assert!(h.store.assignments_for_issue(issue.id).await.is_empty());
}

#[tokio::test]
async fn start_working_is_gated_on_the_assignment() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;
    let outsider = h
        .store
        .add_employee("Hari", EmployeeRole::Head, Some("MECHANICAL"))
        .await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();

    let err = h.engine.start_working(outsider.id, issue.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));

    let issue = h.engine.start_working(head.id, issue.id).await.unwrap();
    assert_eq!(issue.internal_status, InternalStatus::InProgress);
    assert_eq!(issue.customer_status, CustomerStatus::InProgress);

    let err = h.engine.start_working(head.id, issue.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn resolution_closes_both_tracks_and_releases_the_assignment() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();
    h.engine.start_working(head.id, issue.id).await.unwrap();

    let resolved = h
        .engine
        .mark_resolved(head.id, issue.id, Some("Replaced the belt tensioner.".into()))
        .await
        .unwrap();

    assert_eq!(resolved.internal_status, InternalStatus::Closed);
    assert_eq!(resolved.customer_status, CustomerStatus::Closed);
    assert!(resolved.resolved_at.is_some());
    assert!(resolved.closed_at.is_some());

    let assignments = h.store.assignments_for_issue(issue.id).await;
    assert!(assignments.iter().all(|a| !a.is_active));

    // resolving again has no active assignment to act through
    let err = h
        .engine
        .mark_resolved(head.id, issue.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));
}

#[tokio::test]
async fn resolution_is_legal_before_work_starts() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();

    // closing straight from ASSIGNED is a legal table move
    let resolved = h
        .engine
        .mark_resolved(head.id, issue.id, Some("Duplicate of 2025-001.".into()))
        .await
        .unwrap();
    assert_eq!(resolved.internal_status, InternalStatus::Closed);
    assert_eq!(resolved.customer_status, CustomerStatus::Closed);
}

#[tokio::test]
async fn mark_invalid_only_accepts_new_issues() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    let fresh = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    let assigned = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, assigned.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();

    let closed = h
        .engine
        .mark_invalid(manager.id, fresh.id, Some("Duplicate of an open ticket.".into()))
        .await
        .unwrap();
    assert_eq!(closed.internal_status, InternalStatus::Closed);

    let err = h
        .engine
        .mark_invalid(manager.id, assigned.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn customer_timeline_hides_internal_entries() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();
    h.engine.start_working(head.id, issue.id).await.unwrap();
    h.engine
        .add_comment(head.id, issue.id, "ordered spare parts".into(), false)
        .await
        .unwrap();
    h.engine
        .add_comment(head.id, issue.id, "Parts arrive Friday.".into(), true)
        .await
        .unwrap();

    let full = h.store.timeline(issue.id, false).await.unwrap();
    let visible = h.store.timeline(issue.id, true).await.unwrap();
    assert_eq!(full.len(), 5);
    assert_eq!(visible.len(), 4);
    assert!(visible
        .iter()
        .all(|e| e.comment.as_deref() != Some("ordered spare parts")));
}

#[tokio::test]
async fn attachment_round_trip_moves_the_batch_under_the_ticket() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();

    h.engine
        .request_attachment(head.id, issue.id, "Please share a photo of the panel.".into())
        .await
        .unwrap();

    // a second request while one is outstanding is rejected
    let err = h
        .engine
        .request_attachment(head.id, issue.id, "again".into())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));

    let batch_id = uuid::Uuid::new_v4();
    h.files
        .put_batch(&format!("temp/{batch_id}/"), &["panel.jpg", "wiring.jpg"]);

    let moved = h
        .engine
        .confirm_attachments_uploaded(customer.id, issue.id, batch_id)
        .await
        .unwrap();
    let ticket = &issue.ticket_no;
    assert_eq!(
        moved,
        vec![
            format!("issues/{ticket}/panel.jpg"),
            format!("issues/{ticket}/wiring.jpg"),
        ]
    );

    let stored = h.store.issue(issue.id).await.unwrap().unwrap();
    assert!(!stored.is_attachments_requested);
    assert_eq!(stored.attachments_requested_by, None);
    assert_eq!(stored.attachment_urls, moved);
}

#[tokio::test]
async fn confirming_an_empty_batch_fails_without_touching_the_issue() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();
    h.engine
        .request_attachment(head.id, issue.id, "Please share a photo.".into())
        .await
        .unwrap();

    let err = h
        .engine
        .confirm_attachments_uploaded(customer.id, issue.id, uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoFilesMoved));

    // the request stays outstanding for a retry
    let stored = h.store.issue(issue.id).await.unwrap().unwrap();
    assert!(stored.is_attachments_requested);
    assert!(stored.attachment_urls.is_empty());
}

#[tokio::test]
async fn only_the_issue_owner_can_confirm_attachments() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let intruder = h.store.add_customer("Globex", "it@globex.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();
    h.engine
        .request_attachment(head.id, issue.id, "photo please".into())
        .await
        .unwrap();

    let err = h
        .engine
        .confirm_attachments_uploaded(intruder.id, issue.id, uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));
}

#[tokio::test]
async fn pushes_are_delivered_to_registered_devices_only() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    // only the head registered a device
    h.store
        .upsert_device_token(UserRef::Employee(head.id), "head-token")
        .await
        .unwrap();

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();
    h.engine.start_working(head.id, issue.id).await.unwrap();

    let to_head = h.sender.titles_for("head-token");
    assert_eq!(to_head, vec!["Issue assigned to you".to_string()]);
    // the customer and manager had no tokens, so nothing else went out
    assert_eq!(h.sender.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn head_queues_follow_the_assignment_lifecycle() {
    let h = harness();
    let customer = h.store.add_customer("Acme", "ops@acme.test").await;
    let project = h.store.add_project(customer.id, "Line 3").await;
    let manager = h
        .store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = h
        .store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;

    use servicedesk_api::models::HeadQueue;

    let issue = h
        .engine
        .create_issue(create_input(customer.id, project.id))
        .await
        .unwrap();
    h.engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(3))
        .await
        .unwrap();

    let newly = h
        .store
        .issues_for_head(head.id, HeadQueue::NewlyAssigned)
        .await
        .unwrap();
    assert_eq!(newly.len(), 1);

    h.engine.start_working(head.id, issue.id).await.unwrap();
    assert!(h
        .store
        .issues_for_head(head.id, HeadQueue::NewlyAssigned)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        h.store
            .issues_for_head(head.id, HeadQueue::InProgress)
            .await
            .unwrap()
            .len(),
        1
    );

    h.engine.mark_resolved(head.id, issue.id, None).await.unwrap();
    assert_eq!(
        h.store
            .issues_for_head(head.id, HeadQueue::Closed)
            .await
            .unwrap()
            .len(),
        1
    );
}
