// tests/visits.rs
//
// Site-visit workflow scenarios: request, schedule, complete/cancel, and
// the interactions with issue resolution.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use servicedesk_api::engine::lifecycle::CreateIssue;
use servicedesk_api::engine::{Engine, EngineError};
use servicedesk_api::models::{
    Category, EmployeeRole, Priority, TimelineAction, UserRef, VisitRequestStatus, VisitStatus,
};
use servicedesk_api::notify::{NotifyError, PushData, PushMessage, PushSender};
use servicedesk_api::storage::MemObjectStorage;
use servicedesk_api::store::memory::MemStore;
use servicedesk_api::store::Store;

struct SilentSender;

#[async_trait]
impl PushSender for SilentSender {
    async fn send(
        &self,
        _token: &str,
        _message: &PushMessage,
        _data: &PushData,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

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

struct Fixture {
    engine: Engine,
    store: MemStore,
    customer_id: i64,
    manager_id: i64,
    head_id: i64,
    service_head_id: i64,
    engineer_id: i64,
    issue_id: i64,
}

/// One assigned, in-progress issue owned by an ELECTRICAL head, with a
/// SERVICE head and engineer on staff.
async fn fixture() -> Fixture {
    let store = MemStore::new();
    let engine = Engine::new(
        Arc::new(store.clone()),
        Arc::new(SilentSender),
        Arc::new(MemObjectStorage::new()),
        "test-bucket".to_string(),
    );

    let customer = store.add_customer("Acme", "ops@acme.test").await;
    let project = store.add_project(customer.id, "Line 3").await;
    let manager = store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;
    let service_head = store
        .add_employee("Selva", EmployeeRole::Head, Some("SERVICE"))
        .await;
    let engineer = store
        .add_employee("Esak", EmployeeRole::ServiceEngineer, Some("SERVICE"))
        .await;

    let issue = engine
        .create_issue(CreateIssue {
            customer_id: customer.id,
            project_id: project.id,
            description: "spindle vibration above tolerance".to_string(),
            priority: Some(Priority::Critical),
            category: Some(Category::Maintenance),
            attachment_urls: vec![],
        })
        .await
        .unwrap();
    engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(5))
        .await
        .unwrap();
    engine.start_working(head.id, issue.id).await.unwrap();

    Fixture {
        engine,
        store,
        customer_id: customer.id,
        manager_id: manager.id,
        head_id: head.id,
        service_head_id: service_head.id,
        engineer_id: engineer.id,
        issue_id: issue.id,
    }
}

#[tokio::test]
async fn only_one_request_may_be_pending() {
    let f = fixture().await;

    let request = f
        .engine
        .request_site_visit(f.head_id, f.issue_id)
        .await
        .unwrap();
    assert_eq!(request.status, VisitRequestStatus::Pending);
    assert_eq!(request.requested_by_department, "ELECTRICAL");

    let stored = f.store.issue(f.issue_id).await.unwrap().unwrap();
    assert!(stored.is_site_visit_requested);

    let err = f
        .engine
        .request_site_visit(f.head_id, f.issue_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert_eq!(f.store.visit_requests_for_issue(f.issue_id).await.len(), 1);
}

#[tokio::test]
async fn service_heads_do_not_file_requests() {
    let f = fixture().await;

    // give the SERVICE head an active assignment on a second issue so the
    // only failing check is the department one
    let project = f.store.add_project(f.customer_id, "Annex").await;
    let issue = f
        .engine
        .create_issue(CreateIssue {
            customer_id: f.customer_id,
            project_id: project.id,
            description: "chiller leak".to_string(),
            priority: None,
            category: None,
            attachment_urls: vec![],
        })
        .await
        .unwrap();
    f.engine
        .assign_to_department(
            f.manager_id,
            issue.id,
            f.service_head_id,
            Utc::now() + Duration::days(5),
        )
        .await
        .unwrap();

    let err = f
        .engine
        .request_site_visit(f.service_head_id, issue.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));
}

#[tokio::test]
async fn rejection_clears_the_request_flag() {
    let f = fixture().await;

    let request = f
        .engine
        .request_site_visit(f.head_id, f.issue_id)
        .await
        .unwrap();
    let rejected = f
        .engine
        .reject_site_visit_request(f.service_head_id, request.id)
        .await
        .unwrap();
    assert_eq!(rejected.status, VisitRequestStatus::Rejected);

    let stored = f.store.issue(f.issue_id).await.unwrap().unwrap();
    assert!(!stored.is_site_visit_requested);

    // rejecting twice is a state error
    let err = f
        .engine
        .reject_site_visit_request(f.service_head_id, request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));

    // and the requester may file a fresh request afterwards
    f.engine
        .request_site_visit(f.head_id, f.issue_id)
        .await
        .unwrap();
}

#[tokio::test]
async fn only_service_heads_act_on_requests() {
    let f = fixture().await;
    let request = f
        .engine
        .request_site_visit(f.head_id, f.issue_id)
        .await
        .unwrap();

    let err = f
        .engine
        .reject_site_visit_request(f.head_id, request.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));
}

#[tokio::test]
async fn scheduling_consumes_the_request_and_books_the_engineer() {
    let f = fixture().await;
    let request = f
        .engine
        .request_site_visit(f.head_id, f.issue_id)
        .await
        .unwrap();

    let when = Utc::now() + Duration::days(2);
    let visit = f
        .engine
        .schedule_site_visit_for_request(
            f.service_head_id,
            f.issue_id,
            f.engineer_id,
            request.id,
            when,
        )
        .await
        .unwrap();

    assert_eq!(visit.status, VisitStatus::Scheduled);
    assert_eq!(visit.working_department, "ELECTRICAL");
    assert_eq!(visit.request_id, Some(request.id));

    let requests = f.store.visit_requests_for_issue(f.issue_id).await;
    assert_eq!(requests[0].status, VisitRequestStatus::Completed);

    let engineer = f.store.employee(f.engineer_id).await.unwrap();
    assert_eq!(engineer.pending_visits, 1);
    assert_eq!(engineer.completed_visits, 0);

    let stored = f.store.issue(f.issue_id).await.unwrap().unwrap();
    assert!(stored.is_site_visit_scheduled);

    // only one visit may be scheduled at a time
    let err = f
        .engine
        .schedule_site_visit_direct(f.service_head_id, f.issue_id, f.engineer_id, when)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn direct_scheduling_runs_under_the_service_department() {
    let f = fixture().await;

    let visit = f
        .engine
        .schedule_site_visit_direct(
            f.service_head_id,
            f.issue_id,
            f.engineer_id,
            Utc::now() + Duration::days(1),
        )
        .await
        .unwrap();
    assert_eq!(visit.working_department, "SERVICE");
    assert_eq!(visit.request_id, None);
}

#[tokio::test]
async fn inactive_engineers_cannot_be_booked() {
    let f = fixture().await;
    f.store.set_employee_active(f.engineer_id, false).await;

    let err = f
        .engine
        .schedule_site_visit_direct(
            f.service_head_id,
            f.issue_id,
            f.engineer_id,
            Utc::now() + Duration::days(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { .. }));
}

#[tokio::test]
async fn completion_settles_the_workload_counters() {
    let f = fixture().await;
    let request = f
        .engine
        .request_site_visit(f.head_id, f.issue_id)
        .await
        .unwrap();
    let visit = f
        .engine
        .schedule_site_visit_for_request(
            f.service_head_id,
            f.issue_id,
            f.engineer_id,
            request.id,
            Utc::now() + Duration::days(2),
        )
        .await
        .unwrap();

    // the requesting head works the visit's department
    let done = f
        .engine
        .complete_site_visit(f.head_id, visit.id)
        .await
        .unwrap();
    assert_eq!(done.status, VisitStatus::Completed);
    assert!(done.actual_date.is_some());

    let engineer = f.store.employee(f.engineer_id).await.unwrap();
    assert_eq!(engineer.pending_visits, 0);
    assert_eq!(engineer.completed_visits, 1);

    let stored = f.store.issue(f.issue_id).await.unwrap().unwrap();
    assert!(!stored.is_site_visit_scheduled);
    assert!(!stored.is_site_visit_requested);

    // a completed visit cannot be finished again
    let err = f
        .engine
        .cancel_site_visit(f.head_id, visit.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
}

#[tokio::test]
async fn cancellation_returns_only_the_pending_counter() {
    let f = fixture().await;
    let visit = f
        .engine
        .schedule_site_visit_direct(
            f.service_head_id,
            f.issue_id,
            f.engineer_id,
            Utc::now() + Duration::days(1),
        )
        .await
        .unwrap();

    // the scheduler may always finish their own visit
    let cancelled = f
        .engine
        .cancel_site_visit(f.service_head_id, visit.id, Some("Customer postponed.".into()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, VisitStatus::Cancelled);

    let engineer = f.store.employee(f.engineer_id).await.unwrap();
    assert_eq!(engineer.pending_visits, 0);
    assert_eq!(engineer.completed_visits, 0);
}

#[tokio::test]
async fn heads_outside_the_working_department_cannot_finish_a_visit() {
    let f = fixture().await;
    let other_head = f
        .store
        .add_employee("Oscar", EmployeeRole::Head, Some("MECHANICAL"))
        .await;
    let visit = f
        .engine
        .schedule_site_visit_direct(
            f.service_head_id,
            f.issue_id,
            f.engineer_id,
            Utc::now() + Duration::days(1),
        )
        .await
        .unwrap();

    let err = f
        .engine
        .complete_site_visit(other_head.id, visit.id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));
}

#[tokio::test]
async fn resolving_an_issue_cancels_its_scheduled_visit() {
    let f = fixture().await;
    let request = f
        .engine
        .request_site_visit(f.head_id, f.issue_id)
        .await
        .unwrap();
    f.engine
        .schedule_site_visit_for_request(
            f.service_head_id,
            f.issue_id,
            f.engineer_id,
            request.id,
            Utc::now() + Duration::days(2),
        )
        .await
        .unwrap();

    f.engine
        .mark_resolved(f.head_id, f.issue_id, Some("Fixed on the phone.".into()))
        .await
        .unwrap();

    let visits = f.store.visits_for_issue(f.issue_id).await;
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].status, VisitStatus::Cancelled);
    assert!(visits[0].actual_date.is_some());

    let engineer = f.store.employee(f.engineer_id).await.unwrap();
    assert_eq!(engineer.pending_visits, 0);
    assert_eq!(engineer.completed_visits, 0);

    // the cancellation entry is written before the resolution entry
    let timeline = f.store.timeline(f.issue_id, false).await.unwrap();
    let cancel_pos = timeline
        .iter()
        .position(|e| e.action == TimelineAction::SiteVisitCancelled)
        .unwrap();
    let resolve_pos = timeline
        .iter()
        .position(|e| e.action == TimelineAction::Resolved)
        .unwrap();
    assert!(cancel_pos < resolve_pos);

    // even after the multi-entry batch, the back-reference points at the
    // newest row
    let stored = f.store.issue(f.issue_id).await.unwrap().unwrap();
    let newest = timeline.last().unwrap();
    assert_eq!(stored.latest_status_id, Some(newest.id));
}

#[tokio::test]
async fn resolving_an_issue_cancels_its_pending_request() {
    let f = fixture().await;
    f.engine
        .request_site_visit(f.head_id, f.issue_id)
        .await
        .unwrap();

    f.engine
        .mark_resolved(f.head_id, f.issue_id, None)
        .await
        .unwrap();

    let requests = f.store.visit_requests_for_issue(f.issue_id).await;
    assert_eq!(requests[0].status, VisitRequestStatus::Cancelled);

    let stored = f.store.issue(f.issue_id).await.unwrap().unwrap();
    assert!(!stored.is_site_visit_requested);

    // the request-cancel companion entry stays internal
    let visible = f.store.timeline(f.issue_id, true).await.unwrap();
    assert!(visible
        .iter()
        .all(|e| e.action != TimelineAction::SiteVisitCancelled));
}

#[tokio::test]
async fn finishing_a_requested_visit_notifies_the_originating_head() {
    let store = MemStore::new();
    let sender = Arc::new(RecordingSender::default());
    let engine = Engine::new(
        Arc::new(store.clone()),
        sender.clone(),
        Arc::new(MemObjectStorage::new()),
        "test-bucket".to_string(),
    );

    let customer = store.add_customer("Acme", "ops@acme.test").await;
    let project = store.add_project(customer.id, "Line 3").await;
    let manager = store
        .add_employee("Mani", EmployeeRole::IssueManager, None)
        .await;
    let head = store
        .add_employee("Hema", EmployeeRole::Head, Some("ELECTRICAL"))
        .await;
    let service_head = store
        .add_employee("Selva", EmployeeRole::Head, Some("SERVICE"))
        .await;
    let engineer = store
        .add_employee("Esak", EmployeeRole::ServiceEngineer, Some("SERVICE"))
        .await;
    store
        .upsert_device_token(UserRef::Employee(head.id), "head-token")
        .await
        .unwrap();

    let issue = engine
        .create_issue(CreateIssue {
            customer_id: customer.id,
            project_id: project.id,
            description: "coolant pump noise".to_string(),
            priority: None,
            category: None,
            attachment_urls: vec![],
        })
        .await
        .unwrap();
    engine
        .assign_to_department(manager.id, issue.id, head.id, Utc::now() + Duration::days(5))
        .await
        .unwrap();
    engine.start_working(head.id, issue.id).await.unwrap();

    let request = engine.request_site_visit(head.id, issue.id).await.unwrap();
    let visit = engine
        .schedule_site_visit_for_request(
            service_head.id,
            issue.id,
            engineer.id,
            request.id,
            Utc::now() + Duration::days(2),
        )
        .await
        .unwrap();

    // the SERVICE head who scheduled it marks it done; the requesting
    // head must hear about it
    engine
        .complete_site_visit(service_head.id, visit.id)
        .await
        .unwrap();

    let to_head = sender.titles_for("head-token");
    assert!(
        to_head.contains(&"Site visit completed".to_string()),
        "pushes to requesting head: {to_head:?}"
    );
}

#[tokio::test]
async fn requesting_a_visit_requires_the_active_assignment() {
    let f = fixture().await;
    let other_head = f
        .store
        .add_employee("Oscar", EmployeeRole::Head, Some("MECHANICAL"))
        .await;

    let err = f
        .engine
        .request_site_visit(other_head.id, f.issue_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Permission(_)));
}
