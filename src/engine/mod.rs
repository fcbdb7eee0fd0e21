// src/engine/mod.rs
//
// Issue lifecycle & assignment engine. Every mutating operation runs as
// one unit of work: preconditions are re-read inside the transaction,
// all writes (entity + timeline + counters) commit together, and push
// notifications collected along the way are dispatched after commit.

use std::sync::Arc;

use crate::models::{
    Assignment, Customer, Employee, EmployeeRole, InternalStatus, Issue, NewTimelineEntry,
    TimelineEntry, SERVICE_DEPARTMENT,
};
use crate::notify::{self, PushEvent, PushSender};
use crate::storage::ObjectStorage;
use crate::store::{Store, StoreTx};

pub mod error;
pub mod lifecycle;
pub mod reports;
pub mod visits;

pub use error::{EngineError, EngineResult};

#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn Store>,
    sender: Arc<dyn PushSender>,
    files: Arc<dyn ObjectStorage>,
    bucket: String,
}

impl Engine {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<dyn PushSender>,
        files: Arc<dyn ObjectStorage>,
        bucket: String,
    ) -> Self {
        Self {
            store,
            sender,
            files,
            bucket,
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn files(&self) -> &dyn ObjectStorage {
        self.files.as_ref()
    }

    /// Post-commit fan-out; never fails the operation.
    async fn notify(&self, events: Vec<PushEvent>) {
        if !events.is_empty() {
            notify::dispatch(self.store.as_ref(), self.sender.as_ref(), events).await;
        }
    }
}

// ───────────────────────────────────────
// Actor resolution (one capability check per operation)
// ───────────────────────────────────────

async fn require_customer(tx: &mut dyn StoreTx, id: i64) -> EngineResult<Customer> {
    tx.customer_by_id(id)
        .await?
        .ok_or(EngineError::not_found("customer", id))
}

async fn require_issue(tx: &mut dyn StoreTx, id: i64) -> EngineResult<Issue> {
    tx.issue_by_id(id)
        .await?
        .ok_or(EngineError::not_found("issue", id))
}

async fn require_employee(
    tx: &mut dyn StoreTx,
    id: i64,
    role: EmployeeRole,
) -> EngineResult<Employee> {
    let employee = tx
        .employee_by_id(id)
        .await?
        .ok_or(EngineError::not_found("employee", id))?;
    if employee.role != role {
        return Err(EngineError::permission(format!(
            "employee {} does not act as {:?}",
            id, role
        )));
    }
    if !employee.is_active {
        return Err(EngineError::conflict(format!("employee {} is inactive", id)));
    }
    Ok(employee)
}

async fn require_manager(tx: &mut dyn StoreTx, id: i64) -> EngineResult<Employee> {
    require_employee(tx, id, EmployeeRole::IssueManager).await
}

async fn require_head(tx: &mut dyn StoreTx, id: i64) -> EngineResult<Employee> {
    require_employee(tx, id, EmployeeRole::Head).await
}

async fn require_service_head(tx: &mut dyn StoreTx, id: i64) -> EngineResult<Employee> {
    let head = require_head(tx, id).await?;
    if head.department.as_deref() != Some(SERVICE_DEPARTMENT) {
        return Err(EngineError::permission(format!(
            "head {} is not part of the {} department",
            id, SERVICE_DEPARTMENT
        )));
    }
    Ok(head)
}

/// Site visitors must be active service engineers; anything else reads
/// as "visitor not found".
async fn require_engineer(tx: &mut dyn StoreTx, id: i64) -> EngineResult<Employee> {
    match tx.employee_by_id(id).await? {
        Some(e) if e.role == EmployeeRole::ServiceEngineer && e.is_active => Ok(e),
        _ => Err(EngineError::not_found("service engineer", id)),
    }
}

/// The head must hold the current active assignment for the issue.
async fn require_active_assignment(
    tx: &mut dyn StoreTx,
    issue_id: i64,
    head_id: i64,
) -> EngineResult<Assignment> {
    match tx.active_assignment(issue_id).await? {
        Some(a) if a.employee_id == head_id => Ok(a),
        _ => Err(EngineError::permission(format!(
            "issue {} is not assigned to head {}",
            issue_id, head_id
        ))),
    }
}

// ───────────────────────────────────────
// Shared write helpers
// ───────────────────────────────────────

/// Appends a timeline entry and repoints the issue's latest-status
/// back-reference; the caller persists the issue at the end of the
/// operation.
async fn record(
    tx: &mut dyn StoreTx,
    issue: &mut Issue,
    entry: NewTimelineEntry,
) -> EngineResult<TimelineEntry> {
    let row = tx.append_timeline(entry).await?;
    issue.latest_status_id = Some(row.id);
    Ok(row)
}

/// Validated status move on both tracks; returns the previous internal
/// status for the timeline's from/to pair.
fn transition(issue: &mut Issue, to: InternalStatus) -> EngineResult<InternalStatus> {
    let from = issue.internal_status;
    if !from.can_transition_to(to) {
        return Err(EngineError::invalid_state(format!(
            "issue {} cannot move from {:?} to {:?}",
            issue.ticket_no, from, to
        )));
    }
    issue.internal_status = to;
    issue.customer_status = to.customer_view();
    Ok(from)
}
