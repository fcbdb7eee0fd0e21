// src/models/mod.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ───────────────────────────────────────
// Status vocabularies
// ───────────────────────────────────────

/// Fine-grained staff-facing issue status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "internal_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InternalStatus {
    New,
    Assigned,
    InProgress,
    WaitingForParts,
    WaitingForApproval,
    Transferred,
    Resolved,
    Reopened,
    Closed,
    Cancelled,
}

/// Coarse customer-facing mirror of [`InternalStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "customer_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerStatus {
    UnderReview,
    Open,
    InProgress,
    Closed,
    Cancelled,
}

impl InternalStatus {
    /// The one place where the internal → customer correlation is defined.
    pub fn customer_view(self) -> CustomerStatus {
        match self {
            InternalStatus::New => CustomerStatus::UnderReview,
            InternalStatus::Assigned => CustomerStatus::Open,
            InternalStatus::InProgress
            | InternalStatus::WaitingForParts
            | InternalStatus::WaitingForApproval
            | InternalStatus::Transferred
            | InternalStatus::Reopened => CustomerStatus::InProgress,
            InternalStatus::Resolved | InternalStatus::Closed => CustomerStatus::Closed,
            InternalStatus::Cancelled => CustomerStatus::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, InternalStatus::Closed | InternalStatus::Cancelled)
    }

    /// Legal forward moves. Terminal states admit nothing; `Cancelled` is
    /// reachable from every non-terminal state, and `Closed` from every
    /// non-terminal state that can be resolved or invalidated.
    pub fn can_transition_to(self, next: InternalStatus) -> bool {
        use InternalStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        match self {
            New => matches!(next, Assigned | Closed),
            Assigned => matches!(next, InProgress | Closed),
            InProgress => matches!(
                next,
                Resolved | Reopened | WaitingForParts | WaitingForApproval | Transferred | Closed
            ),
            WaitingForParts | WaitingForApproval | Transferred => {
                matches!(next, InProgress | Closed)
            }
            Resolved => matches!(next, Reopened | Closed),
            Reopened => matches!(next, InProgress | Closed),
            Closed | Cancelled => false,
        }
    }
}

// ───────────────────────────────────────
// Enumerated attributes
// ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "priority", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "category", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    HardwareIssue,
    SoftwareIssue,
    QualityIssue,
    Maintenance,
    Installation,
    Training,
    WarrantyClaim,
    Servicing,
    NetworkIssue,
    ElectricalIssue,
    #[default]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "employee_role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmployeeRole {
    IssueManager,
    Head,
    ServiceEngineer,
}

/// Every state-changing action recorded on an issue timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "timeline_action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineAction {
    IssueCreated,
    Assigned,
    WorkStarted,
    CommentAdded,
    SiteVisitRequested,
    SiteVisitScheduled,
    SiteVisitCompleted,
    SiteVisitCancelled,
    SiteVisitRequestRejected,
    AttachmentRequested,
    AttachmentAdded,
    Resolved,
    Invalid,
    Reopened,
    Closed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "visit_request_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitRequestStatus {
    Pending,
    Completed,
    Rejected,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "visit_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisitStatus {
    Scheduled,
    Completed,
    Cancelled,
}

/// Department that owns site-visit scheduling.
pub const SERVICE_DEPARTMENT: &str = "SERVICE";

// ───────────────────────────────────────
// People & projects
// ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub mobile_no: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub customer_id: i64,
    pub project_name: String,
    pub machine_type: Option<String>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Employee {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub mobile_no: Option<String>,
    pub role: EmployeeRole,
    pub department: Option<String>,
    pub is_active: bool,
    pub pending_visits: i32,
    pub completed_visits: i32,
}

// ───────────────────────────────────────
// Issue + timeline
// ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Issue {
    pub id: i64,
    pub ticket_no: String,
    pub description: String,
    pub internal_status: InternalStatus,
    pub customer_status: CustomerStatus,
    pub priority: Priority,
    pub category: Category,
    pub project_id: i64,
    pub customer_id: i64,
    pub attachment_urls: Vec<String>,
    pub is_attachments_requested: bool,
    pub attachments_requested_by: Option<i64>,
    pub is_site_visit_requested: bool,
    pub is_site_visit_scheduled: bool,
    pub latest_status_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Immutable audit record; never updated or deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TimelineEntry {
    pub id: i64,
    pub issue_id: i64,
    pub action: TimelineAction,
    pub from_internal_status: Option<InternalStatus>,
    pub to_internal_status: Option<InternalStatus>,
    pub from_customer_status: Option<CustomerStatus>,
    pub to_customer_status: Option<CustomerStatus>,
    pub comment: Option<String>,
    pub visible_to_customer: bool,
    pub performed_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

// ───────────────────────────────────────
// Assignment / site visits
// ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assignment {
    pub id: i64,
    pub issue_id: i64,
    pub employee_id: i64,
    pub is_active: bool,
    pub is_started_work: bool,
    pub assigned_at: DateTime<Utc>,
    pub initial_deadline: DateTime<Utc>,
    pub final_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SiteVisitRequest {
    pub id: i64,
    pub issue_id: i64,
    pub ticket_no: String,
    pub requested_by: i64,
    pub requested_by_name: String,
    pub requested_by_department: String,
    pub status: VisitRequestStatus,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SiteVisit {
    pub id: i64,
    pub issue_id: i64,
    pub engineer_id: i64,
    pub working_department: String,
    pub scheduled_by: i64,
    pub request_id: Option<i64>,
    pub scheduled_date: DateTime<Utc>,
    pub actual_date: Option<DateTime<Utc>>,
    pub status: VisitStatus,
}

// ───────────────────────────────────────
// Store-level insert payloads
// ───────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewIssue {
    pub ticket_no: String,
    pub description: String,
    pub priority: Priority,
    pub category: Category,
    pub project_id: i64,
    pub customer_id: i64,
    pub attachment_urls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewTimelineEntry {
    pub issue_id: i64,
    pub action: TimelineAction,
    pub from_internal_status: Option<InternalStatus>,
    pub to_internal_status: Option<InternalStatus>,
    pub from_customer_status: Option<CustomerStatus>,
    pub to_customer_status: Option<CustomerStatus>,
    pub comment: Option<String>,
    pub visible_to_customer: bool,
    pub performed_by: Option<i64>,
}

impl NewTimelineEntry {
    /// Entry with no status movement, e.g. comments and attachment actions.
    pub fn bare(issue_id: i64, action: TimelineAction) -> Self {
        Self {
            issue_id,
            action,
            from_internal_status: None,
            to_internal_status: None,
            from_customer_status: None,
            to_customer_status: None,
            comment: None,
            visible_to_customer: false,
            performed_by: None,
        }
    }

    pub fn transition(
        issue_id: i64,
        action: TimelineAction,
        from: InternalStatus,
        to: InternalStatus,
    ) -> Self {
        Self {
            from_internal_status: Some(from),
            to_internal_status: Some(to),
            from_customer_status: Some(from.customer_view()),
            to_customer_status: Some(to.customer_view()),
            ..Self::bare(issue_id, action)
        }
    }

    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.comment = Some(text.into());
        self
    }

    pub fn visible(mut self) -> Self {
        self.visible_to_customer = true;
        self
    }

    pub fn by(mut self, actor_id: i64) -> Self {
        self.performed_by = Some(actor_id);
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub issue_id: i64,
    pub employee_id: i64,
    pub initial_deadline: DateTime<Utc>,
    pub final_deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewVisitRequest {
    pub issue_id: i64,
    pub ticket_no: String,
    pub requested_by: i64,
    pub requested_by_name: String,
    pub requested_by_department: String,
}

#[derive(Debug, Clone)]
pub struct NewSiteVisit {
    pub issue_id: i64,
    pub engineer_id: i64,
    pub working_department: String,
    pub scheduled_by: i64,
    pub request_id: Option<i64>,
    pub scheduled_date: DateTime<Utc>,
}

// ───────────────────────────────────────
// Report rows
// ───────────────────────────────────────

/// One assignment a head received in the reporting window, joined with
/// its issue.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct HeadReportRow {
    pub ticket_no: String,
    pub description: String,
    pub internal_status: InternalStatus,
    pub customer_status: CustomerStatus,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub assigned_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub initial_deadline: DateTime<Utc>,
    pub final_deadline: Option<DateTime<Utc>>,
}

/// One issue created in the reporting window, tagged with the department
/// of its most recent assignee (if any).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ManagerReportRow {
    pub ticket_no: String,
    pub internal_status: InternalStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub department: Option<String>,
}

// ───────────────────────────────────────
// Query vocabulary
// ───────────────────────────────────────

/// A push-notification recipient; customers and employees live in
/// separate id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind", content = "id")]
pub enum UserRef {
    Customer(i64),
    Employee(i64),
}

/// Work queues a department head browses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeadQueue {
    NewlyAssigned,
    InProgress,
    Closed,
}

pub fn ticket_no(year: i32, seq: i64) -> String {
    format!("{year}-{seq:03}")
}
