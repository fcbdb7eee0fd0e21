// src/store/mod.rs

use async_trait::async_trait;

use chrono::{DateTime, Utc};

use crate::models::{
    Assignment, Customer, Employee, EmployeeRole, HeadQueue, HeadReportRow, Issue,
    ManagerReportRow, NewAssignment, NewIssue, NewSiteVisit, NewTimelineEntry, NewVisitRequest,
    Project, SiteVisit, SiteVisitRequest, TimelineEntry, UserRef,
};

pub mod memory;
pub mod postgres;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Transactional data store behind the lifecycle engine. `begin` opens a
/// serializable unit of work; the pool-level reads serve the query surface
/// and post-commit notification dispatch.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    async fn issue(&self, issue_id: i64) -> StoreResult<Option<Issue>>;
    async fn issue_by_ticket(&self, ticket_no: &str) -> StoreResult<Option<Issue>>;
    async fn timeline(&self, issue_id: i64, visible_only: bool) -> StoreResult<Vec<TimelineEntry>>;
    async fn issues_for_customer(&self, customer_id: i64, open: bool) -> StoreResult<Vec<Issue>>;
    async fn issues_for_head(&self, head_id: i64, queue: HeadQueue) -> StoreResult<Vec<Issue>>;

    async fn device_token(&self, user: UserRef) -> StoreResult<Option<String>>;
    async fn upsert_device_token(&self, user: UserRef, token: &str) -> StoreResult<()>;
}

/// One atomic unit of work. Dropping a transaction without calling
/// `commit` rolls every write back.
#[async_trait]
pub trait StoreTx: Send {
    // people & projects
    async fn customer_by_id(&mut self, id: i64) -> StoreResult<Option<Customer>>;
    async fn project_for_customer(
        &mut self,
        project_id: i64,
        customer_id: i64,
    ) -> StoreResult<Option<Project>>;
    async fn employee_by_id(&mut self, id: i64) -> StoreResult<Option<Employee>>;
    async fn employee_by_role(
        &mut self,
        role: EmployeeRole,
        department: Option<&str>,
    ) -> StoreResult<Option<Employee>>;
    async fn update_employee(&mut self, employee: &Employee) -> StoreResult<()>;

    // issues
    async fn issue_by_id(&mut self, id: i64) -> StoreResult<Option<Issue>>;
    async fn count_issues_in_year(&mut self, year: i32) -> StoreResult<i64>;
    async fn insert_issue(&mut self, issue: NewIssue) -> StoreResult<Issue>;
    async fn update_issue(&mut self, issue: &Issue) -> StoreResult<()>;

    // timeline (append-only)
    async fn append_timeline(&mut self, entry: NewTimelineEntry) -> StoreResult<TimelineEntry>;

    // assignments
    async fn active_assignment(&mut self, issue_id: i64) -> StoreResult<Option<Assignment>>;
    async fn insert_assignment(&mut self, assignment: NewAssignment) -> StoreResult<Assignment>;
    async fn update_assignment(&mut self, assignment: &Assignment) -> StoreResult<()>;

    // site-visit requests
    async fn pending_visit_request(&mut self, issue_id: i64)
        -> StoreResult<Option<SiteVisitRequest>>;
    async fn visit_request_by_id(&mut self, id: i64) -> StoreResult<Option<SiteVisitRequest>>;
    async fn insert_visit_request(
        &mut self,
        request: NewVisitRequest,
    ) -> StoreResult<SiteVisitRequest>;
    async fn update_visit_request(&mut self, request: &SiteVisitRequest) -> StoreResult<()>;

    // reports
    async fn head_report_rows(
        &mut self,
        head_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<HeadReportRow>>;
    async fn manager_report_rows(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<ManagerReportRow>>;

    // site visits
    async fn scheduled_visit(&mut self, issue_id: i64) -> StoreResult<Option<SiteVisit>>;
    async fn visit_by_id(&mut self, id: i64) -> StoreResult<Option<SiteVisit>>;
    async fn insert_visit(&mut self, visit: NewSiteVisit) -> StoreResult<SiteVisit>;
    async fn update_visit(&mut self, visit: &SiteVisit) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
