// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{
    Assignment, Customer, CustomerStatus, Employee, EmployeeRole, HeadQueue, HeadReportRow,
    InternalStatus, Issue, ManagerReportRow, NewAssignment, NewIssue, NewSiteVisit,
    NewTimelineEntry, NewVisitRequest, Priority, Project, SiteVisit, SiteVisitRequest,
    TimelineEntry, UserRef, VisitRequestStatus, VisitStatus,
};
use crate::store::{Store, StoreResult, StoreTx};

/// In-memory store used by the test suite and local development.
/// `begin` takes the single state lock for the whole unit of work and
/// mutates a snapshot; dropping the transaction discards the snapshot,
/// so partial writes are never observable.
#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

#[derive(Clone, Default)]
struct MemState {
    next_id: i64,
    customers: BTreeMap<i64, Customer>,
    projects: BTreeMap<i64, Project>,
    employees: BTreeMap<i64, Employee>,
    issues: BTreeMap<i64, Issue>,
    timeline: Vec<TimelineEntry>,
    assignments: BTreeMap<i64, Assignment>,
    visit_requests: BTreeMap<i64, SiteVisitRequest>,
    visits: BTreeMap<i64, SiteVisit>,
    device_tokens: HashMap<UserRef, String>,
}

impl MemState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

fn priority_rank(p: Priority) -> u8 {
    match p {
        Priority::Low => 0,
        Priority::Medium => 1,
        Priority::High => 2,
        Priority::Critical => 3,
        Priority::Urgent => 4,
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Fixture seeding for tests and local runs.

    pub async fn add_customer(&self, name: &str, email: &str) -> Customer {
        let mut s = self.state.lock().await;
        let id = s.next_id();
        let customer = Customer {
            id,
            name: name.to_string(),
            email: email.to_string(),
            mobile_no: None,
        };
        s.customers.insert(id, customer.clone());
        customer
    }

    pub async fn add_project(&self, customer_id: i64, project_name: &str) -> Project {
        let mut s = self.state.lock().await;
        let id = s.next_id();
        let project = Project {
            id,
            customer_id,
            project_name: project_name.to_string(),
            machine_type: None,
            location: None,
            created_at: Utc::now(),
        };
        s.projects.insert(id, project.clone());
        project
    }

    pub async fn add_employee(
        &self,
        name: &str,
        role: EmployeeRole,
        department: Option<&str>,
    ) -> Employee {
        let mut s = self.state.lock().await;
        let id = s.next_id();
        let employee = Employee {
            id,
            name: name.to_string(),
            email: format!("{}@servicedesk.local", name.to_lowercase().replace(' ', ".")),
            mobile_no: Some("0000000000".to_string()),
            role,
            department: department.map(str::to_string),
            is_active: true,
            pending_visits: 0,
            completed_visits: 0,
        };
        s.employees.insert(id, employee.clone());
        employee
    }

    pub async fn set_employee_active(&self, id: i64, active: bool) {
        let mut s = self.state.lock().await;
        if let Some(e) = s.employees.get_mut(&id) {
            e.is_active = active;
        }
    }

    pub async fn employee(&self, id: i64) -> Option<Employee> {
        self.state.lock().await.employees.get(&id).cloned()
    }

    pub async fn assignments_for_issue(&self, issue_id: i64) -> Vec<Assignment> {
        self.state
            .lock()
            .await
            .assignments
            .values()
            .filter(|a| a.issue_id == issue_id)
            .cloned()
            .collect()
    }

    pub async fn visit_requests_for_issue(&self, issue_id: i64) -> Vec<SiteVisitRequest> {
        self.state
            .lock()
            .await
            .visit_requests
            .values()
            .filter(|r| r.issue_id == issue_id)
            .cloned()
            .collect()
    }

    pub async fn visits_for_issue(&self, issue_id: i64) -> Vec<SiteVisit> {
        self.state
            .lock()
            .await
            .visits
            .values()
            .filter(|v| v.issue_id == issue_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemTx { guard, work }))
    }

    async fn issue(&self, issue_id: i64) -> StoreResult<Option<Issue>> {
        Ok(self.state.lock().await.issues.get(&issue_id).cloned())
    }

    async fn issue_by_ticket(&self, ticket_no: &str) -> StoreResult<Option<Issue>> {
        Ok(self
            .state
            .lock()
            .await
            .issues
            .values()
            .find(|i| i.ticket_no == ticket_no)
            .cloned())
    }

    async fn timeline(&self, issue_id: i64, visible_only: bool) -> StoreResult<Vec<TimelineEntry>> {
        let s = self.state.lock().await;
        let mut rows: Vec<TimelineEntry> = s
            .timeline
            .iter()
            .filter(|t| t.issue_id == issue_id && (!visible_only || t.visible_to_customer))
            .cloned()
            .collect();
        rows.sort_by_key(|t| (t.created_at, t.id));
        Ok(rows)
    }

    async fn issues_for_customer(&self, customer_id: i64, open: bool) -> StoreResult<Vec<Issue>> {
        let s = self.state.lock().await;
        let closed = |st: CustomerStatus| {
            matches!(st, CustomerStatus::Closed | CustomerStatus::Cancelled)
        };
        let mut rows: Vec<Issue> = s
            .issues
            .values()
            .filter(|i| i.customer_id == customer_id && closed(i.customer_status) != open)
            .cloned()
            .collect();
        if open {
            rows.sort_by(|a, b| {
                priority_rank(b.priority)
                    .cmp(&priority_rank(a.priority))
                    .then(b.created_at.cmp(&a.created_at))
            });
        } else {
            rows.sort_by(|a, b| b.closed_at.cmp(&a.closed_at));
        }
        Ok(rows)
    }

    async fn issues_for_head(&self, head_id: i64, queue: HeadQueue) -> StoreResult<Vec<Issue>> {
        let s = self.state.lock().await;
        let mut rows: Vec<Issue> = s
            .issues
            .values()
            .filter(|i| {
                s.assignments.values().any(|a| {
                    a.issue_id == i.id
                        && a.employee_id == head_id
                        && match queue {
                            HeadQueue::NewlyAssigned => a.is_active && !a.is_started_work,
                            HeadQueue::InProgress => {
                                a.is_active
                                    && a.is_started_work
                                    && i.internal_status != InternalStatus::Closed
                            }
                            HeadQueue::Closed => {
                                !a.is_active
                                    && a.is_started_work
                                    && i.internal_status == InternalStatus::Closed
                            }
                        }
                })
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rows)
    }

    async fn device_token(&self, user: UserRef) -> StoreResult<Option<String>> {
        Ok(self.state.lock().await.device_tokens.get(&user).cloned())
    }

    async fn upsert_device_token(&self, user: UserRef, token: &str) -> StoreResult<()> {
        self.state
            .lock()
            .await
            .device_tokens
            .insert(user, token.to_string());
        Ok(())
    }
}

struct MemTx {
    guard: OwnedMutexGuard<MemState>,
    work: MemState,
}

#[async_trait]
impl StoreTx for MemTx {
    async fn customer_by_id(&mut self, id: i64) -> StoreResult<Option<Customer>> {
        Ok(self.work.customers.get(&id).cloned())
    }

    async fn project_for_customer(
        &mut self,
        project_id: i64,
        customer_id: i64,
    ) -> StoreResult<Option<Project>> {
        Ok(self
            .work
            .projects
            .get(&project_id)
            .filter(|p| p.customer_id == customer_id)
            .cloned())
    }

    async fn employee_by_id(&mut self, id: i64) -> StoreResult<Option<Employee>> {
        Ok(self.work.employees.get(&id).cloned())
    }

    async fn employee_by_role(
        &mut self,
        role: EmployeeRole,
        department: Option<&str>,
    ) -> StoreResult<Option<Employee>> {
        Ok(self
            .work
            .employees
            .values()
            .find(|e| {
                e.role == role
                    && e.is_active
                    && department.map_or(true, |d| e.department.as_deref() == Some(d))
            })
            .cloned())
    }

    async fn update_employee(&mut self, employee: &Employee) -> StoreResult<()> {
        self.work.employees.insert(employee.id, employee.clone());
        Ok(())
    }

    async fn issue_by_id(&mut self, id: i64) -> StoreResult<Option<Issue>> {
        Ok(self.work.issues.get(&id).cloned())
    }

    async fn count_issues_in_year(&mut self, year: i32) -> StoreResult<i64> {
        Ok(self
            .work
            .issues
            .values()
            .filter(|i| i.created_at.year() == year)
            .count() as i64)
    }

    async fn insert_issue(&mut self, issue: NewIssue) -> StoreResult<Issue> {
        let id = self.work.next_id();
        let now = Utc::now();
        let row = Issue {
            id,
            ticket_no: issue.ticket_no,
            description: issue.description,
            internal_status: InternalStatus::New,
            customer_status: CustomerStatus::UnderReview,
            priority: issue.priority,
            category: issue.category,
            project_id: issue.project_id,
            customer_id: issue.customer_id,
            attachment_urls: issue.attachment_urls,
            is_attachments_requested: false,
            attachments_requested_by: None,
            is_site_visit_requested: false,
            is_site_visit_scheduled: false,
            latest_status_id: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            closed_at: None,
        };
        self.work.issues.insert(id, row.clone());
        Ok(row)
    }

    async fn update_issue(&mut self, issue: &Issue) -> StoreResult<()> {
        let mut row = issue.clone();
        row.updated_at = Utc::now();
        self.work.issues.insert(row.id, row);
        Ok(())
    }

    async fn append_timeline(&mut self, entry: NewTimelineEntry) -> StoreResult<TimelineEntry> {
        let id = self.work.next_id();
        let row = TimelineEntry {
            id,
            issue_id: entry.issue_id,
            action: entry.action,
            from_internal_status: entry.from_internal_status,
            to_internal_status: entry.to_internal_status,
            from_customer_status: entry.from_customer_status,
            to_customer_status: entry.to_customer_status,
            comment: entry.comment,
            visible_to_customer: entry.visible_to_customer,
            performed_by: entry.performed_by,
            created_at: Utc::now(),
        };
        self.work.timeline.push(row.clone());
        Ok(row)
    }

    async fn active_assignment(&mut self, issue_id: i64) -> StoreResult<Option<Assignment>> {
        Ok(self
            .work
            .assignments
            .values()
            .find(|a| a.issue_id == issue_id && a.is_active)
            .cloned())
    }

    async fn insert_assignment(&mut self, assignment: NewAssignment) -> StoreResult<Assignment> {
        let id = self.work.next_id();
        let row = Assignment {
            id,
            issue_id: assignment.issue_id,
            employee_id: assignment.employee_id,
            is_active: true,
            is_started_work: false,
            assigned_at: Utc::now(),
            initial_deadline: assignment.initial_deadline,
            final_deadline: assignment.final_deadline,
        };
        self.work.assignments.insert(id, row.clone());
        Ok(row)
    }

    async fn update_assignment(&mut self, assignment: &Assignment) -> StoreResult<()> {
        self.work.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn pending_visit_request(
        &mut self,
        issue_id: i64,
    ) -> StoreResult<Option<SiteVisitRequest>> {
        Ok(self
            .work
            .visit_requests
            .values()
            .find(|r| r.issue_id == issue_id && r.status == VisitRequestStatus::Pending)
            .cloned())
    }

    async fn visit_request_by_id(&mut self, id: i64) -> StoreResult<Option<SiteVisitRequest>> {
        Ok(self.work.visit_requests.get(&id).cloned())
    }

    async fn insert_visit_request(
        &mut self,
        request: NewVisitRequest,
    ) -> StoreResult<SiteVisitRequest> {
        let id = self.work.next_id();
        let row = SiteVisitRequest {
            id,
            issue_id: request.issue_id,
            ticket_no: request.ticket_no,
            requested_by: request.requested_by,
            requested_by_name: request.requested_by_name,
            requested_by_department: request.requested_by_department,
            status: VisitRequestStatus::Pending,
            requested_at: Utc::now(),
        };
        self.work.visit_requests.insert(id, row.clone());
        Ok(row)
    }

    async fn update_visit_request(&mut self, request: &SiteVisitRequest) -> StoreResult<()> {
        self.work.visit_requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn head_report_rows(
        &mut self,
        head_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<HeadReportRow>> {
        let mut rows: Vec<HeadReportRow> = self
            .work
            .assignments
            .values()
            .filter(|a| {
                a.employee_id == head_id && a.assigned_at >= from && a.assigned_at <= to
            })
            .filter_map(|a| {
                let issue = self.work.issues.get(&a.issue_id)?;
                Some(HeadReportRow {
                    ticket_no: issue.ticket_no.clone(),
                    description: issue.description.clone(),
                    internal_status: issue.internal_status,
                    customer_status: issue.customer_status,
                    priority: issue.priority,
                    created_at: issue.created_at,
                    assigned_at: a.assigned_at,
                    resolved_at: issue.resolved_at,
                    initial_deadline: a.initial_deadline,
                    final_deadline: a.final_deadline,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.assigned_at.cmp(&a.assigned_at));
        Ok(rows)
    }

    async fn manager_report_rows(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<ManagerReportRow>> {
        let mut rows: Vec<ManagerReportRow> = self
            .work
            .issues
            .values()
            .filter(|i| i.created_at >= from && i.created_at <= to)
            .map(|i| {
                let department = self
                    .work
                    .assignments
                    .values()
                    .filter(|a| a.issue_id == i.id)
                    .max_by_key(|a| a.assigned_at)
                    .and_then(|a| self.work.employees.get(&a.employee_id))
                    .and_then(|e| e.department.clone());
                ManagerReportRow {
                    ticket_no: i.ticket_no.clone(),
                    internal_status: i.internal_status,
                    created_at: i.created_at,
                    resolved_at: i.resolved_at,
                    department,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn scheduled_visit(&mut self, issue_id: i64) -> StoreResult<Option<SiteVisit>> {
        Ok(self
            .work
            .visits
            .values()
            .find(|v| v.issue_id == issue_id && v.status == VisitStatus::Scheduled)
            .cloned())
    }

    async fn visit_by_id(&mut self, id: i64) -> StoreResult<Option<SiteVisit>> {
        Ok(self.work.visits.get(&id).cloned())
    }

    async fn insert_visit(&mut self, visit: NewSiteVisit) -> StoreResult<SiteVisit> {
        let id = self.work.next_id();
        let row = SiteVisit {
            id,
            issue_id: visit.issue_id,
            engineer_id: visit.engineer_id,
            working_department: visit.working_department,
            scheduled_by: visit.scheduled_by,
            request_id: visit.request_id,
            scheduled_date: visit.scheduled_date,
            actual_date: None,
            status: VisitStatus::Scheduled,
        };
        self.work.visits.insert(id, row.clone());
        Ok(row)
    }

    async fn update_visit(&mut self, visit: &SiteVisit) -> StoreResult<()> {
        self.work.visits.insert(visit.id, visit.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        *self.guard = self.work;
        Ok(())
    }
}
