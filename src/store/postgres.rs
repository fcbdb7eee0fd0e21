// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar, Pool, Postgres, Transaction};

use crate::models::{
    Assignment, Customer, Employee, EmployeeRole, HeadQueue, HeadReportRow, Issue,
    ManagerReportRow, NewAssignment, NewIssue, NewSiteVisit, NewTimelineEntry, NewVisitRequest,
    Project, SiteVisit, SiteVisitRequest, TimelineEntry, UserRef,
};
use crate::store::{Store, StoreResult, StoreTx};

const ISSUE_COLUMNS: &str = r#"id, ticket_no, description, internal_status, customer_status,
       priority, category, project_id, customer_id, attachment_urls,
       is_attachments_requested, attachments_requested_by,
       is_site_visit_requested, is_site_visit_scheduled, latest_status_id,
       created_at, updated_at, resolved_at, closed_at"#;

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn user_ref_parts(user: UserRef) -> (&'static str, i64) {
    match user {
        UserRef::Customer(id) => ("CUSTOMER", id),
        UserRef::Employee(id) => ("EMPLOYEE", id),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        // Precondition reads and writes share one serializable snapshot.
        query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn issue(&self, issue_id: i64) -> StoreResult<Option<Issue>> {
        let row = query_as::<_, Issue>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM public.issues WHERE id = $1"
        ))
        .bind(issue_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn issue_by_ticket(&self, ticket_no: &str) -> StoreResult<Option<Issue>> {
        let row = query_as::<_, Issue>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM public.issues WHERE ticket_no = $1"
        ))
        .bind(ticket_no)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn timeline(&self, issue_id: i64, visible_only: bool) -> StoreResult<Vec<TimelineEntry>> {
        let rows = query_as::<_, TimelineEntry>(
            r#"SELECT id, issue_id, action, from_internal_status, to_internal_status,
                      from_customer_status, to_customer_status, comment,
                      visible_to_customer, performed_by, created_at
               FROM public.issue_timeline
               WHERE issue_id = $1 AND (NOT $2 OR visible_to_customer)
               ORDER BY created_at, id"#,
        )
        .bind(issue_id)
        .bind(visible_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn issues_for_customer(&self, customer_id: i64, open: bool) -> StoreResult<Vec<Issue>> {
        let sql = if open {
            format!(
                r#"SELECT {ISSUE_COLUMNS} FROM public.issues
                   WHERE customer_id = $1
                     AND customer_status NOT IN ('CLOSED', 'CANCELLED')
                   ORDER BY priority DESC, created_at DESC"#
            )
        } else {
            format!(
                r#"SELECT {ISSUE_COLUMNS} FROM public.issues
                   WHERE customer_id = $1
                     AND customer_status IN ('CLOSED', 'CANCELLED')
                   ORDER BY closed_at DESC NULLS LAST"#
            )
        };
        let rows = query_as::<_, Issue>(&sql)
            .bind(customer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn issues_for_head(&self, head_id: i64, queue: HeadQueue) -> StoreResult<Vec<Issue>> {
        let predicate = match queue {
            HeadQueue::NewlyAssigned => "a.is_active AND NOT a.is_started_work",
            HeadQueue::InProgress => {
                "a.is_active AND a.is_started_work AND i.internal_status <> 'CLOSED'"
            }
            HeadQueue::Closed => {
                "NOT a.is_active AND a.is_started_work AND i.internal_status = 'CLOSED'"
            }
        };
        let sql = format!(
            r#"SELECT i.id, i.ticket_no, i.description, i.internal_status, i.customer_status,
                      i.priority, i.category, i.project_id, i.customer_id, i.attachment_urls,
                      i.is_attachments_requested, i.attachments_requested_by,
                      i.is_site_visit_requested, i.is_site_visit_scheduled, i.latest_status_id,
                      i.created_at, i.updated_at, i.resolved_at, i.closed_at
               FROM public.issues i
               JOIN public.issue_assigned_departments a ON a.issue_id = i.id
               WHERE a.employee_id = $1 AND {predicate}
               ORDER BY i.updated_at DESC"#
        );
        let rows = query_as::<_, Issue>(&sql)
            .bind(head_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn device_token(&self, user: UserRef) -> StoreResult<Option<String>> {
        let (kind, id) = user_ref_parts(user);
        let token = query_scalar::<_, String>(
            r#"SELECT token FROM public.device_tokens WHERE user_kind = $1 AND user_id = $2"#,
        )
        .bind(kind)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(token)
    }

    async fn upsert_device_token(&self, user: UserRef, token: &str) -> StoreResult<()> {
        let (kind, id) = user_ref_parts(user);
        query(
            r#"INSERT INTO public.device_tokens (user_kind, user_id, token)
               VALUES ($1, $2, $3)
               ON CONFLICT (user_kind, user_id) DO UPDATE SET token = EXCLUDED.token"#,
        )
        .bind(kind)
        .bind(id)
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn customer_by_id(&mut self, id: i64) -> StoreResult<Option<Customer>> {
        let row = query_as::<_, Customer>(
            r#"SELECT id, name, email, mobile_no FROM public.customers WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn project_for_customer(
        &mut self,
        project_id: i64,
        customer_id: i64,
    ) -> StoreResult<Option<Project>> {
        let row = query_as::<_, Project>(
            r#"SELECT id, customer_id, project_name, machine_type, location, created_at
               FROM public.projects WHERE id = $1 AND customer_id = $2"#,
        )
        .bind(project_id)
        .bind(customer_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn employee_by_id(&mut self, id: i64) -> StoreResult<Option<Employee>> {
        let row = query_as::<_, Employee>(
            r#"SELECT id, name, email, mobile_no, role, department, is_active,
                      pending_visits, completed_visits
               FROM public.employees WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn employee_by_role(
        &mut self,
        role: EmployeeRole,
        department: Option<&str>,
    ) -> StoreResult<Option<Employee>> {
        let row = query_as::<_, Employee>(
            r#"SELECT id, name, email, mobile_no, role, department, is_active,
                      pending_visits, completed_visits
               FROM public.employees
               WHERE role = $1 AND is_active AND ($2::text IS NULL OR department = $2)
               ORDER BY id
               LIMIT 1"#,
        )
        .bind(role)
        .bind(department)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_employee(&mut self, employee: &Employee) -> StoreResult<()> {
        query(
            r#"UPDATE public.employees
               SET is_active = $2, pending_visits = $3, completed_visits = $4
               WHERE id = $1"#,
        )
        .bind(employee.id)
        .bind(employee.is_active)
        .bind(employee.pending_visits)
        .bind(employee.completed_visits)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn issue_by_id(&mut self, id: i64) -> StoreResult<Option<Issue>> {
        let row = query_as::<_, Issue>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM public.issues WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn count_issues_in_year(&mut self, year: i32) -> StoreResult<i64> {
        let count = query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM public.issues
               WHERE created_at >= make_date($1, 1, 1)
                 AND created_at < make_date($1 + 1, 1, 1)"#,
        )
        .bind(year)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn insert_issue(&mut self, issue: NewIssue) -> StoreResult<Issue> {
        let row = query_as::<_, Issue>(&format!(
            r#"INSERT INTO public.issues
                 (ticket_no, description, internal_status, customer_status,
                  priority, category, project_id, customer_id, attachment_urls)
               VALUES ($1, $2, 'NEW', 'UNDER_REVIEW', $3, $4, $5, $6, $7)
               RETURNING {ISSUE_COLUMNS}"#
        ))
        .bind(&issue.ticket_no)
        .bind(&issue.description)
        .bind(issue.priority)
        .bind(issue.category)
        .bind(issue.project_id)
        .bind(issue.customer_id)
        .bind(&issue.attachment_urls)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_issue(&mut self, issue: &Issue) -> StoreResult<()> {
        query(
            r#"UPDATE public.issues
               SET internal_status = $2, customer_status = $3,
                   attachment_urls = $4,
                   is_attachments_requested = $5, attachments_requested_by = $6,
                   is_site_visit_requested = $7, is_site_visit_scheduled = $8,
                   latest_status_id = $9, resolved_at = $10, closed_at = $11,
                   updated_at = now()
               WHERE id = $1"#,
        )
        .bind(issue.id)
        .bind(issue.internal_status)
        .bind(issue.customer_status)
        .bind(&issue.attachment_urls)
        .bind(issue.is_attachments_requested)
        .bind(issue.attachments_requested_by)
        .bind(issue.is_site_visit_requested)
        .bind(issue.is_site_visit_scheduled)
        .bind(issue.latest_status_id)
        .bind(issue.resolved_at)
        .bind(issue.closed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_timeline(&mut self, entry: NewTimelineEntry) -> StoreResult<TimelineEntry> {
        let row = query_as::<_, TimelineEntry>(
            r#"INSERT INTO public.issue_timeline
                 (issue_id, action, from_internal_status, to_internal_status,
                  from_customer_status, to_customer_status, comment,
                  visible_to_customer, performed_by)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               RETURNING id, issue_id, action, from_internal_status, to_internal_status,
                         from_customer_status, to_customer_status, comment,
                         visible_to_customer, performed_by, created_at"#,
        )
        .bind(entry.issue_id)
        .bind(entry.action)
        .bind(entry.from_internal_status)
        .bind(entry.to_internal_status)
        .bind(entry.from_customer_status)
        .bind(entry.to_customer_status)
        .bind(&entry.comment)
        .bind(entry.visible_to_customer)
        .bind(entry.performed_by)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn active_assignment(&mut self, issue_id: i64) -> StoreResult<Option<Assignment>> {
        let row = query_as::<_, Assignment>(
            r#"SELECT id, issue_id, employee_id, is_active, is_started_work,
                      assigned_at, initial_deadline, final_deadline
               FROM public.issue_assigned_departments
               WHERE issue_id = $1 AND is_active"#,
        )
        .bind(issue_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_assignment(&mut self, assignment: NewAssignment) -> StoreResult<Assignment> {
        let row = query_as::<_, Assignment>(
            r#"INSERT INTO public.issue_assigned_departments
                 (issue_id, employee_id, is_active, is_started_work, initial_deadline, final_deadline)
               VALUES ($1, $2, TRUE, FALSE, $3, $4)
               RETURNING id, issue_id, employee_id, is_active, is_started_work,
                         assigned_at, initial_deadline, final_deadline"#,
        )
        .bind(assignment.issue_id)
        .bind(assignment.employee_id)
        .bind(assignment.initial_deadline)
        .bind(assignment.final_deadline)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_assignment(&mut self, assignment: &Assignment) -> StoreResult<()> {
        query(
            r#"UPDATE public.issue_assigned_departments
               SET is_active = $2, is_started_work = $3, final_deadline = $4
               WHERE id = $1"#,
        )
        .bind(assignment.id)
        .bind(assignment.is_active)
        .bind(assignment.is_started_work)
        .bind(assignment.final_deadline)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn pending_visit_request(
        &mut self,
        issue_id: i64,
    ) -> StoreResult<Option<SiteVisitRequest>> {
        let row = query_as::<_, SiteVisitRequest>(
            r#"SELECT id, issue_id, ticket_no, requested_by, requested_by_name,
                      requested_by_department, status, requested_at
               FROM public.site_visit_requests
               WHERE issue_id = $1 AND status = 'PENDING'"#,
        )
        .bind(issue_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn visit_request_by_id(&mut self, id: i64) -> StoreResult<Option<SiteVisitRequest>> {
        let row = query_as::<_, SiteVisitRequest>(
            r#"SELECT id, issue_id, ticket_no, requested_by, requested_by_name,
                      requested_by_department, status, requested_at
               FROM public.site_visit_requests WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_visit_request(
        &mut self,
        request: NewVisitRequest,
    ) -> StoreResult<SiteVisitRequest> {
        let row = query_as::<_, SiteVisitRequest>(
            r#"INSERT INTO public.site_visit_requests
                 (issue_id, ticket_no, requested_by, requested_by_name,
                  requested_by_department, status)
               VALUES ($1, $2, $3, $4, $5, 'PENDING')
               RETURNING id, issue_id, ticket_no, requested_by, requested_by_name,
                         requested_by_department, status, requested_at"#,
        )
        .bind(request.issue_id)
        .bind(&request.ticket_no)
        .bind(request.requested_by)
        .bind(&request.requested_by_name)
        .bind(&request.requested_by_department)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_visit_request(&mut self, request: &SiteVisitRequest) -> StoreResult<()> {
        query(r#"UPDATE public.site_visit_requests SET status = $2 WHERE id = $1"#)
            .bind(request.id)
            .bind(request.status)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn head_report_rows(
        &mut self,
        head_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<HeadReportRow>> {
        let rows = query_as::<_, HeadReportRow>(
            r#"SELECT i.ticket_no, i.description, i.internal_status, i.customer_status,
                      i.priority, i.created_at, a.assigned_at, i.resolved_at,
                      a.initial_deadline, a.final_deadline
               FROM public.issue_assigned_departments a
               JOIN public.issues i ON i.id = a.issue_id
               WHERE a.employee_id = $1 AND a.assigned_at >= $2 AND a.assigned_at <= $3
               ORDER BY a.assigned_at DESC"#,
        )
        .bind(head_id)
        .bind(from)
        .bind(to)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn manager_report_rows(
        &mut self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<ManagerReportRow>> {
        let rows = query_as::<_, ManagerReportRow>(
            r#"SELECT i.ticket_no, i.internal_status, i.created_at, i.resolved_at, e.department
               FROM public.issues i
               LEFT JOIN LATERAL (
                   SELECT employee_id FROM public.issue_assigned_departments
                   WHERE issue_id = i.id
                   ORDER BY assigned_at DESC
                   LIMIT 1
               ) a ON TRUE
               LEFT JOIN public.employees e ON e.id = a.employee_id
               WHERE i.created_at >= $1 AND i.created_at <= $2
               ORDER BY i.created_at DESC"#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn scheduled_visit(&mut self, issue_id: i64) -> StoreResult<Option<SiteVisit>> {
        let row = query_as::<_, SiteVisit>(
            r#"SELECT id, issue_id, engineer_id, working_department, scheduled_by,
                      request_id, scheduled_date, actual_date, status
               FROM public.issue_site_visits
               WHERE issue_id = $1 AND status = 'SCHEDULED'"#,
        )
        .bind(issue_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn visit_by_id(&mut self, id: i64) -> StoreResult<Option<SiteVisit>> {
        let row = query_as::<_, SiteVisit>(
            r#"SELECT id, issue_id, engineer_id, working_department, scheduled_by,
                      request_id, scheduled_date, actual_date, status
               FROM public.issue_site_visits WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_visit(&mut self, visit: NewSiteVisit) -> StoreResult<SiteVisit> {
        let row = query_as::<_, SiteVisit>(
            r#"INSERT INTO public.issue_site_visits
                 (issue_id, engineer_id, working_department, scheduled_by,
                  request_id, scheduled_date, status)
               VALUES ($1, $2, $3, $4, $5, $6, 'SCHEDULED')
               RETURNING id, issue_id, engineer_id, working_department, scheduled_by,
                         request_id, scheduled_date, actual_date, status"#,
        )
        .bind(visit.issue_id)
        .bind(visit.engineer_id)
        .bind(&visit.working_department)
        .bind(visit.scheduled_by)
        .bind(visit.request_id)
        .bind(visit.scheduled_date)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn update_visit(&mut self, visit: &SiteVisit) -> StoreResult<()> {
        query(
            r#"UPDATE public.issue_site_visits
               SET status = $2, actual_date = $3
               WHERE id = $1"#,
        )
        .bind(visit.id)
        .bind(visit.status)
        .bind(visit.actual_date)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
