// src/engine/lifecycle.rs

use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

use crate::engine::{
    record, require_active_assignment, require_customer, require_head, require_issue,
    require_manager, transition, Engine, EngineError, EngineResult,
};
use crate::models::{
    ticket_no, Assignment, Category, CustomerStatus, EmployeeRole, InternalStatus, Issue,
    NewAssignment, NewIssue, NewTimelineEntry, Priority, TimelineAction, TimelineEntry, UserRef,
    VisitRequestStatus, VisitStatus,
};
use crate::notify::PushEvent;

#[derive(Debug, Clone)]
pub struct CreateIssue {
    pub customer_id: i64,
    pub project_id: i64,
    pub description: String,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
    pub attachment_urls: Vec<String>,
}

impl Engine {
    /// Files a new issue for a customer. The ticket number is allocated
    /// from the per-year sequence inside the same transaction as the
    /// insert, so two concurrent creations cannot share a number.
    pub async fn create_issue(&self, input: CreateIssue) -> EngineResult<Issue> {
        let mut tx = self.store.begin().await?;

        let customer = require_customer(tx.as_mut(), input.customer_id).await?;
        tx.project_for_customer(input.project_id, input.customer_id)
            .await?
            .ok_or(EngineError::not_found("project", input.project_id))?;

        let year = Utc::now().year();
        let seq = tx.count_issues_in_year(year).await? + 1;

        let mut issue = tx
            .insert_issue(NewIssue {
                ticket_no: ticket_no(year, seq),
                description: input.description,
                priority: input.priority.unwrap_or_default(),
                category: input.category.unwrap_or_default(),
                project_id: input.project_id,
                customer_id: input.customer_id,
                attachment_urls: input.attachment_urls,
            })
            .await?;

        let mut entry = NewTimelineEntry::bare(issue.id, TimelineAction::IssueCreated)
            .visible()
            .comment("Issue successfully created. Our team will review it soon.");
        entry.to_internal_status = Some(InternalStatus::New);
        entry.to_customer_status = Some(CustomerStatus::UnderReview);
        record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;

        let mut events = Vec::new();
        if let Some(manager) = tx
            .employee_by_role(EmployeeRole::IssueManager, None)
            .await?
        {
            events.push(PushEvent::new(
                UserRef::Employee(manager.id),
                "New issue created",
                format!("{} raised issue {}.", customer.name, issue.ticket_no),
                issue.id,
            ));
        }

        tx.commit().await?;
        self.notify(events).await;
        Ok(issue)
    }

    /// Binds the issue to a department head. Fails closed when an active
    /// assignment already exists; the caller learns who owns it.
    pub async fn assign_to_department(
        &self,
        manager_id: i64,
        issue_id: i64,
        head_id: i64,
        deadline: DateTime<Utc>,
    ) -> EngineResult<Assignment> {
        let mut tx = self.store.begin().await?;

        let manager = require_manager(tx.as_mut(), manager_id).await?;
        let mut issue = require_issue(tx.as_mut(), issue_id).await?;
        let head = require_head(tx.as_mut(), head_id).await?;

        if let Some(existing) = tx.active_assignment(issue_id).await? {
            let owner = tx
                .employee_by_id(existing.employee_id)
                .await?
                .map(|e| e.name)
                .unwrap_or_else(|| format!("employee {}", existing.employee_id));
            return Err(EngineError::conflict(format!(
                "issue {} is already assigned to {}",
                issue.ticket_no, owner
            )));
        }

        let from = transition(&mut issue, InternalStatus::Assigned)?;

        let assignment = tx
            .insert_assignment(NewAssignment {
                issue_id,
                employee_id: head.id,
                initial_deadline: deadline,
                final_deadline: None,
            })
            .await?;

        let department = head.department.clone().unwrap_or_default();
        let entry = NewTimelineEntry::transition(
            issue_id,
            TimelineAction::Assigned,
            from,
            InternalStatus::Assigned,
        )
        .comment(format!("Issue assigned to {} ({department})", head.name))
        .visible()
        .by(manager.id);
        record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;
        tx.commit().await?;

        self.notify(vec![PushEvent::new(
            UserRef::Employee(head.id),
            "Issue assigned to you",
            format!(
                "Issue {} assigned to your department, deadline {}.",
                issue.ticket_no,
                deadline.format("%Y-%m-%d")
            ),
            issue_id,
        )])
        .await;

        Ok(assignment)
    }

    /// Head picks up an assigned issue; both status tracks move to
    /// IN_PROGRESS.
    pub async fn start_working(&self, head_id: i64, issue_id: i64) -> EngineResult<Issue> {
        let mut tx = self.store.begin().await?;

        let head = require_head(tx.as_mut(), head_id).await?;
        let mut issue = require_issue(tx.as_mut(), issue_id).await?;
        let mut assignment = require_active_assignment(tx.as_mut(), issue_id, head.id).await?;

        if assignment.is_started_work {
            return Err(EngineError::invalid_state(format!(
                "work on issue {} has already started",
                issue.ticket_no
            )));
        }

        assignment.is_started_work = true;
        tx.update_assignment(&assignment).await?;

        let from = transition(&mut issue, InternalStatus::InProgress)?;
        let entry = NewTimelineEntry::transition(
            issue_id,
            TimelineAction::WorkStarted,
            from,
            InternalStatus::InProgress,
        )
        .comment("Issue taken up for processing")
        .visible()
        .by(head.id);
        record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;
        tx.commit().await?;

        self.notify(vec![PushEvent::new(
            UserRef::Customer(issue.customer_id),
            "Work started",
            format!("Work has started on your issue {}.", issue.ticket_no),
            issue_id,
        )])
        .await;

        Ok(issue)
    }

    pub async fn add_comment(
        &self,
        head_id: i64,
        issue_id: i64,
        text: String,
        visible_to_customer: bool,
    ) -> EngineResult<TimelineEntry> {
        let mut tx = self.store.begin().await?;

        let head = require_head(tx.as_mut(), head_id).await?;
        let mut issue = require_issue(tx.as_mut(), issue_id).await?;
        require_active_assignment(tx.as_mut(), issue_id, head.id).await?;

        let mut entry = NewTimelineEntry::bare(issue_id, TimelineAction::CommentAdded)
            .comment(text)
            .by(head.id);
        if visible_to_customer {
            entry = entry.visible();
        }
        let row = record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;
        tx.commit().await?;

        if visible_to_customer {
            self.notify(vec![PushEvent::new(
                UserRef::Customer(issue.customer_id),
                "New update on your issue",
                format!("There is a new update on issue {}.", issue.ticket_no),
                issue_id,
            )])
            .await;
        }

        Ok(row)
    }

    /// Resolves and closes the issue. Any scheduled visit and pending
    /// visit request are cancelled in the same transaction, with their
    /// companion timeline entries written before the RESOLVED entry.
    pub async fn mark_resolved(
        &self,
        head_id: i64,
        issue_id: i64,
        remark: Option<String>,
    ) -> EngineResult<Issue> {
        let mut tx = self.store.begin().await?;

        let head = require_head(tx.as_mut(), head_id).await?;
        let mut issue = require_issue(tx.as_mut(), issue_id).await?;
        let mut assignment = require_active_assignment(tx.as_mut(), issue_id, head.id).await?;

        if issue.internal_status.is_terminal() {
            return Err(EngineError::invalid_state(format!(
                "issue {} is already closed",
                issue.ticket_no
            )));
        }

        let now = Utc::now();

        if let Some(mut visit) = tx.scheduled_visit(issue_id).await? {
            visit.status = VisitStatus::Cancelled;
            visit.actual_date = Some(now);
            tx.update_visit(&visit).await?;

            if let Some(mut engineer) = tx.employee_by_id(visit.engineer_id).await? {
                engineer.pending_visits -= 1;
                tx.update_employee(&engineer).await?;
            }

            let entry = NewTimelineEntry::bare(issue_id, TimelineAction::SiteVisitCancelled)
                .comment("Scheduled site visit cancelled; issue is being resolved.")
                .visible()
                .by(head.id);
            record(tx.as_mut(), &mut issue, entry).await?;
        }

        if let Some(mut request) = tx.pending_visit_request(issue_id).await? {
            request.status = VisitRequestStatus::Cancelled;
            tx.update_visit_request(&request).await?;

            let entry = NewTimelineEntry::bare(issue_id, TimelineAction::SiteVisitCancelled)
                .comment("Pending site-visit request cancelled; issue is being resolved.")
                .by(head.id);
            record(tx.as_mut(), &mut issue, entry).await?;
        }

        let from = transition(&mut issue, InternalStatus::Closed)?;
        issue.is_site_visit_requested = false;
        issue.is_site_visit_scheduled = false;
        issue.resolved_at = Some(now);
        issue.closed_at = Some(now);

        let entry = NewTimelineEntry::transition(
            issue_id,
            TimelineAction::Resolved,
            from,
            InternalStatus::Closed,
        )
        .comment(remark.unwrap_or_else(|| "Issue resolved.".to_string()))
        .visible()
        .by(head.id);
        record(tx.as_mut(), &mut issue, entry).await?;

        assignment.is_active = false;
        tx.update_assignment(&assignment).await?;

        tx.update_issue(&issue).await?;
        tx.commit().await?;

        self.notify(vec![PushEvent::new(
            UserRef::Customer(issue.customer_id),
            "Issue resolved",
            format!("Your issue {} has been resolved.", issue.ticket_no),
            issue_id,
        )])
        .await;

        Ok(issue)
    }

    /// Force-closes an issue the manager deems invalid. Only legal while
    /// the issue is still NEW.
    pub async fn mark_invalid(
        &self,
        manager_id: i64,
        issue_id: i64,
        reason: Option<String>,
    ) -> EngineResult<Issue> {
        let mut tx = self.store.begin().await?;

        let manager = require_manager(tx.as_mut(), manager_id).await?;
        let mut issue = require_issue(tx.as_mut(), issue_id).await?;

        if issue.internal_status != InternalStatus::New {
            return Err(EngineError::invalid_state(format!(
                "issue {} is {:?}; only NEW issues can be marked invalid",
                issue.ticket_no, issue.internal_status
            )));
        }

        let now = Utc::now();
        let from = transition(&mut issue, InternalStatus::Closed)?;
        issue.is_attachments_requested = false;
        issue.attachments_requested_by = None;
        issue.is_site_visit_requested = false;
        issue.is_site_visit_scheduled = false;
        issue.resolved_at = Some(now);
        issue.closed_at = Some(now);

        let entry = NewTimelineEntry::transition(
            issue_id,
            TimelineAction::Invalid,
            from,
            InternalStatus::Closed,
        )
        .comment(reason.unwrap_or_else(|| "Issue marked as invalid.".to_string()))
        .visible()
        .by(manager.id);
        record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;
        tx.commit().await?;

        self.notify(vec![PushEvent::new(
            UserRef::Customer(issue.customer_id),
            "Issue closed",
            format!("Your issue {} was reviewed and closed.", issue.ticket_no),
            issue_id,
        )])
        .await;

        Ok(issue)
    }

    /// Head asks the customer for more attachments. At most one request
    /// may be outstanding per issue.
    pub async fn request_attachment(
        &self,
        head_id: i64,
        issue_id: i64,
        remark: String,
    ) -> EngineResult<Issue> {
        let mut tx = self.store.begin().await?;

        let head = require_head(tx.as_mut(), head_id).await?;
        let mut issue = require_issue(tx.as_mut(), issue_id).await?;
        require_active_assignment(tx.as_mut(), issue_id, head.id).await?;

        if issue.is_attachments_requested {
            return Err(EngineError::conflict(format!(
                "attachments already requested for issue {}",
                issue.ticket_no
            )));
        }

        issue.is_attachments_requested = true;
        issue.attachments_requested_by = Some(head.id);

        let entry = NewTimelineEntry::bare(issue_id, TimelineAction::AttachmentRequested)
            .comment(remark)
            .visible()
            .by(head.id);
        record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;
        tx.commit().await?;

        self.notify(vec![PushEvent::new(
            UserRef::Customer(issue.customer_id),
            "Attachments requested",
            format!("Please upload attachments for issue {}.", issue.ticket_no),
            issue_id,
        )])
        .await;

        Ok(issue)
    }

    /// Customer confirms an upload batch. The storage move is not
    /// transactional, so it runs before the unit of work and its result
    /// is validated first; zero moved files fails the whole operation.
    pub async fn confirm_attachments_uploaded(
        &self,
        customer_id: i64,
        issue_id: i64,
        batch_id: Uuid,
    ) -> EngineResult<Vec<String>> {
        let issue = self
            .store
            .issue(issue_id)
            .await?
            .ok_or(EngineError::not_found("issue", issue_id))?;
        if issue.customer_id != customer_id {
            return Err(EngineError::permission(format!(
                "issue {} does not belong to customer {}",
                issue.ticket_no, customer_id
            )));
        }
        if !issue.is_attachments_requested {
            return Err(EngineError::invalid_state(format!(
                "attachments were not requested for issue {}",
                issue.ticket_no
            )));
        }

        let moved = self
            .files
            .move_folder(
                &self.bucket,
                &format!("temp/{batch_id}/"),
                &format!("issues/{}/", issue.ticket_no),
            )
            .await
            .map_err(|e| EngineError::ExternalDependency(e.to_string()))?;
        if moved.is_empty() {
            return Err(EngineError::NoFilesMoved);
        }

        let mut tx = self.store.begin().await?;

        let customer = require_customer(tx.as_mut(), customer_id).await?;
        let mut issue = require_issue(tx.as_mut(), issue_id).await?;
        if !issue.is_attachments_requested {
            return Err(EngineError::invalid_state(format!(
                "attachments were not requested for issue {}",
                issue.ticket_no
            )));
        }
        let requester = issue.attachments_requested_by;

        issue.attachment_urls.extend(moved.iter().cloned());
        issue.is_attachments_requested = false;
        issue.attachments_requested_by = None;

        let entry = NewTimelineEntry::bare(issue_id, TimelineAction::AttachmentAdded)
            .comment(format!("Customer has uploaded {} attachment(s).", moved.len()))
            .visible();
        record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;
        tx.commit().await?;

        if let Some(requester) = requester {
            self.notify(vec![PushEvent::new(
                UserRef::Employee(requester),
                "Attachments added",
                format!(
                    "{} uploaded attachments for ticket {}.",
                    customer.name, issue.ticket_no
                ),
                issue_id,
            )])
            .await;
        }

        Ok(moved)
    }
}
