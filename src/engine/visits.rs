// src/engine/visits.rs
//
// Site-visit workflow: request → approval → schedule → complete/cancel,
// with the engineer workload counters kept in the same unit of work as
// the visit row they describe.

use chrono::{DateTime, Utc};

use crate::engine::{
    record, require_active_assignment, require_engineer, require_head, require_issue,
    require_service_head, Engine, EngineError, EngineResult,
};
use crate::models::{
    Employee, EmployeeRole, Issue, NewSiteVisit, NewTimelineEntry, NewVisitRequest, SiteVisit,
    SiteVisitRequest, TimelineAction, UserRef, VisitRequestStatus, VisitStatus,
    SERVICE_DEPARTMENT,
};
use crate::notify::PushEvent;
use crate::store::StoreTx;

impl Engine {
    /// A non-SERVICE head asks the service department for a physical
    /// visit. At most one request may be pending per issue.
    pub async fn request_site_visit(
        &self,
        head_id: i64,
        issue_id: i64,
    ) -> EngineResult<SiteVisitRequest> {
        let mut tx = self.store.begin().await?;

        let head = require_head(tx.as_mut(), head_id).await?;
        let department = head.department.clone().ok_or_else(|| {
            EngineError::permission(format!("head {} has no department", head_id))
        })?;
        if department == SERVICE_DEPARTMENT {
            return Err(EngineError::permission(
                "service department schedules visits directly instead of requesting them",
            ));
        }

        let mut issue = require_issue(tx.as_mut(), issue_id).await?;
        require_active_assignment(tx.as_mut(), issue_id, head.id).await?;

        if tx.pending_visit_request(issue_id).await?.is_some() {
            return Err(EngineError::conflict(format!(
                "a site-visit request is already pending for issue {}",
                issue.ticket_no
            )));
        }

        let request = tx
            .insert_visit_request(NewVisitRequest {
                issue_id,
                ticket_no: issue.ticket_no.clone(),
                requested_by: head.id,
                requested_by_name: head.name.clone(),
                requested_by_department: department,
            })
            .await?;

        issue.is_site_visit_requested = true;
        let entry = NewTimelineEntry::bare(issue_id, TimelineAction::SiteVisitRequested)
            .comment("Site visit scheduling requested; awaiting service head assignment.")
            .by(head.id);
        record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;

        let mut events = Vec::new();
        if let Some(service_head) = tx
            .employee_by_role(EmployeeRole::Head, Some(SERVICE_DEPARTMENT))
            .await?
        {
            events.push(PushEvent::new(
                UserRef::Employee(service_head.id),
                "Site visit requested",
                format!(
                    "{} requested a site visit for issue {}.",
                    head.name, issue.ticket_no
                ),
                issue_id,
            ));
        }

        tx.commit().await?;
        self.notify(events).await;
        Ok(request)
    }

    /// Service head turns a pending request down.
    pub async fn reject_site_visit_request(
        &self,
        service_head_id: i64,
        request_id: i64,
    ) -> EngineResult<SiteVisitRequest> {
        let mut tx = self.store.begin().await?;

        let service_head = require_service_head(tx.as_mut(), service_head_id).await?;
        let mut request = tx
            .visit_request_by_id(request_id)
            .await?
            .ok_or(EngineError::not_found("site-visit request", request_id))?;

        if request.status != VisitRequestStatus::Pending {
            return Err(EngineError::invalid_state(format!(
                "site-visit request {} is {:?}, not PENDING",
                request_id, request.status
            )));
        }

        let mut issue = require_issue(tx.as_mut(), request.issue_id).await?;

        request.status = VisitRequestStatus::Rejected;
        tx.update_visit_request(&request).await?;

        issue.is_site_visit_requested = false;
        let entry = NewTimelineEntry::bare(issue.id, TimelineAction::SiteVisitRequestRejected)
            .comment("Site-visit request rejected by the service department.")
            .by(service_head.id);
        record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;
        tx.commit().await?;

        self.notify(vec![PushEvent::new(
            UserRef::Employee(request.requested_by),
            "Site-visit request rejected",
            format!(
                "Your site-visit request for issue {} was rejected.",
                request.ticket_no
            ),
            request.issue_id,
        )])
        .await;

        Ok(request)
    }

    /// Schedules a visit against a pending request from another
    /// department; the request is consumed (COMPLETED) by the schedule.
    pub async fn schedule_site_visit_for_request(
        &self,
        service_head_id: i64,
        issue_id: i64,
        engineer_id: i64,
        request_id: i64,
        scheduled_date: DateTime<Utc>,
    ) -> EngineResult<SiteVisit> {
        let mut tx = self.store.begin().await?;

        let service_head = require_service_head(tx.as_mut(), service_head_id).await?;
        let mut request = tx
            .visit_request_by_id(request_id)
            .await?
            .ok_or(EngineError::not_found("site-visit request", request_id))?;
        if request.issue_id != issue_id || request.status != VisitRequestStatus::Pending {
            return Err(EngineError::invalid_state(format!(
                "site-visit request {} is not pending for issue {}",
                request_id, issue_id
            )));
        }

        let working_department = request.requested_by_department.clone();
        let (visit, issue, engineer) = self
            .schedule_visit(
                tx.as_mut(),
                &service_head,
                issue_id,
                engineer_id,
                Some(request_id),
                working_department,
                scheduled_date,
            )
            .await?;

        request.status = VisitRequestStatus::Completed;
        tx.update_visit_request(&request).await?;

        tx.commit().await?;

        self.notify(vec![
            PushEvent::new(
                UserRef::Customer(issue.customer_id),
                "Site visit scheduled",
                format!(
                    "A site visit for issue {} is scheduled on {}.",
                    issue.ticket_no,
                    scheduled_date.format("%Y-%m-%d")
                ),
                issue_id,
            ),
            PushEvent::new(
                UserRef::Employee(request.requested_by),
                "Site visit scheduled",
                format!(
                    "Engineer {} will visit for issue {} on {}.",
                    engineer.name,
                    issue.ticket_no,
                    scheduled_date.format("%Y-%m-%d")
                ),
                issue_id,
            ),
        ])
        .await;

        Ok(visit)
    }

    /// SERVICE-owned issues skip the request step.
    pub async fn schedule_site_visit_direct(
        &self,
        service_head_id: i64,
        issue_id: i64,
        engineer_id: i64,
        scheduled_date: DateTime<Utc>,
    ) -> EngineResult<SiteVisit> {
        let mut tx = self.store.begin().await?;

        let service_head = require_service_head(tx.as_mut(), service_head_id).await?;
        let (visit, issue, _engineer) = self
            .schedule_visit(
                tx.as_mut(),
                &service_head,
                issue_id,
                engineer_id,
                None,
                SERVICE_DEPARTMENT.to_string(),
                scheduled_date,
            )
            .await?;

        tx.commit().await?;

        self.notify(vec![PushEvent::new(
            UserRef::Customer(issue.customer_id),
            "Site visit scheduled",
            format!(
                "A site visit for issue {} is scheduled on {}.",
                issue.ticket_no,
                scheduled_date.format("%Y-%m-%d")
            ),
            issue_id,
        )])
        .await;

        Ok(visit)
    }

    /// Shared schedule path: engineer validation, single-scheduled-visit
    /// invariant, workload counter and the customer-visible entry.
    async fn schedule_visit(
        &self,
        tx: &mut dyn StoreTx,
        service_head: &Employee,
        issue_id: i64,
        engineer_id: i64,
        request_id: Option<i64>,
        working_department: String,
        scheduled_date: DateTime<Utc>,
    ) -> EngineResult<(SiteVisit, Issue, Employee)> {
        let mut issue = require_issue(tx, issue_id).await?;
        let mut engineer = require_engineer(tx, engineer_id).await?;

        if tx.scheduled_visit(issue_id).await?.is_some() {
            return Err(EngineError::conflict(format!(
                "a site visit is already scheduled for issue {}",
                issue.ticket_no
            )));
        }

        let visit = tx
            .insert_visit(NewSiteVisit {
                issue_id,
                engineer_id: engineer.id,
                working_department,
                scheduled_by: service_head.id,
                request_id,
                scheduled_date,
            })
            .await?;

        engineer.pending_visits += 1;
        tx.update_employee(&engineer).await?;

        issue.is_site_visit_scheduled = true;
        let mobile = engineer.mobile_no.clone().unwrap_or_else(|| "-".to_string());
        let entry = NewTimelineEntry::bare(issue_id, TimelineAction::SiteVisitScheduled)
            .comment(format!(
                "Site visit scheduled for {} by service engineer {} (mobile: {mobile}).",
                scheduled_date.format("%Y-%m-%d"),
                engineer.name
            ))
            .visible()
            .by(service_head.id);
        record(tx, &mut issue, entry).await?;

        tx.update_issue(&issue).await?;
        Ok((visit, issue, engineer))
    }

    /// Marks a scheduled visit as carried out and settles the engineer's
    /// counters (pending −1, completed +1).
    pub async fn complete_site_visit(
        &self,
        head_id: i64,
        visit_id: i64,
    ) -> EngineResult<SiteVisit> {
        let (visit, issue, requested_by) = self
            .finish_visit(head_id, visit_id, VisitStatus::Completed, None)
            .await?;

        let mut events = vec![PushEvent::new(
            UserRef::Customer(issue.customer_id),
            "Site visit completed",
            format!("The site visit for issue {} was completed.", issue.ticket_no),
            issue.id,
        )];
        if let Some(head) = requested_by {
            events.push(PushEvent::new(
                UserRef::Employee(head),
                "Site visit completed",
                format!(
                    "The site visit you requested for issue {} was completed.",
                    issue.ticket_no
                ),
                issue.id,
            ));
        }
        self.notify(events).await;

        Ok(visit)
    }

    /// Cancels a scheduled visit; only the pending counter moves back.
    pub async fn cancel_site_visit(
        &self,
        head_id: i64,
        visit_id: i64,
        remark: Option<String>,
    ) -> EngineResult<SiteVisit> {
        let (visit, issue, requested_by) = self
            .finish_visit(head_id, visit_id, VisitStatus::Cancelled, remark)
            .await?;

        let mut events = vec![PushEvent::new(
            UserRef::Customer(issue.customer_id),
            "Site visit cancelled",
            format!("The site visit for issue {} was cancelled.", issue.ticket_no),
            issue.id,
        )];
        if let Some(head) = requested_by {
            events.push(PushEvent::new(
                UserRef::Employee(head),
                "Site visit cancelled",
                format!(
                    "The site visit you requested for issue {} was cancelled.",
                    issue.ticket_no
                ),
                issue.id,
            ));
        }
        self.notify(events).await;

        Ok(visit)
    }

    /// Returns the finished visit, the issue, and the head who originally
    /// requested the visit (for request-driven visits) so the callers can
    /// notify them alongside the customer.
    async fn finish_visit(
        &self,
        head_id: i64,
        visit_id: i64,
        outcome: VisitStatus,
        remark: Option<String>,
    ) -> EngineResult<(SiteVisit, Issue, Option<i64>)> {
        let mut tx = self.store.begin().await?;

        let head = require_head(tx.as_mut(), head_id).await?;
        let mut visit = tx
            .visit_by_id(visit_id)
            .await?
            .ok_or(EngineError::not_found("site visit", visit_id))?;

        if visit.status != VisitStatus::Scheduled {
            return Err(EngineError::invalid_state(format!(
                "site visit {} is {:?}, not SCHEDULED",
                visit_id, visit.status
            )));
        }
        if head.department.as_deref() != Some(visit.working_department.as_str())
            && visit.scheduled_by != head.id
        {
            return Err(EngineError::permission(format!(
                "head {} does not work the {} department",
                head.id, visit.working_department
            )));
        }

        let mut issue = require_issue(tx.as_mut(), visit.issue_id).await?;

        let requested_by = match visit.request_id {
            Some(request_id) => tx
                .visit_request_by_id(request_id)
                .await?
                .map(|r| r.requested_by),
            None => None,
        };

        let now = Utc::now();
        visit.status = outcome;
        visit.actual_date = Some(now);
        tx.update_visit(&visit).await?;

        if let Some(mut engineer) = tx.employee_by_id(visit.engineer_id).await? {
            engineer.pending_visits -= 1;
            if outcome == VisitStatus::Completed {
                engineer.completed_visits += 1;
            }
            tx.update_employee(&engineer).await?;
        }

        issue.is_site_visit_requested = false;
        issue.is_site_visit_scheduled = false;

        let (action, default_comment) = match outcome {
            VisitStatus::Completed => (
                TimelineAction::SiteVisitCompleted,
                "Site visit completed.".to_string(),
            ),
            _ => (
                TimelineAction::SiteVisitCancelled,
                "Site visit cancelled.".to_string(),
            ),
        };
        let entry = NewTimelineEntry::bare(visit.issue_id, action)
            .comment(remark.unwrap_or(default_comment))
            .visible()
            .by(head.id);
        record(tx.as_mut(), &mut issue, entry).await?;

        tx.update_issue(&issue).await?;
        tx.commit().await?;

        Ok((visit, issue, requested_by))
    }
}
