// src/engine/reports.rs
//
// Read-only reporting: date-ranged workload statistics per department
// head and a company-wide manager summary. Reports are computed from one
// consistent snapshot (a single read transaction) and commit nothing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::{require_manager, Engine, EngineError, EngineResult};
use crate::models::{EmployeeRole, HeadReportRow, InternalStatus, ManagerReportRow};

fn is_completed(status: InternalStatus) -> bool {
    matches!(status, InternalStatus::Resolved | InternalStatus::Closed)
}

fn is_pending(status: InternalStatus) -> bool {
    !matches!(
        status,
        InternalStatus::Resolved | InternalStatus::Closed | InternalStatus::Cancelled
    )
}

fn completion_rate(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (completed as f64 / total as f64 * 10_000.0).round() / 100.0
}

fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    // whole days, rounded up like the deadline arithmetic users expect
    let seconds = (to - from).num_seconds().max(0);
    (seconds + 86_399) / 86_400
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeadReportSummary {
    pub total_issues: usize,
    pub completed_issues: usize,
    pub pending_issues: usize,
    pub in_progress_issues: usize,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeadReportIssue {
    #[serde(flatten)]
    pub row: HeadReportRow,
    pub days_to_resolve: Option<i64>,
    pub is_overdue: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeadReport {
    pub generated_for: String,
    pub department: Option<String>,
    pub window: ReportWindow,
    pub summary: HeadReportSummary,
    pub issues: Vec<HeadReportIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerReportSummary {
    pub total_issues: usize,
    pub completed_issues: usize,
    pub pending_issues: usize,
    pub new_issues: usize,
    pub in_progress_issues: usize,
    pub cancelled_issues: usize,
    pub completion_rate: f64,
    pub avg_resolution_days: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepartmentBreakdown {
    pub department: String,
    pub total_issues: usize,
    pub completed: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completion_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerReport {
    pub window: ReportWindow,
    pub department_filter: Option<String>,
    pub summary: ManagerReportSummary,
    pub status_breakdown: BTreeMap<InternalStatus, usize>,
    pub departments: Vec<DepartmentBreakdown>,
}

impl Engine {
    /// Workload report for one department head: every assignment they
    /// received in the window, with resolution statistics.
    pub async fn head_report(
        &self,
        head_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EngineResult<HeadReport> {
        let mut tx = self.store.begin().await?;

        let head = tx
            .employee_by_id(head_id)
            .await?
            .ok_or(EngineError::not_found("employee", head_id))?;
        if head.role != EmployeeRole::Head {
            return Err(EngineError::permission(format!(
                "employee {} is not a department head",
                head_id
            )));
        }

        let rows = tx.head_report_rows(head_id, from, to).await?;

        let now = Utc::now();
        let total_issues = rows.len();
        let completed_issues = rows.iter().filter(|r| is_completed(r.internal_status)).count();
        let pending_issues = rows.iter().filter(|r| is_pending(r.internal_status)).count();
        let in_progress_issues = rows
            .iter()
            .filter(|r| r.internal_status == InternalStatus::InProgress)
            .count();

        let issues = rows
            .into_iter()
            .map(|row| {
                let days_to_resolve = row.resolved_at.map(|r| days_between(row.created_at, r));
                let is_overdue = row
                    .final_deadline
                    .map_or(false, |d| now > d && row.resolved_at.is_none());
                HeadReportIssue {
                    row,
                    days_to_resolve,
                    is_overdue,
                }
            })
            .collect();

        Ok(HeadReport {
            generated_for: head.name,
            department: head.department,
            window: ReportWindow {
                from,
                to,
                generated_at: now,
            },
            summary: HeadReportSummary {
                total_issues,
                completed_issues,
                pending_issues,
                in_progress_issues,
                completion_rate: completion_rate(completed_issues, total_issues),
            },
            issues,
        })
    }

    /// Company-wide summary for issue managers: totals, status breakdown
    /// and a per-department view of everything created in the window.
    pub async fn manager_report(
        &self,
        manager_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        department: Option<String>,
    ) -> EngineResult<ManagerReport> {
        let mut tx = self.store.begin().await?;

        require_manager(tx.as_mut(), manager_id).await?;

        let mut rows = tx.manager_report_rows(from, to).await?;
        if let Some(filter) = &department {
            rows.retain(|r| r.department.as_deref() == Some(filter.as_str()));
        }

        let total_issues = rows.len();
        let completed_issues = rows.iter().filter(|r| is_completed(r.internal_status)).count();
        let pending_issues = rows.iter().filter(|r| is_pending(r.internal_status)).count();
        let count_status = |s: InternalStatus| rows.iter().filter(|r| r.internal_status == s).count();

        let mut status_breakdown: BTreeMap<InternalStatus, usize> = BTreeMap::new();
        for row in &rows {
            *status_breakdown.entry(row.internal_status).or_default() += 1;
        }

        let resolved: Vec<&ManagerReportRow> =
            rows.iter().filter(|r| r.resolved_at.is_some()).collect();
        let avg_resolution_days = if resolved.is_empty() {
            0.0
        } else {
            let total_days: i64 = resolved
                .iter()
                .filter_map(|r| r.resolved_at.map(|t| days_between(r.created_at, t)))
                .sum();
            (total_days as f64 / resolved.len() as f64 * 10.0).round() / 10.0
        };

        let mut by_department: BTreeMap<String, Vec<&ManagerReportRow>> = BTreeMap::new();
        for row in &rows {
            if let Some(dept) = &row.department {
                by_department.entry(dept.clone()).or_default().push(row);
            }
        }
        let departments = by_department
            .into_iter()
            .map(|(department, dept_rows)| {
                let total = dept_rows.len();
                let completed = dept_rows
                    .iter()
                    .filter(|r| is_completed(r.internal_status))
                    .count();
                DepartmentBreakdown {
                    department,
                    total_issues: total,
                    completed,
                    pending: dept_rows.iter().filter(|r| is_pending(r.internal_status)).count(),
                    in_progress: dept_rows
                        .iter()
                        .filter(|r| r.internal_status == InternalStatus::InProgress)
                        .count(),
                    completion_rate: completion_rate(completed, total),
                }
            })
            .collect();

        Ok(ManagerReport {
            window: ReportWindow {
                from,
                to,
                generated_at: Utc::now(),
            },
            department_filter: department,
            summary: ManagerReportSummary {
                total_issues,
                completed_issues,
                pending_issues,
                new_issues: count_status(InternalStatus::New),
                in_progress_issues: count_status(InternalStatus::InProgress),
                cancelled_issues: count_status(InternalStatus::Cancelled),
                completion_rate: completion_rate(completed_issues, total_issues),
                avg_resolution_days,
            },
            status_breakdown,
            departments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_rate_is_a_percentage() {
        assert_eq!(completion_rate(0, 0), 0.0);
        assert_eq!(completion_rate(1, 2), 50.0);
        assert_eq!(completion_rate(1, 3), 33.33);
    }

    #[test]
    fn resolution_days_round_up() {
        let from = Utc::now();
        assert_eq!(days_between(from, from), 0);
        assert_eq!(days_between(from, from + chrono::Duration::hours(1)), 1);
        assert_eq!(days_between(from, from + chrono::Duration::days(2)), 2);
    }
}
