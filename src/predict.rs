//! Progress prediction engine.
//!
//! Derives planned / actual / forecast progress series for a whole project
//! (weekly buckets) or a single tracked issue (daily buckets) from sparse
//! lifecycle timestamps. The engine is independent of the knowledge-base
//! pipeline and read-only with respect to shared state: callers pass in the
//! lifecycle records they fetched from the tracker proxy, plus the
//! observation date, and get a self-contained forecast back.
//!
//! The three curves per bucket:
//! - **planned** — linear interpolation from 0% at creation to 100% at the
//!   due date; once past due it keeps asserting 100 rather than moving the
//!   target.
//! - **actual** — observed completion derived from the configured
//!   status → fraction table; null for buckets after the observation date.
//! - **predicted** — extrapolation of the actual trend from the current
//!   bucket forward; null for past buckets, and null from the moment the
//!   actual curve reaches 100. With no observed progress it degenerates to
//!   the planned curve.
//!
//! Statuses are matched on trimmed lowercase equality against the
//! configured table; an unmapped status is a validation error, never a
//! silent default.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::config::PredictionConfig;
use crate::error::{Error, Result};
use crate::models::IssueRecord;

/// Planning horizon assumed for a project whose issues carry no due dates.
const FALLBACK_PLAN_WEEKS: i64 = 6;
/// How far past the planned end a project forecast extends while work
/// remains.
const PROJECT_HORIZON_WEEKS: i64 = 2;
/// How far past the due date an unresolved issue forecast extends.
const ISSUE_HORIZON_DAYS: i64 = 7;

/// One time bucket of the forecast. Values are percentages in [0, 100],
/// rounded to whole points.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressPoint {
    /// "Week 3" for project scope, "2025-01-08" for issue scope.
    pub label: String,
    pub planned: Option<f64>,
    pub actual: Option<f64>,
    pub predicted: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleHealth {
    Completed,
    Ahead,
    OnTrack,
    Delayed,
    NoData,
    NoDueDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressForecast {
    pub points: Vec<ProgressPoint>,
    pub health: ScheduleHealth,
    pub summary: String,
}

pub struct PredictionEngine {
    tolerance_pct: f64,
    status_weights: HashMap<String, f64>,
}

impl PredictionEngine {
    pub fn new(config: &PredictionConfig) -> Self {
        let status_weights = config
            .status_weights
            .iter()
            .map(|(status, weight)| (status.trim().to_lowercase(), *weight))
            .collect();
        Self {
            tolerance_pct: config.tolerance_pct,
            status_weights,
        }
    }

    fn completion_fraction(&self, status: &str) -> Result<f64> {
        let key = status.trim().to_lowercase();
        self.status_weights.get(&key).copied().ok_or_else(|| {
            Error::validation(format!(
                "issue status '{}' has no completion mapping; add it to prediction.status_weights",
                status
            ))
        })
    }

    /// Completion of one issue as observable on `date`, in [0, 100].
    ///
    /// A terminal status applies from its resolution date; a non-terminal
    /// status applies from the last update. Before either, nothing has
    /// been observed and completion is 0.
    fn issue_completion_at(&self, issue: &IssueRecord, date: NaiveDate) -> Result<f64> {
        let fraction = self.completion_fraction(&issue.status)?;
        if date < issue.created_on {
            return Ok(0.0);
        }
        let effective = if fraction >= 1.0 {
            issue.closed_on.unwrap_or(issue.updated_on)
        } else {
            issue.updated_on
        };
        if effective <= date {
            Ok(fraction * 100.0)
        } else {
            Ok(0.0)
        }
    }

    fn classify(&self, actual: f64, planned: f64) -> ScheduleHealth {
        if actual >= 100.0 {
            ScheduleHealth::Completed
        } else if actual >= planned + self.tolerance_pct {
            ScheduleHealth::Ahead
        } else if actual < planned - self.tolerance_pct {
            ScheduleHealth::Delayed
        } else {
            ScheduleHealth::OnTrack
        }
    }

    /// Weekly planned/actual/forecast series across all issues of a
    /// project, observed on `today`.
    pub fn project_progress(
        &self,
        issues: &[IssueRecord],
        today: NaiveDate,
    ) -> Result<ProgressForecast> {
        let start = match issues.iter().map(|i| i.created_on).min() {
            Some(date) => date,
            None => {
                return Ok(ProgressForecast {
                    points: Vec::new(),
                    health: ScheduleHealth::NoData,
                    summary: "no data: the project has no issues".to_string(),
                });
            }
        };
        for issue in issues {
            self.completion_fraction(&issue.status)?;
        }

        let planned_end = issues
            .iter()
            .filter_map(|i| i.due_date)
            .max()
            .unwrap_or(start + Duration::weeks(FALLBACK_PLAN_WEEKS));
        let span_days = (planned_end - start).num_days().max(1) as f64;

        let mean_completion = |date: NaiveDate| -> Result<f64> {
            let mut sum = 0.0;
            for issue in issues {
                sum += self.issue_completion_at(issue, date)?;
            }
            Ok(sum / issues.len() as f64)
        };

        let completion_today = mean_completion(today)?;
        let finished = completion_today >= 100.0;

        let mut horizon_end = planned_end;
        if !finished {
            if horizon_end < today {
                horizon_end = today;
            }
            horizon_end += Duration::weeks(PROJECT_HORIZON_WEEKS);
        }

        let mut points = Vec::new();
        let mut bucket_start = start;
        let mut week = 1u32;
        while bucket_start <= horizon_end {
            let bucket_end = bucket_start + Duration::days(6);
            let planned =
                ((bucket_end - start).num_days() as f64 / span_days * 100.0).clamp(0.0, 100.0);
            let actual = if bucket_start <= today {
                Some(mean_completion(bucket_end.min(today))?.round())
            } else {
                None
            };
            points.push(ProgressPoint {
                label: format!("Week {}", week),
                planned: Some(planned.round()),
                actual,
                predicted: None,
            });
            bucket_start += Duration::weeks(1);
            week += 1;
        }

        self.fill_predictions(&mut points);

        let (health, summary) = if finished {
            (
                ScheduleHealth::Completed,
                format!("all {} issues are complete", issues.len()),
            )
        } else {
            match points.iter().rposition(|p| p.actual.is_some()) {
                None => (
                    ScheduleHealth::OnTrack,
                    "the project has not started yet".to_string(),
                ),
                Some(current) => {
                    let actual = points[current].actual.unwrap_or(0.0);
                    let planned = points[current].planned.unwrap_or(0.0);
                    let health = self.classify(actual, planned);
                    let summary = match health {
                        ScheduleHealth::Ahead => format!(
                            "progress is {:.0}% against a plan of {:.0}%; the project is ahead of schedule",
                            actual, planned
                        ),
                        ScheduleHealth::Delayed => format!(
                            "progress is {:.0}% against a plan of {:.0}%; the project is behind schedule and at risk of missing its end date",
                            actual, planned
                        ),
                        _ => format!(
                            "progress is {:.0}% against a plan of {:.0}%; the project is on track",
                            actual, planned
                        ),
                    };
                    (health, summary)
                }
            }
        };

        Ok(ProgressForecast {
            points,
            health,
            summary,
        })
    }

    /// Daily planned/actual/forecast series for a single issue, observed on
    /// `today`.
    pub fn issue_progress(&self, issue: &IssueRecord, today: NaiveDate) -> Result<ProgressForecast> {
        let fraction = self.completion_fraction(&issue.status)?;
        let resolved = fraction >= 1.0;
        let resolution_date = issue.closed_on.unwrap_or(issue.updated_on);
        let start = issue.created_on;

        let due = match issue.due_date {
            Some(due) => due,
            None => {
                // The planned curve cannot be computed without a due date;
                // report observed progress with an explanatory summary
                // instead of dividing by a zero-length span.
                let end = today.max(start);
                let mut points = Vec::new();
                let mut day = start;
                while day <= end {
                    let actual = if day <= today {
                        Some(self.issue_completion_at(issue, day)?.round())
                    } else {
                        None
                    };
                    points.push(ProgressPoint {
                        label: day.to_string(),
                        planned: None,
                        actual,
                        predicted: None,
                    });
                    day += Duration::days(1);
                }
                return Ok(ProgressForecast {
                    points,
                    health: ScheduleHealth::NoDueDate,
                    summary: format!(
                        "issue #{} has no due date; planned progress cannot be derived",
                        issue.id
                    ),
                });
            }
        };

        if due < start {
            return Err(Error::validation(format!(
                "issue #{} has a due date ({}) before its creation date ({})",
                issue.id, due, start
            )));
        }

        let span_days = (due - start).num_days().max(1) as f64;
        let span_end = if resolved {
            due.max(resolution_date)
        } else if today > due {
            today
        } else {
            due
        };
        let horizon_end = if resolved {
            span_end
        } else {
            span_end + Duration::days(ISSUE_HORIZON_DAYS)
        };

        let mut points = Vec::new();
        let mut day = start;
        while day <= horizon_end {
            let planned = if day >= due {
                100.0
            } else {
                ((day - start).num_days() as f64 / span_days * 100.0).clamp(0.0, 100.0)
            };
            let actual = if day <= today {
                Some(self.issue_completion_at(issue, day)?.round())
            } else {
                None
            };
            points.push(ProgressPoint {
                label: day.to_string(),
                planned: Some(planned.round()),
                actual,
                predicted: None,
            });
            day += Duration::days(1);
        }

        self.fill_predictions(&mut points);

        let completed_now = resolved && resolution_date <= today;
        let (health, summary) = if completed_now {
            (
                ScheduleHealth::Completed,
                format!("issue #{} was completed on {}", issue.id, resolution_date),
            )
        } else if today > due {
            (
                ScheduleHealth::Delayed,
                format!("issue #{} is past its due date ({})", issue.id, due),
            )
        } else {
            let actual = self.issue_completion_at(issue, today)?;
            let planned = if today >= due {
                100.0
            } else {
                ((today - start).num_days().max(0) as f64 / span_days * 100.0).clamp(0.0, 100.0)
            };
            let health = self.classify(actual, planned);
            let summary = match health {
                ScheduleHealth::Ahead => {
                    format!("issue #{} is ahead of its schedule", issue.id)
                }
                ScheduleHealth::Delayed => format!(
                    "issue #{} is behind schedule; its due date ({}) is at risk",
                    issue.id, due
                ),
                _ => format!(
                    "issue #{} is in progress and expected to complete by {}",
                    issue.id, due
                ),
            };
            (health, summary)
        };

        Ok(ProgressForecast {
            points,
            health,
            summary,
        })
    }

    /// Fills the predicted curve over a series whose planned/actual values
    /// are already in place.
    ///
    /// Buckets strictly before the last observed bucket get no prediction;
    /// from there forward the actual trend (average rate per bucket so far)
    /// is extrapolated, clamped to [0, 100]. Once the actual curve has hit
    /// 100 the prediction stops. With no observed progress the prediction
    /// restates the planned curve.
    fn fill_predictions(&self, points: &mut [ProgressPoint]) {
        let last = match points.iter().rposition(|p| p.actual.is_some()) {
            Some(last) => last,
            None => {
                // Observation date precedes the series: everything is a
                // forecast, and the plan is the best available one.
                for point in points.iter_mut() {
                    point.predicted = point.planned;
                }
                return;
            }
        };
        let full = points
            .iter()
            .position(|p| p.actual.is_some_and(|a| a >= 100.0));
        let last_actual = points[last].actual.unwrap_or(0.0);
        let rate = if last == 0 {
            last_actual
        } else {
            last_actual / last as f64
        };

        for (i, point) in points.iter_mut().enumerate() {
            if i < last {
                continue;
            }
            if let Some(full) = full {
                if i >= full {
                    continue;
                }
            }
            let projected = if last_actual <= 0.0 {
                point.planned.unwrap_or(0.0)
            } else {
                (last_actual + rate * (i - last) as f64).clamp(0.0, 100.0)
            };
            point.predicted = Some(projected.round());
        }
    }
}
