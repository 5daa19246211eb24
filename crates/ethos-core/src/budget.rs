//! Per-call cost accounting and monthly budget monitoring.
//!
//! Every external call appends one cost row. Aggregations run over the cost
//! log: monthly totals, per-API breakdowns, daily series, and a straight-line
//! projection used for the alert threshold check. Cost writes never fail the
//! caller.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{BudgetSettings, CostRate, Settings};
use crate::error::Result;
use crate::store::CostLog;

// ============================================================================
// ROWS
// ============================================================================

/// One `api_cost_log` row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    pub date: NaiveDate,
    pub api_name: String,
    pub num_calls: i32,
    pub token_count: i64,
    pub estimated_cost: f64,
    pub created_at: DateTime<Utc>,
}

/// One `budget_alerts` row
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAlert {
    pub alert_date: NaiveDate,
    pub alert_type: String,
    pub projected_cost: f64,
    pub budget_limit: f64,
    pub utilization_pct: f64,
    pub alert_sent: bool,
    pub notification_methods: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// AGGREGATES
// ============================================================================

/// Per-API slice of a monthly breakdown
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCostSlice {
    pub api_name: String,
    pub num_calls: i64,
    pub token_count: i64,
    pub total_cost: f64,
}

/// One day of the daily series
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCost {
    pub date: NaiveDate,
    pub total_cost: f64,
}

/// Straight-line month-end projection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostProjection {
    pub current_cost: f64,
    pub projected_cost: f64,
    pub avg_daily_cost: f64,
    pub days_elapsed: i64,
    pub days_in_month: i64,
}

/// Outcome of the budget threshold check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub projected_cost: f64,
    pub budget_limit: f64,
    pub alert_threshold: f64,
    pub utilization_pct: f64,
    pub budget_exceeded: bool,
    pub alert_triggered: bool,
}

// ============================================================================
// COST METER
// ============================================================================

/// Records per-call costs and answers budget questions.
pub struct CostMeter {
    log: Arc<dyn CostLog>,
    rates: std::collections::HashMap<String, CostRate>,
    budget: BudgetSettings,
}

impl CostMeter {
    pub fn new(log: Arc<dyn CostLog>, settings: &Settings) -> Self {
        Self {
            log,
            rates: settings.api_cost_rates.clone(),
            budget: settings.budget.clone(),
        }
    }

    /// Cost of one call given its token usage. Chat-style rates split input
    /// and output; embedding rates are single (output rate zero). An
    /// unconfigured API rates as zero with a warning so metering gaps are
    /// visible without failing the call.
    pub fn calculate_api_cost(&self, api_name: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        match self.rates.get(api_name) {
            Some(rate) => {
                input_tokens as f64 * rate.input + output_tokens as f64 * rate.output
            }
            None => {
                warn!(api_name, "no cost rate configured, recording zero cost");
                0.0
            }
        }
    }

    /// Append one cost row. Never fails the caller.
    pub async fn record(&self, api_name: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let cost = self.calculate_api_cost(api_name, input_tokens, output_tokens);
        let entry = CostEntry {
            date: Utc::now().date_naive(),
            api_name: api_name.to_string(),
            num_calls: 1,
            token_count: (input_tokens + output_tokens) as i64,
            estimated_cost: cost,
            created_at: Utc::now(),
        };
        info!(
            api_name,
            tokens = entry.token_count,
            cost = entry.estimated_cost,
            "api cost logged"
        );
        self.log.record_cost(entry).await;
        cost
    }

    /// Total cost for a calendar month.
    pub async fn monthly_total(&self, year: i32, month: u32) -> Result<f64> {
        let (first, last) = month_bounds(year, month);
        let rows = self.log.costs_between(first, last, None).await?;
        Ok(rows.iter().map(|r| r.estimated_cost).sum())
    }

    /// Per-API breakdown for a calendar month, largest spend first.
    pub async fn monthly_breakdown(&self, year: i32, month: u32) -> Result<Vec<ApiCostSlice>> {
        let (first, last) = month_bounds(year, month);
        let rows = self.log.costs_between(first, last, None).await?;

        let mut by_api: std::collections::HashMap<String, ApiCostSlice> = Default::default();
        for row in rows {
            let slice = by_api
                .entry(row.api_name.clone())
                .or_insert_with(|| ApiCostSlice {
                    api_name: row.api_name.clone(),
                    num_calls: 0,
                    token_count: 0,
                    total_cost: 0.0,
                });
            slice.num_calls += row.num_calls as i64;
            slice.token_count += row.token_count;
            slice.total_cost += row.estimated_cost;
        }

        let mut slices: Vec<_> = by_api.into_values().collect();
        slices.sort_by(|a, b| b.total_cost.total_cmp(&a.total_cost));
        Ok(slices)
    }

    /// Daily totals for a calendar month, ascending by date. Days without
    /// spend are omitted.
    pub async fn daily_series(&self, year: i32, month: u32) -> Result<Vec<DailyCost>> {
        let (first, last) = month_bounds(year, month);
        let rows = self.log.costs_between(first, last, None).await?;

        let mut by_day: std::collections::BTreeMap<NaiveDate, f64> = Default::default();
        for row in rows {
            *by_day.entry(row.date).or_insert(0.0) += row.estimated_cost;
        }
        Ok(by_day
            .into_iter()
            .map(|(date, total_cost)| DailyCost { date, total_cost })
            .collect())
    }

    /// Project month-end cost from the average daily spend so far.
    pub async fn project_month(&self, today: NaiveDate) -> Result<CostProjection> {
        let (first, last) = month_bounds(today.year(), today.month());
        let rows = self.log.costs_between(first, today, None).await?;
        let current_cost: f64 = rows.iter().map(|r| r.estimated_cost).sum();

        let days_elapsed = (today - first).num_days() + 1;
        let days_in_month = (last - first).num_days() + 1;
        let avg_daily_cost = current_cost / days_elapsed as f64;
        let projected_cost = current_cost + avg_daily_cost * (days_in_month - days_elapsed) as f64;

        Ok(CostProjection {
            current_cost,
            projected_cost,
            avg_daily_cost,
            days_elapsed,
            days_in_month,
        })
    }

    /// Compare the projection against the configured budget. A triggered
    /// alert is persisted best-effort.
    pub async fn check_threshold(&self, today: NaiveDate) -> Result<BudgetStatus> {
        let projection = self.project_month(today).await?;
        let limit = self.budget.monthly_limit;
        let alert_threshold = limit * self.budget.alert_threshold_pct / 100.0;
        let utilization_pct = if limit > 0.0 {
            projection.projected_cost / limit * 100.0
        } else {
            0.0
        };

        let status = BudgetStatus {
            projected_cost: projection.projected_cost,
            budget_limit: limit,
            alert_threshold,
            utilization_pct,
            budget_exceeded: projection.projected_cost > limit,
            alert_triggered: projection.projected_cost > alert_threshold,
        };

        if status.alert_triggered {
            warn!(
                projected = status.projected_cost,
                limit = status.budget_limit,
                utilization_pct = status.utilization_pct,
                "budget alert threshold crossed"
            );
            self.log
                .record_budget_alert(BudgetAlert {
                    alert_date: today,
                    alert_type: if status.budget_exceeded {
                        "budget_exceeded".to_string()
                    } else {
                        "threshold_warning".to_string()
                    },
                    projected_cost: status.projected_cost,
                    budget_limit: status.budget_limit,
                    utilization_pct: status.utilization_pct,
                    alert_sent: false,
                    notification_methods: vec!["log".to_string()],
                    created_at: Utc::now(),
                })
                .await;
        }

        Ok(status)
    }
}

/// First and last day of a calendar month.
fn month_bounds(year: i32, month: u32) -> (NaiveDate, NaiveDate) {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .unwrap_or_else(|| Utc::now().date_naive().with_day(1).unwrap_or_default());
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    let last = next
        .map(|d| d.pred_opt().unwrap_or(first))
        .unwrap_or(first);
    (first, last)
}

// ============================================================================
// TESTS
// ============================================================================
