//! Per-run performance metrics and the cross-run summary.

use super::simulation::SimulationRunResult;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RunMetrics {
    pub run_id: usize,
    pub final_wealth: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub ruined: bool,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub reached_goal: bool,
    pub days_to_goal: Option<usize>,
}

impl RunMetrics {
    pub fn compute(run: &SimulationRunResult, risk_free_rate: f64, target_wealth: Option<f64>) -> Self {
        let curve = &run.equity_curve;
        let initial = curve.first().copied().unwrap_or(0.0);
        let final_wealth = curve.last().copied().unwrap_or(initial);

        let total_return = if initial > 0.0 {
            (final_wealth - initial) / initial
        } else {
            0.0
        };

        let years = curve.len().saturating_sub(1) as f64 / TRADING_DAYS_PER_YEAR;
        let cagr = if years > 0.0 && initial > 0.0 && final_wealth > 0.0 {
            (final_wealth / initial).powf(1.0 / years) - 1.0
        } else if final_wealth <= 0.0 && initial > 0.0 {
            -1.0
        } else {
            0.0
        };

        let daily_rf = risk_free_rate / TRADING_DAYS_PER_YEAR;
        let risk = compute_risk_adjusted(curve, daily_rf);
        let days_to_goal = target_wealth.and_then(|target| curve.iter().position(|&v| v >= target));

        let transactions = &run.final_state.transactions;
        RunMetrics {
            run_id: run.run_id,
            final_wealth,
            total_return,
            cagr,
            volatility: risk.volatility,
            sharpe_ratio: risk.sharpe,
            sortino_ratio: risk.sortino,
            max_drawdown: compute_drawdown(curve),
            ruined: curve.iter().any(|&v| v <= 0.0),
            total_commission: transactions.iter().map(|t| t.commission).sum(),
            total_slippage: transactions.iter().map(|t| t.slippage).sum(),
            reached_goal: days_to_goal.is_some(),
            days_to_goal,
        }
    }
}

fn compute_drawdown(curve: &[f64]) -> f64 {
    let Some(&first) = curve.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &equity in curve {
        if equity > peak {
            peak = equity;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - equity) / peak);
        }
    }
    max_dd
}

struct RiskAdjusted {
    volatility: f64,
    sharpe: f64,
    sortino: f64,
}

fn compute_risk_adjusted(curve: &[f64], daily_rf: f64) -> RiskAdjusted {
    let returns: Vec<f64> = curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect();
    if returns.is_empty() {
        return RiskAdjusted {
            volatility: 0.0,
            sharpe: 0.0,
            sortino: 0.0,
        };
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let stddev = (returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
    let excess = mean - daily_rf;
    let annualise = TRADING_DAYS_PER_YEAR.sqrt();

    let sharpe = if stddev > 0.0 { excess / stddev * annualise } else { 0.0 };

    let downside = (returns
        .iter()
        .filter(|&&r| r < daily_rf)
        .map(|&r| (r - daily_rf).powi(2))
        .sum::<f64>()
        / n)
        .sqrt();
    let sortino = if downside > 0.0 { excess / downside * annualise } else { 0.0 };

    RiskAdjusted {
        volatility: stddev * annualise,
        sharpe,
        sortino,
    }
}

/// Linear-interpolated percentile of already sorted values; `p` in 0..=100.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (len - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] * (1.0 - weight) + sorted[upper] * weight
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    pub iterations: usize,
    pub failed_iterations: usize,
    /// Final wealth at the 5th, 25th, 50th, 75th and 95th percentiles.
    pub final_wealth_percentiles: [f64; 5],
    pub mean_final_wealth: f64,
    pub probability_of_ruin: f64,
    /// Share of runs that reached the target wealth, or avoided ruin when
    /// there is no target.
    pub probability_of_success: f64,
    pub average_max_drawdown: f64,
    pub average_sharpe: f64,
}

fn share_of(metrics: &[RunMetrics], pred: impl Fn(&RunMetrics) -> bool) -> f64 {
    if metrics.is_empty() {
        return 0.0;
    }
    metrics.iter().filter(|m| pred(m)).count() as f64 / metrics.len() as f64
}

fn mean_of(metrics: &[RunMetrics], f: impl Fn(&RunMetrics) -> f64) -> f64 {
    if metrics.is_empty() {
        return 0.0;
    }
    metrics.iter().map(f).sum::<f64>() / metrics.len() as f64
}

pub const SUMMARY_PERCENTILES: [f64; 5] = [5.0, 25.0, 50.0, 75.0, 95.0];

impl SimulationSummary {
    pub fn compute(metrics: &[RunMetrics], failed_iterations: usize, has_target: bool) -> Self {
        let mut finals: Vec<f64> = metrics.iter().map(|m| m.final_wealth).collect();
        finals.sort_by(f64::total_cmp);

        SimulationSummary {
            iterations: metrics.len() + failed_iterations,
            failed_iterations,
            final_wealth_percentiles: SUMMARY_PERCENTILES.map(|p| percentile(&finals, p)),
            mean_final_wealth: mean_of(metrics, |m| m.final_wealth),
            probability_of_ruin: share_of(metrics, |m| m.ruined),
            probability_of_success: if has_target {
                share_of(metrics, |m| m.reached_goal)
            } else {
                share_of(metrics, |m| !m.ruined)
            },
            average_max_drawdown: mean_of(metrics, |m| m.max_drawdown),
            average_sharpe: mean_of(metrics, |m| m.sharpe_ratio),
        }
    }
}
