use super::{ForecastPoint, TrendDirection, TrendResult};
use crate::error::{HealthTrendsError, Result};
use crate::metrics::{daily_values, HealthRecord, MetricId};
use crate::providers::TrendAnalysisEngine;
use chrono::{Duration, NaiveDate, Utc};

/// Minimum relative slope (fraction of the mean per day) treated as a trend
const SLOPE_THRESHOLD: f64 = 0.001;
/// Minimum R² before a direction is trusted
const CONFIDENCE_THRESHOLD: f64 = 0.3;

/// Least-squares regression over daily values with a linear forecast
#[derive(Debug, Clone)]
pub struct LinearTrendAnalyzer {
    /// Minimum number of distinct days required
    min_days: usize,
    /// Width of the forecast band, in mean absolute residuals
    band_width: f64,
}

impl Default for LinearTrendAnalyzer {
    fn default() -> Self {
        Self {
            min_days: 2,
            band_width: 1.96,
        }
    }
}

impl LinearTrendAnalyzer {
    /// Create an analyzer with custom settings
    pub fn new(min_days: usize, band_width: f64) -> Self {
        Self {
            min_days: min_days.max(2),
            band_width,
        }
    }

    /// Returns `(slope, intercept, r_squared)` for `(x, y)` points
    fn linear_regression(&self, data: &[(f64, f64)]) -> Result<(f64, f64, f64)> {
        let n = data.len() as f64;
        let x_mean = data.iter().map(|(x, _)| x).sum::<f64>() / n;
        let y_mean = data.iter().map(|(_, y)| y).sum::<f64>() / n;

        let numerator: f64 = data.iter().map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
        let denominator: f64 = data.iter().map(|(x, _)| (x - x_mean).powi(2)).sum();

        if denominator == 0.0 {
            return Err(HealthTrendsError::Analysis(
                "Cannot calculate slope: all samples fall on the same day".to_string(),
            ));
        }

        let slope = numerator / denominator;
        let intercept = y_mean - slope * x_mean;

        let ss_tot: f64 = data.iter().map(|(_, y)| (y - y_mean).powi(2)).sum();
        if ss_tot == 0.0 {
            return Ok((slope, intercept, 1.0));
        }

        let ss_res: f64 = data
            .iter()
            .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
            .sum();

        Ok((slope, intercept, (1.0 - ss_res / ss_tot).max(0.0)))
    }

    fn classify_direction(&self, slope: f64, mean: f64, r_squared: f64) -> TrendDirection {
        if r_squared < CONFIDENCE_THRESHOLD {
            return TrendDirection::Volatile;
        }

        let relative = if mean.abs() > f64::EPSILON {
            slope / mean.abs()
        } else {
            slope
        };

        if relative > SLOPE_THRESHOLD {
            TrendDirection::Increasing
        } else if relative < -SLOPE_THRESHOLD {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }

    fn confidence(&self, r_squared: f64, days: usize) -> f64 {
        let sample_size_factor = (days as f64).ln() / 10.0;
        (r_squared.clamp(0.0, 1.0) + sample_size_factor).clamp(0.0, 1.0)
    }

    fn volatility(&self, series: &[(f64, f64)]) -> f64 {
        if series.len() < 2 {
            return 0.0;
        }

        let changes: Vec<f64> = series.windows(2).map(|w| w[1].1 - w[0].1).collect();
        let mean_change = changes.iter().sum::<f64>() / changes.len() as f64;
        let variance = changes
            .iter()
            .map(|c| (c - mean_change).powi(2))
            .sum::<f64>()
            / changes.len() as f64;
        variance.sqrt()
    }

    fn forecast(
        &self,
        series: &[(f64, f64)],
        last_day: NaiveDate,
        slope: f64,
        intercept: f64,
        forecast_days: u32,
    ) -> Vec<ForecastPoint> {
        let Some(&(last_x, _)) = series.last() else {
            return Vec::new();
        };

        let mean_abs_residual = series
            .iter()
            .map(|(x, y)| (y - (slope * x + intercept)).abs())
            .sum::<f64>()
            / series.len() as f64;
        let margin = mean_abs_residual * self.band_width;

        (1..=forecast_days)
            .map(|i| {
                let value = slope * (last_x + i as f64) + intercept;
                ForecastPoint {
                    date: last_day + Duration::days(i as i64),
                    value,
                    lower: value - margin,
                    upper: value + margin,
                }
            })
            .collect()
    }
}

impl TrendAnalysisEngine for LinearTrendAnalyzer {
    fn analyze(
        &self,
        data: &[HealthRecord],
        metric: &MetricId,
        forecast_days: u32,
    ) -> Result<TrendResult> {
        let daily = daily_values(data, metric.daily_aggregation());
        if daily.len() < self.min_days {
            return Err(HealthTrendsError::InsufficientData {
                required: self.min_days,
                actual: daily.len(),
            });
        }

        let first_day = daily[0].0;
        let series: Vec<(f64, f64)> = daily
            .iter()
            .map(|(day, value)| ((*day - first_day).num_days() as f64, *value))
            .collect();

        let (slope, intercept, r_squared) = self.linear_regression(&series)?;
        let average_value = series.iter().map(|(_, y)| y).sum::<f64>() / series.len() as f64;
        let (last_day, latest_value) = daily[daily.len() - 1];

        Ok(TrendResult {
            metric: metric.clone(),
            generated_at: Utc::now(),
            data_points: data.len(),
            direction: self.classify_direction(slope, average_value, r_squared),
            slope_per_day: slope,
            r_squared,
            confidence: self.confidence(r_squared, series.len()),
            volatility: self.volatility(&series),
            latest_value,
            average_value,
            forecast: self.forecast(&series, last_day, slope, intercept, forecast_days),
            comparative_data: None,
        })
    }
}
