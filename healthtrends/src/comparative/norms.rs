//! Reference populations and seasonal baselines

use super::types::{ActivityLevel, Gender};
use crate::metrics::MetricId;
use std::collections::HashMap;

/// Smallest cohort a demographic comparison may be made against
pub const MIN_COHORT_SIZE: usize = 50;

/// Summary of a reference cohort
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CohortNorm {
    /// Cohort mean
    pub mean: f64,
    /// Cohort standard deviation
    pub std: f64,
    /// Number of members
    pub size: usize,
}

/// Source of demographic reference cohorts
pub trait DemographicNorms: Send + Sync {
    /// Cohort matching the filters, or `None` when no reference exists
    fn cohort(
        &self,
        metric: &MetricId,
        age: i32,
        gender: Option<Gender>,
        activity_level: Option<ActivityLevel>,
    ) -> Option<CohortNorm>;
}

/// Seasonal adjustment applied to a user's own yearly average
pub trait SeasonalModel: Send + Sync {
    /// Multiplier for `month` (1 to 12) in the northern hemisphere
    fn monthly_factor(&self, metric: &MetricId, month: u32) -> f64;
}

#[derive(Debug, Clone, Copy)]
struct AgeBand {
    min: i32,
    max: i32,
    population: usize,
    /// Multiplier on the metric's adult baseline
    factor: f64,
}

const AGE_BANDS: &[AgeBand] = &[
    AgeBand { min: 13, max: 17, population: 180, factor: 1.1 },
    AgeBand { min: 18, max: 29, population: 2400, factor: 1.05 },
    AgeBand { min: 30, max: 44, population: 3100, factor: 1.0 },
    AgeBand { min: 45, max: 59, population: 2200, factor: 0.95 },
    AgeBand { min: 60, max: 74, population: 900, factor: 0.85 },
    AgeBand { min: 75, max: 120, population: 120, factor: 0.7 },
];

/// Built-in published-average style norms.
///
/// Cohort sizes shrink as filters are added, so narrow cohorts at the ends
/// of the age range fall below [`MIN_COHORT_SIZE`].
#[derive(Debug, Clone)]
pub struct StaticDemographicNorms {
    baselines: HashMap<String, (f64, f64)>,
}

impl Default for StaticDemographicNorms {
    fn default() -> Self {
        let baselines = [
            ("steps", 7500.0, 3000.0),
            ("distance", 5.5, 2.4),
            ("active_energy", 450.0, 200.0),
            ("exercise_minutes", 30.0, 20.0),
            ("flights_climbed", 9.0, 6.0),
            ("heart_rate", 75.0, 10.0),
            ("resting_heart_rate", 65.0, 8.0),
            ("heart_rate_variability", 45.0, 18.0),
            ("sleep_hours", 7.1, 1.1),
            ("vo2_max", 38.0, 7.0),
        ]
        .into_iter()
        .map(|(metric, mean, std)| (metric.to_string(), (mean, std)))
        .collect();
        Self { baselines }
    }
}

impl StaticDemographicNorms {
    fn activity_factor(activity_level: Option<ActivityLevel>) -> (f64, usize) {
        match activity_level {
            None => (1.0, 1),
            Some(ActivityLevel::Sedentary) => (0.7, 4),
            Some(ActivityLevel::Moderate) => (1.0, 2),
            Some(ActivityLevel::Active) => (1.25, 4),
            Some(ActivityLevel::VeryActive) => (1.5, 10),
        }
    }
}

impl DemographicNorms for StaticDemographicNorms {
    fn cohort(
        &self,
        metric: &MetricId,
        age: i32,
        gender: Option<Gender>,
        activity_level: Option<ActivityLevel>,
    ) -> Option<CohortNorm> {
        let &(mean, std) = self.baselines.get(metric.as_str())?;
        let band = AGE_BANDS.iter().find(|b| (b.min..=b.max).contains(&age))?;

        let mut size = band.population;
        size /= match gender {
            None => 1,
            Some(Gender::Female) | Some(Gender::Male) => 2,
            Some(Gender::Other) => 40,
        };

        let (activity_factor, divisor) = Self::activity_factor(activity_level);
        size /= divisor;

        // Heart rate style metrics do not scale with activity the way volume metrics do
        let scales_with_activity = !metric.as_str().contains("heart_rate");
        let factor = if scales_with_activity {
            band.factor * activity_factor
        } else {
            1.0
        };

        Some(CohortNorm {
            mean: mean * factor,
            std,
            size,
        })
    }
}

/// Fixed monthly factors for metrics with a known seasonal pattern
#[derive(Debug, Clone, Default)]
pub struct StaticSeasonalModel;

const ACTIVITY_SEASON: [f64; 12] = [0.85, 0.87, 0.93, 1.0, 1.06, 1.1, 1.12, 1.1, 1.03, 0.97, 0.9, 0.86];
const SLEEP_SEASON: [f64; 12] = [1.04, 1.03, 1.01, 1.0, 0.98, 0.97, 0.96, 0.97, 0.99, 1.0, 1.02, 1.04];

impl SeasonalModel for StaticSeasonalModel {
    fn monthly_factor(&self, metric: &MetricId, month: u32) -> f64 {
        let index = (month.clamp(1, 12) - 1) as usize;
        match metric.as_str() {
            "steps" | "distance" | "active_energy" | "exercise_minutes" | "flights_climbed" => {
                ACTIVITY_SEASON[index]
            }
            "sleep_hours" => SLEEP_SEASON[index],
            _ => 1.0,
        }
    }
}

const SOUTHERN_LOCATIONS: &[&str] = &[
    "australia",
    "new zealand",
    "south africa",
    "argentina",
    "chile",
    "uruguay",
    "brazil",
    "southern",
];

/// Whether a free-text location is in the southern hemisphere
pub fn is_southern_hemisphere(location: &str) -> bool {
    let location = location.to_lowercase();
    SOUTHERN_LOCATIONS.iter().any(|l| location.contains(l))
}

/// Month whose northern-hemisphere season matches `month` at `location`
pub fn hemisphere_month(month: u32, location: Option<&str>) -> u32 {
    match location {
        Some(location) if is_southern_hemisphere(location) => (month + 5) % 12 + 1,
        _ => month,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_norms_cohort_sizes() {
        let norms = StaticDemographicNorms::default();
        let steps = MetricId::new("steps");

        let broad = norms.cohort(&steps, 35, None, None).unwrap();
        assert_eq!(broad.size, 3100);
        assert_eq!(broad.mean, 7500.0);

        let narrow = norms
            .cohort(&steps, 80, Some(Gender::Female), Some(ActivityLevel::VeryActive))
            .unwrap();
        assert!(narrow.size < MIN_COHORT_SIZE);

        assert!(norms.cohort(&steps, 150, None, None).is_none());
        assert!(norms.cohort(&MetricId::new("body_mass"), 35, None, None).is_none());
    }

    #[test]
    fn test_seasonal_factors() {
        let model = StaticSeasonalModel;
        let steps = MetricId::new("steps");
        assert!(model.monthly_factor(&steps, 7) > model.monthly_factor(&steps, 1));
        assert_eq!(model.monthly_factor(&MetricId::new("body_mass"), 7), 1.0);
    }

    #[test]
    fn test_southern_hemisphere_shift() {
        assert_eq!(hemisphere_month(1, Some("Sydney, Australia")), 7);
        assert_eq!(hemisphere_month(7, Some("Cape Town, South Africa")), 1);
        assert_eq!(hemisphere_month(12, Some("Santiago, Chile")), 6);
        assert_eq!(hemisphere_month(6, Some("Berlin")), 6);
        assert_eq!(hemisphere_month(6, None), 6);
    }
}
