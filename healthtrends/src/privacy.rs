//! Permission gating and value anonymisation for shared comparisons

use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Permission required before any demographic comparison
pub const DEMOGRAPHIC_COMPARISON: &str = "demographic_comparison";

/// How [`PrivacyManager::anonymize_value`] perturbs a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymizationMethod {
    /// Round to the nearest 10
    #[default]
    Rounding,
    /// Add Laplace noise scaled by `sensitivity / epsilon`
    DifferentialPrivacy,
}

/// Opt-in permissions and anonymisation parameters.
///
/// Unknown permissions are denied.
#[derive(Debug)]
pub struct PrivacyManager {
    permissions: RwLock<HashMap<String, bool>>,
    epsilon: f64,
    sensitivity: f64,
}

impl Default for PrivacyManager {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl PrivacyManager {
    /// Create a manager with no permissions granted
    pub fn new(epsilon: f64, sensitivity: f64) -> Self {
        Self {
            permissions: RwLock::new(HashMap::new()),
            epsilon,
            sensitivity,
        }
    }

    /// Whether `permission` has been granted
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions
            .read()
            .map(|p| p.get(permission).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// Grant a permission
    pub fn grant(&self, permission: impl Into<String>) {
        self.set(permission.into(), true);
    }

    /// Revoke a permission
    pub fn revoke(&self, permission: impl Into<String>) {
        self.set(permission.into(), false);
    }

    fn set(&self, permission: String, granted: bool) {
        debug!(permission = %permission, granted, "Privacy permission changed");
        let mut permissions = self
            .permissions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        permissions.insert(permission, granted);
    }

    /// Laplace scale `b = sensitivity / epsilon`
    pub fn noise_scale(&self) -> f64 {
        self.sensitivity / self.epsilon
    }

    /// Perturb `value` with the given method
    pub fn anonymize_value(&self, value: f64, method: AnonymizationMethod) -> f64 {
        match method {
            AnonymizationMethod::Rounding => (value / 10.0).round() * 10.0,
            AnonymizationMethod::DifferentialPrivacy => value + self.laplace_noise(),
        }
    }

    /// One Laplace(0, b) sample by inverse CDF over the OS random source
    fn laplace_noise(&self) -> f64 {
        let u = loop {
            let u: f64 = OsRng.gen_range(-0.5..0.5);
            // |u| = 0.5 would give ln(0)
            if u.abs() < 0.5 {
                break u;
            }
        };
        -self.noise_scale() * u.signum() * (1.0 - 2.0 * u.abs()).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_fail_closed() {
        let privacy = PrivacyManager::default();
        assert!(!privacy.has_permission(DEMOGRAPHIC_COMPARISON));
        assert!(!privacy.has_permission("anything_else"));

        privacy.grant(DEMOGRAPHIC_COMPARISON);
        assert!(privacy.has_permission(DEMOGRAPHIC_COMPARISON));

        privacy.revoke(DEMOGRAPHIC_COMPARISON);
        assert!(!privacy.has_permission(DEMOGRAPHIC_COMPARISON));
    }

    #[test]
    fn test_rounding_to_nearest_ten() {
        let privacy = PrivacyManager::default();
        assert_eq!(privacy.anonymize_value(8234.0, AnonymizationMethod::Rounding), 8230.0);
        assert_eq!(privacy.anonymize_value(65.0, AnonymizationMethod::Rounding), 70.0);
        assert_eq!(privacy.anonymize_value(-14.0, AnonymizationMethod::Rounding), -10.0);
    }

    #[test]
    fn test_laplace_noise_is_centered_with_expected_spread() {
        let privacy = PrivacyManager::new(0.5, 1.0);
        assert_eq!(privacy.noise_scale(), 2.0);

        let samples: Vec<f64> = (0..20_000)
            .map(|_| privacy.anonymize_value(100.0, AnonymizationMethod::DifferentialPrivacy) - 100.0)
            .collect();

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let mean_abs = samples.iter().map(|s| s.abs()).sum::<f64>() / samples.len() as f64;

        // Laplace(0, b) has mean 0 and E|X| = b
        assert!(mean.abs() < 0.15, "mean was {mean}");
        assert!((mean_abs - 2.0).abs() < 0.15, "mean |noise| was {mean_abs}");
        assert!(samples.iter().all(|s| s.is_finite()));
    }
}
