//! Utility functions for CoopGrid

use uuid::Uuid;

/// Absolute tolerance used when comparing energy and money quantities
pub const FLOAT_TOLERANCE: f64 = 1e-6;

/// Generate a random UUID
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a random UUID with a specific prefix
pub fn generate_prefixed_id(prefix: &str) -> String {
    format!("{}-{}", prefix, generate_uuid())
}

/// Round to a fixed number of decimal places
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

/// Compare two quantities, scaling the tolerance with their magnitude
pub fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= tolerance * scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_prefixed_id() {
        let id = generate_prefixed_id("cluster");
        assert!(id.starts_with("cluster-"));
        assert_eq!(id.len(), "cluster-".len() + 36);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(33.333333, 2), 33.33);
        assert_eq!(round_to(66.666666, 2), 66.67);
        assert_eq!(round_to(25.0, 2), 25.0);
    }

    #[test]
    fn test_approx_eq_scales() {
        assert!(approx_eq(1_000_000.0, 1_000_000.000_1, FLOAT_TOLERANCE));
        assert!(!approx_eq(1.0, 1.001, FLOAT_TOLERANCE));
    }
}
