use serde::Serialize;

use crate::errors::{ServiceError, ServiceResult};

/// Outcome of comparing a probe encoding against a known one. Derived,
/// never persisted.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct MatchResult {
    pub is_match: bool,
    pub distance: f64,
    pub confidence: f64,
}

/// Euclidean distance between two equal-length encodings. Unequal lengths
/// are a data-integrity error, never truncated or padded.
pub fn euclidean_distance(known: &[f64], probe: &[f64]) -> ServiceResult<f64> {
    if known.len() != probe.len() {
        return Err(ServiceError::DimensionMismatch {
            known: known.len(),
            probe: probe.len(),
        });
    }

    let sum = known
        .iter()
        .zip(probe)
        .map(|(k, p)| {
            let d = k - p;
            d * d
        })
        .sum::<f64>();

    Ok(sum.sqrt())
}

/// Match decision: distance at or below `tolerance` counts as the same
/// person (the boundary is inclusive). Confidence is a monotonically
/// decreasing mapping of distance into [0, 1], not a calibrated
/// probability.
pub fn compare(known: &[f64], probe: &[f64], tolerance: f64) -> ServiceResult<MatchResult> {
    let distance = euclidean_distance(known, probe)?;
    Ok(MatchResult {
        is_match: distance <= tolerance,
        distance,
        confidence: (1.0 - distance).clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_match_is_exact() {
        let encoding = vec![0.25, -0.5, 0.75, 0.1];
        let result = compare(&encoding, &encoding, 0.0).unwrap();
        assert_eq!(result.distance, 0.0);
        assert!(result.is_match);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn tolerance_boundary_is_inclusive() {
        // 0.5 is exact in binary, so the distance lands exactly on the
        // tolerance.
        let known = vec![0.0, 0.0];
        let probe = vec![0.0, 0.5];
        let result = compare(&known, &probe, 0.5).unwrap();
        assert_eq!(result.distance, 0.5);
        assert!(result.is_match);
    }

    #[test]
    fn distance_above_tolerance_does_not_match() {
        let known = vec![0.0, 0.0];
        let probe = vec![0.0, 0.5];
        let result = compare(&known, &probe, 0.4999).unwrap();
        assert!(!result.is_match);
    }

    #[test]
    fn confidence_clamps_to_zero_for_distant_encodings() {
        let known = vec![0.0, 0.0];
        let probe = vec![3.0, 4.0];
        let result = compare(&known, &probe, 0.6).unwrap();
        assert_eq!(result.distance, 5.0);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.is_match);
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let err = compare(&[0.1, 0.2], &[0.1], 0.6).unwrap_err();
        match err {
            ServiceError::DimensionMismatch { known, probe } => {
                assert_eq!(known, 2);
                assert_eq!(probe, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
