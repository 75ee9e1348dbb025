//! Time-domain HRV metrics over a cleaned RR sequence. Pure CPU, no I/O.

use crate::model::HrvMetrics;

/// Computes RMSSD, SDNN and pNN50 over `rr` (milliseconds).
///
/// Returns `None` when fewer than two values are supplied — there is no
/// successive difference to compute.
pub fn compute_hrv(rr: &[f64]) -> Option<HrvMetrics> {
    if rr.len() < 2 {
        return None;
    }

    let diffs: Vec<f64> = rr.windows(2).map(|w| w[1] - w[0]).collect();

    let rmssd = (diffs.iter().map(|d| d * d).sum::<f64>() / diffs.len() as f64).sqrt();

    let mean = rr.iter().sum::<f64>() / rr.len() as f64;
    let variance = rr.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / rr.len() as f64;
    let sdnn = variance.sqrt();

    let over_50 = diffs.iter().filter(|d| d.abs() > 50.0).count();
    let pnn50 = over_50 as f64 * 100.0 / diffs.len() as f64;

    Some(HrvMetrics {
        rmssd,
        sdnn,
        pnn50,
    })
}

/// Mean of a non-empty RR sequence, used to derive a window's heart rate.
pub fn mean_rr(rr: &[f64]) -> Option<f64> {
    if rr.is_empty() {
        None
    } else {
        Some(rr.iter().sum::<f64>() / rr.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_short_returns_none() {
        assert_eq!(compute_hrv(&[600.0]), None);
        assert_eq!(compute_hrv(&[]), None);
    }

    #[test]
    fn constant_series_has_zero_variability() {
        let rr = vec![800.0; 10];
        let metrics = compute_hrv(&rr).unwrap();
        assert_eq!(metrics.rmssd, 0.0);
        assert_eq!(metrics.sdnn, 0.0);
        assert_eq!(metrics.pnn50, 0.0);
    }

    #[test]
    fn known_sequence_matches_hand_computation() {
        let rr = [600.0, 650.0, 600.0];
        let metrics = compute_hrv(&rr).unwrap();
        // diffs = [50, -50]; rmssd = sqrt((2500+2500)/2) = 50
        assert!((metrics.rmssd - 50.0).abs() < 1e-9);
        // pnn50: |diff| > 50 strictly, both diffs are exactly 50 -> 0%
        assert_eq!(metrics.pnn50, 0.0);
    }

    #[test]
    fn mean_rr_of_empty_is_none() {
        assert_eq!(mean_rr(&[]), None);
        assert_eq!(mean_rr(&[500.0, 700.0]), Some(600.0));
    }
}
