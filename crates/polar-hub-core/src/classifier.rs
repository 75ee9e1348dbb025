//! Lipponen-Tarvainen (2019) RR artifact classifier.
//!
//! Pure function over an RR-interval sequence: no I/O, no suspension points.
//! The whole pipeline's correctness hinges on this module, so every step is
//! kept close to the published algorithm rather than simplified.

use crate::model::ArtifactType;

const ECTOPIC_C1: f64 = 0.13;
const ECTOPIC_C2: f64 = 0.17;
const DRR_WINDOW: usize = 91;
const MEDIAN_WINDOW: usize = 11;
const MIN_QD_THRESHOLD: f64 = 50.0;
const QD_SCALE: f64 = 5.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedBeat {
    pub rr_clean: Option<f64>,
    pub artifact_type: ArtifactType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyResult {
    pub results: Vec<ClassifiedBeat>,
    pub clean_series: Vec<f64>,
}

/// Classifies and corrects a sequence of RR intervals (milliseconds).
///
/// Sequences shorter than 4 are returned unmodified (identity classification),
/// per the degenerate-case rule: there isn't enough context to classify them.
pub fn classify(rr: &[f64]) -> ClassifyResult {
    let n = rr.len();
    if n < 4 {
        return ClassifyResult {
            results: rr
                .iter()
                .map(|&v| ClassifiedBeat {
                    rr_clean: Some(v),
                    artifact_type: ArtifactType::None,
                })
                .collect(),
            clean_series: rr.to_vec(),
        };
    }

    let drr = delta_series(rr);
    let med_rr = rolling_median(rr, MEDIAN_WINDOW);
    let m_rr = m_rr_series(rr, &med_rr);

    let th1 = adaptive_threshold(&drr, DRR_WINDOW);
    let th2 = adaptive_threshold(&m_rr, DRR_WINDOW);

    let drrs: Vec<f64> = (0..n).map(|i| drr[i] / th1[i]).collect();
    let mrrs: Vec<f64> = (0..n).map(|i| m_rr[i] / th2[i]).collect();

    let (s12, s22) = subspace_projections(&drrs);

    // Provisional classification from the walk; ectopic pairs are tracked
    // separately and applied last, overriding anything the walk assigned them.
    let mut provisional: Vec<Option<ArtifactType>> = vec![None; n];
    let mut ectopic_pairs: Vec<(usize, usize)> = Vec::new();

    let bound = n.saturating_sub(2);
    let mut i = 0usize;
    while i < bound {
        if drrs[i].abs() <= 1.0 {
            i += 1;
            continue;
        }

        let ectopic = (drrs[i] > 1.0 && s12[i] < -ECTOPIC_C1 * drrs[i] - ECTOPIC_C2)
            || (drrs[i] < -1.0 && s12[i] > -ECTOPIC_C1 * drrs[i] + ECTOPIC_C2);

        if ectopic {
            if i > 0 {
                ectopic_pairs.push((i - 1, i));
                i += 2;
            } else {
                provisional[0] = Some(ArtifactType::Longshort);
                i += 1;
            }
            continue;
        }

        if drrs[i].abs() > 1.0 || mrrs[i].abs() > 3.0 {
            let mut candidates = vec![i];
            if i + 2 < n && drrs[i + 1].abs() < drrs[i + 2].abs() {
                candidates.push(i + 1);
            }

            let mut handled = false;
            for &j in &candidates {
                if j + 1 >= n {
                    continue;
                }
                if drrs[j] < -1.0
                    && s22[j] > 1.0
                    && (rr[j] + rr[j + 1] - med_rr[j]).abs() < th2[j]
                {
                    provisional[j] = Some(ArtifactType::Extra);
                    provisional[j + 1] = Some(ArtifactType::ExtraAbsorbed);
                    i = j + 2;
                    handled = true;
                    break;
                }
                if drrs[j] > 1.0 && s22[j] < -1.0 && (rr[j] / 2.0 - med_rr[j]).abs() < th2[j] {
                    provisional[j] = Some(ArtifactType::Missed);
                    i = j + 2;
                    handled = true;
                    break;
                }
            }

            if !handled {
                provisional[i] = Some(ArtifactType::Longshort);
                i += 1;
            }
            continue;
        }

        i += 1;
    }

    let mut artifact_type: Vec<ArtifactType> = vec![ArtifactType::None; n];
    let mut rr_clean: Vec<Option<f64>> = rr.iter().map(|&v| Some(v)).collect();

    for (idx, kind) in provisional.iter().enumerate() {
        match kind {
            Some(ArtifactType::Missed) => {
                artifact_type[idx] = ArtifactType::Missed;
                rr_clean[idx] = Some(rr[idx] / 2.0);
            }
            Some(ArtifactType::Extra) => {
                artifact_type[idx] = ArtifactType::Extra;
                rr_clean[idx] = Some(rr[idx] + rr[idx + 1]);
            }
            Some(ArtifactType::ExtraAbsorbed) => {
                artifact_type[idx] = ArtifactType::ExtraAbsorbed;
                rr_clean[idx] = None;
            }
            Some(ArtifactType::Longshort) => {
                artifact_type[idx] = ArtifactType::Longshort;
                rr_clean[idx] = Some(med_rr[idx]);
            }
            _ => {}
        }
    }

    for &(a, b) in &ectopic_pairs {
        let avg = (rr[a] + rr[b]) / 2.0;
        artifact_type[a] = ArtifactType::Ectopic;
        artifact_type[b] = ArtifactType::Ectopic;
        rr_clean[a] = Some(avg);
        rr_clean[b] = Some(avg);
    }

    let results: Vec<ClassifiedBeat> = (0..n)
        .map(|i| ClassifiedBeat {
            rr_clean: rr_clean[i],
            artifact_type: artifact_type[i],
        })
        .collect();

    let clean_series = build_clean_series(&results);

    ClassifyResult {
        results,
        clean_series,
    }
}

fn build_clean_series(results: &[ClassifiedBeat]) -> Vec<f64> {
    let mut out = Vec::with_capacity(results.len());
    for r in results {
        match r.artifact_type {
            ArtifactType::ExtraAbsorbed => {}
            ArtifactType::Missed => {
                if let Some(v) = r.rr_clean {
                    out.push(v);
                    out.push(v);
                }
            }
            _ => {
                if let Some(v) = r.rr_clean {
                    out.push(v);
                }
            }
        }
    }
    out
}

/// `dRR[i] = rr[i] - rr[i-1]` for `i >= 1`; `dRR[0]` is the mean of the rest,
/// which avoids biasing the very first interval's threshold.
fn delta_series(rr: &[f64]) -> Vec<f64> {
    let n = rr.len();
    let mut drr = vec![0.0; n];
    for i in 1..n {
        drr[i] = rr[i] - rr[i - 1];
    }
    if n > 1 {
        drr[0] = drr[1..].iter().sum::<f64>() / (n - 1) as f64;
    }
    drr
}

/// `mRR[i] = rr[i] - medRR[i]`, doubled when negative.
fn m_rr_series(rr: &[f64], med_rr: &[f64]) -> Vec<f64> {
    rr.iter()
        .zip(med_rr)
        .map(|(&r, &m)| {
            let v = r - m;
            if v < 0.0 { v * 2.0 } else { v }
        })
        .collect()
}

/// Centered rolling median, window shrinking (not wrapping) at the edges.
fn rolling_median(series: &[f64], window: usize) -> Vec<f64> {
    let n = series.len();
    let half = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            let mut w: Vec<f64> = series[lo..hi].to_vec();
            w.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let m = w.len();
            if m % 2 == 1 {
                w[m / 2]
            } else {
                (w[m / 2 - 1] + w[m / 2]) / 2.0
            }
        })
        .collect()
}

/// `Th[i] = max(5.2 * QD(window around i), 50)`, window shrinking at edges.
fn adaptive_threshold(series: &[f64], window: usize) -> Vec<f64> {
    let n = series.len();
    let half = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            let qd = quartile_deviation(&series[lo..hi]);
            (QD_SCALE * qd).max(MIN_QD_THRESHOLD)
        })
        .collect()
}

fn quartile_deviation(window: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = window.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let q1 = percentile(&sorted, 0.25);
    let q3 = percentile(&sorted, 0.75);
    (q3 - q1) / 2.0
}

/// Linear-interpolation percentile (same convention as numpy's default).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = p * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

/// `s12`/`s22` subspace projections over the normalized dRR series.
///
/// Neighbor indices outside `[0, n)` are clamped to the nearest valid index
/// rather than padded with zero; the series is short-window local anyway,
/// so the edge beat itself is the best available stand-in.
fn subspace_projections(drrs: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let n = drrs.len();
    let at = |idx: isize| -> f64 { drrs[idx.clamp(0, n as isize - 1) as usize] };

    let s12: Vec<f64> = (0..n)
        .map(|i| {
            let prev = at(i as isize - 1);
            let next = at(i as isize + 1);
            if drrs[i] > 0.0 {
                prev.max(next)
            } else if drrs[i] < 0.0 {
                prev.min(next)
            } else {
                0.0
            }
        })
        .collect();

    let s22: Vec<f64> = (0..n)
        .map(|i| {
            let next1 = at(i as isize + 1);
            let next2 = at(i as isize + 2);
            if drrs[i] >= 0.0 {
                next1.min(next2)
            } else {
                next1.max(next2)
            }
        })
        .collect();

    (s12, s22)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_short_sequence_is_identity() {
        let rr = [600.0, 610.0, 590.0];
        let result = classify(&rr);
        assert_eq!(result.clean_series, rr.to_vec());
        for (r, beat) in result.results.iter().zip(rr) {
            assert_eq!(r.artifact_type, ArtifactType::None);
            assert_eq!(r.rr_clean, Some(beat));
        }
    }

    #[test]
    fn missed_beat_is_split_in_clean_series() {
        let rr = [605.0, 612.0, 1210.0, 598.0, 610.0];
        let result = classify(&rr);
        assert_eq!(result.results[2].artifact_type, ArtifactType::Missed);
        assert_eq!(result.results[2].rr_clean, Some(605.0));
        assert_eq!(
            result.clean_series,
            vec![605.0, 612.0, 605.0, 605.0, 598.0, 610.0]
        );
    }

    #[test]
    fn extra_beat_is_absorbed() {
        let rr = [600.0, 300.0, 300.0, 600.0, 600.0];
        let result = classify(&rr);
        assert_eq!(result.results[1].artifact_type, ArtifactType::Extra);
        assert_eq!(result.results[1].rr_clean, Some(600.0));
        assert_eq!(
            result.results[2].artifact_type,
            ArtifactType::ExtraAbsorbed
        );
        assert_eq!(result.results[2].rr_clean, None);
        assert_eq!(result.clean_series, vec![600.0, 600.0, 600.0, 600.0]);
    }

    #[test]
    fn ectopic_pair_is_averaged() {
        let rr = [605.0, 612.0, 380.0, 850.0, 598.0, 610.0];
        let result = classify(&rr);
        assert_eq!(result.results[2].artifact_type, ArtifactType::Ectopic);
        assert_eq!(result.results[3].artifact_type, ArtifactType::Ectopic);
        assert_eq!(result.results[2].rr_clean, Some(615.0));
        assert_eq!(result.results[3].rr_clean, Some(615.0));
    }

    #[test]
    fn smooth_ramp_has_no_false_positives() {
        let rr = [
            468.0, 608.0, 686.0, 834.0, 925.0, 944.0, 929.0, 897.0, 879.0,
        ];
        let result = classify(&rr);
        for r in &result.results {
            assert_eq!(r.artifact_type, ArtifactType::None);
        }
    }

    #[test]
    fn classifier_is_pure() {
        let rr = [605.0, 612.0, 1210.0, 598.0, 610.0, 600.0, 615.0];
        let a = classify(&rr);
        let b = classify(&rr);
        assert_eq!(a, b);
    }

    #[test]
    fn clean_series_length_matches_artifact_accounting() {
        let rr = [605.0, 612.0, 1210.0, 598.0, 610.0, 600.0, 300.0, 300.0];
        let result = classify(&rr);
        let missed = result
            .results
            .iter()
            .filter(|r| r.artifact_type == ArtifactType::Missed)
            .count();
        let other = result
            .results
            .iter()
            .filter(|r| {
                matches!(
                    r.artifact_type,
                    ArtifactType::None
                        | ArtifactType::Ectopic
                        | ArtifactType::Extra
                        | ArtifactType::Longshort
                )
            })
            .count();
        assert_eq!(result.clean_series.len(), other + 2 * missed);
    }
}
