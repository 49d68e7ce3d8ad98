//! Chromaticity matching for basis-driven color fixtures.
//!
//! Given the XYZ basis vector of each color channel and a target
//! chromaticity (x, y), find channel levels `c ∈ [0, 1]^n` that hit the
//! target chromaticity while maximizing total output `Σ cᵢ`. This is the
//! two-constraint linear program
//!
//! ```text
//!   maximize   Σ cᵢ
//!   subject to Σ cᵢ (Xᵢ − x·Sᵢ) = 0
//!              Σ cᵢ (Yᵢ − y·Sᵢ) = 0      (Sᵢ = Xᵢ + Yᵢ + Zᵢ)
//!              0 ≤ cᵢ ≤ 1
//! ```
//!
//! With two equality constraints every optimal vertex has at most two
//! channels strictly between their bounds, so for fixture-sized channel
//! counts the optimum is found exactly by enumerating vertices instead of
//! running a general simplex. The zero vector is always feasible (the
//! constraints are homogeneous); when it is the *only* feasible point the
//! target sits outside the fixture's gamut and the solver walks the target
//! toward the basis centroid until a lit solution appears.

use tracing::{debug, warn};

const EPS: f64 = 1e-9;

/// Result of a chromaticity match.
#[derive(Debug, Clone)]
pub struct ChromaSolution {
    /// Channel levels in the same order as the input basis.
    pub channels: Vec<f64>,
    /// False when the target chromaticity had to be pulled into gamut.
    pub in_gamut: bool,
}

/// Constraint row coefficients for a target chromaticity.
fn rows(basis: &[[f64; 3]], x: f64, y: f64) -> (Vec<f64>, Vec<f64>) {
    let a = basis
        .iter()
        .map(|bv| bv[0] - x * (bv[0] + bv[1] + bv[2]))
        .collect();
    let b = basis
        .iter()
        .map(|bv| bv[1] - y * (bv[1] + bv[0] + bv[2]))
        .collect();
    (a, b)
}

/// Best vertex of the constrained box, if any channel can be lit.
/// Returns the channel vector and its objective value.
#[allow(clippy::indexing_slicing)] // indices range over 0..n by construction
fn best_vertex(a: &[f64], b: &[f64]) -> Option<(Vec<f64>, f64)> {
    let n = a.len();
    let mut best: Option<(Vec<f64>, f64)> = None;

    let mut consider = |c: Vec<f64>, obj: f64| {
        if obj > best.as_ref().map_or(EPS, |(_, o)| *o) {
            best = Some((c, obj));
        }
    };

    if n == 1 {
        if a[0].abs() < EPS && b[0].abs() < EPS {
            consider(vec![1.0], 1.0);
        }
        return best;
    }

    // Two free channels (i, j); every other channel pinned at 0 or 1.
    for i in 0..n - 1 {
        for j in i + 1..n {
            let fixed: Vec<usize> = (0..n).filter(|&k| k != i && k != j).collect();
            for mask in 0u32..(1 << fixed.len()) {
                let mut c = vec![0.0; n];
                let mut rhs_a = 0.0;
                let mut rhs_b = 0.0;
                for (bit, &k) in fixed.iter().enumerate() {
                    if mask & (1 << bit) != 0 {
                        c[k] = 1.0;
                        rhs_a -= a[k];
                        rhs_b -= b[k];
                    }
                }

                let det = a[i] * b[j] - a[j] * b[i];
                if det.abs() < EPS {
                    continue;
                }
                let ci = (rhs_a * b[j] - a[j] * rhs_b) / det;
                let cj = (a[i] * rhs_b - rhs_a * b[i]) / det;
                if !(-EPS..=1.0 + EPS).contains(&ci) || !(-EPS..=1.0 + EPS).contains(&cj) {
                    continue;
                }
                c[i] = ci.clamp(0.0, 1.0);
                c[j] = cj.clamp(0.0, 1.0);
                let obj = c.iter().sum();
                consider(c, obj);
            }
        }
    }

    best
}

/// Chromaticity of the basis centroid (everything lit equally).
fn centroid_xy(basis: &[[f64; 3]]) -> (f64, f64) {
    let mut sum = [0.0; 3];
    for bv in basis {
        sum[0] += bv[0];
        sum[1] += bv[1];
        sum[2] += bv[2];
    }
    let s = sum[0] + sum[1] + sum[2];
    if s.abs() < EPS {
        return (0.3333, 0.3333);
    }
    (sum[0] / s, sum[1] / s)
}

/// Match a target chromaticity with non-negative channel levels.
///
/// Out-of-gamut targets return the closest achievable point along the line
/// from the target to the basis centroid, with `in_gamut` set to false.
pub fn match_chroma(basis: &[[f64; 3]], x: f64, y: f64) -> ChromaSolution {
    if basis.is_empty() {
        return ChromaSolution {
            channels: Vec::new(),
            in_gamut: false,
        };
    }
    if basis.len() > 12 {
        // Vertex count explodes; no real fixture has this many emitters.
        warn!("chromaticity match over {} channels refused", basis.len());
        return ChromaSolution {
            channels: vec![0.0; basis.len()],
            in_gamut: false,
        };
    }

    let (a, b) = rows(basis, x, y);
    if let Some((channels, _)) = best_vertex(&a, &b) {
        debug!("optimal color match found");
        return ChromaSolution {
            channels,
            in_gamut: true,
        };
    }

    // Out of gamut: bisect along the segment from the target to the
    // centroid for the nearest chromaticity the fixture can produce.
    let (cx, cy) = centroid_xy(basis);
    let mut lo = 0.0_f64; // toward target: infeasible
    let mut hi = 1.0_f64; // centroid: feasible
    let mut fallback: Option<Vec<f64>> = None;
    for _ in 0..24 {
        let mid = 0.5 * (lo + hi);
        let (ma, mb) = rows(basis, x + (cx - x) * mid, y + (cy - y) * mid);
        if let Some((c, _)) = best_vertex(&ma, &mb) {
            fallback = Some(c);
            hi = mid;
        } else {
            lo = mid;
        }
    }

    let channels = match fallback {
        Some(c) => c,
        None => {
            // Even the centroid failed (degenerate basis); light everything.
            vec![1.0; basis.len()]
        }
    };
    ChromaSolution {
        channels,
        in_gamut: false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::model::colorspace::{rgb_to_xyz, RgbColorSpace};

    /// RGB emitter basis from the sRGB primaries.
    fn srgb_basis() -> Vec<[f64; 3]> {
        vec![
            rgb_to_xyz(1.0, 0.0, 0.0, RgbColorSpace::SrgbLinear),
            rgb_to_xyz(0.0, 1.0, 0.0, RgbColorSpace::SrgbLinear),
            rgb_to_xyz(0.0, 0.0, 1.0, RgbColorSpace::SrgbLinear),
        ]
    }

    fn xy_of(basis: &[[f64; 3]], c: &[f64]) -> (f64, f64) {
        let mut sum = [0.0; 3];
        for (bv, ci) in basis.iter().zip(c) {
            sum[0] += bv[0] * ci;
            sum[1] += bv[1] * ci;
            sum[2] += bv[2] * ci;
        }
        let s = sum[0] + sum[1] + sum[2];
        (sum[0] / s, sum[1] / s)
    }

    #[test]
    fn in_gamut_target_is_hit_exactly() {
        let basis = srgb_basis();
        // Chromaticity of an arbitrary in-gamut mix.
        let (tx, ty) = xy_of(&basis, &[0.6, 0.3, 0.1]);
        let sol = match_chroma(&basis, tx, ty);
        assert!(sol.in_gamut);
        let (gx, gy) = xy_of(&basis, &sol.channels);
        assert!((gx - tx).abs() < 1e-6);
        assert!((gy - ty).abs() < 1e-6);
        // Maximizing the objective should push at least one channel to 1.
        assert!(sol.channels.iter().any(|&c| c > 0.999));
    }

    #[test]
    fn primary_target_lights_only_that_channel() {
        let basis = srgb_basis();
        let red = basis[0];
        let s = red[0] + red[1] + red[2];
        let sol = match_chroma(&basis, red[0] / s, red[1] / s);
        assert!(sol.in_gamut);
        assert!(sol.channels[0] > 0.999);
        assert!(sol.channels[1] < 1e-6);
        assert!(sol.channels[2] < 1e-6);
    }

    #[test]
    fn out_of_gamut_clamps_and_flags() {
        let basis = srgb_basis();
        // Spectral locus corner far outside the sRGB triangle.
        let sol = match_chroma(&basis, 0.73, 0.26);
        assert!(!sol.in_gamut);
        assert!(sol.channels.iter().sum::<f64>() > EPS);
    }

    #[test]
    fn empty_basis_returns_empty() {
        let sol = match_chroma(&[], 0.3, 0.3);
        assert!(sol.channels.is_empty());
        assert!(!sol.in_gamut);
    }
}
