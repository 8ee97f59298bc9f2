//! Numeric kernels
//!
//! Small statistical helpers shared by the indicator, weight, and validation
//! stages: moments, interpolated percentiles, weighted means, a dense ridge
//! solver for the weight model, and the F-distribution tail probability used
//! by the ANOVA test. All routines are deterministic and allocation-light.

/// Arithmetic mean; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance (divides by n, not n - 1), so a single sample has
/// variance 0 rather than an undefined estimate.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64
}

pub fn population_stddev(values: &[f64]) -> f64 {
    population_variance(values).sqrt()
}

/// Linearly interpolated percentile of a sorted slice, `p` in [0, 1].
/// Returns `None` for an empty slice. The input must already be sorted.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let idx = p * (sorted.len() - 1) as f64;
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    if lo == hi {
        return Some(sorted[lo]);
    }
    let frac = idx - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Percentile of an unsorted slice; sorts a copy.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, p)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 0.5)
}

/// Weighted mean. `None` when the weight sum is zero: the caller decides
/// what a zero-exposure aggregate means, this function never defaults.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    debug_assert_eq!(values.len(), weights.len());
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum == 0.0 {
        return None;
    }
    let total: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    Some(total / weight_sum)
}

/// Solve the ridge normal equations `(X'X + alpha I) beta = X'y` for a dense
/// column-major design matrix with `k` predictors. `x` holds `n * k` values,
/// row-major. Returns `None` when the system is singular even after
/// regularization (alpha = 0 on degenerate data).
pub fn ridge_solve(x: &[f64], y: &[f64], n: usize, k: usize, alpha: f64) -> Option<Vec<f64>> {
    debug_assert_eq!(x.len(), n * k);
    debug_assert_eq!(y.len(), n);

    // Build X'X + alpha I and X'y.
    let mut a = vec![0.0; k * k];
    let mut b = vec![0.0; k];
    for row in 0..n {
        for i in 0..k {
            let xi = x[row * k + i];
            b[i] += xi * y[row];
            for j in 0..k {
                a[i * k + j] += xi * x[row * k + j];
            }
        }
    }
    for i in 0..k {
        a[i * k + i] += alpha;
    }

    gaussian_solve(&mut a, &mut b, k)
}

/// In-place Gaussian elimination with partial pivoting on a k x k system.
fn gaussian_solve(a: &mut [f64], b: &mut [f64], k: usize) -> Option<Vec<f64>> {
    for col in 0..k {
        // Pivot selection.
        let mut pivot = col;
        for row in (col + 1)..k {
            if a[row * k + col].abs() > a[pivot * k + col].abs() {
                pivot = row;
            }
        }
        if a[pivot * k + col].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for j in 0..k {
                a.swap(col * k + j, pivot * k + j);
            }
            b.swap(col, pivot);
        }

        for row in (col + 1)..k {
            let factor = a[row * k + col] / a[col * k + col];
            for j in col..k {
                a[row * k + j] -= factor * a[col * k + j];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut solution = vec![0.0; k];
    for col in (0..k).rev() {
        let mut acc = b[col];
        for j in (col + 1)..k {
            acc -= a[col * k + j] * solution[j];
        }
        solution[col] = acc / a[col * k + col];
    }
    Some(solution)
}

/// Upper-tail probability of the F distribution: `P(F(d1, d2) > f)`.
pub fn f_survival(f: f64, d1: usize, d2: usize) -> f64 {
    if f <= 0.0 {
        return 1.0;
    }
    let d1 = d1 as f64;
    let d2 = d2 as f64;
    let x = d2 / (d2 + d1 * f);
    regularized_incomplete_beta(d2 / 2.0, d1 / 2.0, x)
}

/// Regularized incomplete beta function I_x(a, b), continued-fraction
/// evaluation (Lentz), switching tails for numerical stability.
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-30;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of ln(Gamma(x)).
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_5e-2,
        -0.539_523_938_495_3e-5,
    ];

    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000_000_000_190_015;
    for c in COEFFS {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * ser / x).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&values) - 5.0).abs() < 1e-12);
        assert!((population_variance(&values) - 4.0).abs() < 1e-12);
        assert!((population_stddev(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_sample_variance_is_zero() {
        assert_eq!(population_variance(&[42.0]), 0.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.0), Some(10.0));
        assert_eq!(percentile(&values, 1.0), Some(40.0));
        assert_eq!(percentile(&values, 0.5), Some(25.0));
        assert_eq!(median(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn test_weighted_mean_zero_weight_is_none() {
        assert_eq!(weighted_mean(&[1.0, 2.0], &[0.0, 0.0]), None);
        let wm = weighted_mean(&[80.0, 60.0, 40.0], &[100.0, 50.0, 50.0]).unwrap();
        assert!((wm - 65.0).abs() < 1e-12);
    }

    #[test]
    fn test_ridge_recovers_exact_linear_fit() {
        // y = 2*x1 + 3*x2 over a well-conditioned design, alpha = 0.
        let x = [
            1.0, 0.0, //
            0.0, 1.0, //
            1.0, 1.0, //
            2.0, 1.0, //
        ];
        let y = [2.0, 3.0, 5.0, 7.0];
        let beta = ridge_solve(&x, &y, 4, 2, 0.0).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-9);
        assert!((beta[1] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_ridge_shrinks_with_alpha() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [1.0, 2.0, 3.0, 4.0];
        let free = ridge_solve(&x, &y, 4, 1, 0.0).unwrap()[0];
        let shrunk = ridge_solve(&x, &y, 4, 1, 10.0).unwrap()[0];
        assert!((free - 1.0).abs() < 1e-9);
        assert!(shrunk < free);
        assert!(shrunk > 0.0);
    }

    #[test]
    fn test_singular_system_returns_none() {
        // Two identical columns, no regularization.
        let x = [1.0, 1.0, 2.0, 2.0, 3.0, 3.0];
        let y = [1.0, 2.0, 3.0];
        assert!(ridge_solve(&x, &y, 3, 2, 0.0).is_none());
        // Regularization restores solvability.
        assert!(ridge_solve(&x, &y, 3, 2, 0.1).is_some());
    }

    #[test]
    fn test_incomplete_beta_endpoints() {
        assert_eq!(regularized_incomplete_beta(2.0, 3.0, 0.0), 0.0);
        assert_eq!(regularized_incomplete_beta(2.0, 3.0, 1.0), 1.0);
        // I_x(1,1) is the uniform CDF.
        assert!((regularized_incomplete_beta(1.0, 1.0, 0.3) - 0.3).abs() < 1e-10);
        // Tail symmetry: I_x(a,b) = 1 - I_{1-x}(b,a).
        let lhs = regularized_incomplete_beta(2.5, 4.0, 0.35);
        let rhs = 1.0 - regularized_incomplete_beta(4.0, 2.5, 0.65);
        assert!((lhs - rhs).abs() < 1e-10);
    }

    #[test]
    fn test_f_survival_known_values() {
        // F(d, d) has median 1, so the upper tail at 1 is exactly 0.5.
        assert!((f_survival(1.0, 2, 2) - 0.5).abs() < 1e-9);
        assert!((f_survival(1.0, 10, 10) - 0.5).abs() < 1e-9);
        // Monotone decreasing in f.
        assert!(f_survival(0.5, 3, 12) > f_survival(2.0, 3, 12));
        assert!(f_survival(100.0, 3, 12) < 0.001);
        assert_eq!(f_survival(0.0, 3, 12), 1.0);
    }
}
