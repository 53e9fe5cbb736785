//! Numeric building blocks for the dQ/dV pipeline: 1-D interpolation,
//! Savitzky-Golay and Gaussian smoothing, Simpson quadrature and a
//! least-squares fit error.

use ndarray::{s, Array1, Array2, ArrayView1};

use crate::config::InterpolationKind;
use crate::error::{CoreError, CoreResult};

/// `n` evenly spaced values from `start` to `end` inclusive.
///
/// The end points are exact; `start + step * i` alone can land an ulp past
/// `end`, outside the range an [`Interpolator`] built on the same bounds
/// accepts.
pub fn linspace(start: f64, end: f64, n: usize) -> Array1<f64> {
    let mut grid = Array1::linspace(start, end, n);
    if n >= 2 {
        grid[0] = start;
        grid[n - 1] = end;
    }
    grid
}

/// Successive differences, one shorter than the input.
pub fn diff(values: ArrayView1<f64>) -> Array1<f64> {
    values.windows(2).into_iter().map(|w| w[1] - w[0]).collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Standard error of the slope of the least-squares line through `(x, y)`.
///
/// `None` with fewer than three points or when every x is equal.
pub fn linregress_stderr(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Option<f64> {
    let n = x.len().min(y.len());
    if n < 3 {
        return None;
    }
    let x = x.slice(s![..n]);
    let y = y.slice(s![..n]);
    let x_mean = x.sum() / n as f64;
    let y_mean = y.sum() / n as f64;
    let (mut ssxm, mut ssym, mut ssxym) = (0.0, 0.0, 0.0);
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - x_mean;
        let dy = yi - y_mean;
        ssxm += dx * dx;
        ssym += dy * dy;
        ssxym += dx * dy;
    }
    if ssxm == 0.0 {
        return None;
    }
    let r_den = (ssxm * ssym).sqrt();
    let r = if r_den == 0.0 {
        0.0
    } else {
        (ssxym / r_den).clamp(-1.0, 1.0)
    };
    let df = (n - 2) as f64;
    Some(((1.0 - r * r) * ssym / ssxm / df).sqrt())
}

/// 1-D interpolant over scattered samples.
///
/// Samples are sorted by x; non-finite pairs are dropped and repeated x
/// values collapse to the mean of their y values. Evaluation outside the
/// sample range gives `None`.
#[derive(Clone, Debug)]
pub struct Interpolator {
    kind: InterpolationKind,
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at the knots, cubic only.
    curvature: Vec<f64>,
}

impl Interpolator {
    pub fn new(
        x: ArrayView1<f64>,
        y: ArrayView1<f64>,
        kind: InterpolationKind,
    ) -> CoreResult<Self> {
        if x.len() != y.len() {
            return Err(CoreError::InvalidParameter(format!(
                "interpolation needs equal lengths, got {} and {}",
                x.len(),
                y.len()
            )));
        }
        let mut pairs: Vec<(f64, f64)> = x
            .iter()
            .zip(y.iter())
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .map(|(&a, &b)| (a, b))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut xs: Vec<f64> = Vec::with_capacity(pairs.len());
        let mut ys: Vec<f64> = Vec::with_capacity(pairs.len());
        let mut run = 0usize;
        for (a, b) in pairs {
            match xs.last() {
                Some(&last) if last == a => {
                    run += 1;
                    let idx = ys.len() - 1;
                    ys[idx] += (b - ys[idx]) / run as f64;
                }
                _ => {
                    run = 1;
                    xs.push(a);
                    ys.push(b);
                }
            }
        }
        if xs.len() < 2 {
            return Err(CoreError::DegenerateCurve(
                "interpolation needs at least two distinct x values",
            ));
        }

        // Higher orders need enough knots; short curves fall back to linear.
        let kind = match kind {
            InterpolationKind::Quadratic | InterpolationKind::Cubic if xs.len() < 3 => {
                InterpolationKind::Linear
            }
            other => other,
        };
        let curvature = if kind == InterpolationKind::Cubic {
            natural_spline_curvature(&xs, &ys)
        } else {
            Vec::new()
        };
        Ok(Self {
            kind,
            x: xs,
            y: ys,
            curvature,
        })
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    pub fn eval(&self, t: f64) -> Option<f64> {
        let (lo, hi) = self.bounds();
        if !(t >= lo && t <= hi) {
            return None;
        }
        let n = self.x.len();
        let seg = self.x.partition_point(|&v| v <= t).saturating_sub(1).min(n - 2);
        let (x0, x1) = (self.x[seg], self.x[seg + 1]);
        let (y0, y1) = (self.y[seg], self.y[seg + 1]);
        let value = match self.kind {
            InterpolationKind::Linear | InterpolationKind::Slinear => {
                y0 + (y1 - y0) * (t - x0) / (x1 - x0)
            }
            InterpolationKind::Nearest => {
                if t <= 0.5 * (x0 + x1) {
                    y0
                } else {
                    y1
                }
            }
            InterpolationKind::Zero => {
                if t >= x1 {
                    y1
                } else {
                    y0
                }
            }
            InterpolationKind::Quadratic => {
                let j = seg.min(n - 3);
                lagrange3(&self.x[j..j + 3], &self.y[j..j + 3], t)
            }
            InterpolationKind::Cubic => {
                let h = x1 - x0;
                let a = x1 - t;
                let b = t - x0;
                let (m0, m1) = (self.curvature[seg], self.curvature[seg + 1]);
                m0 * a.powi(3) / (6.0 * h)
                    + m1 * b.powi(3) / (6.0 * h)
                    + (y0 / h - m0 * h / 6.0) * a
                    + (y1 / h - m1 * h / 6.0) * b
            }
        };
        Some(value)
    }

    /// Evaluate on every grid point, NaN outside the sample range.
    pub fn eval_grid(&self, grid: ArrayView1<f64>) -> Array1<f64> {
        grid.mapv(|t| self.eval(t).unwrap_or(f64::NAN))
    }
}

fn lagrange3(x: &[f64], y: &[f64], t: f64) -> f64 {
    let l0 = (t - x[1]) * (t - x[2]) / ((x[0] - x[1]) * (x[0] - x[2]));
    let l1 = (t - x[0]) * (t - x[2]) / ((x[1] - x[0]) * (x[1] - x[2]));
    let l2 = (t - x[0]) * (t - x[1]) / ((x[2] - x[0]) * (x[2] - x[1]));
    y[0] * l0 + y[1] * l1 + y[2] * l2
}

/// Knot second derivatives of the natural cubic spline (zero at both ends).
fn natural_spline_curvature(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut m = vec![0.0; n];
    if n < 3 {
        return m;
    }
    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    // Thomas algorithm on the interior knots.
    let size = n - 2;
    let mut diag = vec![0.0; size];
    let mut upper = vec![0.0; size];
    let mut rhs = vec![0.0; size];
    for k in 0..size {
        let i = k + 1;
        diag[k] = 2.0 * (h[i - 1] + h[i]);
        upper[k] = h[i];
        rhs[k] = 6.0 * ((y[i + 1] - y[i]) / h[i] - (y[i] - y[i - 1]) / h[i - 1]);
    }
    for k in 1..size {
        let lower = h[k];
        let w = lower / diag[k - 1];
        diag[k] -= w * upper[k - 1];
        rhs[k] -= w * rhs[k - 1];
    }
    m[size] = rhs[size - 1] / diag[size - 1];
    for k in (0..size - 1).rev() {
        m[k + 1] = (rhs[k] - upper[k] * m[k + 2]) / diag[k];
    }
    m
}

/// Savitzky-Golay window for `n` points: `n / min(divisor, n / 5)`, forced
/// odd, at least 3.
pub fn savgol_window(n: usize, divisor: f64) -> usize {
    let divisor = divisor.min(n as f64 / 5.0);
    let mut window = (n as f64 / divisor) as usize;
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    window.max(3)
}

/// Savitzky-Golay smoothing. Points within half a window of either end take
/// the value of a polynomial fitted to the first (last) full window.
///
/// The window is shrunk to fit the data (kept odd) and `order` is capped
/// below the window; inputs shorter than 3 points come back unchanged.
pub fn savgol_filter(y: ArrayView1<f64>, window: usize, order: usize) -> Array1<f64> {
    let n = y.len();
    let mut window = window.min(n);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    if window < 3 {
        return y.to_owned();
    }
    let order = order.min(window - 1);
    let half = window / 2;
    let positions: Vec<f64> = (0..window).map(|k| k as f64 - half as f64).collect();
    let Some(weights) = savgol_weights(&positions, order) else {
        return y.to_owned();
    };

    let mut out = y.to_owned();
    for i in half..n - half {
        out[i] = (0..window).map(|k| weights[k] * y[i + k - half]).sum();
    }
    if let Some(coeffs) = polyfit(&positions, y.slice(s![..window]), order) {
        for i in 0..half {
            out[i] = polyval(&coeffs, positions[i]);
        }
    }
    if let Some(coeffs) = polyfit(&positions, y.slice(s![n - window..]), order) {
        for i in 0..half {
            out[n - half + i] = polyval(&coeffs, positions[window - half + i]);
        }
    }
    out
}

/// Convolution weights that evaluate the local least-squares polynomial at
/// the window centre.
fn savgol_weights(positions: &[f64], order: usize) -> Option<Vec<f64>> {
    let gram = gram_matrix(positions, order);
    let mut unit = Array1::zeros(order + 1);
    unit[0] = 1.0;
    let z = solve(gram, unit)?;
    Some(positions.iter().map(|&x| polyval(&z, x)).collect())
}

fn gram_matrix(positions: &[f64], order: usize) -> Array2<f64> {
    Array2::from_shape_fn((order + 1, order + 1), |(i, j)| {
        positions.iter().map(|x| x.powi((i + j) as i32)).sum()
    })
}

fn polyfit(positions: &[f64], y: ArrayView1<f64>, order: usize) -> Option<Array1<f64>> {
    let gram = gram_matrix(positions, order);
    let rhs = Array1::from_shape_fn(order + 1, |p| {
        positions
            .iter()
            .zip(y.iter())
            .map(|(x, v)| x.powi(p as i32) * v)
            .sum()
    });
    solve(gram, rhs)
}

/// `coeffs[0] + coeffs[1] * x + ...`
fn polyval(coeffs: &Array1<f64>, x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]] == 0.0 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                let delta = factor * a[[col, k]];
                a[[row, k]] -= delta;
            }
            let delta = factor * b[col];
            b[row] -= delta;
        }
    }
    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}

/// Gaussian smoothing with reflected edges (`d c b a | a b c d | d c b a`).
/// The kernel reaches `truncate` standard deviations each side.
pub fn gaussian_filter1d(y: ArrayView1<f64>, sigma: f64, truncate: f64) -> Array1<f64> {
    let n = y.len();
    if n == 0 || !(sigma > 0.0) {
        return y.to_owned();
    }
    let radius = (truncate * sigma + 0.5) as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    Array1::from_shape_fn(n, |i| {
        kernel
            .iter()
            .enumerate()
            .map(|(j, w)| w * y[reflect_index(i as isize + j as isize - radius, n)])
            .sum::<f64>()
            / total
    })
}

fn reflect_index(i: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let k = i.rem_euclid(period);
    if k >= n as isize {
        (period - 1 - k) as usize
    } else {
        k as usize
    }
}

/// Composite Simpson integral of `y` over the (possibly uneven) abscissa `x`.
///
/// With an even number of points the result averages the two ways of
/// covering the odd interval with the trapezoid rule.
pub fn simpson(y: ArrayView1<f64>, x: ArrayView1<f64>) -> f64 {
    let n = y.len().min(x.len());
    match n {
        0 | 1 => 0.0,
        2 => trapezoid(&y, &x, 0),
        _ if n % 2 == 1 => simpson_pairs(&y, &x, 0, n),
        _ => {
            let first = simpson_pairs(&y, &x, 0, n - 1) + trapezoid(&y, &x, n - 2);
            let last = trapezoid(&y, &x, 0) + simpson_pairs(&y, &x, 1, n);
            0.5 * (first + last)
        }
    }
}

fn trapezoid(y: &ArrayView1<f64>, x: &ArrayView1<f64>, i: usize) -> f64 {
    0.5 * (x[i + 1] - x[i]) * (y[i] + y[i + 1])
}

/// Simpson over `[start, end)`, which must hold an odd number of points.
fn simpson_pairs(y: &ArrayView1<f64>, x: &ArrayView1<f64>, start: usize, end: usize) -> f64 {
    let mut total = 0.0;
    let mut i = start;
    while i + 2 < end {
        let h0 = x[i + 1] - x[i];
        let h1 = x[i + 2] - x[i + 1];
        if h0 == 0.0 || h1 == 0.0 {
            total += trapezoid(y, x, i) + trapezoid(y, x, i + 1);
        } else {
            let hsum = h0 + h1;
            let ratio = h0 / h1;
            total += hsum / 6.0
                * (y[i] * (2.0 - 1.0 / ratio)
                    + y[i + 1] * hsum * hsum / (h0 * h1)
                    + y[i + 2] * (2.0 - ratio));
        }
        i += 2;
    }
    total
}
