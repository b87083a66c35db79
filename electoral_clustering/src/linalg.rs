// Small dense linear algebra helpers. Matrices are stored as vectors of rows;
// the decompositions go through nalgebra.

use log::debug;
use nalgebra::{DMatrix, DVector, SymmetricEigen};

pub(crate) type Matrix = Vec<Vec<f64>>;

// Eigenvalues at or below this value count as zero.
const ZERO_EIGENVALUE: f64 = 1e-12;

pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub(crate) fn distance(a: &[f64], b: &[f64]) -> f64 {
    squared_distance(a, b).sqrt()
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// The mean of a non-empty set of vectors of dimension `dim`.
pub(crate) fn mean_vector<'a, I>(vectors: I, dim: usize) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut acc = vec![0.0; dim];
    let mut count: usize = 0;
    for v in vectors {
        for (a, x) in acc.iter_mut().zip(v.iter()) {
            *a += x;
        }
        count += 1;
    }
    if count > 0 {
        for a in acc.iter_mut() {
            *a /= count as f64;
        }
    }
    acc
}

/// Sample covariance (normalized by n) of the given rows.
pub(crate) fn covariance(rows: &[&[f64]], dim: usize) -> Matrix {
    let mean = mean_vector(rows.iter().copied(), dim);
    let mut cov = vec![vec![0.0; dim]; dim];
    for r in rows.iter() {
        let centered: Vec<f64> = r.iter().zip(mean.iter()).map(|(x, m)| x - m).collect();
        for i in 0..dim {
            for j in i..dim {
                cov[i][j] += centered[i] * centered[j];
            }
        }
    }
    let n = rows.len().max(1) as f64;
    for i in 0..dim {
        for j in i..dim {
            cov[i][j] /= n;
            cov[j][i] = cov[i][j];
        }
    }
    cov
}

fn to_dmatrix(m: &Matrix) -> DMatrix<f64> {
    let n = m.len();
    DMatrix::from_fn(n, n, |i, j| m[i][j])
}

/// Dominant eigenpair of a symmetric positive semi-definite matrix.
///
/// Returns `None` for an empty or zero matrix, or if the decomposition does
/// not converge within `max_iterations` sweeps.
pub(crate) fn dominant_eigenpair(m: &Matrix, max_iterations: usize) -> Option<(f64, Vec<f64>)> {
    if m.is_empty() {
        return None;
    }
    let eigen = SymmetricEigen::try_new(to_dmatrix(m), f64::EPSILON, max_iterations)?;
    // The eigenvalues come unordered.
    let (idx, eigenvalue) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (idx, v)| match best {
            Some((_, bv)) if bv >= *v => best,
            _ => Some((idx, *v)),
        })?;
    debug!(
        "dominant_eigenpair: eigenvalues {:?}",
        eigen.eigenvalues.as_slice()
    );
    if eigenvalue <= ZERO_EIGENVALUE {
        return None;
    }
    let vector: Vec<f64> = eigen.eigenvectors.column(idx).iter().cloned().collect();
    Some((eigenvalue, vector))
}

/// Solves `a x = b` for a symmetric positive definite `a` (Cholesky).
/// Returns `None` if `a` is not positive definite.
pub(crate) fn cholesky_solve(a: &Matrix, b: &[f64]) -> Option<Vec<f64>> {
    let chol = to_dmatrix(a).cholesky()?;
    let x = chol.solve(&DVector::from_column_slice(b));
    if x.iter().all(|v| v.is_finite()) {
        Some(x.iter().cloned().collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eigenpair_of_diagonal_matrix() {
        let m = vec![vec![1.0, 0.0], vec![0.0, 3.0]];
        let (val, vec) = dominant_eigenpair(&m, 1000).unwrap();
        assert!((val - 3.0).abs() < 1e-9);
        assert!((vec[1].abs() - 1.0).abs() < 1e-9);
        assert!(vec[0].abs() < 1e-9);
    }

    #[test]
    fn eigenpair_of_zero_matrix() {
        let m = vec![vec![0.0, 0.0], vec![0.0, 0.0]];
        assert_eq!(dominant_eigenpair(&m, 10), None);
        assert_eq!(dominant_eigenpair(&vec![], 10), None);
    }

    #[test]
    fn eigenpair_of_block_correlations() {
        // Two uncorrelated groups: three features with r = 0.6 (eigenvalue
        // 2.2) and two with r = 0.9 (eigenvalue 1.9). The rows of the second
        // block have the largest norm.
        let mut m = vec![vec![0.0; 5]; 5];
        for i in 0..5 {
            for j in 0..5 {
                m[i][j] = match (i < 3, j < 3) {
                    _ if i == j => 1.0,
                    (true, true) => 0.6,
                    (false, false) => 0.9,
                    _ => 0.0,
                };
            }
        }
        let (val, vec) = dominant_eigenpair(&m, 1000).unwrap();
        assert!((val - 2.2).abs() < 1e-9);
        let expected = 1.0 / 3f64.sqrt();
        for x in vec[..3].iter() {
            assert!((x.abs() - expected).abs() < 1e-9);
        }
        assert!(vec[3].abs() < 1e-9);
        assert!(vec[4].abs() < 1e-9);
    }

    #[test]
    fn cholesky_solves_small_system() {
        let a = vec![vec![4.0, 2.0], vec![2.0, 3.0]];
        let x = cholesky_solve(&a, &[2.0, 1.0]).unwrap();
        assert!((4.0 * x[0] + 2.0 * x[1] - 2.0).abs() < 1e-12);
        assert!((2.0 * x[0] + 3.0 * x[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cholesky_rejects_indefinite() {
        let a = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        assert_eq!(cholesky_solve(&a, &[1.0, 1.0]), None);
    }
}
