//! Harmonic-balance time-derivative operator.
//!
//! A periodic solution sampled at `N` equally spaced time instances has its
//! time derivative at instance `n` given by `sum_m D[n][m] * u_m`.

use std::f64::consts::PI;

use nalgebra::DMatrix;

use crate::error::SolverError;

/// Spectral derivative operator for `n_instances` samples over `period`.
pub fn hb_operator(n_instances: usize, period: f64) -> Result<DMatrix<f64>, SolverError> {
    if n_instances == 0 {
        return Err(SolverError::InvalidParameter("at least one time instance is required".to_string()));
    }
    if !(period > 0.0) {
        return Err(SolverError::InvalidParameter("period must be positive".to_string()));
    }
    let n = n_instances;
    let omega = 2.0 * PI / period;
    let mut d = DMatrix::<f64>::zeros(n, n);
    for row in 0..n {
        for col in 0..n {
            if row == col {
                continue;
            }
            let k = row as i64 - col as i64;
            let sign = if k.rem_euclid(2) == 0 { 1.0 } else { -1.0 };
            let angle = PI * k as f64 / n as f64;
            d[(row, col)] = if n % 2 == 1 {
                0.5 * omega * sign / angle.sin()
            } else {
                0.5 * omega * sign / angle.tan()
            };
        }
    }
    Ok(d)
}

/// Applies the operator to per-instance fields of equal length.
pub fn time_derivative(operator: &DMatrix<f64>, fields: &[&[f64]]) -> Result<Vec<Vec<f64>>, SolverError> {
    let n = operator.nrows();
    if fields.len() != n {
        return Err(SolverError::LengthMismatch { expected: n, provided: fields.len() });
    }
    let len = fields.first().map_or(0, |f| f.len());
    if let Some(bad) = fields.iter().find(|f| f.len() != len) {
        return Err(SolverError::LengthMismatch { expected: len, provided: bad.len() });
    }
    let mut out = vec![vec![0.0; len]; n];
    for (row, target) in out.iter_mut().enumerate() {
        for (col, field) in fields.iter().enumerate() {
            let coeff = operator[(row, col)];
            if coeff == 0.0 {
                continue;
            }
            for (t, u) in target.iter_mut().zip(field.iter()) {
                *t += coeff * u;
            }
        }
    }
    Ok(out)
}
