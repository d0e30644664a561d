//! Linear elasticity on unstructured meshes.
//!
//! Every element is split into simplices with linear shape functions. The
//! assembled stiffness is solved with a sparse LU factorisation. Dirichlet
//! rows are replaced by identity rows and their columns moved to the
//! right-hand side.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, Vector3};
use rsparse::data::{Sprs, Trpl};
use rsparse::lusol;
use tracing::debug;

use crate::error::SolverError;
use crate::geometry::element::simplex_measure;
use crate::geometry::Geometry;

/// Young's modulus assigned to each element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementModulus {
    Uniform(f64),
    /// `E = 1 / volume` of the whole element.
    InverseVolume,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
}

/// Isotropic constitutive matrix in Voigt notation (plane strain in 2D).
pub fn constitutive_matrix(n_dim: usize, youngs_modulus: f64, poisson_ratio: f64) -> DMatrix<f64> {
    let e = youngs_modulus;
    let nu = poisson_ratio;
    let lambda = e * nu / ((1.0 + nu) * (1.0 - 2.0 * nu));
    let mu = e / (2.0 * (1.0 + nu));
    if n_dim == 2 {
        DMatrix::from_row_slice(3, 3, &[
            lambda + 2.0 * mu, lambda, 0.0,
            lambda, lambda + 2.0 * mu, 0.0,
            0.0, 0.0, mu,
        ])
    } else {
        let mut d = DMatrix::<f64>::zeros(6, 6);
        for i in 0..3 {
            for j in 0..3 {
                d[(i, j)] = lambda;
            }
            d[(i, i)] = lambda + 2.0 * mu;
            d[(i + 3, i + 3)] = mu;
        }
        d
    }
}

/// Stiffness of one linear simplex, ordered `[node0.x, node0.y, (node0.z), node1.x, ...]`.
pub fn simplex_stiffness(n_dim: usize, x: &[Vector3<f64>], d: &DMatrix<f64>) -> Result<DMatrix<f64>, SolverError> {
    let n_node = n_dim + 1;
    if x.len() != n_node {
        return Err(SolverError::LengthMismatch { expected: n_node, provided: x.len() });
    }
    let mut jac = DMatrix::<f64>::zeros(n_dim, n_dim);
    for col in 0..n_dim {
        let edge = x[col + 1] - x[0];
        for row in 0..n_dim {
            jac[(row, col)] = edge[row];
        }
    }
    let volume = simplex_measure(x).abs();
    let inv = jac
        .try_inverse()
        .ok_or_else(|| SolverError::InvalidParameter("degenerate simplex in stiffness assembly".to_string()))?;

    // Gradients of the barycentric shape functions.
    let mut grads = vec![Vector3::zeros(); n_node];
    for node in 1..n_node {
        for k in 0..n_dim {
            grads[node][k] = inv[(node - 1, k)];
        }
        let g = grads[node];
        grads[0] -= g;
    }

    let n_strain = if n_dim == 2 { 3 } else { 6 };
    let mut b = DMatrix::<f64>::zeros(n_strain, n_node * n_dim);
    for (node, g) in grads.iter().enumerate() {
        let c = node * n_dim;
        if n_dim == 2 {
            b[(0, c)] = g.x;
            b[(1, c + 1)] = g.y;
            b[(2, c)] = g.y;
            b[(2, c + 1)] = g.x;
        } else {
            b[(0, c)] = g.x;
            b[(1, c + 1)] = g.y;
            b[(2, c + 2)] = g.z;
            b[(3, c)] = g.y;
            b[(3, c + 1)] = g.x;
            b[(4, c + 1)] = g.z;
            b[(4, c + 2)] = g.y;
            b[(5, c)] = g.z;
            b[(5, c + 2)] = g.x;
        }
    }
    Ok(b.transpose() * d * b * volume)
}

fn assemble(
    geometry: &Geometry,
    coords: &[Vector3<f64>],
    modulus: ElementModulus,
    poisson_ratio: f64,
) -> Result<BTreeMap<(usize, usize), f64>, SolverError> {
    let n_dim = geometry.n_dim;
    let unit = constitutive_matrix(n_dim, 1.0, poisson_ratio);
    let mut entries = BTreeMap::new();
    for elem in &geometry.elements {
        let x: Vec<_> = elem.nodes.iter().map(|&n| coords[n]).collect();
        let e = match modulus {
            ElementModulus::Uniform(e) => e,
            ElementModulus::InverseVolume => {
                let volume = elem.kind.measure(&x).abs();
                if volume <= f64::EPSILON {
                    return Err(SolverError::InvalidParameter("element with zero volume".to_string()));
                }
                1.0 / volume
            }
        };
        let d = &unit * e;
        for simplex in elem.kind.simplices() {
            let sx: Vec<_> = simplex.iter().map(|&k| x[k]).collect();
            let ke = simplex_stiffness(n_dim, &sx, &d)?;
            for (a, &la) in simplex.iter().enumerate() {
                for (b, &lb) in simplex.iter().enumerate() {
                    for i in 0..n_dim {
                        for j in 0..n_dim {
                            let row = elem.nodes[la] * n_dim + i;
                            let col = elem.nodes[lb] * n_dim + j;
                            *entries.entry((row, col)).or_insert(0.0) += ke[(a * n_dim + i, b * n_dim + j)];
                        }
                    }
                }
            }
        }
    }
    Ok(entries)
}

/// Solves `K u = f` with `u` prescribed at `fixed` points. `loads` is either
/// empty (no body or surface forces) or one force per point. Points that no
/// element touches keep a zero displacement.
pub fn solve_displacement(
    geometry: &Geometry,
    coords: &[Vector3<f64>],
    modulus: ElementModulus,
    poisson_ratio: f64,
    loads: &[Vector3<f64>],
    fixed: &BTreeMap<usize, Vector3<f64>>,
) -> Result<Vec<Vector3<f64>>, SolverError> {
    let n_dim = geometry.n_dim;
    let n_point = geometry.n_point();
    if coords.len() != n_point {
        return Err(SolverError::LengthMismatch { expected: n_point, provided: coords.len() });
    }
    if !loads.is_empty() && loads.len() != n_point {
        return Err(SolverError::LengthMismatch { expected: n_point, provided: loads.len() });
    }
    let n = n_point * n_dim;
    if n == 0 {
        return Ok(Vec::new());
    }

    let entries = assemble(geometry, coords, modulus, poisson_ratio)?;

    let mut prescribed: Vec<Option<f64>> = vec![None; n];
    for (&point, value) in fixed {
        for k in 0..n_dim {
            prescribed[point * n_dim + k] = Some(value[k]);
        }
    }
    let mut has_diagonal = vec![false; n];
    for (&(row, col), &value) in &entries {
        if row == col && value != 0.0 {
            has_diagonal[row] = true;
        }
    }
    for dof in 0..n {
        if !has_diagonal[dof] && prescribed[dof].is_none() {
            prescribed[dof] = Some(0.0);
        }
    }

    let mut f: Vec<f64> = vec![0.0; n];
    if !loads.is_empty() {
        for (point, load) in loads.iter().enumerate() {
            for k in 0..n_dim {
                f[point * n_dim + k] = load[k];
            }
        }
    }

    let mut trpl_mat = Trpl::<f64> {
        m: n,
        n,
        p: Vec::with_capacity(entries.len()),
        i: Vec::with_capacity(entries.len()),
        x: Vec::with_capacity(entries.len()),
    };
    let mut push = |row: usize, col: usize, value: f64| {
        trpl_mat.i.push(row);
        trpl_mat.p.push(col as isize);
        trpl_mat.x.push(value);
    };
    for (&(row, col), &value) in &entries {
        if prescribed[row].is_some() {
            continue;
        }
        match prescribed[col] {
            Some(u) => f[row] -= value * u,
            None => push(row, col, value),
        }
    }
    for (dof, value) in prescribed.iter().enumerate() {
        if let Some(u) = value {
            push(dof, dof, 1.0);
            f[dof] = *u;
        }
    }

    let mut sprs_mat = Sprs::<f64>::new();
    sprs_mat.from_trpl(&trpl_mat);
    if sprs_mat.m != n || sprs_mat.n != n {
        return Err(SolverError::LinearSolve("sparse matrix conversion failed (dimension mismatch)".to_string()));
    }

    lusol(&sprs_mat, &mut f, 1, 1e-10)
        .map_err(|e| SolverError::LinearSolve(format!("sparse LU solver failed: {e}")))?;
    if f.iter().any(|v| !v.is_finite()) {
        return Err(SolverError::LinearSolve("solution contains NaN or Inf values".to_string()));
    }
    debug!(n_dof = n, n_fixed = fixed.len(), "Elasticity system solved");

    Ok((0..n_point)
        .map(|p| {
            let mut u = Vector3::zeros();
            for k in 0..n_dim {
                u[k] = f[p * n_dim + k];
            }
            u
        })
        .collect())
}
