//! Per-zone numerical operators.

pub mod elasticity;
pub mod harmonic_balance;

use tracing::debug;

use crate::config::{Config, SolverKind};
use crate::error::SolverError;
use crate::geometry::Geometry;
use elasticity::Material;

/// Edge of the point graph with its diffusion coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeCoefficient {
    pub a: usize,
    pub b: usize,
    pub weight: f64,
}

/// Numerics container of one zone: the edge stencil and dual volumes used by
/// scalar solvers, and the material used by structural solvers. Rebuilt
/// with [`Numerics::update`] whenever the zone's mesh moves.
#[derive(Debug, Clone, PartialEq)]
pub struct Numerics {
    pub kind: SolverKind,
    pub edges: Vec<EdgeCoefficient>,
    pub dual_volumes: Vec<f64>,
    pub material: Option<Material>,
}

impl Numerics {
    pub fn new(kind: SolverKind, geometry: &Geometry, config: &Config) -> Result<Self, SolverError> {
        let material = kind.is_structural().then(|| Material {
            youngs_modulus: config.structure.youngs_modulus,
            poisson_ratio: config.structure.poisson_ratio,
        });
        let mut numerics = Self { kind, edges: Vec::new(), dual_volumes: Vec::new(), material };
        numerics.update(geometry)?;
        Ok(numerics)
    }

    pub fn update(&mut self, geometry: &Geometry) -> Result<(), SolverError> {
        let mut edges = Vec::new();
        for (a, b) in geometry.edges() {
            let length = (geometry.points[b].coord - geometry.points[a].coord).norm();
            if length <= f64::EPSILON {
                return Err(SolverError::InvalidParameter(format!(
                    "edge ({a}, {b}) has zero length"
                )));
            }
            edges.push(EdgeCoefficient { a, b, weight: 1.0 / (length * length) });
        }

        let mut dual_volumes = vec![0.0; geometry.n_point()];
        for elem in &geometry.elements {
            let share = elem.kind.measure(&geometry.node_coords(&elem.nodes)).abs() / elem.nodes.len() as f64;
            for &n in &elem.nodes {
                dual_volumes[n] += share;
            }
        }

        debug!(kind = self.kind.name(), n_edge = edges.len(), "Numerics updated");
        self.edges = edges;
        self.dual_volumes = dual_volumes;
        Ok(())
    }
}
