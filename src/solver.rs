//! Per-zone solver containers.

pub mod diffusion;
pub mod structural;

use nalgebra::Vector3;

use crate::config::{Config, SolverKind};
use crate::error::SolverError;
use crate::geometry::Geometry;
use crate::numerics::Numerics;
use crate::output::ZoneState;
pub use diffusion::DiffusionSolver;
pub use structural::StructuralSolver;

#[derive(Debug, Clone, PartialEq)]
pub enum SolverContainer {
    Diffusion(DiffusionSolver),
    Structural(StructuralSolver),
}

impl SolverContainer {
    /// Allocates the solver that stands in for `kind`. Scalar kinds share the
    /// diffusion solver; structural kinds get the elasticity solver.
    pub fn build(kind: SolverKind, geometry: &Geometry, config: &Config) -> Result<Self, SolverError> {
        if kind.is_structural() {
            Ok(SolverContainer::Structural(StructuralSolver::new(geometry, config)?))
        } else {
            Ok(SolverContainer::Diffusion(DiffusionSolver::new(geometry, config)?))
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SolverContainer::Diffusion(_) => "diffusion",
            SolverContainer::Structural(_) => "structural",
        }
    }

    pub fn iterate(&mut self, geometry: &Geometry, numerics: &Numerics) -> Result<f64, SolverError> {
        match self {
            SolverContainer::Diffusion(solver) => solver.iterate(numerics),
            SolverContainer::Structural(solver) => solver.iterate(geometry, numerics),
        }
    }

    /// Scalar unknowns, or `None` for a structural zone.
    pub fn scalar_field(&self) -> Option<&[f64]> {
        match self {
            SolverContainer::Diffusion(solver) => Some(solver.field()),
            SolverContainer::Structural(_) => None,
        }
    }

    pub fn set_source(&mut self, source: Vec<f64>) -> Result<(), SolverError> {
        match self {
            SolverContainer::Diffusion(solver) => solver.set_source(source),
            SolverContainer::Structural(_) => Err(SolverError::Unsupported {
                solver: "structural",
                operation: "time-spectral source",
            }),
        }
    }

    pub fn as_structural_mut(&mut self) -> Result<&mut StructuralSolver, SolverError> {
        match self {
            SolverContainer::Structural(solver) => Ok(solver),
            SolverContainer::Diffusion(_) => Err(SolverError::Unsupported {
                solver: "diffusion",
                operation: "structural loads",
            }),
        }
    }

    pub fn state(&self, iteration: usize, residual: f64, last: bool) -> ZoneState {
        let (scalar, displacement) = match self {
            SolverContainer::Diffusion(solver) => (Some(solver.field().to_vec()), None),
            SolverContainer::Structural(solver) => (
                None,
                Some(solver.displacement().iter().map(|u: &Vector3<f64>| [u.x, u.y, u.z]).collect()),
            ),
        };
        ZoneState { iteration, residual, last, scalar, displacement }
    }
}
