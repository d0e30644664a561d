//! Simulation drivers.
//!
//! A driver owns the containers of every zone, runs the outer iteration
//! loop and releases everything on post-processing. Which driver runs is
//! decided once by [`select_driver`].

pub mod fluid;
pub mod fsi;
pub mod general;
pub mod harmonic_balance;
pub mod selection;
pub mod zone;

use std::path::Path;
use std::time::Instant;

use tracing::{info, info_span, warn};

use crate::config::{Config, SolverKind};
use crate::error::DriverError;
use crate::geometry::mesh_io::MeshDocument;
use crate::geometry::Geometry;
use crate::numerics::Numerics;
use crate::output::zone_output;
use crate::solver::SolverContainer;
pub use fluid::FluidDriver;
pub use fsi::FsiDriver;
pub use general::GeneralDriver;
pub use harmonic_balance::HarmonicBalanceDriver;
pub use selection::{select_driver, DriverDescriptor, DriverKind};
pub use zone::{ContainerKind, Release, ZoneArena, ZoneSlot, RELEASE_ORDER};

pub trait Driver {
    /// Runs the outer loop until convergence or the iteration limit.
    fn start_solver(&mut self) -> Result<RunSummary, DriverError>;

    /// Flushes output and releases every container. Must run even when
    /// `start_solver` failed; calling it again does nothing.
    fn postprocessing(&mut self) -> Result<(), DriverError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub iterations: usize,
    pub residual: f64,
    pub converged: bool,
}

/// State shared by every driver variant.
#[derive(Debug)]
pub struct DriverCore {
    pub config: Config,
    pub zones: ZoneArena,
    pub n_dim: usize,
    name: &'static str,
}

impl DriverCore {
    pub(crate) fn new(name: &'static str, config: Config, n_dim: usize, slots: Vec<ZoneSlot>) -> Self {
        Self { config, zones: ZoneArena::new(slots), n_dim, name }
    }

    /// Outer loop. `iterate` advances every zone once and returns the
    /// residual the convergence test uses.
    pub(crate) fn run<F>(&mut self, mut iterate: F) -> Result<RunSummary, DriverError>
    where
        F: FnMut(&mut DriverCore) -> Result<f64, DriverError>,
    {
        let max_iterations = self.config.max_iterations;
        let tolerance = self.config.convergence_tolerance;
        let _run_span = info_span!("start_solver", driver = self.name, max_iterations).entered();
        info!("Starting {} driver with {} zones", self.name, self.zones.n_zone());
        let start_time = Instant::now();

        let mut summary = RunSummary { iterations: 0, residual: f64::INFINITY, converged: false };
        for iteration in 0..max_iterations {
            let _iter_span = info_span!("outer_iteration", iteration).entered();
            let iter_start = Instant::now();

            let residual = iterate(self)?;
            summary = RunSummary {
                iterations: iteration + 1,
                residual,
                converged: residual < tolerance,
            };
            let last = summary.converged || iteration + 1 == max_iterations;
            self.write_output(iteration, residual, last)?;
            info!(
                "Iteration {}: residual={:.3e}, elapsed={:.2}ms",
                iteration,
                residual,
                iter_start.elapsed().as_secs_f64() * 1e3
            );
            if summary.converged {
                break;
            }
        }

        if summary.converged {
            info!("Converged after {} iterations in {:.2}s", summary.iterations, start_time.elapsed().as_secs_f64());
        } else {
            warn!(
                residual = summary.residual,
                "Iteration limit reached after {:.2}s without convergence",
                start_time.elapsed().as_secs_f64()
            );
        }
        Ok(summary)
    }

    fn write_output(&mut self, iteration: usize, residual: f64, last: bool) -> Result<(), DriverError> {
        for zone in 0..self.zones.n_zone() {
            let state = self.zones.solver(zone)?.state(iteration, residual, last);
            self.zones.output_mut(zone)?.write(zone, &state)?;
        }
        Ok(())
    }

    /// Iterates one zone's solver on its own geometry and numerics.
    pub(crate) fn iterate_zone(&mut self, zone: usize) -> Result<f64, DriverError> {
        let parts = self.zones.parts_mut(zone)?;
        Ok(parts.solver.iterate(parts.geometry, parts.numerics)?)
    }

    pub(crate) fn postprocessing(&mut self) -> Result<(), DriverError> {
        let flushed = self.zones.flush_outputs();
        self.zones.release_all();
        flushed?;
        Ok(())
    }
}

/// Allocates solver, numerics and output for one zone.
pub(crate) fn preprocess_zone(
    zone: usize,
    kind: SolverKind,
    geometry: Geometry,
    config: &Config,
) -> Result<ZoneSlot, DriverError> {
    let failure = |reason: String| DriverError::PreprocessingFailure { zone, reason };
    let solver = SolverContainer::build(kind, &geometry, config).map_err(|e| failure(e.to_string()))?;
    let numerics = Numerics::new(kind, &geometry, config).map_err(|e| failure(e.to_string()))?;
    let output = zone_output(&config.output, &config.base_dir, zone, solver.name(), geometry.n_point())
        .map_err(|e| failure(e.to_string()))?;
    info!(
        zone,
        solver = solver.name(),
        n_point = geometry.n_point(),
        n_elem = geometry.n_elem(),
        "Zone preprocessed"
    );
    Ok(ZoneSlot::new(geometry, solver, numerics, output))
}

pub enum SimulationDriver {
    General(GeneralDriver),
    HarmonicBalance(HarmonicBalanceDriver),
    MultiZoneHarmonicBalance(HarmonicBalanceDriver),
    Fsi(FsiDriver),
    Fluid(FluidDriver),
}

impl SimulationDriver {
    /// Loads configuration and mesh, then preprocesses every zone.
    pub fn new<P: AsRef<Path>>(
        kind: DriverKind,
        config_path: P,
        n_zone: usize,
        n_dim: usize,
    ) -> Result<Self, DriverError> {
        let failure = |zone: usize, reason: String| DriverError::PreprocessingFailure { zone, reason };
        let config = Config::from_file(config_path).map_err(|e| failure(0, e.to_string()))?;
        let mesh = MeshDocument::load(&config, 0).map_err(|e| failure(0, e.to_string()))?;
        if mesh.n_zone() != n_zone || mesh.n_dim() != n_dim {
            return Err(failure(
                0,
                format!(
                    "mesh has {} zones in {}D, expected {n_zone} zones in {n_dim}D",
                    mesh.n_zone(),
                    mesh.n_dim()
                ),
            ));
        }
        let geometries = (0..n_zone)
            .map(|zone| mesh.zone_geometry(zone).map_err(|e| failure(zone, e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_parts(kind, config, geometries)
    }

    /// Builds the driver for already loaded zone geometries.
    pub fn from_parts(kind: DriverKind, config: Config, geometries: Vec<Geometry>) -> Result<Self, DriverError> {
        let start = Instant::now();
        if geometries.len() != kind.geometric_zones() {
            return Err(DriverError::PreprocessingFailure {
                zone: 0,
                reason: format!(
                    "{} driver needs {} zones, got {}",
                    kind.name(),
                    kind.geometric_zones(),
                    geometries.len()
                ),
            });
        }
        let n_dim = geometries.first().map(|g| g.n_dim).ok_or_else(|| DriverError::PreprocessingFailure {
            zone: 0,
            reason: "no zones to preprocess".to_string(),
        })?;
        if let Some(zone) = geometries.iter().position(|g| g.n_dim != n_dim) {
            return Err(DriverError::PreprocessingFailure {
                zone,
                reason: "zones have different dimensions".to_string(),
            });
        }

        let driver = match kind {
            DriverKind::General => SimulationDriver::General(GeneralDriver::new(config, geometries)?),
            DriverKind::HarmonicBalance { time_instances } => {
                SimulationDriver::HarmonicBalance(HarmonicBalanceDriver::new(config, geometries, time_instances)?)
            }
            DriverKind::MultiZoneHarmonicBalance { instances_per_zone, .. } => SimulationDriver::MultiZoneHarmonicBalance(
                HarmonicBalanceDriver::new(config, geometries, instances_per_zone)?,
            ),
            DriverKind::Fsi => SimulationDriver::Fsi(FsiDriver::new(config, geometries)?),
            DriverKind::Fluid { .. } => SimulationDriver::Fluid(FluidDriver::new(config, geometries)?),
        };
        info!(
            driver = kind.name(),
            n_zone = driver.zones().n_zone(),
            "Driver preprocessed in {:.2}ms",
            start.elapsed().as_secs_f64() * 1e3
        );
        Ok(driver)
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            SimulationDriver::General(_) => DriverKind::General,
            SimulationDriver::HarmonicBalance(d) => DriverKind::HarmonicBalance { time_instances: d.instances() },
            SimulationDriver::MultiZoneHarmonicBalance(d) => DriverKind::MultiZoneHarmonicBalance {
                geometric_zones: d.geometric_zones(),
                instances_per_zone: d.instances(),
            },
            SimulationDriver::Fsi(_) => DriverKind::Fsi,
            SimulationDriver::Fluid(d) => DriverKind::Fluid { n_zone: d.core.zones.n_zone() },
        }
    }

    pub fn core(&self) -> &DriverCore {
        match self {
            SimulationDriver::General(d) => &d.core,
            SimulationDriver::HarmonicBalance(d) | SimulationDriver::MultiZoneHarmonicBalance(d) => &d.core,
            SimulationDriver::Fsi(d) => &d.core,
            SimulationDriver::Fluid(d) => &d.core,
        }
    }

    pub fn zones(&self) -> &ZoneArena {
        &self.core().zones
    }
}

impl Driver for SimulationDriver {
    fn start_solver(&mut self) -> Result<RunSummary, DriverError> {
        match self {
            SimulationDriver::General(d) => d.start_solver(),
            SimulationDriver::HarmonicBalance(d) | SimulationDriver::MultiZoneHarmonicBalance(d) => d.start_solver(),
            SimulationDriver::Fsi(d) => d.start_solver(),
            SimulationDriver::Fluid(d) => d.start_solver(),
        }
    }

    fn postprocessing(&mut self) -> Result<(), DriverError> {
        match self {
            SimulationDriver::General(d) => d.postprocessing(),
            SimulationDriver::HarmonicBalance(d) | SimulationDriver::MultiZoneHarmonicBalance(d) => d.postprocessing(),
            SimulationDriver::Fsi(d) => d.postprocessing(),
            SimulationDriver::Fluid(d) => d.postprocessing(),
        }
    }
}
