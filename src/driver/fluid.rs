use crate::config::Config;
use crate::error::DriverError;
use crate::geometry::Geometry;

use super::{preprocess_zone, Driver, DriverCore, RunSummary};

/// Multizone fluid driver. Every zone is iterated once per outer iteration
/// and the largest zone residual drives convergence.
#[derive(Debug)]
pub struct FluidDriver {
    pub core: DriverCore,
}

impl FluidDriver {
    pub fn new(config: Config, geometries: Vec<Geometry>) -> Result<Self, DriverError> {
        let n_dim = geometries.first().map_or(0, |g| g.n_dim);
        let slots = geometries
            .into_iter()
            .enumerate()
            .map(|(zone, geometry)| preprocess_zone(zone, config.solver, geometry, &config))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { core: DriverCore::new("fluid", config, n_dim, slots) })
    }
}

impl Driver for FluidDriver {
    fn start_solver(&mut self) -> Result<RunSummary, DriverError> {
        self.core.run(|core| {
            let mut residual: f64 = 0.0;
            for zone in 0..core.zones.n_zone() {
                residual = residual.max(core.iterate_zone(zone)?);
            }
            Ok(residual)
        })
    }

    fn postprocessing(&mut self) -> Result<(), DriverError> {
        self.core.postprocessing()
    }
}
