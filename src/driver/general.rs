use crate::config::Config;
use crate::error::DriverError;
use crate::geometry::Geometry;

use super::{preprocess_zone, Driver, DriverCore, RunSummary};

/// Single-zone driver for the structural, Poisson, wave and heat solvers.
#[derive(Debug)]
pub struct GeneralDriver {
    pub core: DriverCore,
}

impl GeneralDriver {
    pub fn new(config: Config, geometries: Vec<Geometry>) -> Result<Self, DriverError> {
        let [geometry]: [Geometry; 1] = geometries.try_into().map_err(|g: Vec<Geometry>| {
            DriverError::PreprocessingFailure {
                zone: 0,
                reason: format!("general driver runs one zone, got {}", g.len()),
            }
        })?;
        let n_dim = geometry.n_dim;
        let slot = preprocess_zone(0, config.solver, geometry, &config)?;
        Ok(Self { core: DriverCore::new("general", config, n_dim, vec![slot]) })
    }
}

impl Driver for GeneralDriver {
    fn start_solver(&mut self) -> Result<RunSummary, DriverError> {
        self.core.run(|core| core.iterate_zone(0))
    }

    fn postprocessing(&mut self) -> Result<(), DriverError> {
        self.core.postprocessing()
    }
}
