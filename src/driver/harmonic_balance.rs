use nalgebra::DMatrix;
use tracing::debug;

use crate::config::Config;
use crate::error::{DriverError, SolverError};
use crate::geometry::Geometry;
use crate::numerics::harmonic_balance::{hb_operator, time_derivative};

use super::{preprocess_zone, Driver, DriverCore, RunSummary};

/// Harmonic-balance driver for one or more geometric zones.
///
/// Every geometric zone is replicated once per time instance, so zone
/// `g * instances + k` holds instance `k` of geometric zone `g`. Instances of
/// the same geometric zone are coupled through the spectral time derivative,
/// which enters each instance's solver as a source term.
#[derive(Debug)]
pub struct HarmonicBalanceDriver {
    pub core: DriverCore,
    geometric_zones: usize,
    instances: usize,
    operator: DMatrix<f64>,
}

impl HarmonicBalanceDriver {
    pub fn new(config: Config, geometries: Vec<Geometry>, instances: usize) -> Result<Self, DriverError> {
        let operator = hb_operator(instances, config.hb_period)
            .map_err(|e| DriverError::PreprocessingFailure { zone: 0, reason: e.to_string() })?;
        let geometric_zones = geometries.len();
        let n_dim = geometries.first().map_or(0, |g| g.n_dim);

        let mut slots = Vec::with_capacity(geometric_zones * instances);
        for (g, geometry) in geometries.into_iter().enumerate() {
            for k in 0..instances {
                let zone = g * instances + k;
                slots.push(preprocess_zone(zone, config.solver, geometry.clone(), &config)?);
            }
        }
        let name = if geometric_zones > 1 { "multizone_harmonic_balance" } else { "harmonic_balance" };
        Ok(Self {
            core: DriverCore::new(name, config, n_dim, slots),
            geometric_zones,
            instances,
            operator,
        })
    }

    pub fn instances(&self) -> usize {
        self.instances
    }

    pub fn geometric_zones(&self) -> usize {
        self.geometric_zones
    }

    /// Zone index of time instance `instance` of geometric zone `zone`.
    pub fn instance_zone(&self, zone: usize, instance: usize) -> Result<usize, DriverError> {
        if zone >= self.geometric_zones {
            return Err(DriverError::InvalidIndex { what: "zone", index: zone, count: self.geometric_zones });
        }
        if instance >= self.instances {
            return Err(DriverError::InvalidIndex { what: "time instance", index: instance, count: self.instances });
        }
        Ok(zone * self.instances + instance)
    }
}

/// Sets the spectral time derivative of every instance of one geometric
/// zone as that instance's source term.
fn update_sources(core: &mut DriverCore, operator: &DMatrix<f64>, first: usize, instances: usize) -> Result<(), DriverError> {
    let mut fields = Vec::with_capacity(instances);
    for zone in first..first + instances {
        let field = core.zones.solver(zone)?.scalar_field().ok_or(SolverError::Unsupported {
            solver: "structural",
            operation: "harmonic balance",
        })?;
        fields.push(field.to_vec());
    }
    let views: Vec<&[f64]> = fields.iter().map(Vec::as_slice).collect();
    let sources = time_derivative(operator, &views)?;
    for (zone, source) in (first..).zip(sources) {
        core.zones.solver_mut(zone)?.set_source(source)?;
    }
    Ok(())
}

impl Driver for HarmonicBalanceDriver {
    fn start_solver(&mut self) -> Result<RunSummary, DriverError> {
        let Self { core, geometric_zones, instances, operator } = self;
        let (geometric_zones, instances) = (*geometric_zones, *instances);
        let operator: &DMatrix<f64> = operator;
        core.run(|core| {
            let mut residual: f64 = 0.0;
            for g in 0..geometric_zones {
                let first = g * instances;
                update_sources(core, operator, first, instances)?;
                for zone in first..first + instances {
                    residual = residual.max(core.iterate_zone(zone)?);
                }
                debug!(zone = g, residual, "Time instances advanced");
            }
            Ok(residual)
        })
    }

    fn postprocessing(&mut self) -> Result<(), DriverError> {
        self.core.postprocessing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SolverKind, UnsteadyMode};
    use crate::driver::{select_driver, DriverDescriptor, DriverKind, SimulationDriver};
    use crate::geometry::structured::{rectangle, CellSize2D, GridDimensions2D};

    fn hb_config(instances: usize) -> Config {
        let mut config = Config::default();
        config.solver = SolverKind::Euler;
        config.unsteady_mode = UnsteadyMode::HarmonicBalance;
        config.time_instances = instances;
        config.hb_period = 2.0;
        config.max_iterations = 2000;
        config.convergence_tolerance = 1e-10;
        config.markers.dirichlet.insert("left".to_string(), 0.0);
        config.markers.dirichlet.insert("right".to_string(), 1.0);
        config
    }

    fn strip() -> Geometry {
        rectangle(GridDimensions2D(4, 1), CellSize2D(0.25, 0.25)).unwrap()
    }

    #[test]
    fn test_single_zone_instances_converge_to_steady_field() {
        let config = hb_config(3);
        let kind = select_driver(&DriverDescriptor::from_config(&config, 1)).unwrap();
        assert_eq!(kind, DriverKind::HarmonicBalance { time_instances: 3 });

        let mut driver = SimulationDriver::from_parts(kind, config, vec![strip()]).unwrap();
        assert_eq!(driver.zones().n_zone(), 3);
        assert_eq!(driver.kind(), kind);

        let summary = driver.start_solver().unwrap();
        assert!(summary.converged);
        let reference = driver.zones().solver(0).unwrap().scalar_field().unwrap().to_vec();
        for zone in 1..3 {
            let field = driver.zones().solver(zone).unwrap().scalar_field().unwrap();
            for (a, b) in field.iter().zip(&reference) {
                assert!((a - b).abs() < 1e-8);
            }
        }
        driver.postprocessing().unwrap();
        assert!(driver.zones().is_released());
    }

    #[test]
    fn test_multizone_layout() {
        let config = hb_config(2);
        let kind = select_driver(&DriverDescriptor::from_config(&config, 3)).unwrap();
        assert_eq!(kind.total_instances(), 6);
        let driver = HarmonicBalanceDriver::new(config, vec![strip(), strip(), strip()], 2).unwrap();
        assert_eq!(driver.core.zones.n_zone(), 6);
        assert_eq!(driver.geometric_zones(), 3);
        assert_eq!(driver.instance_zone(2, 1).unwrap(), 5);
        assert!(matches!(
            driver.instance_zone(0, 2),
            Err(DriverError::InvalidIndex { what: "time instance", .. })
        ));
    }

    #[test]
    fn test_zero_instances_fail_preprocessing() {
        let err = HarmonicBalanceDriver::new(hb_config(0), vec![strip()], 0).unwrap_err();
        assert!(matches!(err, DriverError::PreprocessingFailure { zone: 0, .. }));
    }
}
