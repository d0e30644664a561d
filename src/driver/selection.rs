use crate::config::{Config, SolverKind, UnsteadyMode};
use crate::error::DriverError;

/// Everything driver selection depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverDescriptor {
    pub solver: SolverKind,
    pub unsteady_mode: UnsteadyMode,
    pub n_zone: usize,
    /// Harmonic-balance instances per geometric zone.
    pub time_instances: usize,
    pub fsi: bool,
}

impl DriverDescriptor {
    pub fn from_config(config: &Config, n_zone: usize) -> Self {
        Self {
            solver: config.solver,
            unsteady_mode: config.unsteady_mode,
            n_zone,
            time_instances: config.time_instances,
            fsi: config.fsi_simulation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    General,
    HarmonicBalance { time_instances: usize },
    MultiZoneHarmonicBalance { geometric_zones: usize, instances_per_zone: usize },
    Fsi,
    Fluid { n_zone: usize },
}

impl DriverKind {
    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::General => "general",
            DriverKind::HarmonicBalance { .. } => "harmonic_balance",
            DriverKind::MultiZoneHarmonicBalance { .. } => "multizone_harmonic_balance",
            DriverKind::Fsi => "fsi",
            DriverKind::Fluid { .. } => "fluid",
        }
    }

    /// Number of geometric zones the driver expects from the mesh.
    pub fn geometric_zones(&self) -> usize {
        match *self {
            DriverKind::General | DriverKind::HarmonicBalance { .. } => 1,
            DriverKind::MultiZoneHarmonicBalance { geometric_zones, .. } => geometric_zones,
            DriverKind::Fsi => 2,
            DriverKind::Fluid { n_zone } => n_zone,
        }
    }

    /// Number of zone containers the driver allocates. Harmonic-balance
    /// drivers hold one per time instance.
    pub fn total_instances(&self) -> usize {
        match *self {
            DriverKind::General => 1,
            DriverKind::HarmonicBalance { time_instances } => time_instances,
            DriverKind::MultiZoneHarmonicBalance { geometric_zones, instances_per_zone } => {
                geometric_zones * instances_per_zone
            }
            DriverKind::Fsi => 2,
            DriverKind::Fluid { n_zone } => n_zone,
        }
    }
}

fn unsupported(reason: impl Into<String>) -> DriverError {
    DriverError::UnsupportedConfiguration(reason.into())
}

/// Picks the driver for a descriptor. Rules are tried in priority order and
/// the first match wins; combinations a higher rule would shadow are
/// rejected instead of re-routed.
pub fn select_driver(descriptor: &DriverDescriptor) -> Result<DriverKind, DriverError> {
    let DriverDescriptor { solver, unsteady_mode, n_zone, time_instances, fsi } = *descriptor;
    if n_zone == 0 {
        return Err(unsupported("mesh has no zones"));
    }

    if solver.is_single_zone_only() {
        if n_zone > 1 {
            return Err(unsupported(format!(
                "{} solver supports a single zone, mesh has {n_zone}",
                solver.name()
            )));
        }
        if fsi {
            return Err(unsupported(format!("{} solver cannot run an FSI problem", solver.name())));
        }
        return Ok(DriverKind::General);
    }

    if fsi && unsteady_mode == UnsteadyMode::HarmonicBalance {
        return Err(unsupported("FSI with harmonic balance is not supported"));
    }
    if fsi && n_zone != 2 {
        return Err(unsupported(format!("FSI needs exactly 2 zones, mesh has {n_zone}")));
    }

    if unsteady_mode == UnsteadyMode::HarmonicBalance {
        if time_instances == 0 {
            return Err(unsupported("harmonic balance needs at least one time instance"));
        }
        return Ok(if n_zone == 1 {
            DriverKind::HarmonicBalance { time_instances }
        } else {
            DriverKind::MultiZoneHarmonicBalance {
                geometric_zones: n_zone,
                instances_per_zone: time_instances,
            }
        });
    }

    if fsi {
        return Ok(DriverKind::Fsi);
    }
    Ok(DriverKind::Fluid { n_zone })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn descriptor(solver: SolverKind, unsteady_mode: UnsteadyMode, n_zone: usize, fsi: bool) -> DriverDescriptor {
        DriverDescriptor { solver, unsteady_mode, n_zone, time_instances: 3, fsi }
    }

    #[test]
    fn test_single_zone_solvers_use_general_driver() {
        for solver in [SolverKind::FemElasticity, SolverKind::Poisson, SolverKind::Wave, SolverKind::Heat] {
            let d = descriptor(solver, UnsteadyMode::HarmonicBalance, 1, false);
            assert_eq!(select_driver(&d).unwrap(), DriverKind::General);
        }
    }

    #[test]
    fn test_heat_with_two_zones_is_unsupported() {
        let d = descriptor(SolverKind::Heat, UnsteadyMode::Steady, 2, false);
        assert!(matches!(select_driver(&d), Err(DriverError::UnsupportedConfiguration(_))));
    }

    #[test]
    fn test_multizone_harmonic_balance_instance_count() {
        let d = DriverDescriptor {
            solver: SolverKind::Euler,
            unsteady_mode: UnsteadyMode::HarmonicBalance,
            n_zone: 3,
            time_instances: 4,
            fsi: false,
        };
        let kind = select_driver(&d).unwrap();
        assert_eq!(kind, DriverKind::MultiZoneHarmonicBalance { geometric_zones: 3, instances_per_zone: 4 });
        assert_eq!(kind.total_instances(), 12);

        let single = DriverDescriptor { n_zone: 1, ..d };
        assert_eq!(select_driver(&single).unwrap(), DriverKind::HarmonicBalance { time_instances: 4 });
    }

    #[test]
    fn test_fsi_and_fluid() {
        let fsi = descriptor(SolverKind::NavierStokes, UnsteadyMode::Steady, 2, true);
        assert_eq!(select_driver(&fsi).unwrap(), DriverKind::Fsi);
        let fluid = descriptor(SolverKind::Rans, UnsteadyMode::Steady, 3, false);
        assert_eq!(select_driver(&fluid).unwrap(), DriverKind::Fluid { n_zone: 3 });
    }

    #[test]
    fn test_shadowed_combinations_are_rejected() {
        for d in [
            descriptor(SolverKind::Euler, UnsteadyMode::HarmonicBalance, 2, true),
            descriptor(SolverKind::Euler, UnsteadyMode::Steady, 3, true),
            descriptor(SolverKind::Euler, UnsteadyMode::Steady, 0, false),
            DriverDescriptor { time_instances: 0, ..descriptor(SolverKind::Euler, UnsteadyMode::HarmonicBalance, 1, false) },
        ] {
            assert!(matches!(select_driver(&d), Err(DriverError::UnsupportedConfiguration(_))), "{d:?}");
        }
    }

    fn any_descriptor() -> impl Strategy<Value = DriverDescriptor> {
        (
            proptest::sample::select(SolverKind::ALL.to_vec()),
            prop_oneof![Just(UnsteadyMode::Steady), Just(UnsteadyMode::HarmonicBalance)],
            0usize..6,
            0usize..8,
            any::<bool>(),
        )
            .prop_map(|(solver, unsteady_mode, n_zone, time_instances, fsi)| DriverDescriptor {
                solver,
                unsteady_mode,
                n_zone,
                time_instances,
                fsi,
            })
    }

    proptest! {
        #[test]
        fn prop_selection_is_deterministic(d in any_descriptor()) {
            let first = select_driver(&d).map_err(|e| e.to_string());
            let second = select_driver(&d).map_err(|e| e.to_string());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_selected_driver_matches_priority(d in any_descriptor()) {
            if let Ok(kind) = select_driver(&d) {
                prop_assert!(d.n_zone >= 1);
                match kind {
                    DriverKind::General => prop_assert!(d.solver.is_single_zone_only() && d.n_zone == 1),
                    DriverKind::HarmonicBalance { time_instances } => {
                        prop_assert_eq!(d.unsteady_mode, UnsteadyMode::HarmonicBalance);
                        prop_assert_eq!(d.n_zone, 1);
                        prop_assert_eq!(time_instances, d.time_instances);
                    }
                    DriverKind::MultiZoneHarmonicBalance { .. } => {
                        prop_assert_eq!(kind.total_instances(), d.time_instances * d.n_zone);
                        prop_assert!(d.n_zone > 1);
                    }
                    DriverKind::Fsi => prop_assert!(d.fsi && d.n_zone == 2),
                    DriverKind::Fluid { n_zone } => {
                        prop_assert!(!d.fsi && !d.solver.is_single_zone_only());
                        prop_assert_eq!(d.unsteady_mode, UnsteadyMode::Steady);
                        prop_assert_eq!(n_zone, d.n_zone);
                    }
                }
            }
        }
    }
}
