use std::fmt;

use tracing::{debug, info};

use crate::error::{DriverError, OutputError};
use crate::geometry::Geometry;
use crate::numerics::Numerics;
use crate::output::Output;
use crate::solver::SolverContainer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Solver,
    Numerics,
    Geometry,
    Output,
}

/// Containers are released kind by kind in this order.
pub const RELEASE_ORDER: [ContainerKind; 4] = [
    ContainerKind::Solver,
    ContainerKind::Numerics,
    ContainerKind::Geometry,
    ContainerKind::Output,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    pub kind: ContainerKind,
    pub zone: usize,
}

/// Containers of one zone.
pub struct ZoneSlot {
    pub geometry: Option<Geometry>,
    pub solver: Option<SolverContainer>,
    pub numerics: Option<Numerics>,
    pub output: Option<Box<dyn Output>>,
}

impl ZoneSlot {
    pub fn new(geometry: Geometry, solver: SolverContainer, numerics: Numerics, output: Box<dyn Output>) -> Self {
        Self {
            geometry: Some(geometry),
            solver: Some(solver),
            numerics: Some(numerics),
            output: Some(output),
        }
    }

    fn take(&mut self, kind: ContainerKind) -> bool {
        match kind {
            ContainerKind::Solver => self.solver.take().is_some(),
            ContainerKind::Numerics => self.numerics.take().is_some(),
            ContainerKind::Geometry => self.geometry.take().is_some(),
            ContainerKind::Output => self.output.take().is_some(),
        }
    }
}

/// Mutable view of the containers a zone iteration needs together.
pub struct ZoneParts<'a> {
    pub geometry: &'a mut Geometry,
    pub solver: &'a mut SolverContainer,
    pub numerics: &'a mut Numerics,
}

/// Zone-indexed containers owned by a driver.
#[derive(Default)]
pub struct ZoneArena {
    slots: Vec<ZoneSlot>,
}

impl fmt::Debug for ZoneArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneArena").field("n_zone", &self.slots.len()).finish()
    }
}

impl ZoneArena {
    pub fn new(slots: Vec<ZoneSlot>) -> Self {
        Self { slots }
    }

    pub fn n_zone(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, zone: usize) -> Result<&ZoneSlot, DriverError> {
        self.slots.get(zone).ok_or(DriverError::InvalidIndex {
            what: "zone",
            index: zone,
            count: self.slots.len(),
        })
    }

    fn slot_mut(&mut self, zone: usize) -> Result<&mut ZoneSlot, DriverError> {
        let count = self.slots.len();
        self.slots.get_mut(zone).ok_or(DriverError::InvalidIndex { what: "zone", index: zone, count })
    }

    pub fn geometry(&self, zone: usize) -> Result<&Geometry, DriverError> {
        self.slot(zone)?.geometry.as_ref().ok_or(DriverError::Released { zone })
    }

    pub fn solver(&self, zone: usize) -> Result<&SolverContainer, DriverError> {
        self.slot(zone)?.solver.as_ref().ok_or(DriverError::Released { zone })
    }

    pub fn solver_mut(&mut self, zone: usize) -> Result<&mut SolverContainer, DriverError> {
        self.slot_mut(zone)?.solver.as_mut().ok_or(DriverError::Released { zone })
    }

    pub fn numerics(&self, zone: usize) -> Result<&Numerics, DriverError> {
        self.slot(zone)?.numerics.as_ref().ok_or(DriverError::Released { zone })
    }

    pub fn parts_mut(&mut self, zone: usize) -> Result<ZoneParts<'_>, DriverError> {
        let slot = self.slot_mut(zone)?;
        match (&mut slot.geometry, &mut slot.solver, &mut slot.numerics) {
            (Some(geometry), Some(solver), Some(numerics)) => Ok(ZoneParts { geometry, solver, numerics }),
            _ => Err(DriverError::Released { zone }),
        }
    }

    pub fn output_mut(&mut self, zone: usize) -> Result<&mut (dyn Output + 'static), DriverError> {
        self.slot_mut(zone)?.output.as_deref_mut().ok_or(DriverError::Released { zone })
    }

    /// Flushes every output still held. All outputs are attempted; the first
    /// error is returned.
    pub fn flush_outputs(&mut self) -> Result<(), OutputError> {
        let mut first_error = None;
        for output in self.slots.iter_mut().filter_map(|s| s.output.as_mut()) {
            if let Err(e) = output.flush() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Releases everything still held, kind by kind in [`RELEASE_ORDER`],
    /// highest zone first within a kind. Returns what was released; a second
    /// call returns nothing.
    pub fn release_all(&mut self) -> Vec<Release> {
        let mut released = Vec::new();
        for kind in RELEASE_ORDER {
            for zone in (0..self.slots.len()).rev() {
                if self.slots[zone].take(kind) {
                    debug!(?kind, zone, "Container released");
                    released.push(Release { kind, zone });
                }
            }
        }
        if !released.is_empty() {
            info!(n_zone = self.slots.len(), n_released = released.len(), "Zone containers released");
        }
        released
    }

    pub fn is_released(&self) -> bool {
        self.slots.iter().all(|s| {
            s.geometry.is_none() && s.solver.is_none() && s.numerics.is_none() && s.output.is_none()
        })
    }
}

impl Drop for ZoneArena {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SolverKind};
    use crate::geometry::structured::{rectangle, CellSize2D, GridDimensions2D};
    use crate::output::NullOutput;

    fn slot() -> ZoneSlot {
        let geometry = rectangle(GridDimensions2D(1, 1), CellSize2D(1.0, 1.0)).unwrap();
        let config = Config::default();
        let solver = SolverContainer::build(SolverKind::Euler, &geometry, &config).unwrap();
        let numerics = Numerics::new(SolverKind::Euler, &geometry, &config).unwrap();
        ZoneSlot::new(geometry, solver, numerics, Box::new(NullOutput))
    }

    #[test]
    fn test_release_order_and_idempotence() {
        let mut arena = ZoneArena::new(vec![slot(), slot()]);
        let released = arena.release_all();
        let expected: Vec<Release> = RELEASE_ORDER
            .iter()
            .flat_map(|&kind| [Release { kind, zone: 1 }, Release { kind, zone: 0 }])
            .collect();
        assert_eq!(released, expected);
        assert!(arena.is_released());
        assert!(arena.release_all().is_empty());
        assert!(matches!(arena.geometry(0), Err(DriverError::Released { zone: 0 })));
    }

    #[test]
    fn test_partial_release_skips_missing_containers() {
        let mut arena = ZoneArena::new(vec![slot()]);
        arena.slots[0].numerics = None;
        let kinds: Vec<ContainerKind> = arena.release_all().into_iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ContainerKind::Solver, ContainerKind::Geometry, ContainerKind::Output]);
    }

    #[test]
    fn test_zone_index_is_checked() {
        let mut arena = ZoneArena::new(vec![slot()]);
        assert!(arena.parts_mut(0).is_ok());
        assert!(matches!(arena.solver(3), Err(DriverError::InvalidIndex { what: "zone", index: 3, count: 1 })));
        assert!(arena.flush_outputs().is_ok());
    }
}
