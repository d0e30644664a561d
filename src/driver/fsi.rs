use std::collections::BTreeMap;

use nalgebra::Vector3;
use tracing::{debug, info};

use crate::config::{Config, SolverKind};
use crate::error::{DriverError, SolverError};
use crate::geometry::Geometry;
use crate::grid_movement::{deform_mesh, volumetric_movement, VolumetricMovement};

use super::{preprocess_zone, Driver, DriverCore, RunSummary};

const FLUID: usize = 0;
const SOLID: usize = 1;

/// Fluid interface vertex and the structural point it is linked to.
#[derive(Debug, Clone, Copy, PartialEq)]
struct InterfaceVertex {
    marker: usize,
    vertex: usize,
    point: usize,
    solid: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct InterfaceLink {
    solid: usize,
    displacement: Vector3<f64>,
}

/// Two-zone fluid-structure driver: zone 0 is the fluid, zone 1 the
/// structure. Each outer iteration runs the fluid, transfers interface loads
/// to the structure, under-relaxes the structural interface displacement and
/// deforms the fluid mesh to follow it. The outer residual is the RMS change
/// of the interface displacement.
pub struct FsiDriver {
    pub core: DriverCore,
    vertices: Vec<InterfaceVertex>,
    links: BTreeMap<usize, InterfaceLink>,
    movement: Box<dyn VolumetricMovement>,
}

impl std::fmt::Debug for FsiDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsiDriver")
            .field("core", &self.core)
            .field("n_interface", &self.links.len())
            .field("movement", &self.movement.algorithm())
            .finish()
    }
}

/// `(marker, vertex, point)` of every vertex on the interface markers.
fn interface_vertices(geometry: &Geometry, tags: &[String]) -> Vec<(usize, usize, usize)> {
    geometry
        .markers
        .iter()
        .enumerate()
        .filter(|(_, m)| tags.contains(&m.tag))
        .flat_map(|(i_marker, m)| {
            m.vertices.iter().enumerate().map(move |(i_vertex, v)| (i_marker, i_vertex, v.point))
        })
        .collect()
}

impl FsiDriver {
    pub fn new(config: Config, geometries: Vec<Geometry>) -> Result<Self, DriverError> {
        let failure = |zone: usize, reason: String| DriverError::PreprocessingFailure { zone, reason };
        let [fluid, solid]: [Geometry; 2] = geometries
            .try_into()
            .map_err(|g: Vec<Geometry>| failure(FLUID, format!("FSI needs 2 zones, got {}", g.len())))?;
        if config.solver.is_structural() {
            return Err(failure(FLUID, "fluid zone cannot use a structural solver".to_string()));
        }

        let tags = &config.markers.fsi_interface;
        let fluid_side = interface_vertices(&fluid, tags);
        if fluid_side.is_empty() {
            return Err(failure(FLUID, "no FSI interface marker in fluid zone".to_string()));
        }
        let mut solid_points: Vec<usize> = interface_vertices(&solid, tags).into_iter().map(|(_, _, p)| p).collect();
        solid_points.sort_unstable();
        solid_points.dedup();
        if solid_points.is_empty() {
            return Err(failure(SOLID, "no FSI interface marker in structural zone".to_string()));
        }

        let mut vertices = Vec::with_capacity(fluid_side.len());
        let mut links = BTreeMap::new();
        for (marker, vertex, point) in fluid_side {
            let x = fluid.points[point].reference;
            let nearest = solid_points
                .iter()
                .copied()
                .min_by(|&a, &b| {
                    let da = (solid.points[a].reference - x).norm_squared();
                    let db = (solid.points[b].reference - x).norm_squared();
                    da.total_cmp(&db)
                })
                .ok_or_else(|| failure(SOLID, "no FSI interface marker in structural zone".to_string()))?;
            vertices.push(InterfaceVertex { marker, vertex, point, solid: nearest });
            links.insert(point, InterfaceLink { solid: nearest, displacement: Vector3::zeros() });
        }

        let n_dim = fluid.n_dim;
        if solid.n_dim != n_dim {
            return Err(failure(SOLID, "zones have different dimensions".to_string()));
        }
        let movement = volumetric_movement(&config.deformation);
        let slots = vec![
            preprocess_zone(FLUID, config.solver, fluid, &config)?,
            preprocess_zone(SOLID, SolverKind::FemElasticity, solid, &config)?,
        ];
        info!(
            n_interface = links.len(),
            n_solid_interface = solid_points.len(),
            "FSI interface matched"
        );
        Ok(Self { core: DriverCore::new("fsi", config, n_dim, slots), vertices, links, movement })
    }

    /// `(fluid point, structural point, displacement)` of every interface
    /// point of the fluid mesh.
    pub fn interface_displacements(&self) -> impl Iterator<Item = (usize, usize, Vector3<f64>)> + '_ {
        self.links.iter().map(|(&point, link)| (point, link.solid, link.displacement))
    }
}

impl Driver for FsiDriver {
    fn start_solver(&mut self) -> Result<RunSummary, DriverError> {
        let Self { core, vertices, links, movement } = self;
        let movement: &dyn VolumetricMovement = movement.as_ref();
        let relaxation = core.config.fsi_coupling.relaxation;
        let fluid_iterations = core.config.fsi_coupling.fluid_iterations.max(1);
        let increments = core.config.deformation.increments;

        core.run(|core| {
            let mut fluid_residual = 0.0;
            for _ in 0..fluid_iterations {
                fluid_residual = core.iterate_zone(FLUID)?;
            }

            let pressure = core.zones.solver(FLUID)?.scalar_field().ok_or(SolverError::Unsupported {
                solver: "structural",
                operation: "fluid loads",
            })?;
            let geometry = core.zones.geometry(FLUID)?;
            let mut loads: BTreeMap<usize, Vector3<f64>> = BTreeMap::new();
            for v in vertices.iter() {
                let normal = geometry.vertex(v.marker, v.vertex)?.normal;
                *loads.entry(v.solid).or_insert_with(Vector3::zeros) -= normal * pressure[v.point];
            }

            let structure = core.zones.solver_mut(SOLID)?.as_structural_mut()?;
            structure.set_point_loads(&loads)?;
            core.iterate_zone(SOLID)?;
            let structure = core.zones.solver_mut(SOLID)?.as_structural_mut()?;
            let solid_displacement = structure.displacement();

            let mut change = 0.0;
            for link in links.values_mut() {
                let delta = (solid_displacement[link.solid] - link.displacement) * relaxation;
                link.displacement += delta;
                change += delta.norm_squared();
            }
            let fsi_residual = (change / links.len().max(1) as f64).sqrt();

            let parts = core.zones.parts_mut(FLUID)?;
            for v in vertices.iter() {
                if let Some(link) = links.get(&v.point) {
                    parts.geometry.vertex_mut(v.marker, v.vertex)?.displacement = link.displacement;
                }
            }
            deform_mesh(parts.geometry, movement, increments)?;
            parts.numerics.update(parts.geometry)?;

            debug!(fluid_residual, fsi_residual, "FSI coupling iteration");
            Ok(fsi_residual)
        })
    }

    fn postprocessing(&mut self) -> Result<(), DriverError> {
        self.core.postprocessing()
    }
}
