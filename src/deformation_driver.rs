//! Stand-alone mesh deformation of one zone.
//!
//! The driver owns the zone geometry, the surface movement built from the
//! configuration, and the mesh writer. Boundary targets come from the
//! configured surface definitions or from the marker setters below; `run`
//! carries them into the volume and commits the new coordinates only when
//! every element stays valid.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::{Duration, Instant};

use nalgebra::Vector3;
use tracing::{debug, info, info_span, warn};

use crate::comm::{Communicator, HaloRecord};
use crate::config::{Config, DeformationAlgorithm};
use crate::error::{DeformationError, GeometryError};
use crate::geometry::mesh_io::MeshDocument;
use crate::geometry::{Geometry, Marker, MeshQuality, Vertex};
use crate::grid_movement::{
    deform_mesh, volumetric_movement, ElasticityMovement, LegacyMovement, SurfaceMovement, VolumetricMovement,
};
use crate::output::MeshWriter;

pub struct DeformationDriver {
    config: Config,
    comm: Box<dyn Communicator>,
    surface_movement: Option<SurfaceMovement>,
    geometry: Option<Geometry>,
    output: Option<MeshWriter>,
    movement: Box<dyn VolumetricMovement>,
    preprocessing_time: Duration,
}

fn row(v: &Vector3<f64>, n_dim: usize) -> Vec<f64> {
    v.iter().take(n_dim).copied().collect()
}

fn vector(values: &[f64], n_dim: usize) -> Result<Vector3<f64>, DeformationError> {
    if values.len() != n_dim {
        return Err(GeometryError::LengthMismatch { expected: n_dim, provided: values.len() }.into());
    }
    let mut v = Vector3::zeros();
    for (k, x) in values.iter().enumerate() {
        v[k] = *x;
    }
    Ok(v)
}

fn check_rows(expected: usize, provided: usize) -> Result<(), DeformationError> {
    if expected != provided {
        return Err(GeometryError::LengthMismatch { expected, provided }.into());
    }
    Ok(())
}

impl DeformationDriver {
    /// Reads the configuration and this rank's single-zone mesh.
    pub fn new<P: AsRef<Path>>(config_path: P, comm: Box<dyn Communicator>) -> Result<Self, DeformationError> {
        let config = Config::from_file(config_path)
            .map_err(|e| DeformationError::Preprocessing(e.to_string()))?;
        let mesh = MeshDocument::load(&config, comm.rank())?;
        if mesh.n_zone() != 1 {
            return Err(DeformationError::Preprocessing(format!(
                "mesh deformation needs a single-zone mesh, found {} zones",
                mesh.n_zone()
            )));
        }
        let geometry = mesh.zone_geometry(0)?;
        Self::from_parts(config, geometry, comm)
    }

    pub fn from_parts(config: Config, mut geometry: Geometry, comm: Box<dyn Communicator>) -> Result<Self, DeformationError> {
        let start = Instant::now();
        let span = info_span!("deformation_preprocessing", rank = comm.rank());
        let _enter = span.enter();

        config.validate().map_err(|e| DeformationError::Preprocessing(e.to_string()))?;
        let surface_movement = SurfaceMovement::new(config.deformation.surface.clone());
        surface_movement.apply(&mut geometry)?;
        let output = MeshWriter::new(&config.output, &config.base_dir, comm.rank(), comm.size());
        let movement = volumetric_movement(&config.deformation);

        let preprocessing_time = start.elapsed();
        info!(
            n_point = geometry.n_point(),
            n_elem = geometry.n_elem(),
            n_marker = geometry.n_marker(),
            n_halo = geometry.n_halo_points(),
            "Deformation driver preprocessed in {:.2}ms",
            preprocessing_time.as_secs_f64() * 1e3
        );
        Ok(Self {
            config,
            comm,
            surface_movement: Some(surface_movement),
            geometry: Some(geometry),
            output: Some(output),
            movement,
            preprocessing_time,
        })
    }

    pub fn preprocessing_time(&self) -> Duration {
        self.preprocessing_time
    }

    pub fn geometry(&self) -> Result<&Geometry, DeformationError> {
        self.geometry.as_ref().ok_or(DeformationError::Released)
    }

    fn geometry_mut(&mut self) -> Result<&mut Geometry, DeformationError> {
        self.geometry.as_mut().ok_or(DeformationError::Released)
    }

    fn marker(&self, i_marker: usize) -> Result<&Marker, DeformationError> {
        Ok(self.geometry()?.marker(i_marker)?)
    }

    fn vertex(&self, i_marker: usize, i_vertex: usize) -> Result<&Vertex, DeformationError> {
        Ok(self.geometry()?.vertex(i_marker, i_vertex)?)
    }

    /// Deforms the mesh with the algorithm chosen at construction. On
    /// several ranks the halo targets are synchronised first.
    pub fn run(&mut self) -> Result<MeshQuality, DeformationError> {
        let start = Instant::now();
        let surface = self.surface_movement.as_ref().ok_or(DeformationError::Released)?;
        for definition in surface.definitions() {
            debug!(marker = definition.marker(), ?definition, "Surface deformation");
        }
        if self.comm.size() > 1 {
            self.communicate_mesh_displacement()?;
        }
        let increments = self.config.deformation.increments;
        let geometry = self.geometry.as_mut().ok_or(DeformationError::Released)?;
        let quality = deform_mesh(geometry, self.movement.as_ref(), increments)?;
        info!(
            algorithm = ?self.movement.algorithm(),
            "Deformation run finished in {:.2}ms",
            start.elapsed().as_secs_f64() * 1e3
        );
        Ok(quality)
    }

    pub fn algorithm(&self) -> DeformationAlgorithm {
        self.movement.algorithm()
    }

    /// Pseudo-elastic deformation solved with a sparse LU factorisation.
    pub fn update(&mut self) -> Result<MeshQuality, DeformationError> {
        let movement = ElasticityMovement {
            stiffness: self.config.deformation.stiffness,
            poisson_ratio: self.config.deformation.poisson_ratio,
        };
        self.deform_with(&movement)
    }

    /// Inverse-distance interpolation of the boundary targets.
    pub fn update_legacy(&mut self) -> Result<MeshQuality, DeformationError> {
        let movement = LegacyMovement { exponent: self.config.deformation.idw_exponent };
        self.deform_with(&movement)
    }

    fn deform_with(&mut self, movement: &dyn VolumetricMovement) -> Result<MeshQuality, DeformationError> {
        let increments = self.config.deformation.increments;
        deform_mesh(self.geometry_mut()?, movement, increments)
    }

    /// Writes the current mesh.
    pub fn output(&self) -> Result<(), DeformationError> {
        let writer = self.output.as_ref().ok_or(DeformationError::Released)?;
        writer.write(self.geometry()?)?;
        Ok(())
    }

    /// Releases the containers. Safe to call more than once.
    pub fn postprocessing(&mut self) {
        let mut released = Vec::new();
        if self.surface_movement.take().is_some() {
            released.push("surface movement");
        }
        if self.geometry.take().is_some() {
            released.push("geometry");
        }
        if self.output.take().is_some() {
            released.push("output");
        }
        if !released.is_empty() {
            info!(rank = self.comm.rank(), ?released, "Deformation driver released");
        }
    }

    // --- Markers ---

    /// Tags of the markers that drive the deformation, in marker order.
    pub fn all_deform_mesh_markers_tag(&self) -> Result<Vec<String>, DeformationError> {
        Ok(self
            .geometry()?
            .markers
            .iter()
            .filter(|m| self.config.is_deform_marker(&m.tag))
            .map(|m| m.tag.clone())
            .collect())
    }

    pub fn all_boundary_markers(&self) -> Result<BTreeMap<String, usize>, DeformationError> {
        Ok(self.geometry()?.markers.iter().enumerate().map(|(i, m)| (m.tag.clone(), i)).collect())
    }

    pub fn all_boundary_markers_type(&self) -> Result<BTreeMap<String, String>, DeformationError> {
        Ok(self
            .geometry()?
            .markers
            .iter()
            .map(|m| (m.tag.clone(), m.kind.name().to_string()))
            .collect())
    }

    // --- Vertex queries ---

    pub fn is_a_halo_node(&self, i_marker: usize, i_vertex: usize) -> Result<bool, DeformationError> {
        let point = self.vertex(i_marker, i_vertex)?.point;
        Ok(!self.geometry()?.points[point].domain)
    }

    pub fn vertex_global_index(&self, i_marker: usize, i_vertex: usize) -> Result<u64, DeformationError> {
        let point = self.vertex(i_marker, i_vertex)?.point;
        Ok(self.geometry()?.points[point].global_index)
    }

    pub fn initial_mesh_coord(&self, i_marker: usize, i_vertex: usize) -> Result<Vec<f64>, DeformationError> {
        let geometry = self.geometry()?;
        let point = self.vertex(i_marker, i_vertex)?.point;
        Ok(row(&geometry.points[point].reference, geometry.n_dim))
    }

    /// Area-weighted outward normal.
    pub fn vertex_normal(&self, i_marker: usize, i_vertex: usize) -> Result<Vec<f64>, DeformationError> {
        let n_dim = self.geometry()?.n_dim;
        Ok(row(&self.vertex(i_marker, i_vertex)?.normal, n_dim))
    }

    pub fn vertex_unit_normal(&self, i_marker: usize, i_vertex: usize) -> Result<Vec<f64>, DeformationError> {
        let n_dim = self.geometry()?.n_dim;
        let normal = self.vertex(i_marker, i_vertex)?.normal;
        let unit = normal.try_normalize(f64::EPSILON).unwrap_or_else(Vector3::zeros);
        Ok(row(&unit, n_dim))
    }

    // --- Counts ---

    pub fn number_dimensions(&self) -> Result<usize, DeformationError> {
        Ok(self.geometry()?.n_dim)
    }

    pub fn number_elements(&self) -> Result<usize, DeformationError> {
        Ok(self.geometry()?.n_elem())
    }

    pub fn number_elements_marker(&self, i_marker: usize) -> Result<usize, DeformationError> {
        Ok(self.marker(i_marker)?.elements.len())
    }

    pub fn number_vertices(&self) -> Result<usize, DeformationError> {
        Ok(self.geometry()?.n_point())
    }

    pub fn number_vertices_marker(&self, i_marker: usize) -> Result<usize, DeformationError> {
        Ok(self.marker(i_marker)?.vertices.len())
    }

    pub fn number_halo_vertices(&self) -> Result<usize, DeformationError> {
        Ok(self.geometry()?.n_halo_points())
    }

    pub fn number_halo_vertices_marker(&self, i_marker: usize) -> Result<usize, DeformationError> {
        let geometry = self.geometry()?;
        let marker = geometry.marker(i_marker)?;
        Ok(marker.vertices.iter().filter(|v| !geometry.points[v.point].domain).count())
    }

    /// Vertices of the marker owned by any rank, counted once each.
    pub fn global_number_vertices_marker(&self, i_marker: usize) -> Result<u64, DeformationError> {
        let geometry = self.geometry()?;
        let marker = geometry.marker(i_marker)?;
        let owned = marker.vertices.iter().filter(|v| geometry.points[v.point].domain).count();
        Ok(self.comm.all_reduce_sum(owned as u64)?)
    }

    // --- Identifiers and connectivity ---

    pub fn vertex_ids(&self) -> Result<Vec<u64>, DeformationError> {
        Ok(self.geometry()?.points.iter().map(|p| p.global_index).collect())
    }

    pub fn vertex_ids_marker(&self, i_marker: usize) -> Result<Vec<u64>, DeformationError> {
        let geometry = self.geometry()?;
        let marker = geometry.marker(i_marker)?;
        Ok(marker.vertices.iter().map(|v| geometry.points[v.point].global_index).collect())
    }

    pub fn element_ids(&self) -> Result<Vec<u64>, DeformationError> {
        Ok(self.geometry()?.elements.iter().map(|e| e.global_index).collect())
    }

    pub fn element_ids_marker(&self, i_marker: usize) -> Result<Vec<u64>, DeformationError> {
        Ok(self.marker(i_marker)?.elements.iter().map(|e| e.global_index).collect())
    }

    /// Node global indices of every volume element.
    pub fn connectivity(&self) -> Result<Vec<Vec<u64>>, DeformationError> {
        let geometry = self.geometry()?;
        Ok(geometry
            .elements
            .iter()
            .map(|e| e.nodes.iter().map(|&n| geometry.points[n].global_index).collect())
            .collect())
    }

    /// Node global indices of every boundary element of the marker.
    pub fn connectivity_marker(&self, i_marker: usize) -> Result<Vec<Vec<u64>>, DeformationError> {
        let geometry = self.geometry()?;
        let marker = geometry.marker(i_marker)?;
        Ok(marker
            .elements
            .iter()
            .map(|e| e.nodes.iter().map(|&n| geometry.points[n].global_index).collect())
            .collect())
    }

    pub fn domain(&self) -> Result<Vec<bool>, DeformationError> {
        Ok(self.geometry()?.points.iter().map(|p| p.domain).collect())
    }

    pub fn domain_marker(&self, i_marker: usize) -> Result<Vec<bool>, DeformationError> {
        let geometry = self.geometry()?;
        let marker = geometry.marker(i_marker)?;
        Ok(marker.vertices.iter().map(|v| geometry.points[v.point].domain).collect())
    }

    // --- Coordinates ---

    pub fn coordinates(&self) -> Result<Vec<Vec<f64>>, DeformationError> {
        let geometry = self.geometry()?;
        Ok(geometry.points.iter().map(|p| row(&p.coord, geometry.n_dim)).collect())
    }

    pub fn coordinates_marker(&self, i_marker: usize) -> Result<Vec<Vec<f64>>, DeformationError> {
        let geometry = self.geometry()?;
        let marker = geometry.marker(i_marker)?;
        Ok(marker
            .vertices
            .iter()
            .map(|v| row(&geometry.points[v.point].coord, geometry.n_dim))
            .collect())
    }

    /// Moves every point and makes the result the reference mesh, so later
    /// runs deform from it. Targets stay measured from the reference.
    pub fn set_coordinates(&mut self, values: &[Vec<f64>]) -> Result<(), DeformationError> {
        let geometry = self.geometry_mut()?;
        check_rows(geometry.n_point(), values.len())?;
        let coords = values
            .iter()
            .map(|v| vector(v, geometry.n_dim))
            .collect::<Result<Vec<_>, _>>()?;
        geometry.rebase_coordinates(&coords)?;
        Ok(())
    }

    /// Moves the marker's points. The whole current mesh becomes the
    /// reference, as with [`DeformationDriver::set_coordinates`].
    pub fn set_coordinates_marker(&mut self, i_marker: usize, values: &[Vec<f64>]) -> Result<(), DeformationError> {
        let geometry = self.geometry_mut()?;
        let n_dim = geometry.n_dim;
        let points: Vec<usize> = geometry.marker(i_marker)?.vertices.iter().map(|v| v.point).collect();
        check_rows(points.len(), values.len())?;
        let mut coords = geometry.coordinates();
        for (&point, value) in points.iter().zip(values) {
            coords[point] = vector(value, n_dim)?;
        }
        geometry.rebase_coordinates(&coords)?;
        Ok(())
    }

    /// Sets one component of the position the vertex must reach on the next
    /// run.
    fn set_vertex_target_component(
        &mut self,
        i_marker: usize,
        i_vertex: usize,
        component: usize,
        value: f64,
    ) -> Result<(), DeformationError> {
        let geometry = self.geometry_mut()?;
        if component >= geometry.n_dim {
            return Err(DeformationError::InvalidIndex {
                what: "dimension",
                index: component,
                count: geometry.n_dim,
            });
        }
        let point = geometry.vertex(i_marker, i_vertex)?.point;
        let reference = geometry.points[point].reference[component];
        geometry.vertex_mut(i_marker, i_vertex)?.displacement[component] = value - reference;
        Ok(())
    }

    pub fn set_vertex_coord_x(&mut self, i_marker: usize, i_vertex: usize, value: f64) -> Result<(), DeformationError> {
        self.set_vertex_target_component(i_marker, i_vertex, 0, value)
    }

    pub fn set_vertex_coord_y(&mut self, i_marker: usize, i_vertex: usize, value: f64) -> Result<(), DeformationError> {
        self.set_vertex_target_component(i_marker, i_vertex, 1, value)
    }

    pub fn set_vertex_coord_z(&mut self, i_marker: usize, i_vertex: usize, value: f64) -> Result<(), DeformationError> {
        self.set_vertex_target_component(i_marker, i_vertex, 2, value)
    }

    // --- Displacements and velocities ---

    /// Target displacements of the marker, from the reference coordinates.
    pub fn displacements_marker(&self, i_marker: usize) -> Result<Vec<Vec<f64>>, DeformationError> {
        let n_dim = self.geometry()?.n_dim;
        Ok(self.marker(i_marker)?.vertices.iter().map(|v| row(&v.displacement, n_dim)).collect())
    }

    pub fn set_displacements_marker(&mut self, i_marker: usize, values: &[Vec<f64>]) -> Result<(), DeformationError> {
        let geometry = self.geometry_mut()?;
        let n_dim = geometry.n_dim;
        let marker = geometry.marker_mut(i_marker)?;
        check_rows(marker.vertices.len(), values.len())?;
        let parsed = values.iter().map(|v| vector(v, n_dim)).collect::<Result<Vec<_>, _>>()?;
        for (vertex, d) in marker.vertices.iter_mut().zip(parsed) {
            vertex.displacement = d;
        }
        Ok(())
    }

    pub fn velocities_marker(&self, i_marker: usize) -> Result<Vec<Vec<f64>>, DeformationError> {
        let n_dim = self.geometry()?.n_dim;
        Ok(self.marker(i_marker)?.vertices.iter().map(|v| row(&v.velocity, n_dim)).collect())
    }

    pub fn set_velocities_marker(&mut self, i_marker: usize, values: &[Vec<f64>]) -> Result<(), DeformationError> {
        let geometry = self.geometry_mut()?;
        let n_dim = geometry.n_dim;
        let marker = geometry.marker_mut(i_marker)?;
        check_rows(marker.vertices.len(), values.len())?;
        let parsed = values.iter().map(|v| vector(v, n_dim)).collect::<Result<Vec<_>, _>>()?;
        for (vertex, u) in marker.vertices.iter_mut().zip(parsed) {
            vertex.velocity = u;
        }
        Ok(())
    }

    /// Displacement committed by the last successful run.
    pub fn mesh_displacements_marker(&self, i_marker: usize) -> Result<Vec<Vec<f64>>, DeformationError> {
        let geometry = self.geometry()?;
        let marker = geometry.marker(i_marker)?;
        Ok(marker
            .vertices
            .iter()
            .map(|v| {
                let p = &geometry.points[v.point];
                row(&(p.coord - p.reference), geometry.n_dim)
            })
            .collect())
    }

    /// Sets the displacement the marker must reach on the next run.
    pub fn set_mesh_displacements_marker(&mut self, i_marker: usize, values: &[Vec<f64>]) -> Result<(), DeformationError> {
        self.set_displacements_marker(i_marker, values)
    }

    // --- Parallel ---

    /// Sends the targets of owned marker vertices to every rank and
    /// overwrites halo vertices with their owner's value. Collective: every
    /// rank must call it. Returns the number of halo vertices updated.
    pub fn communicate_mesh_displacement(&mut self) -> Result<usize, DeformationError> {
        let geometry = self.geometry()?;
        let mut owned = Vec::new();
        for (i_marker, marker) in geometry.markers.iter().enumerate() {
            for vertex in &marker.vertices {
                let point = &geometry.points[vertex.point];
                if point.domain {
                    let d = vertex.displacement;
                    owned.push(HaloRecord {
                        marker: i_marker,
                        global_index: point.global_index,
                        displacement: [d.x, d.y, d.z],
                    });
                }
            }
        }
        let gathered = self.comm.all_gather(owned)?;
        let by_owner: HashMap<(usize, u64), [f64; 3]> = gathered
            .into_iter()
            .map(|r| ((r.marker, r.global_index), r.displacement))
            .collect();

        let rank = self.comm.rank();
        let Geometry { points, markers, .. } = self.geometry_mut()?;
        let mut updated = 0;
        for (i_marker, marker) in markers.iter_mut().enumerate() {
            for vertex in marker.vertices.iter_mut() {
                let point = &points[vertex.point];
                if point.domain {
                    continue;
                }
                match by_owner.get(&(i_marker, point.global_index)) {
                    Some(d) => {
                        vertex.displacement = Vector3::from(*d);
                        updated += 1;
                    }
                    None => warn!(rank, marker = i_marker, global_index = point.global_index, "Halo vertex has no owner"),
                }
            }
        }
        info!(rank, n_updated = updated, "Mesh displacement communicated");
        Ok(updated)
    }
}

impl Drop for DeformationDriver {
    fn drop(&mut self) {
        self.postprocessing();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{ChannelComm, SerialComm};
    use crate::config::SurfaceDeformation;
    use crate::geometry::structured::{rectangle, CellSize2D, GridDimensions2D};
    use approx::assert_relative_eq;
    use std::thread;
    use tempfile::tempdir;

    fn plate() -> Geometry {
        rectangle(GridDimensions2D(3, 3), CellSize2D(1.0, 1.0)).unwrap()
    }

    fn serial_driver(config: Config) -> DeformationDriver {
        DeformationDriver::from_parts(config, plate(), Box::new(SerialComm)).unwrap()
    }

    #[test]
    fn test_zero_displacement_keeps_coordinates() {
        let mut driver = serial_driver(Config::default());
        let before = driver.coordinates().unwrap();
        driver.run().unwrap();
        assert_eq!(driver.coordinates().unwrap(), before);
    }

    #[test]
    fn test_set_coordinates_survive_zero_target_run() {
        let mut driver = serial_driver(Config::default());
        let stretched: Vec<Vec<f64>> = driver
            .coordinates()
            .unwrap()
            .into_iter()
            .map(|c| vec![c[0] * 1.1, c[1]])
            .collect();
        driver.set_coordinates(&stretched).unwrap();
        driver.run().unwrap();
        assert_eq!(driver.coordinates().unwrap(), stretched);

        let right = driver.all_boundary_markers().unwrap()["right"];
        let shifted: Vec<Vec<f64>> = driver
            .coordinates_marker(right)
            .unwrap()
            .into_iter()
            .map(|c| vec![c[0] + 0.2, c[1]])
            .collect();
        driver.set_coordinates_marker(right, &shifted).unwrap();
        let before = driver.coordinates().unwrap();
        driver.run().unwrap();
        assert_eq!(driver.coordinates().unwrap(), before);
        assert_eq!(driver.coordinates_marker(right).unwrap(), shifted);
        for d in driver.mesh_displacements_marker(right).unwrap() {
            assert_eq!(d, vec![0.0, 0.0]);
        }
    }

    #[test]
    fn test_upper_wall_lift() {
        let mut config = Config::default();
        config.markers.deform.push("upper".to_string());
        config.deformation.surface.push(SurfaceDeformation::Translation {
            marker: "upper".to_string(),
            vector: [0.0, 0.3, 0.0],
        });
        let mut driver = serial_driver(config);
        assert_eq!(driver.all_deform_mesh_markers_tag().unwrap(), vec!["upper".to_string()]);

        let quality = driver.run().unwrap();
        assert!(quality.min_jacobian > 0.0);

        let upper = driver.all_boundary_markers().unwrap()["upper"];
        for (current, initial) in driver
            .coordinates_marker(upper)
            .unwrap()
            .iter()
            .zip((0..4).map(|v| driver.initial_mesh_coord(upper, v).unwrap()))
        {
            assert_relative_eq!(current[1], initial[1] + 0.3, epsilon = 1e-9);
        }
        for d in driver.mesh_displacements_marker(upper).unwrap() {
            assert_relative_eq!(d[1], 0.3, epsilon = 1e-9);
        }

        // Targets are measured from the reference mesh, so a second run is a no-op.
        let after_first = driver.coordinates().unwrap();
        driver.run().unwrap();
        let after_second = driver.coordinates().unwrap();
        for (a, b) in after_first.iter().zip(&after_second) {
            assert_relative_eq!(a[0], b[0], epsilon = 1e-12);
            assert_relative_eq!(a[1], b[1], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_legacy_and_vertex_setters() {
        let mut config = Config::default();
        config.deformation.algorithm = DeformationAlgorithm::Legacy;
        let mut driver = serial_driver(config);
        assert_eq!(driver.algorithm(), DeformationAlgorithm::Legacy);
        let right = driver.all_boundary_markers().unwrap()["right"];
        for v in 0..driver.number_vertices_marker(right).unwrap() {
            let x = driver.initial_mesh_coord(right, v).unwrap()[0];
            driver.set_vertex_coord_x(right, v, x + 0.2).unwrap();
        }
        assert!(matches!(
            driver.set_vertex_coord_z(right, 0, 1.0),
            Err(DeformationError::InvalidIndex { what: "dimension", .. })
        ));
        driver.run().unwrap();
        for c in driver.coordinates_marker(right).unwrap() {
            assert_relative_eq!(c[0], 3.2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_inverting_displacement_is_rejected() {
        let mut driver = serial_driver(Config::default());
        let upper = driver.all_boundary_markers().unwrap()["upper"];
        let n = driver.number_vertices_marker(upper).unwrap();
        driver.set_mesh_displacements_marker(upper, &vec![vec![0.0, -4.0]; n]).unwrap();
        let before = driver.coordinates().unwrap();

        let err = driver.run().unwrap_err();
        assert!(matches!(err, DeformationError::MeshDeformationFailure { .. }));
        assert_eq!(driver.coordinates().unwrap(), before);
        assert_eq!(driver.displacements_marker(upper).unwrap()[0], vec![0.0, -4.0]);
    }

    #[test]
    fn test_index_and_length_checks() {
        let mut driver = serial_driver(Config::default());
        let n_marker = driver.all_boundary_markers().unwrap().len();
        assert!(matches!(
            driver.coordinates_marker(n_marker),
            Err(DeformationError::InvalidIndex { what: "marker", .. })
        ));
        assert!(matches!(
            driver.vertex_global_index(0, 99),
            Err(DeformationError::InvalidIndex { what: "vertex", .. })
        ));
        assert!(matches!(driver.set_velocities_marker(0, &[vec![1.0, 0.0]]), Err(DeformationError::Geometry(_))));

        driver.set_velocities_marker(0, &vec![vec![1.0, 2.0]; 4]).unwrap();
        assert_eq!(driver.velocities_marker(0).unwrap()[3], vec![1.0, 2.0]);
        assert_eq!(driver.number_dimensions().unwrap(), 2);
        assert_eq!(driver.number_elements().unwrap(), 9);
        assert_eq!(driver.number_elements_marker(0).unwrap(), 3);
        assert_eq!(driver.connectivity_marker(0).unwrap()[0], vec![0, 1]);
        assert_eq!(driver.all_boundary_markers_type().unwrap()["left"], "wall");

        let lower = driver.all_boundary_markers().unwrap()["lower"];
        assert_eq!(driver.vertex_unit_normal(lower, 1).unwrap(), vec![0.0, -1.0]);
    }

    #[test]
    fn test_output_and_postprocessing() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.base_dir = dir.path().to_path_buf();
        let mut driver = serial_driver(config);
        driver.output().unwrap();
        let written = MeshDocument::read(dir.path().join("deformed_mesh.json")).unwrap();
        assert_eq!(written.zone_geometry(0).unwrap().n_point(), 16);

        driver.postprocessing();
        driver.postprocessing();
        assert!(matches!(driver.number_vertices(), Err(DeformationError::Released)));
        assert!(matches!(driver.run(), Err(DeformationError::Released)));
    }

    /// Rank `rank` of a two-way split of the plate by x. Both ranks hold the
    /// whole mesh; points of the other side are halo copies.
    fn partition(rank: usize) -> Geometry {
        let mut geometry = plate();
        for p in geometry.points.iter_mut() {
            let owner = if p.coord.x <= 1.5 { 0 } else { 1 };
            p.domain = owner == rank;
        }
        geometry
    }

    #[test]
    fn test_halo_agreement_across_ranks() {
        let handles: Vec<_> = ChannelComm::cluster(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let rank = comm.rank();
                    let mut driver =
                        DeformationDriver::from_parts(Config::default(), partition(rank), Box::new(comm)).unwrap();
                    for i_marker in 0..4 {
                        let ids = driver.vertex_ids_marker(i_marker).unwrap();
                        let values: Vec<Vec<f64>> = ids
                            .iter()
                            .map(|&g| vec![0.001 * g as f64 * (rank + 1) as f64, -0.002 * (rank + 1) as f64])
                            .collect();
                        driver.set_displacements_marker(i_marker, &values).unwrap();
                    }
                    for i_marker in 0..4 {
                        let domain = driver.domain_marker(i_marker).unwrap();
                        for (i_vertex, owned) in domain.iter().enumerate() {
                            assert_eq!(driver.is_a_halo_node(i_marker, i_vertex).unwrap(), !owned);
                        }
                        assert!(matches!(
                            driver.is_a_halo_node(i_marker, domain.len()),
                            Err(DeformationError::InvalidIndex { what: "vertex", .. })
                        ));
                    }
                    let lower_halo = (0..4).filter(|&v| driver.is_a_halo_node(0, v).unwrap()).count();
                    assert_eq!(lower_halo, 2);

                    let updated = driver.communicate_mesh_displacement().unwrap();
                    let halo: usize = (0..4).map(|m| driver.number_halo_vertices_marker(m).unwrap()).sum();
                    assert_eq!(updated, halo);

                    let global: Vec<u64> = (0..4).map(|m| driver.global_number_vertices_marker(m).unwrap()).collect();
                    let mut seen = Vec::new();
                    for i_marker in 0..4 {
                        let ids = driver.vertex_ids_marker(i_marker).unwrap();
                        let values = driver.displacements_marker(i_marker).unwrap();
                        for (g, d) in ids.into_iter().zip(values) {
                            seen.push((i_marker, g, d));
                        }
                    }
                    (global, seen)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results[0].1, results[1].1);
        assert_eq!(results[0].0, vec![4, 4, 4, 4]);
        assert_eq!(results[0].0, results[1].0);
    }
}
