use std::collections::BTreeMap;

use nalgebra::Vector3;
use tracing::{debug, info, info_span};

use crate::config::{DeformationAlgorithm, DeformationConfig, StiffnessModel};
use crate::error::{DeformationError, GeometryError};
use crate::geometry::{Geometry, MeshQuality};
use crate::numerics::elasticity::{solve_displacement, ElementModulus};

/// Propagates boundary displacements into the volume of a mesh.
pub trait VolumetricMovement: Send {
    fn algorithm(&self) -> DeformationAlgorithm;

    /// Displacement of every point away from `coords`, given the
    /// displacement prescribed at each boundary point.
    fn displacement(
        &self,
        geometry: &Geometry,
        coords: &[Vector3<f64>],
        boundary: &BTreeMap<usize, Vector3<f64>>,
    ) -> Result<Vec<Vector3<f64>>, DeformationError>;
}

/// Pseudo-elastic mesh solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElasticityMovement {
    pub stiffness: StiffnessModel,
    pub poisson_ratio: f64,
}

impl VolumetricMovement for ElasticityMovement {
    fn algorithm(&self) -> DeformationAlgorithm {
        DeformationAlgorithm::LinearElasticity
    }

    fn displacement(
        &self,
        geometry: &Geometry,
        coords: &[Vector3<f64>],
        boundary: &BTreeMap<usize, Vector3<f64>>,
    ) -> Result<Vec<Vector3<f64>>, DeformationError> {
        let modulus = match self.stiffness {
            StiffnessModel::InverseVolume => ElementModulus::InverseVolume,
            StiffnessModel::Constant => ElementModulus::Uniform(1.0),
        };
        Ok(solve_displacement(geometry, coords, modulus, self.poisson_ratio, &[], boundary)?)
    }
}

/// Inverse-distance weighting of the boundary displacements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyMovement {
    pub exponent: f64,
}

impl VolumetricMovement for LegacyMovement {
    fn algorithm(&self) -> DeformationAlgorithm {
        DeformationAlgorithm::Legacy
    }

    fn displacement(
        &self,
        geometry: &Geometry,
        coords: &[Vector3<f64>],
        boundary: &BTreeMap<usize, Vector3<f64>>,
    ) -> Result<Vec<Vector3<f64>>, DeformationError> {
        if coords.len() != geometry.n_point() {
            return Err(GeometryError::LengthMismatch { expected: geometry.n_point(), provided: coords.len() }.into());
        }
        let mut result = vec![Vector3::zeros(); coords.len()];
        if boundary.is_empty() {
            return Ok(result);
        }
        for (i_point, x) in coords.iter().enumerate() {
            if let Some(u) = boundary.get(&i_point) {
                result[i_point] = *u;
                continue;
            }
            let mut weighted = Vector3::zeros();
            let mut total = 0.0;
            let mut coincident = None;
            for (&b, u) in boundary {
                let distance = (coords[b] - x).norm();
                if distance <= f64::EPSILON {
                    coincident = Some(*u);
                    break;
                }
                let w = distance.powf(-self.exponent);
                weighted += u * w;
                total += w;
            }
            result[i_point] = coincident.unwrap_or(weighted / total);
        }
        Ok(result)
    }
}

pub fn volumetric_movement(config: &DeformationConfig) -> Box<dyn VolumetricMovement> {
    match config.algorithm {
        DeformationAlgorithm::LinearElasticity => Box::new(ElasticityMovement {
            stiffness: config.stiffness,
            poisson_ratio: config.poisson_ratio,
        }),
        DeformationAlgorithm::Legacy => Box::new(LegacyMovement { exponent: config.idw_exponent }),
    }
}

/// Moves the mesh so every marker vertex reaches its target displacement
/// (measured from the reference coordinates) in `increments` load steps.
///
/// Each step is checked for inverted elements before the next one starts.
/// The geometry is only written once all steps succeed, so a failure leaves
/// it untouched.
pub fn deform_mesh(
    geometry: &mut Geometry,
    movement: &dyn VolumetricMovement,
    increments: usize,
) -> Result<MeshQuality, DeformationError> {
    let increments = increments.max(1);
    let span = info_span!("deform_mesh", algorithm = ?movement.algorithm(), increments);
    let _enter = span.enter();

    let reference = geometry.reference_coordinates();
    let targets = geometry.boundary_displacements();
    let mut coords = reference.clone();

    for step in 1..=increments {
        let fraction = step as f64 / increments as f64;
        let boundary: BTreeMap<usize, Vector3<f64>> = targets
            .iter()
            .map(|(&p, target)| (p, reference[p] + target * fraction - coords[p]))
            .collect();
        let du = movement.displacement(geometry, &coords, &boundary)?;
        let trial: Vec<Vector3<f64>> = coords.iter().zip(&du).map(|(x, u)| x + u).collect();
        if let Some((element, jacobian)) = geometry.find_invalid_element(&trial) {
            return Err(DeformationError::MeshDeformationFailure { element, jacobian });
        }
        coords = trial;
        debug!(step, "Deformation increment accepted");
    }

    geometry.set_coordinates(&coords)?;
    let quality = geometry.quality();
    info!(
        min_volume = quality.min_volume,
        max_volume = quality.max_volume,
        min_jacobian = quality.min_jacobian,
        "Mesh deformed"
    );
    Ok(quality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::structured::{cuboid, rectangle, CellSize2D, CellSize3D, GridDimensions2D, GridDimensions3D};
    use approx::assert_relative_eq;

    fn shift_marker(geometry: &mut Geometry, tag: &str, by: Vector3<f64>) {
        let i = geometry.marker_index(tag).unwrap();
        for v in geometry.markers[i].vertices.iter_mut() {
            v.displacement = by;
        }
    }

    #[test]
    fn test_zero_targets_leave_mesh_unchanged() {
        for movement in [
            Box::new(ElasticityMovement { stiffness: StiffnessModel::InverseVolume, poisson_ratio: 0.3 })
                as Box<dyn VolumetricMovement>,
            Box::new(LegacyMovement { exponent: 3.0 }),
        ] {
            let mut geometry = rectangle(GridDimensions2D(3, 3), CellSize2D(1.0, 1.0)).unwrap();
            let before = geometry.coordinates();
            deform_mesh(&mut geometry, movement.as_ref(), 2).unwrap();
            assert_eq!(geometry.coordinates(), before);
        }
    }

    #[test]
    fn test_rigid_translation_moves_whole_mesh() {
        let mut geometry = rectangle(GridDimensions2D(4, 4), CellSize2D(0.25, 0.25)).unwrap();
        for tag in ["lower", "right", "upper", "left"] {
            shift_marker(&mut geometry, tag, Vector3::new(0.1, -0.05, 0.0));
        }
        let movement = ElasticityMovement { stiffness: StiffnessModel::InverseVolume, poisson_ratio: 0.3 };
        deform_mesh(&mut geometry, &movement, 1).unwrap();
        for p in &geometry.points {
            assert_relative_eq!(p.coord - p.reference, Vector3::new(0.1, -0.05, 0.0), epsilon = 1e-9);
        }
    }

    #[test]
    fn test_legacy_interpolates_between_walls() {
        let mut geometry = rectangle(GridDimensions2D(2, 4), CellSize2D(1.0, 0.25)).unwrap();
        shift_marker(&mut geometry, "upper", Vector3::new(0.0, 0.1, 0.0));
        deform_mesh(&mut geometry, &LegacyMovement { exponent: 3.0 }, 1).unwrap();
        let center = geometry
            .points
            .iter()
            .find(|p| (p.reference - Vector3::new(1.0, 0.5, 0.0)).norm() < 1e-12)
            .unwrap();
        let dy = center.coord.y - center.reference.y;
        assert!(dy > 0.0 && dy < 0.1);
        assert!(geometry.quality().min_jacobian > 0.0);
    }

    #[test]
    fn test_legacy_rejects_short_coordinates() {
        let geometry = rectangle(GridDimensions2D(2, 2), CellSize2D(1.0, 1.0)).unwrap();
        let coords = geometry.coordinates();
        let boundary = geometry.boundary_displacements();
        let result = LegacyMovement { exponent: 3.0 }.displacement(&geometry, &coords[1..], &boundary);
        assert!(matches!(
            result,
            Err(DeformationError::Geometry(GeometryError::LengthMismatch { expected: 9, provided: 8 }))
        ));
    }

    #[test]
    fn test_increments_reach_same_target_3d() {
        let mut geometry = cuboid(GridDimensions3D(2, 2, 2), CellSize3D(0.5, 0.5, 0.5)).unwrap();
        shift_marker(&mut geometry, "zmax", Vector3::new(0.0, 0.0, 0.2));
        let movement = ElasticityMovement { stiffness: StiffnessModel::InverseVolume, poisson_ratio: 0.3 };
        deform_mesh(&mut geometry, &movement, 3).unwrap();
        let i = geometry.marker_index("zmax").unwrap();
        for v in &geometry.markers[i].vertices {
            let p = &geometry.points[v.point];
            assert_relative_eq!(p.coord.z - p.reference.z, v.displacement.z, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_inversion_is_rejected_and_mesh_kept() {
        let mut geometry = rectangle(GridDimensions2D(2, 2), CellSize2D(1.0, 1.0)).unwrap();
        shift_marker(&mut geometry, "upper", Vector3::new(0.0, -3.0, 0.0));
        let before = geometry.clone();
        let movement = ElasticityMovement { stiffness: StiffnessModel::InverseVolume, poisson_ratio: 0.3 };
        let err = deform_mesh(&mut geometry, &movement, 1).unwrap_err();
        assert!(matches!(err, DeformationError::MeshDeformationFailure { .. }));
        assert_eq!(geometry, before);
    }
}
