use nalgebra::{Rotation3, Unit, Vector3};
use tracing::{debug, info};

use crate::config::SurfaceDeformation;
use crate::error::DeformationError;
use crate::geometry::Geometry;

/// Turns surface-deformation definitions into target displacements of
/// marker vertices. Definitions are composed in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceMovement {
    definitions: Vec<SurfaceDeformation>,
}

impl SurfaceMovement {
    pub fn new(definitions: Vec<SurfaceDeformation>) -> Self {
        Self { definitions }
    }

    pub fn definitions(&self) -> &[SurfaceDeformation] {
        &self.definitions
    }

    /// Writes the composed displacement into every affected vertex and
    /// returns the number of vertices moved.
    pub fn apply(&self, geometry: &mut Geometry) -> Result<usize, DeformationError> {
        let mut moved = 0;
        for definition in &self.definitions {
            let i_marker = geometry.marker_index(definition.marker()).ok_or_else(|| {
                DeformationError::Preprocessing(format!(
                    "surface deformation marker '{}' not found in mesh",
                    definition.marker()
                ))
            })?;
            let transform = Transform::from_definition(definition, geometry.n_dim)?;
            let Geometry { points, markers, .. } = geometry;
            for vertex in markers[i_marker].vertices.iter_mut() {
                let reference = points[vertex.point].reference;
                let moved_to = transform.apply(reference + vertex.displacement);
                vertex.displacement = moved_to - reference;
            }
            moved += markers[i_marker].vertices.len();
            debug!(marker = definition.marker(), "Surface deformation applied");
        }
        if moved > 0 {
            info!(n_vertex = moved, n_definition = self.definitions.len(), "Surface movement computed");
        }
        Ok(moved)
    }
}

enum Transform {
    Translation(Vector3<f64>),
    Rotation { center: Vector3<f64>, rotation: Rotation3<f64> },
    Scale { center: Vector3<f64>, factor: f64 },
}

impl Transform {
    fn from_definition(definition: &SurfaceDeformation, n_dim: usize) -> Result<Self, DeformationError> {
        let transform = match definition {
            SurfaceDeformation::Translation { vector, .. } => {
                let v = Vector3::from(*vector);
                if n_dim == 2 && v.z != 0.0 {
                    return Err(DeformationError::Preprocessing(
                        "translation of a 2D mesh must have zero z component".to_string(),
                    ));
                }
                Transform::Translation(v)
            }
            SurfaceDeformation::Rotation { center, axis, angle_deg, .. } => {
                let axis = Vector3::from(*axis);
                if axis.norm() <= f64::EPSILON {
                    return Err(DeformationError::Preprocessing("rotation axis must be non-zero".to_string()));
                }
                if n_dim == 2 && (axis.x != 0.0 || axis.y != 0.0) {
                    return Err(DeformationError::Preprocessing(
                        "rotation of a 2D mesh must be about the z axis".to_string(),
                    ));
                }
                Transform::Rotation {
                    center: Vector3::from(*center),
                    rotation: Rotation3::from_axis_angle(&Unit::new_normalize(axis), angle_deg.to_radians()),
                }
            }
            SurfaceDeformation::Scale { center, factor, .. } => {
                if !(*factor > 0.0) {
                    return Err(DeformationError::Preprocessing("scale factor must be positive".to_string()));
                }
                let mut center = Vector3::from(*center);
                if n_dim == 2 {
                    center.z = 0.0;
                }
                Transform::Scale { center, factor: *factor }
            }
        };
        Ok(transform)
    }

    fn apply(&self, p: Vector3<f64>) -> Vector3<f64> {
        match self {
            Transform::Translation(v) => p + v,
            Transform::Rotation { center, rotation } => center + rotation * (p - center),
            Transform::Scale { center, factor } => center + (p - center) * *factor,
        }
    }
}
