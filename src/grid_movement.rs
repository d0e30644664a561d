//! Mesh movement: surface definitions produce boundary targets, volumetric
//! strategies carry them into the interior.

pub mod surface;
pub mod volumetric;

pub use surface::SurfaceMovement;
pub use volumetric::{deform_mesh, volumetric_movement, ElasticityMovement, LegacyMovement, VolumetricMovement};
