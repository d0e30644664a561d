//! JSON mesh documents.
//!
//! ```json
//! {
//!   "dim": 2,
//!   "zones": [{
//!     "points": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
//!     "elements": [{ "kind": "triangle", "nodes": [0, 1, 2] }],
//!     "markers": [{ "tag": "wall", "kind": "wall",
//!                   "elements": [{ "kind": "line", "nodes": [0, 1] }] }],
//!     "global_index": [10, 11, 12],
//!     "halo_points": [2]
//!   }]
//! }
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::element::ElementKind;
use super::{BoundaryElement, Element, Geometry, MarkerKind, Point};
use crate::config::{Config, MeshFormat};
use crate::error::{GeometryError, OutputError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    pub kind: ElementKind,
    pub nodes: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub tag: String,
    #[serde(default)]
    pub kind: MarkerKind,
    pub elements: Vec<ElementRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMesh {
    pub points: Vec<Vec<f64>>,
    pub elements: Vec<ElementRecord>,
    #[serde(default)]
    pub markers: Vec<MarkerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_index: Option<Vec<u64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub halo_points: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshDocument {
    pub dim: usize,
    pub zones: Vec<ZoneMesh>,
}

impl MeshDocument {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, GeometryError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| GeometryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let document: MeshDocument = serde_json::from_str(&text)?;
        if document.zones.is_empty() {
            return Err(GeometryError::InvalidMesh(format!("{} has no zones", path.display())));
        }
        info!(path = %path.display(), n_zone = document.zones.len(), n_dim = document.dim, "Mesh file read");
        Ok(document)
    }

    /// Reads the mesh seen by `rank` in the configured format.
    pub fn load(config: &Config, rank: usize) -> Result<Self, GeometryError> {
        match config.mesh_format {
            MeshFormat::Json => Self::read(config.mesh_path(rank)),
        }
    }

    pub fn n_zone(&self) -> usize {
        self.zones.len()
    }

    pub fn n_dim(&self) -> usize {
        self.dim
    }

    pub fn zone_geometry(&self, i_zone: usize) -> Result<Geometry, GeometryError> {
        let zone = self.zones.get(i_zone).ok_or(GeometryError::InvalidIndex {
            what: "zone",
            index: i_zone,
            count: self.zones.len(),
        })?;
        zone.to_geometry(self.dim)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), OutputError> {
        let path = path.as_ref();
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir)?;
        }
        let json_string = serde_json::to_string_pretty(self)?;
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(json_string.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

impl ZoneMesh {
    pub fn to_geometry(&self, n_dim: usize) -> Result<Geometry, GeometryError> {
        if n_dim != 2 && n_dim != 3 {
            return Err(GeometryError::InvalidMesh(format!("dimension must be 2 or 3, got {n_dim}")));
        }
        if let Some(ids) = &self.global_index {
            if ids.len() != self.points.len() {
                return Err(GeometryError::LengthMismatch {
                    expected: self.points.len(),
                    provided: ids.len(),
                });
            }
        }
        let mut points = Vec::with_capacity(self.points.len());
        for (i, xyz) in self.points.iter().enumerate() {
            if xyz.len() != n_dim {
                return Err(GeometryError::InvalidMesh(format!(
                    "point {i} has {} coordinates, expected {n_dim}",
                    xyz.len()
                )));
            }
            let c = Vector3::new(xyz[0], xyz[1], if n_dim == 3 { xyz[2] } else { 0.0 });
            let global_index = self.global_index.as_ref().map_or(i as u64, |ids| ids[i]);
            points.push(Point { coord: c, reference: c, global_index, domain: true });
        }
        for &halo in &self.halo_points {
            let count = points.len();
            points
                .get_mut(halo)
                .ok_or(GeometryError::InvalidIndex { what: "halo point", index: halo, count })?
                .domain = false;
        }

        let elements = self
            .elements
            .iter()
            .enumerate()
            .map(|(i, e)| Element {
                kind: e.kind,
                nodes: e.nodes.clone(),
                global_index: e.id.unwrap_or(i as u64),
            })
            .collect();
        let markers = self
            .markers
            .iter()
            .map(|m| {
                let elems = m
                    .elements
                    .iter()
                    .enumerate()
                    .map(|(i, e)| BoundaryElement {
                        kind: e.kind,
                        nodes: e.nodes.clone(),
                        global_index: e.id.unwrap_or(i as u64),
                    })
                    .collect();
                (m.tag.clone(), m.kind, elems)
            })
            .collect();

        Geometry::new(n_dim, points, elements, markers)
    }

    /// Snapshot of a geometry at its current coordinates.
    pub fn from_geometry(geometry: &Geometry) -> Self {
        let n_dim = geometry.n_dim;
        Self {
            points: geometry
                .points
                .iter()
                .map(|p| p.coord.iter().take(n_dim).copied().collect())
                .collect(),
            elements: geometry
                .elements
                .iter()
                .map(|e| ElementRecord { kind: e.kind, nodes: e.nodes.clone(), id: Some(e.global_index) })
                .collect(),
            markers: geometry
                .markers
                .iter()
                .map(|m| MarkerRecord {
                    tag: m.tag.clone(),
                    kind: m.kind,
                    elements: m
                        .elements
                        .iter()
                        .map(|e| ElementRecord { kind: e.kind, nodes: e.nodes.clone(), id: Some(e.global_index) })
                        .collect(),
                })
                .collect(),
            global_index: Some(geometry.points.iter().map(|p| p.global_index).collect()),
            halo_points: geometry
                .points
                .iter()
                .enumerate()
                .filter(|(_, p)| !p.domain)
                .map(|(i, _)| i)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::structured::{rectangle, CellSize2D, GridDimensions2D};
    use tempfile::tempdir;

    const TRIANGLE: &str = r#"{
        "dim": 2,
        "zones": [{
            "points": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
            "elements": [{ "kind": "triangle", "nodes": [0, 1, 2] }],
            "markers": [{ "tag": "wall", "elements": [{ "kind": "line", "nodes": [0, 1] }] }],
            "global_index": [10, 11, 12],
            "halo_points": [2]
        }]
    }"#;

    #[test]
    fn test_parse_zone() {
        let document: MeshDocument = serde_json::from_str(TRIANGLE).unwrap();
        let geometry = document.zone_geometry(0).unwrap();
        assert_eq!(geometry.n_point(), 3);
        assert_eq!(geometry.points[1].global_index, 11);
        assert!(!geometry.points[2].domain);
        assert_eq!(geometry.n_halo_points(), 1);
        assert_eq!(geometry.markers[0].kind, MarkerKind::Wall);
        assert!(matches!(document.zone_geometry(1), Err(GeometryError::InvalidIndex { .. })));
    }

    #[test]
    fn test_point_dimension_mismatch() {
        let text = TRIANGLE.replace("[0.0, 1.0]]", "[0.0, 1.0, 2.0]]");
        let document: MeshDocument = serde_json::from_str(&text).unwrap();
        assert!(matches!(document.zone_geometry(0), Err(GeometryError::InvalidMesh(_))));
    }

    #[test]
    fn test_unsupported_dimension_is_invalid_mesh() {
        for dim in [1, 4] {
            let text = format!(r#"{{"dim":{dim},"zones":[{{"points":[[0.0],[1.0]],"elements":[]}}]}}"#);
            let document: MeshDocument = serde_json::from_str(&text).unwrap();
            assert!(matches!(document.zone_geometry(0), Err(GeometryError::InvalidMesh(_))));
        }
    }

    #[test]
    fn test_load_uses_configured_format() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("part_0.json"), TRIANGLE)?;
        let mut config = Config::default();
        config.mesh_file = "part_{rank}.json".to_string();
        config.base_dir = dir.path().to_path_buf();
        assert_eq!(config.mesh_format, MeshFormat::Json);

        let document = MeshDocument::load(&config, 0)?;
        assert_eq!(document.n_zone(), 1);
        assert!(matches!(MeshDocument::load(&config, 1), Err(GeometryError::Io { .. })));
        Ok(())
    }

    #[test]
    fn test_write_then_read_preserves_geometry() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("out").join("mesh.json");
        let geometry = rectangle(GridDimensions2D(2, 3), CellSize2D(0.5, 0.5))?;
        let document = MeshDocument { dim: 2, zones: vec![ZoneMesh::from_geometry(&geometry)] };
        document.write(&path)?;

        let read_back = MeshDocument::read(&path)?.zone_geometry(0)?;
        assert_eq!(read_back, geometry);
        Ok(())
    }

    #[test]
    fn test_read_missing_file() {
        assert!(matches!(MeshDocument::read("/nonexistent/mesh.json"), Err(GeometryError::Io { .. })));
    }
}
