use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::config::OutputConfig;
use crate::error::OutputError;
use crate::geometry::mesh_io::{MeshDocument, ZoneMesh};
use crate::geometry::Geometry;

/// Snapshot of one zone after an outer iteration.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ZoneState {
    pub iteration: usize,
    pub residual: f64,
    /// Set on the final iteration of a run.
    #[serde(skip)]
    pub last: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scalar: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub displacement: Option<Vec<[f64; 3]>>,
}

pub trait Output: Send {
    fn write(&mut self, zone: usize, state: &ZoneState) -> Result<(), OutputError>;
    fn flush(&mut self) -> Result<(), OutputError>;
}

/// Output when no directory is configured.
#[derive(Debug, Default)]
pub struct NullOutput;

impl Output for NullOutput {
    fn write(&mut self, _zone: usize, _state: &ZoneState) -> Result<(), OutputError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

#[derive(Serialize, Debug)]
struct Metadata<'a> {
    zone: usize,
    solver: &'a str,
    n_point: usize,
    output_frequency: Option<usize>,
}

#[derive(Serialize, Debug)]
struct ZoneHistory<'a> {
    metadata: Metadata<'a>,
    data: &'a [ZoneState],
}

/// Collects zone snapshots and writes them as one JSON document on flush.
#[derive(Debug)]
pub struct JsonOutput {
    pub output_filepath: PathBuf,
    pub output_frequency: Option<usize>,
    pub collected_data: Vec<ZoneState>,
    pub zone: usize,
    pub solver: &'static str,
    pub n_point: usize,
}

impl JsonOutput {
    pub fn new(
        output_filepath: PathBuf,
        output_frequency: Option<usize>,
        zone: usize,
        solver: &'static str,
        n_point: usize,
    ) -> Result<Self, OutputError> {
        if let Some(parent_dir) = output_filepath.parent() {
            fs::create_dir_all(parent_dir)?;
            info!("Ensured output directory exists: {}", parent_dir.display());
        }
        Ok(Self {
            output_filepath,
            output_frequency,
            collected_data: Vec::new(),
            zone,
            solver,
            n_point,
        })
    }

    pub fn should_collect(&self, iteration: usize, is_last: bool) -> bool {
        match self.output_frequency {
            Some(0) => iteration == 0 || is_last,
            Some(freq) => iteration == 0 || iteration % freq == 0 || is_last,
            None => true,
        }
    }
}

impl Output for JsonOutput {
    fn write(&mut self, zone: usize, state: &ZoneState) -> Result<(), OutputError> {
        if zone != self.zone {
            return Err(OutputError::ZoneMismatch { expected: self.zone, provided: zone });
        }
        if self.should_collect(state.iteration, state.last) {
            self.collected_data.push(state.clone());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), OutputError> {
        if self.collected_data.is_empty() {
            info!("No data collected, skipping JSON output to {}.", self.output_filepath.display());
            return Ok(());
        }
        let output_start = Instant::now();
        let history = ZoneHistory {
            metadata: Metadata {
                zone: self.zone,
                solver: self.solver,
                n_point: self.n_point,
                output_frequency: self.output_frequency,
            },
            data: &self.collected_data,
        };
        let json_string = serde_json::to_string_pretty(&history)?;
        let mut writer = BufWriter::new(File::create(&self.output_filepath)?);
        writer.write_all(json_string.as_bytes())?;
        writer.flush()?;
        info!(
            "Zone {} output written to {} in {}ms",
            self.zone,
            self.output_filepath.display(),
            output_start.elapsed().as_millis()
        );
        self.collected_data.clear();
        Ok(())
    }
}

/// Output for `zone`, or [`NullOutput`] when output is disabled.
pub fn zone_output(
    config: &OutputConfig,
    base_dir: &Path,
    zone: usize,
    solver: &'static str,
    n_point: usize,
) -> Result<Box<dyn Output>, OutputError> {
    match &config.directory {
        Some(dir) => {
            let path = base_dir.join(dir).join(format!("zone_{zone}.json"));
            Ok(Box::new(JsonOutput::new(path, config.frequency, zone, solver, n_point)?))
        }
        None => Ok(Box::new(NullOutput)),
    }
}

/// Writes a deformed zone back as a mesh document.
#[derive(Debug, Clone)]
pub struct MeshWriter {
    pub path: PathBuf,
}

impl MeshWriter {
    /// Resolves the target file from the output settings; a rank suffix is
    /// added when several ranks write.
    pub fn new(config: &OutputConfig, base_dir: &Path, rank: usize, size: usize) -> Self {
        let dir = config.directory.as_ref().map_or_else(|| base_dir.to_path_buf(), |d| base_dir.join(d));
        let name = if size > 1 {
            let stem = Path::new(&config.mesh_filename)
                .file_stem()
                .map_or_else(|| "deformed_mesh".to_string(), |s| s.to_string_lossy().into_owned());
            format!("{stem}_{rank}.json")
        } else {
            config.mesh_filename.clone()
        };
        Self { path: dir.join(name) }
    }

    pub fn write(&self, geometry: &Geometry) -> Result<(), OutputError> {
        let document = MeshDocument {
            dim: geometry.n_dim,
            zones: vec![ZoneMesh::from_geometry(geometry)],
        };
        document.write(&self.path)?;
        info!(path = %self.path.display(), "Deformed mesh written");
        Ok(())
    }
}
