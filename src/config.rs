//! Problem configuration.
//!
//! A configuration file is a JSON document. Every field has a default, so the
//! smallest useful file only names the solver and the mesh:
//!
//! ```json
//! { "solver": "heat", "mesh_file": "plate.json" }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Configuration file read when the entry point gets no argument.
pub const DEFAULT_CONFIG_FILE: &str = "default.cfg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Euler,
    NavierStokes,
    Rans,
    FemElasticity,
    Poisson,
    Wave,
    Heat,
}

impl SolverKind {
    pub const ALL: [SolverKind; 7] = [
        SolverKind::Euler,
        SolverKind::NavierStokes,
        SolverKind::Rans,
        SolverKind::FemElasticity,
        SolverKind::Poisson,
        SolverKind::Wave,
        SolverKind::Heat,
    ];

    /// Solver kinds that only run on a single zone.
    pub fn is_single_zone_only(self) -> bool {
        matches!(
            self,
            SolverKind::FemElasticity | SolverKind::Poisson | SolverKind::Wave | SolverKind::Heat
        )
    }

    pub fn is_structural(self) -> bool {
        self == SolverKind::FemElasticity
    }

    pub fn name(self) -> &'static str {
        match self {
            SolverKind::Euler => "euler",
            SolverKind::NavierStokes => "navier_stokes",
            SolverKind::Rans => "rans",
            SolverKind::FemElasticity => "fem_elasticity",
            SolverKind::Poisson => "poisson",
            SolverKind::Wave => "wave",
            SolverKind::Heat => "heat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsteadyMode {
    #[default]
    Steady,
    HarmonicBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeformationAlgorithm {
    /// Linear-elasticity mesh solver.
    #[default]
    LinearElasticity,
    /// Direct interpolation of boundary displacement, no solve.
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StiffnessModel {
    /// Young's modulus of each element is the inverse of its volume, so small
    /// elements near the moving boundary deform less.
    #[default]
    InverseVolume,
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshFormat {
    #[default]
    Json,
}

/// A prescribed movement of one boundary marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SurfaceDeformation {
    Translation {
        marker: String,
        vector: [f64; 3],
    },
    Rotation {
        marker: String,
        center: [f64; 3],
        axis: [f64; 3],
        angle_deg: f64,
    },
    Scale {
        marker: String,
        center: [f64; 3],
        factor: f64,
    },
}

impl SurfaceDeformation {
    pub fn marker(&self) -> &str {
        match self {
            SurfaceDeformation::Translation { marker, .. }
            | SurfaceDeformation::Rotation { marker, .. }
            | SurfaceDeformation::Scale { marker, .. } => marker,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkerConfig {
    /// Fixed scalar values for diffusion-type solvers, by marker tag.
    pub dirichlet: BTreeMap<String, f64>,
    /// Markers whose vertices drive the mesh deformation.
    pub deform: Vec<String>,
    /// Markers shared by the fluid and structural zones of an FSI problem.
    pub fsi_interface: Vec<String>,
    /// Structural markers with zero displacement.
    pub clamped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeformationConfig {
    pub algorithm: DeformationAlgorithm,
    /// Number of load steps the displacement is split into.
    pub increments: usize,
    pub stiffness: StiffnessModel,
    pub poisson_ratio: f64,
    /// Distance exponent of the legacy interpolation weights.
    pub idw_exponent: f64,
    pub surface: Vec<SurfaceDeformation>,
}

impl Default for DeformationConfig {
    fn default() -> Self {
        Self {
            algorithm: DeformationAlgorithm::LinearElasticity,
            increments: 1,
            stiffness: StiffnessModel::InverseVolume,
            poisson_ratio: 0.3,
            idw_exponent: 3.0,
            surface: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StructureConfig {
    pub youngs_modulus: f64,
    pub poisson_ratio: f64,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            youngs_modulus: 1.0e4,
            poisson_ratio: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FsiConfig {
    /// Under-relaxation of the interface displacement.
    pub relaxation: f64,
    /// Fluid iterations per coupling iteration.
    pub fluid_iterations: usize,
}

impl Default for FsiConfig {
    fn default() -> Self {
        Self {
            relaxation: 0.5,
            fluid_iterations: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Output is disabled when no directory is given.
    pub directory: Option<PathBuf>,
    /// Snapshot every `frequency` iterations; `Some(0)` keeps only the first
    /// and last, `None` keeps all.
    pub frequency: Option<usize>,
    pub mesh_filename: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: None,
            frequency: Some(0),
            mesh_filename: "deformed_mesh.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub solver: SolverKind,
    pub unsteady_mode: UnsteadyMode,
    /// Harmonic-balance time instances per geometric zone.
    pub time_instances: usize,
    /// Harmonic-balance period.
    pub hb_period: f64,
    pub fsi_simulation: bool,
    /// Mesh path, relative to the configuration file. `{rank}` is replaced
    /// by the rank of the reading process.
    pub mesh_file: String,
    pub mesh_format: MeshFormat,
    pub max_iterations: usize,
    pub convergence_tolerance: f64,
    /// Under-relaxation of the scalar zone solvers.
    pub relaxation: f64,
    pub markers: MarkerConfig,
    pub deformation: DeformationConfig,
    pub structure: StructureConfig,
    pub fsi_coupling: FsiConfig,
    pub output: OutputConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            solver: SolverKind::Euler,
            unsteady_mode: UnsteadyMode::Steady,
            time_instances: 1,
            hb_period: 1.0,
            fsi_simulation: false,
            mesh_file: "mesh.json".to_string(),
            mesh_format: MeshFormat::Json,
            max_iterations: 100,
            convergence_tolerance: 1e-8,
            relaxation: 1.0,
            markers: MarkerConfig::default(),
            deformation: DeformationConfig::default(),
            structure: StructureConfig::default(),
            fsi_coupling: FsiConfig::default(),
            output: OutputConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_json_str(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        debug!(path = %path.display(), solver = config.solver.name(), "Configuration loaded");
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue("max_iterations must be positive".to_string()));
        }
        if !(self.convergence_tolerance >= 0.0) {
            return Err(ConfigError::InvalidValue(
                "convergence_tolerance must be non-negative".to_string(),
            ));
        }
        if !(self.hb_period > 0.0) {
            return Err(ConfigError::InvalidValue("hb_period must be positive".to_string()));
        }
        if !(self.relaxation > 0.0 && self.relaxation <= 1.0) {
            return Err(ConfigError::InvalidValue("relaxation must be in (0, 1]".to_string()));
        }
        if !(self.fsi_coupling.relaxation > 0.0 && self.fsi_coupling.relaxation <= 1.0) {
            return Err(ConfigError::InvalidValue(
                "fsi_coupling.relaxation must be in (0, 1]".to_string(),
            ));
        }
        if self.deformation.increments == 0 {
            return Err(ConfigError::InvalidValue(
                "deformation.increments must be at least 1".to_string(),
            ));
        }
        for (name, nu) in [
            ("deformation.poisson_ratio", self.deformation.poisson_ratio),
            ("structure.poisson_ratio", self.structure.poisson_ratio),
        ] {
            if !(-1.0 < nu && nu < 0.5) {
                return Err(ConfigError::InvalidValue(format!("{name} must be in (-1, 0.5)")));
            }
        }
        if !(self.structure.youngs_modulus > 0.0) {
            return Err(ConfigError::InvalidValue(
                "structure.youngs_modulus must be positive".to_string(),
            ));
        }
        if !(self.deformation.idw_exponent > 0.0) {
            return Err(ConfigError::InvalidValue(
                "deformation.idw_exponent must be positive".to_string(),
            ));
        }
        for surface in &self.deformation.surface {
            if !self.markers.deform.iter().any(|tag| tag == surface.marker()) {
                return Err(ConfigError::InvalidValue(format!(
                    "surface deformation targets marker '{}' which is not in markers.deform",
                    surface.marker()
                )));
            }
        }
        Ok(())
    }

    /// Mesh file path seen by `rank`.
    pub fn mesh_path(&self, rank: usize) -> PathBuf {
        let name = self.mesh_file.replace("{rank}", &rank.to_string());
        self.base_dir.join(name)
    }

    pub fn is_deform_marker(&self, tag: &str) -> bool {
        self.markers.deform.iter().any(|t| t == tag)
    }
}
