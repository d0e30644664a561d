use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("Cannot read mesh file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed mesh file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("Invalid {what} index {index} (count is {count})")]
    InvalidIndex {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("Expected {expected} values, got {provided}")]
    LengthMismatch { expected: usize, provided: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Linear solve failed: {0}")]
    LinearSolve(String),

    #[error("Solver {solver} does not support {operation}")]
    Unsupported {
        solver: &'static str,
        operation: &'static str,
    },

    #[error("Expected {expected} values, got {provided}")]
    LengthMismatch { expected: usize, provided: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("Rank {peer} disconnected")]
    Disconnected { peer: usize },

    #[error("Communication context already initialised")]
    AlreadyInitialized,

    #[error("Communication context already finalised")]
    Finalized,

    #[error("Unexpected message from rank {peer}: expected {expected}")]
    UnexpectedMessage { peer: usize, expected: &'static str },
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Snapshot of zone {provided} sent to the writer of zone {expected}")]
    ZoneMismatch { expected: usize, provided: usize },
}

#[derive(Error, Debug)]
pub enum DeformationError {
    #[error("Invalid {what} index {index} (count is {count})")]
    InvalidIndex {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("Mesh deformation failed: element {element} has corner Jacobian {jacobian:.3e}")]
    MeshDeformationFailure { element: usize, jacobian: f64 },

    #[error("Geometry error: {0}")]
    Geometry(GeometryError),

    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),

    #[error("Deformation containers were already released")]
    Released,

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

impl From<GeometryError> for DeformationError {
    fn from(err: GeometryError) -> Self {
        match err {
            GeometryError::InvalidIndex { what, index, count } => {
                DeformationError::InvalidIndex { what, index, count }
            }
            other => DeformationError::Geometry(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Preprocessing failed for zone {zone}: {reason}")]
    PreprocessingFailure { zone: usize, reason: String },

    #[error("Invalid {what} index {index} (count is {count})")]
    InvalidIndex {
        what: &'static str,
        index: usize,
        count: usize,
    },

    #[error("Mesh deformation failed: element {element} has corner Jacobian {jacobian:.3e}")]
    MeshDeformationFailure { element: usize, jacobian: f64 },

    #[error("Container for zone {zone} was already released")]
    Released { zone: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Comm(#[from] CommError),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Deformation error: {0}")]
    Deformation(String),
}

impl From<DeformationError> for DriverError {
    fn from(err: DeformationError) -> Self {
        match err {
            DeformationError::InvalidIndex { what, index, count } => {
                DriverError::InvalidIndex { what, index, count }
            }
            DeformationError::MeshDeformationFailure { element, jacobian } => {
                DriverError::MeshDeformationFailure { element, jacobian }
            }
            DeformationError::Solver(e) => DriverError::Solver(e),
            DeformationError::Comm(e) => DriverError::Comm(e),
            DeformationError::Output(e) => DriverError::Output(e),
            other => DriverError::Deformation(other.to_string()),
        }
    }
}

impl From<GeometryError> for DriverError {
    fn from(err: GeometryError) -> Self {
        DeformationError::from(err).into()
    }
}
