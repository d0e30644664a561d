use std::path::PathBuf;
use std::process::ExitCode;

use multizone_deform::comm::CommSession;
use multizone_deform::config::{Config, DEFAULT_CONFIG_FILE};
use multizone_deform::driver::{select_driver, Driver, DriverDescriptor, RunSummary, SimulationDriver};
use multizone_deform::geometry::mesh_io::MeshDocument;
use tracing::{error, info};

fn run(config_path: PathBuf, rank: usize) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let config = Config::from_file(&config_path)?;
    let mesh = MeshDocument::load(&config, rank)?;
    let kind = select_driver(&DriverDescriptor::from_config(&config, mesh.n_zone()))?;
    info!(driver = kind.name(), n_zone = mesh.n_zone(), n_dim = mesh.n_dim(), "Driver selected");

    let geometries = (0..mesh.n_zone())
        .map(|zone| mesh.zone_geometry(zone))
        .collect::<Result<Vec<_>, _>>()?;
    let mut driver = SimulationDriver::from_parts(kind, config, geometries)?;

    let result = driver.start_solver();
    // Containers are released even when the run failed.
    let released = driver.postprocessing();
    let summary = result?;
    released?;
    Ok(summary)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);

    let session = match CommSession::init() {
        Ok(session) => session,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let result = run(config_path, session.info().rank);
    session.finalize();

    match result {
        Ok(summary) => {
            info!(
                iterations = summary.iterations,
                residual = summary.residual,
                converged = summary.converged,
                "Simulation finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
