use std::path::PathBuf;
use std::process::ExitCode;

use multizone_deform::comm::CommSession;
use multizone_deform::config::DEFAULT_CONFIG_FILE;
use multizone_deform::deformation_driver::DeformationDriver;
use multizone_deform::error::DeformationError;
use tracing::{error, info};

fn run(driver: &mut DeformationDriver) -> Result<(), DeformationError> {
    info!(
        algorithm = ?driver.algorithm(),
        "Preprocessing took {:.2}ms",
        driver.preprocessing_time().as_secs_f64() * 1e3
    );
    let quality = driver.run()?;
    info!(min_jacobian = quality.min_jacobian, min_volume = quality.min_volume, "Mesh quality");
    driver.output()
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

    let result = DeformationDriver::new(&config_path, session.communicator()).and_then(|mut driver| {
        let result = run(&mut driver);
        driver.postprocessing();
        result
    });
    session.finalize();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
