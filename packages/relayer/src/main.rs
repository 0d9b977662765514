use bridge_relayer::config::{self, BootstrapConfig};
use bridge_relayer::logging::init_logging;
use bridge_relayer::orchestrator::{self, RunExit};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    config::load_dotenv()?;
    let bootstrap = BootstrapConfig::from_env();
    init_logging(bootstrap.log_file.as_deref())?;

    tracing::info!("Starting bridge relayer run");

    // Single thread of control; every RPC call is awaited in sequence
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match runtime.block_on(orchestrator::execute(&bootstrap)) {
        Ok(RunExit::Completed(_)) | Ok(RunExit::LeaseHeld) => Ok(()),
        Err(e) => {
            tracing::error!(error = ?e, "Relayer run failed");
            Err(e)
        }
    }
}
