use crate::cli::args::Args;
use crate::core::bridge::{Bridge, BridgeStats};
use crate::domain::config::BridgeConfig;
use crate::domain::error::BridgeResult;
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::daemon;
use crate::infrastructure::logging::init_logging;
use tracing::{error, info, warn};

/// Run the bridge described by the configuration file and `args`
///
/// Returns once a termination signal has been handled. Errors raised after logging is
/// up are logged before being returned.
pub fn execute(args: Args) -> BridgeResult<BridgeStats> {
    let manager = ConfigManager::new(args.config.clone());
    let mut file = manager.load()?;
    args.apply_to(&mut file);

    let _guard = init_logging(file.debug, file.log_file.as_deref())?;
    if let Some(path) = manager.config_path().filter(|path| path.exists()) {
        info!(path = %path.display(), "Loaded configuration");
    }

    let detach = file.daemon;
    let result = ConfigManager::resolve(file).and_then(|config| run(&config, detach));
    result.map_err(|e| {
        error!(exit_code = e.exit_code(), "{}", e);
        e
    })
}

/// Opens the device and the peer side, then detaches if asked and serves.
///
/// Startup failures are reported before stderr is pointed at `/dev/null`.
fn run(config: &BridgeConfig, detach: bool) -> BridgeResult<BridgeStats> {
    info!(
        device = %config.device.display(),
        mode = %config.mode,
        max_connections = config.max_connections,
        "Starting bridge"
    );
    let mut bridge = Bridge::from_config(config)?;

    if detach {
        if let Err(e) = daemon::detach() {
            warn!(error = %e, "Couldn't detach from terminal");
        }
    }

    bridge.handle_signals()?;
    bridge.run()
}
