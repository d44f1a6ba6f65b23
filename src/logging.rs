use log::LevelFilter;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

const APP_NAME: &str = "garcon";
const LOG_FILE_NAME: &str = "garcon.log";

/// Initialize logging to a system-specific log file.
///
/// The level comes from `RUST_LOG` (default info) unless `verbose` forces debug.
pub fn init_logging(verbose: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_path = get_log_file_path()?;

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let log_level = if verbose {
        LevelFilter::Debug
    } else {
        level_from_env(std::env::var("RUST_LOG").ok().as_deref())
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)?
        )))
        .try_init()?;

    log::info!("Logging initialized to: {}", log_path.display());
    log::info!("Log level: {}", log_level);

    Ok(log_path)
}

fn level_from_env(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Get the system-specific log file path
pub fn get_log_file_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_dir = if cfg!(target_os = "macos") {
        // macOS: ~/Library/Logs/garcon/
        dirs::home_dir()
            .ok_or("Could not find home directory")?
            .join("Library")
            .join("Logs")
            .join(APP_NAME)
    } else if cfg!(target_os = "linux") && nix::unistd::getuid().is_root() {
        PathBuf::from("/var/log").join(APP_NAME)
    } else {
        // ~/.local/share/garcon/logs/ and friends
        dirs::data_local_dir()
            .ok_or("Could not find local data directory")?
            .join(APP_NAME)
            .join("logs")
    };

    Ok(log_dir.join(LOG_FILE_NAME))
}
