use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ProbeBackend, ScanConfig};

#[derive(Parser, Debug)]
#[command(name = "garcon")]
#[command(about = "Find the web servers running on this machine", version)]
pub struct Cli {
    /// Print one scan and exit instead of starting the TUI
    #[arg(long)]
    pub no_tui: bool,

    /// Print the scan as JSON (implies --no-tui)
    #[arg(long)]
    pub json: bool,

    /// Include system-classified servers in printed output
    #[arg(short, long)]
    pub all: bool,

    /// Send SIGTERM to a process and exit
    #[arg(long, value_name = "PID")]
    pub kill: Option<i32>,

    /// Maximum probes in flight at once
    #[arg(short, long, default_value = "6")]
    pub concurrency: usize,

    /// Per-attempt probe timeout in milliseconds
    #[arg(short, long, default_value = "700")]
    pub timeout_ms: u64,

    /// How ports are probed
    #[arg(long, value_enum, default_value = "curl")]
    pub backend: ProbeBackend,

    /// Snapshot file location
    #[arg(long, value_name = "FILE")]
    pub cache_file: Option<PathBuf>,

    /// Neither read nor write the snapshot file
    #[arg(long)]
    pub no_cache: bool,

    /// Path to lsof
    #[arg(long, value_name = "PATH")]
    pub lsof: Option<PathBuf>,

    /// Path to ps
    #[arg(long, value_name = "PATH")]
    pub ps: Option<PathBuf>,

    /// Path to curl
    #[arg(long, value_name = "PATH")]
    pub curl: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn interactive(&self) -> bool {
        !(self.no_tui || self.json)
    }

    pub fn scan_config(&self) -> ScanConfig {
        let mut config = ScanConfig::default()
            .with_concurrency(self.concurrency)
            .with_probe_timeout(Duration::from_millis(self.timeout_ms))
            .with_backend(self.backend);

        if self.no_cache {
            config = config.with_cache_file(None);
        } else if let Some(path) = &self.cache_file {
            config = config.with_cache_file(Some(path.clone()));
        }
        if let Some(path) = &self.lsof {
            config.lsof_path = path.clone();
        }
        if let Some(path) = &self.ps {
            config.ps_path = path.clone();
        }
        if let Some(path) = &self.curl {
            config.curl_path = path.clone();
        }
        config
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_scan_config() {
        let cli = Cli::try_parse_from(["garcon"]).unwrap();
        assert!(cli.interactive());
        let config = cli.scan_config();
        let defaults = ScanConfig::default();
        assert_eq!(config.max_concurrent, defaults.max_concurrent);
        assert_eq!(config.probe_timeout, defaults.probe_timeout);
        assert_eq!(config.backend, ProbeBackend::Curl);
        assert_eq!(config.cache_file, defaults.cache_file);
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::try_parse_from([
            "garcon", "--json", "-c", "12", "-t", "1500", "--backend", "native",
            "--curl", "/opt/bin/curl", "--cache-file", "/tmp/g.json",
        ]).unwrap();
        assert!(!cli.interactive());
        let config = cli.scan_config();
        assert_eq!(config.max_concurrent, 12);
        assert_eq!(config.probe_timeout, Duration::from_millis(1500));
        assert_eq!(config.backend, ProbeBackend::Native);
        assert_eq!(config.curl_path, PathBuf::from("/opt/bin/curl"));
        assert_eq!(config.cache_file, Some(PathBuf::from("/tmp/g.json")));
    }

    #[test]
    fn test_no_cache_wins() {
        let cli = Cli::try_parse_from(["garcon", "--no-cache", "--cache-file", "/tmp/x.json"]).unwrap();
        assert_eq!(cli.scan_config().cache_file, None);
    }

    #[test]
    fn test_kill_flag() {
        let cli = Cli::try_parse_from(["garcon", "--kill", "4242"]).unwrap();
        assert_eq!(cli.kill, Some(4242));
    }
}
