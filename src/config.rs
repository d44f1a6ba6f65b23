use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LSOF_PATH: &str = "/usr/sbin/lsof";
const DEFAULT_PS_PATH: &str = "/bin/ps";
const DEFAULT_CURL_PATH: &str = "/usr/bin/curl";
const DEFAULT_MAX_CONCURRENT_PROBES: usize = 6;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 700;
const DEFAULT_BODY_LIMIT_BYTES: usize = 32 * 1024;
const DEFAULT_KILL_RESCAN_DELAY_MS: u64 = 350;

/// Which probe implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProbeBackend {
    /// Shell out to curl
    Curl,
    /// In-process HTTP client
    Native,
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub lsof_path: PathBuf,
    pub ps_path: PathBuf,
    pub curl_path: PathBuf,
    pub max_concurrent: usize,
    pub probe_timeout: Duration,
    pub body_limit: usize,
    pub backend: ProbeBackend,
    pub kill_rescan_delay: Duration,
    /// None disables the on-disk snapshot
    pub cache_file: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            lsof_path: PathBuf::from(DEFAULT_LSOF_PATH),
            ps_path: PathBuf::from(DEFAULT_PS_PATH),
            curl_path: PathBuf::from(DEFAULT_CURL_PATH),
            max_concurrent: DEFAULT_MAX_CONCURRENT_PROBES,
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            body_limit: DEFAULT_BODY_LIMIT_BYTES,
            backend: ProbeBackend::Curl,
            kill_rescan_delay: Duration::from_millis(DEFAULT_KILL_RESCAN_DELAY_MS),
            cache_file: crate::cache::default_cache_path(),
        }
    }
}

impl ScanConfig {
    pub fn with_concurrency(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_backend(mut self, backend: ProbeBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_cache_file(mut self, cache_file: Option<PathBuf>) -> Self {
        self.cache_file = cache_file;
        self
    }

    pub fn with_kill_rescan_delay(mut self, delay: Duration) -> Self {
        self.kill_rescan_delay = delay;
        self
    }

    /// Probe timeout as curl expects it for --max-time
    pub fn max_time_arg(&self) -> String {
        let secs = self.probe_timeout.as_secs_f64();
        let rendered = format!("{:.3}", secs);
        rendered.trim_end_matches('0').trim_end_matches('.').to_string()
    }

    /// Byte range covering the first body_limit bytes
    pub fn range_arg(&self) -> String {
        format!("0-{}", self.body_limit.saturating_sub(1))
    }
}
