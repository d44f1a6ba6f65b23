use crate::config::ScanConfig;
use crate::scan::SocketSource;
use crate::scan::shell::CommandRunner;
use crate::types::ListeningSocket;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Numeric TCP listeners, field-tagged output: p<pid>, c<command>, n<address>
const LSOF_ARGS: &[&str] = &["-nP", "-iTCP", "-sTCP:LISTEN", "-Fpcn"];

/// One socket line from lsof before process paths are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsofEntry {
    pub pid: i32,
    pub process_name: String,
    pub port: u16,
}

/// Port of an lsof network name such as `*:3000` or `[::1]:8080 (LISTEN)`
pub fn extract_port(address: &str) -> Option<u16> {
    let without_state = address.split_once(' ').map_or(address, |(addr, _)| addr);
    let (_, port) = without_state.rsplit_once(':')?;
    port.parse().ok()
}

/// Parse `lsof -F pcn` output, keeping the first entry seen for each (pid, port)
pub fn parse_lsof_output(output: &str) -> Vec<LsofEntry> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut current_pid: Option<i32> = None;
    let mut current_command = String::new();

    for line in output.lines() {
        let mut chars = line.chars();
        let Some(tag) = chars.next() else {
            continue;
        };
        let value = chars.as_str();

        match tag {
            'p' => current_pid = value.parse().ok(),
            'c' => current_command = value.to_string(),
            'n' => {
                let (Some(pid), Some(port)) = (current_pid, extract_port(value)) else {
                    log::trace!("[scan::lsof] skipped_line: line={:?}", line);
                    continue;
                };
                if !seen.insert((pid, port)) {
                    continue;
                }
                entries.push(LsofEntry {
                    pid,
                    process_name: current_command.clone(),
                    port,
                });
            }
            _ => {}
        }
    }

    entries
}

/// Lists listening sockets by running lsof, resolving process paths with ps
pub struct LsofEnumerator {
    runner: Arc<dyn CommandRunner>,
    lsof_path: PathBuf,
    ps_path: PathBuf,
}

impl LsofEnumerator {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &ScanConfig) -> Self {
        log::debug!("[scan::lsof] new: lsof={} ps={}", config.lsof_path.display(), config.ps_path.display());
        Self {
            runner,
            lsof_path: config.lsof_path.clone(),
            ps_path: config.ps_path.clone(),
        }
    }

    async fn executable_path(&self, pid: i32) -> Option<String> {
        let args = vec!["-p".to_string(), pid.to_string(), "-o".to_string(), "comm=".to_string()];
        let output = self.runner.run(&self.ps_path, &args).await;
        if !output.success() {
            log::trace!("[scan::lsof] ps_failed: pid={} status={}", pid, output.status);
            return None;
        }
        let value = output.stdout.trim();
        if value.is_empty() { None } else { Some(value.to_string()) }
    }
}

#[async_trait]
impl SocketSource for LsofEnumerator {
    async fn listening_sockets(&self) -> Vec<ListeningSocket> {
        let start = Instant::now();
        let args: Vec<String> = LSOF_ARGS.iter().map(|a| a.to_string()).collect();
        let output = self.runner.run(&self.lsof_path, &args).await;

        if !output.success() {
            log::warn!("[scan::lsof] lsof_failed: status={} stderr={}", output.status, output.stderr.trim());
            return Vec::new();
        }

        let entries = parse_lsof_output(&output.stdout);

        // One ps lookup per pid, remembering misses too
        let mut path_cache: HashMap<i32, Option<String>> = HashMap::new();
        let mut sockets = Vec::with_capacity(entries.len());
        for entry in entries {
            let executable_path = match path_cache.get(&entry.pid) {
                Some(cached) => cached.clone(),
                None => {
                    let resolved = self.executable_path(entry.pid).await;
                    path_cache.insert(entry.pid, resolved.clone());
                    resolved
                }
            };
            sockets.push(ListeningSocket {
                pid: entry.pid,
                process_name: entry.process_name,
                port: entry.port,
                executable_path,
            });
        }

        log::debug!("[scan::lsof] enumeration_completed: sockets={} processes={} duration={}ms",
            sockets.len(), path_cache.len(), start.elapsed().as_millis());

        sockets
    }
}
