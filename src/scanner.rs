use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use crate::config::ScanConfig;
use crate::scan::{CommandRunner, LsofEnumerator, Prober, SocketSource, create_prober};
use crate::types::{DiscoveredServer, sort_servers};

/// One complete enumerate, probe, sort pass
#[async_trait]
pub trait ScanServers: Send + Sync {
    /// Always returns a fully sorted list; failures only shrink it
    async fn find_web_servers(&self) -> Vec<DiscoveredServer>;
}

pub struct ServerScanner<S, P> {
    sockets: S,
    prober: P,
    max_concurrent: usize,
}

impl<S: SocketSource, P: Prober> ServerScanner<S, P> {
    pub fn new(sockets: S, prober: P, max_concurrent: usize) -> Self {
        log::debug!("[scanner] new: max_concurrent={}", max_concurrent);
        Self {
            sockets,
            prober,
            max_concurrent: max_concurrent.max(1),
        }
    }
}

impl ServerScanner<Arc<dyn SocketSource>, Arc<dyn Prober>> {
    /// lsof enumeration plus the configured probe backend
    pub fn from_config(config: &ScanConfig, runner: Arc<dyn CommandRunner>) -> eyre::Result<Self> {
        let sockets: Arc<dyn SocketSource> = Arc::new(LsofEnumerator::new(runner.clone(), config));
        let prober = create_prober(config, runner)?;
        Ok(Self::new(sockets, prober, config.max_concurrent))
    }
}

#[async_trait]
impl<S: SocketSource, P: Prober> ScanServers for ServerScanner<S, P> {
    async fn find_web_servers(&self) -> Vec<DiscoveredServer> {
        let scan_start = Instant::now();
        let listeners = self.sockets.listening_sockets().await;
        if listeners.is_empty() {
            log::debug!("[scanner] no_listeners");
            return Vec::new();
        }

        let candidates = listeners.len();
        log::debug!("[scanner] probing: candidates={} concurrency={}", candidates, self.max_concurrent);

        let found = Mutex::new(Vec::with_capacity(candidates));
        stream::iter(listeners)
            .for_each_concurrent(self.max_concurrent, |socket| {
                let found = &found;
                async move {
                    let Some(probe) = self.prober.probe(socket.port).await else {
                        return;
                    };
                    let server = DiscoveredServer {
                        pid: socket.pid,
                        process_name: socket.process_name,
                        port: socket.port,
                        scheme: probe.scheme,
                        page_title: probe.page_title,
                        executable_path: socket.executable_path,
                    };
                    found.lock().unwrap_or_else(PoisonError::into_inner).push(server);
                }
            })
            .await;

        let mut servers = found.into_inner().unwrap_or_else(PoisonError::into_inner);
        sort_servers(&mut servers);

        log::info!("[scanner] scan_completed: candidates={} servers={} duration={}ms",
            candidates, servers.len(), scan_start.elapsed().as_millis());

        servers
    }
}
