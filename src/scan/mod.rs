pub mod http;
pub mod lsof;
pub mod shell;

pub use http::{CurlProber, NativeProber, extract_title};
pub use lsof::{LsofEnumerator, extract_port, parse_lsof_output};
pub use shell::{CommandOutput, CommandRunner, Shell};

use crate::config::{ProbeBackend, ScanConfig};
use crate::types::{ListeningSocket, Scheme};
use async_trait::async_trait;
use std::sync::Arc;

/// What a successful probe learned about a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerProbe {
    pub scheme: Scheme,
    pub page_title: Option<String>,
}

/// Source of candidate sockets for one scan
#[async_trait]
pub trait SocketSource: Send + Sync {
    /// Never fails; a broken backend yields an empty list
    async fn listening_sockets(&self) -> Vec<ListeningSocket>;
}

/// Decides whether something HTTP-shaped answers on a local port
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, port: u16) -> Option<ServerProbe>;
}

#[async_trait]
impl<T: SocketSource + ?Sized> SocketSource for Arc<T> {
    async fn listening_sockets(&self) -> Vec<ListeningSocket> {
        (**self).listening_sockets().await
    }
}

#[async_trait]
impl<T: Prober + ?Sized> Prober for Arc<T> {
    async fn probe(&self, port: u16) -> Option<ServerProbe> {
        (**self).probe(port).await
    }
}

/// Build the prober selected in the config
pub fn create_prober(config: &ScanConfig, runner: Arc<dyn CommandRunner>) -> eyre::Result<Arc<dyn Prober>> {
    log::debug!("[scan] create_prober: backend={:?}", config.backend);
    let prober: Arc<dyn Prober> = match config.backend {
        ProbeBackend::Curl => Arc::new(CurlProber::new(runner, config)),
        ProbeBackend::Native => Arc::new(NativeProber::new(config)?),
    };
    Ok(prober)
}
