pub mod cache;
pub mod cli;
pub mod config;
pub mod logging;
pub mod pretty;
pub mod process;
pub mod scan;
pub mod scanner;
pub mod store;
pub mod tui;
pub mod types;

// Re-export key types and functions at the crate root
pub use cache::SnapshotCache;
pub use config::{ProbeBackend, ScanConfig};
pub use logging::{get_log_file_path, init_logging};
pub use scanner::{ScanServers, ServerScanner};
pub use store::{ServerStore, StoreSnapshot};
pub use tui::{TuiApp, init_terminal, restore_terminal};
pub use types::{DiscoveredServer, ListeningSocket, Scheme};
