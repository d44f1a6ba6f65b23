use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Process names that always belong to an OS extension
const SYSTEM_PROCESS_NAMES: &[&str] = &["ipnextension"];

/// Apps whose embedded helper servers are never interesting
const DENYLISTED_APPS: &[&str] = &["figma"];

const SYSTEM_PATH_PREFIXES: &[&str] = &[
    "/system/",
    "/usr/libexec/",
    "/usr/sbin/",
    "/sbin/",
    "/library/systemextensions/",
];

const APP_EXTENSION_SEGMENT: &str = ".appex/";

/// Runtime names recognised in a process name, highest priority first
const KNOWN_RUNTIMES: &[&str] = &[
    "node", "python", "ruby", "php", "java", "bun", "deno", "go", "rust", "dotnet",
];

/// A TCP socket in LISTEN state, as reported by one enumeration pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListeningSocket {
    pub pid: i32,
    pub process_name: String,
    pub port: u16,
    pub executable_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A listening socket that answered an HTTP or HTTPS probe
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredServer {
    pub pid: i32,
    pub process_name: String,
    pub port: u16,
    pub scheme: Scheme,
    pub page_title: Option<String>,
    pub executable_path: Option<String>,
}

impl DiscoveredServer {
    /// Stable identity used for selection and list diffing
    pub fn id(&self) -> String {
        format!("{}-{}-{}", self.pid, self.port, self.scheme)
    }

    pub fn url(&self) -> String {
        format!("{}://localhost:{}", self.scheme, self.port)
    }

    pub fn display_title(&self) -> &str {
        match self.page_title.as_deref() {
            Some(title) if !title.is_empty() => title,
            _ => &self.process_name,
        }
    }

    /// Heuristic denylist: OS components, app extensions and a few helper-heavy apps.
    /// Not a security boundary.
    pub fn is_system_process(&self) -> bool {
        let name = self.process_name.to_lowercase();
        if SYSTEM_PROCESS_NAMES.contains(&name.as_str()) {
            return true;
        }
        if DENYLISTED_APPS.iter().any(|app| name.contains(app)) {
            return true;
        }

        let Some(path) = self.executable_path.as_deref() else {
            return false;
        };

        let path = path.to_lowercase();
        SYSTEM_PATH_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
            || path.contains(APP_EXTENSION_SEGMENT)
            || DENYLISTED_APPS.iter().any(|app| path.contains(app))
    }

    pub fn server_type(&self) -> String {
        let name = self.process_name.to_lowercase();
        let tokens: Vec<&str> = name
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
            .collect();

        if let Some(runtime) = KNOWN_RUNTIMES.iter().find(|runtime| tokens.contains(*runtime)) {
            return runtime.to_string();
        }
        if self.is_system_process() {
            return "system".to_string();
        }
        match tokens.first() {
            Some(first) => first.to_string(),
            None => name.clone(),
        }
    }
}

/// Total order for scan results: non-system first, then port, then pid
pub fn compare_servers(lhs: &DiscoveredServer, rhs: &DiscoveredServer) -> Ordering {
    lhs.is_system_process()
        .cmp(&rhs.is_system_process())
        .then(lhs.port.cmp(&rhs.port))
        .then(lhs.pid.cmp(&rhs.pid))
}

pub fn sort_servers(servers: &mut [DiscoveredServer]) {
    servers.sort_by(compare_servers);
}
