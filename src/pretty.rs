use crate::types::DiscoveredServer;
use chrono::{DateTime, Local, Utc};

const SEPARATOR_WIDTH: usize = 80;
const PORT_COLUMN_WIDTH: usize = 6;
const TYPE_COLUMN_WIDTH: usize = 8;
const URL_COLUMN_WIDTH: usize = 24;

pub fn print_servers(servers: &[DiscoveredServer], include_system: bool, last_refresh: Option<DateTime<Utc>>) {
    print!("{}", render_servers(servers, include_system, last_refresh));
}

pub fn render_servers(servers: &[DiscoveredServer], include_system: bool, last_refresh: Option<DateTime<Utc>>) -> String {
    let (primary, system): (Vec<&DiscoveredServer>, Vec<&DiscoveredServer>) =
        servers.iter().partition(|s| !s.is_system_process());

    let mut out = String::new();
    out.push_str(&format!("🍽️  {} local web server{}\n",
        primary.len(), if primary.len() == 1 { "" } else { "s" }));
    out.push_str(&"─".repeat(SEPARATOR_WIDTH));
    out.push('\n');

    if primary.is_empty() {
        out.push_str("  No servers found\n");
    }
    for server in &primary {
        out.push_str(&format_server_line(server));
        out.push('\n');
    }

    if include_system && !system.is_empty() {
        out.push_str(&format!("\n⚙️  System ({})\n", system.len()));
        for server in &system {
            out.push_str(&format_server_line(server));
            out.push('\n');
        }
    } else if !system.is_empty() {
        out.push_str(&format!("\n  (+{} system, use --all to show)\n", system.len()));
    }

    out.push_str(&"─".repeat(SEPARATOR_WIDTH));
    out.push('\n');
    if let Some(at) = last_refresh {
        out.push_str(&format!("  Last refreshed: {}\n", at.with_timezone(&Local).format("%H:%M:%S")));
    }
    out
}

pub fn format_server_line(server: &DiscoveredServer) -> String {
    format!(
        "  :{:<port_w$} {:<type_w$} {:<url_w$} {} (pid {})",
        server.port,
        server.server_type(),
        server.url(),
        server.display_title(),
        server.pid,
        port_w = PORT_COLUMN_WIDTH,
        type_w = TYPE_COLUMN_WIDTH,
        url_w = URL_COLUMN_WIDTH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scheme;

    fn server(pid: i32, name: &str, port: u16, title: Option<&str>, path: Option<&str>) -> DiscoveredServer {
        DiscoveredServer {
            pid,
            process_name: name.to_string(),
            port,
            scheme: Scheme::Http,
            page_title: title.map(String::from),
            executable_path: path.map(String::from),
        }
    }

    #[test]
    fn test_format_server_line() {
        let line = format_server_line(&server(42, "node", 3000, Some("My App"), None));
        assert!(line.contains(":3000"));
        assert!(line.contains("node"));
        assert!(line.contains("http://localhost:3000"));
        assert!(line.contains("My App"));
        assert!(line.ends_with("(pid 42)"));
    }

    #[test]
    fn test_render_groups() {
        let servers = vec![
            server(42, "node", 3000, None, None),
            server(1, "rapportd", 49152, None, Some("/usr/libexec/rapportd")),
        ];

        let hidden = render_servers(&servers, false, None);
        assert!(hidden.contains("1 local web server\n"));
        assert!(hidden.contains("+1 system"));
        assert!(!hidden.contains("rapportd"));

        let shown = render_servers(&servers, true, None);
        assert!(shown.contains("System (1)"));
        assert!(shown.contains("rapportd"));
    }

    #[test]
    fn test_render_empty() {
        let out = render_servers(&[], true, None);
        assert!(out.contains("0 local web servers"));
        assert!(out.contains("No servers found"));
    }
}
