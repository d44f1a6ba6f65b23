use crate::store::StoreSnapshot;
use crate::types::DiscoveredServer;
use chrono::Local;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
};

const TYPE_COLUMN_WIDTH: usize = 8;

/// Servers in display order: primary group, then system group when shown
pub fn visible_servers(snapshot: &StoreSnapshot, show_system: bool) -> Vec<&DiscoveredServer> {
    let mut servers = snapshot.primary_servers();
    if show_system {
        servers.extend(snapshot.system_servers());
    }
    servers
}

/// Bordered block, highlighted while a scan is running
pub fn create_block(title: &str, busy: bool) -> Block<'_> {
    Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(if busy {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::Gray)
        })
}

fn server_item(server: &DiscoveredServer) -> ListItem<'static> {
    ListItem::new(Line::from(vec![
        Span::styled(format!(":{:<6}", server.port), Style::default().fg(Color::Cyan)),
        Span::styled(
            format!("{:<width$}", server.server_type(), width = TYPE_COLUMN_WIDTH),
            Style::default().fg(Color::Yellow),
        ),
        Span::styled(server.display_title().to_string(), Style::default().fg(Color::White)),
        Span::styled(format!("  {}", server.url()), Style::default().fg(Color::Gray)),
        Span::styled(format!("  pid {}", server.pid), Style::default().fg(Color::DarkGray)),
    ]))
}

fn header_item(text: String) -> ListItem<'static> {
    ListItem::new(Line::from(Span::styled(
        text,
        Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
    )))
}

/// List items plus, for each item, the index of the server it shows
fn build_items(snapshot: &StoreSnapshot, show_system: bool) -> (Vec<ListItem<'static>>, Vec<Option<usize>>) {
    let primary = snapshot.primary_servers();
    let system = snapshot.system_servers();
    let mut items = Vec::new();
    let mut rows = Vec::new();

    if primary.is_empty() {
        let text = if snapshot.is_refreshing { "  Looking for servers…" } else { "  No servers found" };
        items.push(ListItem::new(Line::from(Span::styled(text, Style::default().fg(Color::Gray)))));
        rows.push(None);
    }
    for (index, server) in primary.iter().enumerate() {
        items.push(server_item(server));
        rows.push(Some(index));
    }

    if !system.is_empty() {
        if show_system {
            items.push(header_item(format!("System ({})", system.len())));
            rows.push(None);
            for (offset, server) in system.iter().enumerate() {
                items.push(server_item(server));
                rows.push(Some(primary.len() + offset));
            }
        } else {
            items.push(header_item(format!("System ({}) hidden, press s", system.len())));
            rows.push(None);
        }
    }

    (items, rows)
}

pub fn render(frame: &mut Frame, snapshot: &StoreSnapshot, show_system: bool, selected: Option<usize>, status: Option<&str>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    render_list(frame, chunks[0], snapshot, show_system, selected);
    render_footer(frame, chunks[1], snapshot, status);
}

fn render_list(frame: &mut Frame, area: Rect, snapshot: &StoreSnapshot, show_system: bool, selected: Option<usize>) {
    let (items, rows) = build_items(snapshot, show_system);
    let title = if snapshot.is_refreshing { " garçon · scanning… " } else { " garçon " };

    let list = List::new(items)
        .block(create_block(title, snapshot.is_refreshing))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("▶ ");

    let mut state = ListState::default();
    state.select(selected.and_then(|s| rows.iter().position(|row| *row == Some(s))));
    frame.render_stateful_widget(list, area, &mut state);
}

fn terminating_pids(snapshot: &StoreSnapshot) -> String {
    snapshot.terminating.iter().map(|pid| pid.to_string()).collect::<Vec<_>>().join(", ")
}

fn render_footer(frame: &mut Frame, area: Rect, snapshot: &StoreSnapshot, status: Option<&str>) {
    let updated = match snapshot.last_refresh {
        Some(at) => format!("updated {}", at.with_timezone(&Local).format("%H:%M:%S")),
        None => "cached".to_string(),
    };
    let mut spans = vec![
        Span::styled(" r", Style::default().fg(Color::Cyan)),
        Span::raw(" refresh  "),
        Span::styled("o", Style::default().fg(Color::Cyan)),
        Span::raw(" open  "),
        Span::styled("x", Style::default().fg(Color::Cyan)),
        Span::raw(" kill  "),
        Span::styled("s", Style::default().fg(Color::Cyan)),
        Span::raw(" system  "),
        Span::styled("q", Style::default().fg(Color::Cyan)),
        Span::raw(" quit  │ "),
        Span::styled(updated, Style::default().fg(Color::Gray)),
    ];
    if !snapshot.terminating.is_empty() {
        spans.push(Span::styled(
            format!("  terminating pid {}", terminating_pids(snapshot)),
            Style::default().fg(Color::Red),
        ));
    }
    if let Some(status) = status {
        spans.push(Span::styled(format!("  {}", status), Style::default().fg(Color::Yellow)));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scheme;
    use ratatui::{Terminal, backend::TestBackend};

    fn snapshot() -> StoreSnapshot {
        let server = |pid, name: &str, port, path: Option<&str>| DiscoveredServer {
            pid,
            process_name: name.to_string(),
            port,
            scheme: Scheme::Http,
            page_title: None,
            executable_path: path.map(String::from),
        };
        StoreSnapshot {
            servers: vec![
                server(10, "node", 3000, None),
                server(11, "python3", 8000, None),
                server(1, "rapportd", 49152, Some("/usr/libexec/rapportd")),
            ],
            ..StoreSnapshot::default()
        }
    }

    fn screen_text(snapshot: &StoreSnapshot, show_system: bool) -> String {
        let mut terminal = Terminal::new(TestBackend::new(100, 12)).unwrap();
        terminal.draw(|f| render(f, snapshot, show_system, Some(0), None)).unwrap();
        let buffer = terminal.backend().buffer();
        buffer.content().iter().map(|cell| cell.symbol()).collect()
    }

    #[test]
    fn test_visible_servers_order() {
        let snapshot = snapshot();
        let ports: Vec<u16> = visible_servers(&snapshot, false).iter().map(|s| s.port).collect();
        assert_eq!(ports, vec![3000, 8000]);
        let ports: Vec<u16> = visible_servers(&snapshot, true).iter().map(|s| s.port).collect();
        assert_eq!(ports, vec![3000, 8000, 49152]);
    }

    #[test]
    fn test_rows_skip_headers() {
        let snapshot = snapshot();
        let (items, rows) = build_items(&snapshot, true);
        assert_eq!(items.len(), 4);
        assert_eq!(rows, vec![Some(0), Some(1), None, Some(2)]);

        let (_, rows) = build_items(&StoreSnapshot::default(), true);
        assert_eq!(rows, vec![None]);
    }

    #[test]
    fn test_render_shows_servers() {
        let text = screen_text(&snapshot(), false);
        assert!(text.contains(":3000"));
        assert!(text.contains("http://localhost:8000"));
        assert!(!text.contains("rapportd"));
        assert!(text.contains("System (1) hidden"));

        let text = screen_text(&snapshot(), true);
        assert!(text.contains("rapportd"));
    }

    #[test]
    fn test_footer_lists_terminating_pids() {
        let text = screen_text(&snapshot(), false);
        assert!(!text.contains("terminating"));

        let mut snapshot = snapshot();
        snapshot.servers.retain(|s| s.pid != 11);
        snapshot.terminating.extend([11, 12]);
        let text = screen_text(&snapshot, false);
        assert!(text.contains("terminating pid 11, 12"));
        assert!(!text.contains(":8000"));
    }
}
