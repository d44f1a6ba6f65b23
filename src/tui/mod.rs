pub mod list;

use crate::scan::CommandRunner;
use crate::store::ServerStore;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::{Backend, CrosstermBackend},
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const TICK_RATE_MS: u64 = 250;

/// Program that opens a URL in the default browser
fn url_opener() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/usr/bin/open")
    } else {
        PathBuf::from("xdg-open")
    }
}

/// Interactive list of discovered servers
pub struct TuiApp {
    store: ServerStore,
    runner: Arc<dyn CommandRunner>,
    selected: usize,
    show_system: bool,
    should_quit: bool,
    status: Option<String>,
    last_tick: Instant,
    tick_rate: Duration,
}

impl TuiApp {
    pub fn new(store: ServerStore, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            store,
            runner,
            selected: 0,
            show_system: false,
            should_quit: false,
            status: None,
            last_tick: Instant::now(),
            tick_rate: Duration::from_millis(TICK_RATE_MS),
        }
    }

    /// Run until the user quits; the store keeps scanning in the background
    pub fn run<B: Backend>(mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            let snapshot = self.store.snapshot();
            let visible = list::visible_servers(&snapshot, self.show_system).len();
            self.selected = self.selected.min(visible.saturating_sub(1));
            let selected = (visible > 0).then_some(self.selected);

            terminal.draw(|f| list::render(f, &snapshot, self.show_system, selected, self.status.as_deref()))?;

            let timeout = self.tick_rate
                .checked_sub(self.last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));

            if event::poll(timeout)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code, key.modifiers);
                    }
                }
            }

            if self.should_quit {
                break;
            }

            if self.last_tick.elapsed() >= self.tick_rate {
                self.last_tick = Instant::now();
            }
        }

        Ok(())
    }

    pub fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        let snapshot = self.store.snapshot();
        let visible = list::visible_servers(&snapshot, self.show_system);

        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => self.should_quit = true,
            KeyCode::Char('r') => {
                self.status = if self.store.refresh() { None } else { Some("already scanning".to_string()) };
            }
            KeyCode::Char('s') => {
                self.show_system = !self.show_system;
            }
            KeyCode::Char('j') | KeyCode::Down => {
                if self.selected + 1 < visible.len() {
                    self.selected += 1;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Char('x') | KeyCode::Delete => {
                if let Some(server) = visible.get(self.selected) {
                    self.status = Some(format!("sent SIGTERM to {} (pid {})", server.process_name, server.pid));
                    self.store.kill(server.pid);
                }
            }
            KeyCode::Char('o') | KeyCode::Enter => {
                if let Some(server) = visible.get(self.selected) {
                    let url = server.url();
                    self.status = Some(format!("opening {}", url));
                    let runner = Arc::clone(&self.runner);
                    tokio::spawn(async move {
                        let output = runner.run(&url_opener(), &[url.clone()]).await;
                        if !output.success() {
                            log::warn!("[tui] open_failed: url={} status={} stderr={}", url, output.status, output.stderr.trim());
                        }
                    });
                }
            }
            _ => {}
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }
}

/// Initialize the terminal for TUI mode
pub fn init_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restore the terminal after TUI mode
pub fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}
