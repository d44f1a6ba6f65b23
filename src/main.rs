use eyre::{Result, WrapErr};
use std::sync::Arc;

use garcon::scan::{CommandRunner, Shell};
use garcon::{ServerStore, TuiApp};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = garcon::cli::parse();

    if let Err(e) = garcon::init_logging(cli.verbose) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    log::info!("================================================================================");
    log::info!("garcon session starting: version={}", env!("CARGO_PKG_VERSION"));
    log::info!("================================================================================");

    if let Some(pid) = cli.kill {
        garcon::process::terminate(pid)?;
        println!("Sent SIGTERM to pid {}", pid);
        return Ok(());
    }

    let config = cli.scan_config();
    log::debug!("[main] config: {:?}", config);

    let runner: Arc<dyn CommandRunner> = Arc::new(Shell);
    let store = ServerStore::from_config(&config, Arc::clone(&runner))
        .wrap_err("Failed to set up scanner")?;

    if !cli.interactive() {
        store.refresh_and_wait().await;
        let snapshot = store.snapshot();
        if cli.json {
            let servers: Vec<_> = if cli.all { snapshot.servers.iter().collect() } else { snapshot.primary_servers() };
            println!("{}", serde_json::to_string_pretty(&servers)?);
        } else {
            garcon::pretty::print_servers(&snapshot.servers, cli.all, snapshot.last_refresh);
        }
        return Ok(());
    }

    // Cached servers show up right away while the first live scan runs
    store.refresh();

    let mut terminal = garcon::init_terminal()?;
    let app = TuiApp::new(store, runner);

    let result = app.run(&mut terminal);

    garcon::restore_terminal(&mut terminal)?;

    result?;

    Ok(())
}
