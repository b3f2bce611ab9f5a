//! rfscan operator console
//!
//! Connects to the scanner, prints its status and reads operator commands
//! from stdin. `--simulate` runs against an in-process device instead.

use std::path::PathBuf;

use clap::Parser;
use rfscan_console::config::{self, ConsoleConfig};
use rfscan_console::connection::{memory_link, Connector, TcpConnector};
use rfscan_console::operator::{spawn_line_reader, OperatorAction};
use rfscan_console::presentation::TerminalPresenter;
use rfscan_console::simulator::Simulator;
use rfscan_console::sonifier::TracingToneEngine;
use rfscan_console::{Console, ConsoleInput, ConsoleOptions};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rfscan-console")]
#[command(version)]
#[command(about = "Live console for the 2.4 GHz spectrum scanner", long_about = None)]
struct Args {
    /// Device address (host:port)
    #[arg(short, long)]
    device: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sonification tempo in BPM
    #[arg(long)]
    tempo: Option<f32>,

    /// Print a text plot row for every frame
    #[arg(long)]
    plot: bool,

    /// Run against a simulated device
    #[arg(long)]
    simulate: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,
}

fn main() {
    // Initialize logging with RUST_LOG env var support
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(config::default_path);
    let mut config = ConsoleConfig::load_or_default(&config_path);
    if let Some(device) = args.device.clone() {
        config.device = device;
    }
    if let Some(tempo) = args.tempo {
        config.tempo_bpm = tempo;
    }
    config.plot |= args.plot;

    if args.save_config {
        match config.save_to(&config_path) {
            Ok(()) => info!("Saved config to {}", config_path.display()),
            Err(e) => error!("Failed to save config: {}", e),
        }
    }

    info!("rfscan console starting (pid: {})...", std::process::id());

    // One logical thread: every callback runs to completion on this runtime
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    runtime.block_on(async {
        let (tx, rx) = mpsc::unbounded_channel();
        let stdin = std::io::BufReader::new(std::io::stdin());
        if let Err(e) = spawn_line_reader(stdin, tx.clone()) {
            error!("Failed to start the input reader: {}", e);
        }
        spawn_signal_handler(tx);

        if args.simulate {
            let (connector, device) = memory_link();
            tokio::spawn(Simulator::new(device, std::process::id() as u64).run());
            run_console(connector, &config, rx).await;
        } else {
            run_console(TcpConnector::new(config.device.clone()), &config, rx).await;
        }
    });
    runtime.shutdown_background();

    info!("rfscan console stopped");
}

async fn run_console<C: Connector>(
    connector: C,
    config: &ConsoleConfig,
    input: mpsc::UnboundedReceiver<ConsoleInput>,
) {
    let options = ConsoleOptions {
        tempo_bpm: config.tempo_bpm,
        sonifier: config.sonifier_params(),
        colorscale: config.colorscale,
    };
    let presenter = TerminalPresenter::stdout(config.plot, config.colorscale);
    let mut console =
        Console::new(connector, TracingToneEngine::new(), presenter, options).with_input(input);
    console.run().await;
}

/// Turn termination signals into a quit action.
fn spawn_signal_handler(tx: mpsc::UnboundedSender<ConsoleInput>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = tx.send(ConsoleInput::Action(OperatorAction::Quit));
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigterm), Ok(mut sigint), Ok(mut sighup)) = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
    ) else {
        error!("Failed to install signal handlers");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sighup.recv() => info!("Received SIGHUP"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
