use std::{
    io::{self, BufRead},
    thread,
    time::Duration,
};

use anyhow::{Context, bail};
use clap::Parser;
use log::{debug, info, warn};
use tankbot_protocol::{dispatch::Dispatcher, payload::SpeedCommand};
use tankbot_server::{
    config::{Commands, ServerConfig},
    debug_history::DebugHistory,
    device_thread::{DeviceThread, LinkOptions},
    transport::{SerialTransport, reset_board},
};
use tokio::sync::mpsc;

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(50);

fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    if let Some(Commands::Reset) = config.command {
        reset_board(&config.port).with_context(|| format!("failed to reset {}", config.port))?;
        info!("reset {}", config.port);
        return Ok(());
    }

    let transport = SerialTransport::open(&config.port, config.baud, config.read_timeout())
        .with_context(|| format!("failed to open {}", config.port))?;
    info!("connected to {} at {} baud", config.port, config.baud);

    let history = DebugHistory::new(config.history);
    let link = DeviceThread::spawn(
        transport,
        Dispatcher::new((), history.clone()),
        LinkOptions {
            poll_interval: config.poll_interval(),
            backpressure: config.backpressure(),
        },
    )
    .context("failed to start the device thread")?;

    // console reads block, so they run on a detached thread
    let console = spawn_console_reader(io::BufReader::new(io::stdin()))
        .context("failed to start the console reader")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(supervise(&link, &history, console, config.echo_telemetry));
    drop(runtime);

    link.shutdown().context("device link failed")?;
    result
}

/// Forward lines from `input` until it closes or the receiver goes away.
/// The thread is detached; it may still be parked in a read at exit.
fn spawn_console_reader<R>(input: R) -> io::Result<mpsc::Receiver<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            for line in input.lines() {
                let Ok(line) = line else {
                    break;
                };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
            debug!("console closed");
        })?;
    Ok(rx)
}

/// Runs until Ctrl-C or until the device thread dies, forwarding console
/// instructions to the device.
async fn supervise(
    link: &DeviceThread,
    history: &DebugHistory,
    mut console: mpsc::Receiver<String>,
    echo_telemetry: bool,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(SUPERVISE_INTERVAL);
    let mut console_open = true;
    let mut cursor = history.subscribe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("failed to listen for Ctrl-C")?;
                info!("Shutdown requested!");
                return Ok(());
            }
            _ = ticker.tick() => {
                if !link.is_alive() {
                    bail!("device thread died unexpectedly");
                }
                if echo_telemetry && history.take_dirty() {
                    for line in history.read_since(&mut cursor) {
                        println!("{line}");
                    }
                }
            }
            line = console.recv(), if console_open => {
                match line {
                    Some(line) => handle_line(link, &line),
                    None => console_open = false,
                }
            }
        }
    }
}

fn handle_line(link: &DeviceThread, line: &str) {
    let Some(speed) = parse_instruction(line) else {
        if !line.trim().is_empty() {
            warn!("unrecognized instruction: {line}");
        }
        return;
    };
    if let Err(e) = link.send_speed(speed) {
        warn!("failed to send {speed:?}: {e}");
    }
}

/// `speed <left> <right>` with fractions of full speed, or `stop`.
fn parse_instruction(line: &str) -> Option<SpeedCommand> {
    let mut words = line.split_whitespace();
    match words.next()? {
        "stop" => Some(SpeedCommand::new(0, 0)),
        "speed" => {
            let left: f64 = words.next()?.parse().ok()?;
            let right: f64 = words.next()?.parse().ok()?;
            if words.next().is_some() {
                return None;
            }
            Some(SpeedCommand::from_fractions(left, right))
        }
        _ => None,
    }
}
