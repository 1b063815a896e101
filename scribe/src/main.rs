//! `scribe`
//!
//! Serves a pen plotter over HTTP + WebSocket: plans come in as requests,
//! lifecycle events go out over the channel. Runs against the board at the
//! given serial device node, or against a time-based simulator when asked
//! to (or when the device node cannot be opened).

use scribe::{router, AppState, PlotService};
use stylus::link::DEFAULT_SERIAL_DEVICE;

/// How the server is meant to be invoked.
const USAGE: &str = "usage: scribe [--device PATH] [--listen ADDR] [--sim]";

/// The address served when none is given.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9870";

#[tokio::main]
async fn main() {
    env_logger::init();

    let mut device_path = DEFAULT_SERIAL_DEVICE.to_string();
    let mut listen_addr = DEFAULT_LISTEN_ADDR.to_string();
    let mut simulate = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--device" => match args.next() {
                Some(path) => device_path = path,
                None => {
                    eprintln!("{USAGE}");
                    std::process::exit(1);
                }
            },
            "--listen" => match args.next() {
                Some(addr) => listen_addr = addr,
                None => {
                    eprintln!("{USAGE}");
                    std::process::exit(1);
                }
            },
            "--sim" => simulate = true,
            _ => {
                eprintln!("{USAGE}");
                std::process::exit(1);
            }
        }
    }

    let service = if simulate {
        log::info!("running against the simulator");
        PlotService::simulated()
    } else {
        match PlotService::with_hardware(&device_path) {
            Ok(service) => {
                log::info!("attached to the plotter at {device_path}");
                service
            }
            Err(err) => {
                log::warn!(
                    "could not open {device_path} ({err}); falling back to the simulator"
                );
                PlotService::simulated()
            }
        }
    };

    let state = AppState::new(service);
    let listener = tokio::net::TcpListener::bind(listen_addr.as_str())
        .await
        .unwrap();
    log::info!("listening on {listen_addr}");
    axum::serve(listener, router(state)).await.unwrap();
}
