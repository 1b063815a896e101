//! `stylus`
//!
//! A small command-line utility for poking a directly attached plotter:
//! query the firmware, raise or lower the pen, go home, or drop the motors'
//! holding torque.

use std::process::ExitCode;

use stylus::{
    device::{DEFAULT_PEN_DOWN_PCT, DEFAULT_PEN_UP_PCT},
    link::DEFAULT_SERIAL_DEVICE,
    plotter::PEN_RATE,
    Driver, SerialDriver, AXIDRAW,
};

/// How the utility is meant to be invoked.
const USAGE: &str = "usage: stylus [--device PATH] <version|pen-up|pen-down|home|limp>";

fn main() -> ExitCode {
    env_logger::init();

    let mut device_path = std::env::var("STYLUS_DEVICE")
        .unwrap_or_else(|_| DEFAULT_SERIAL_DEVICE.to_string());
    let mut command = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--device" {
            match args.next() {
                Some(path) => device_path = path,
                None => {
                    eprintln!("{USAGE}");
                    return ExitCode::FAILURE;
                }
            }
        } else if command.is_none() {
            command = Some(arg);
        } else {
            eprintln!("{USAGE}");
            return ExitCode::FAILURE;
        }
    }

    let Some(command) = command else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    match run(&command, &device_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("stylus: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Runs one subcommand against the attached plotter.
///
/// # Arguments
/// * `command`: The subcommand name.
/// * `device_path`: Path of the serial device node to open.
///
/// # Returns
/// `Ok(())` if the command ran, otherwise the error to report.
fn run(command: &str, device_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let driver = SerialDriver::open(device_path)?;

    match command {
        "version" => {
            let version = driver.firmware_version()?;
            println!("{version}");
        }
        "pen-up" => {
            driver.set_pen_height(AXIDRAW.pen_pct_to_pos(DEFAULT_PEN_UP_PCT), PEN_RATE)?;
        }
        "pen-down" => {
            driver.set_pen_height(AXIDRAW.pen_pct_to_pos(DEFAULT_PEN_DOWN_PCT), PEN_RATE)?;
        }
        "home" => {
            driver.go_home(Some(AXIDRAW.pen_pct_to_pos(DEFAULT_PEN_UP_PCT)), Some(PEN_RATE))?;
        }
        "limp" => {
            driver.limp()?;
        }
        other => {
            return Err(format!("unknown command '{other}'\n{USAGE}").into());
        }
    }

    driver.close()?;
    Ok(())
}
