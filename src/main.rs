//! chaosvm runtime entry point.
//!
//! Runs a TDC payload file through the embedded VM and prints the
//! fingerprint data the payload computes:
//! 1) parse the payload (opcode stream + dispatcher fingerprinting),
//! 2) execute it against an emulated browser window,
//! 3) call `TDC.getData(null, true)` and print the collected string.
//!
//! Behavior summary:
//! - With `-h/--help`, print usage.
//! - With `-v/--version`, print build-target + version.
//! - With a payload path, execute it. Overrides for the emulated
//!   environment (`--ip`, `--ua`, `--href`, `--referer`, `--track`) may
//!   follow the path in any order.
//!
//! Diagnostics go through `tracing`; set `RUST_LOG=chaosvm=debug` to see
//! which properties a payload probes.

use std::env;
use std::fs;
use std::process;

use tracing_subscriber::EnvFilter;

use chaosvm::{prepare, PrepareOptions, Value};

/// Human-facing runtime version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Construct the help/usage text shown for `-h/--help`.
fn usage() -> String {
    format!(
        r#"chaosvm v{0}

Usage:
    chaosvm <payload.js> [options]

Arguments:
    <payload.js>
        Path to a TDC payload script (the decompressed tdc.js text).

Options:
    --ip <addr>          Public address reported through the RTC probe.
    --ua <string>        navigator.userAgent override.
    --href <url>         location.href override.
    --referer <url>      location.referer override.
    --track "x,y x,y"    Mouse positions replayed to the payload.
    -h, --help           Show this help message and exit.
    -v, --version        Show runtime version."#,
        VERSION
    )
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "-h" || args[1] == "--help" {
        println!("{}", usage());
        return;
    }
    if args[1] == "-v" || args[1] == "--version" {
        println!(
            "chaosvm-build-{}-{}: v{}",
            env::consts::OS,
            env::consts::ARCH,
            VERSION
        );
        return;
    }

    let payload_path = &args[1];
    let mut opts = PrepareOptions::default();

    // Option parsing: every flag takes exactly one value.
    let mut i = 2;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = match args.get(i + 1) {
            Some(v) => v.clone(),
            None => {
                eprintln!("missing value for {}", flag);
                process::exit(2);
            }
        };
        match flag {
            "--ip" => opts.ip = value,
            "--ua" => opts.user_agent = value,
            "--href" => opts.href = value,
            "--referer" => opts.referer = value,
            "--track" => match parse_track(&value) {
                Some(track) => opts.mouse_track = track,
                None => {
                    eprintln!("invalid mouse track: {}", value);
                    process::exit(2);
                }
            },
            other => {
                eprintln!("unknown option {}", other);
                process::exit(2);
            }
        }
        i += 2;
    }

    let payload = match fs::read_to_string(payload_path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("failed to read {}: {}", payload_path, e);
            process::exit(1);
        }
    };

    match prepare(&payload, &opts) {
        Ok(tdc @ Value::Object(_)) => {
            // The collected fingerprint comes from getData(null, true).
            match chaosvm::call_member(&tdc, "getData", &[Value::Null, Value::Bool(true)]) {
                Ok(data) => println!("{}", data.to_display()),
                Err(e) => {
                    eprintln!("{}", e);
                    process::exit(1);
                }
            }
        }
        Ok(other) => {
            eprintln!("payload finished without a TDC object ({:?})", other);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

/// Parse `"x,y x,y ..."` into mouse-track points.
fn parse_track(text: &str) -> Option<Vec<(f64, f64)>> {
    let mut track = Vec::new();
    for pair in text.split_whitespace() {
        let (x, y) = pair.split_once(',')?;
        track.push((x.parse().ok()?, y.parse().ok()?));
    }
    if track.is_empty() {
        None
    } else {
        Some(track)
    }
}
