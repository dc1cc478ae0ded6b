//! # snapsync CLI
//!
//! Command-line utilities for sealing and inspecting envelopes by hand.

use anyhow::{Context, Result};
use snapsync_proto::{Envelope, Kind};
use std::env;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "seal" => {
            if args.len() < 4 {
                eprintln!("Usage: snapsync seal <kind> <payload-json>");
                std::process::exit(1);
            }
            let payload = serde_json::from_str(&args[3]).context("Failed to parse payload")?;
            let envelope = Envelope::seal(&args[2], payload);
            match envelope.to_value() {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => {
                    eprintln!("unregistered subtype '{}'", args[2]);
                    std::process::exit(1);
                }
            }
        }
        "inspect" => {
            if args.len() < 3 {
                eprintln!("Usage: snapsync inspect <envelope-json>");
                std::process::exit(1);
            }
            let value = serde_json::from_str(&args[2]).context("Failed to parse envelope")?;
            match Envelope::from_value(&value) {
                Envelope::Sealed { kind, payload } => {
                    println!("kind: {kind}");
                    println!("payload: {}", serde_json::to_string_pretty(&payload)?);
                }
                Envelope::Invalid => {
                    println!("invalid envelope");
                    std::process::exit(1);
                }
            }
        }
        "kinds" => {
            for kind in Kind::ALL {
                println!("{kind}");
            }
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"snapsync CLI

USAGE:
    snapsync <COMMAND> [OPTIONS]

COMMANDS:
    seal <kind> <payload-json>   Build an envelope and print its wire value
    inspect <envelope-json>      Validate a wire value and print its payload
    kinds                        List the registered envelope subtypes
    help                         Show this help message

EXAMPLES:
    snapsync seal sync '{{"deltas":{{}},"actions":{{}}}}'
    snapsync inspect '{{"proto":"snapsync","kind":"sync","sync":{{}}}}'
"#
    );
}
