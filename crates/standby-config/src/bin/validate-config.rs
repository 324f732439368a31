//! Config validation CLI tool
//!
//! Validates a standbyd configuration file and reports any errors.

use standby_config::{ConfigError, StandbyPolicy, CURRENT_CONFIG_VERSION};
use standby_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a standbyd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match standby_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            print_summary(&policy);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

fn print_summary(policy: &StandbyPolicy) {
    let intervals = |list: &[Duration]| {
        list.iter()
            .map(|d| format_duration(*d))
            .collect::<Vec<_>>()
            .join(", ")
    };

    println!("Summary:");
    println!("  Config version: {}", CURRENT_CONFIG_VERSION);
    println!(
        "  Content version: {}",
        policy.version.as_deref().unwrap_or("(none)")
    );
    println!("  Plugin: {}", policy.service.plugin);
    println!(
        "  Switches: nap={} sleep={}",
        policy.nap_switch, policy.sleep_switch
    );
    println!("  Dark timeout: {}", format_duration(policy.timeouts.dark));
    println!("  Nap timeout: {}", format_duration(policy.timeouts.nap));
    println!("  Nap intervals: [{}]", intervals(&policy.nap_intervals));
    println!("  Sleep intervals: [{}]", intervals(&policy.sleep_intervals));
    println!(
        "  Night: {:02}:{:02} - {:02}:{:02}",
        policy.night.start.hour,
        policy.night.start.minute,
        policy.night.end.hour,
        policy.night.end.minute
    );
    println!("  Strategies: {}", policy.strategies.join(", "));

    if !policy.resources.is_empty() {
        println!();
        println!("Resources:");
        for (kind, entries) in &policy.resources {
            let name = kind.name().unwrap_or("?");
            for entry in entries {
                println!(
                    "  - {} [{}]: {} processes, {} apps, {} time-limited",
                    name,
                    if entry.is_allow { "allow" } else { "restrict" },
                    entry.processes.len(),
                    entry.apps.len(),
                    entry.time_limited_processes.len() + entry.time_limited_apps.len()
                );
            }
        }
    }
}
