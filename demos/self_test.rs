//! Walks every pair of states of a lab host reached over SSH.
//!
//! The shells must print the prompts of the chosen template (`local$ `,
//! `local# `, ...), for instance through `PS1`.

use std::env;
use std::process;

use clinav::config::DeviceConfig;
use clinav::manager::MANAGER;
use clinav::selftest::{TraversalOrder, iterate_over_device_states};
use clinav::templates;

fn print_usage() {
    eprintln!("Usage: cargo run --example self_test -- <user> <addr> <password> [template] [seed]");
    eprintln!("Templates: {}", templates::available_templates().join(", "));
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        print_usage();
        process::exit(2);
    }
    let template = args.get(4).map(String::as_str).unwrap_or("unix_local");
    let seed = match args.get(5).map(|s| s.parse::<u64>()) {
        None => 0,
        Some(Ok(seed)) => seed,
        Some(Err(err)) => {
            eprintln!("Invalid seed: {err}");
            process::exit(2);
        }
    };

    let config = DeviceConfig::from_template(args[2].clone(), template);
    let device = match MANAGER.get_ssh(&config, &args[1], &args[2], 22, &args[3]).await {
        Ok(device) => device,
        Err(err) => {
            eprintln!("Failed to connect: {err}");
            process::exit(1);
        }
    };
    println!("Connected in state {}", device.current_state());

    match iterate_over_device_states(&device, TraversalOrder::Seeded(seed)).await {
        Ok(report) => {
            for (source, target) in &report.visited {
                println!("ok {source} -> {target}");
            }
        }
        Err(err) => {
            eprintln!("Self-test failed: {err}");
            process::exit(1);
        }
    }
}
