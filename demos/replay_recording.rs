//! Replays a JSONL session recording offline and checks the prompts it
//! contains against a template.
//!
//! Raw chunks are published into an in-memory connection where a prompt
//! watcher reports every state it recognizes. The detected path is printed
//! next to the state changes the recording claims.

use std::env;
use std::fs;
use std::process;
use std::sync::Arc;

use clinav::connection::{Connection, FifoConnection};
use clinav::device::DeviceStateGraph;
use clinav::events::Wait4Prompts;
use clinav::observer::StreamObserver;
use clinav::recording::{NormalizeOptions, SessionRecorder, SessionReplayer};
use clinav::templates;

fn print_usage() {
    eprintln!(
        "Usage: cargo run --example replay_recording -- <recording.jsonl> [template] [--normalize <output.jsonl>]"
    );
    eprintln!("Templates: {}", templates::available_templates().join(", "));
}

fn fail(message: String) -> ! {
    eprintln!("{message}");
    process::exit(1);
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        process::exit(2);
    }
    let input = &args[1];

    let mut template = "unix_local";
    let mut normalized_output = None;
    let mut rest = args.iter().skip(2);
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--normalize" => match rest.next() {
                Some(path) => normalized_output = Some(path.clone()),
                None => {
                    print_usage();
                    process::exit(2);
                }
            },
            name => template = name,
        }
    }

    let recording = fs::read_to_string(input)
        .unwrap_or_else(|err| fail(format!("Failed to read recording '{input}': {err}")));
    let mut replayer = SessionReplayer::from_jsonl(&recording)
        .unwrap_or_else(|err| fail(format!("Invalid recording: {err}")));
    let graph = templates::by_name(template)
        .and_then(DeviceStateGraph::new)
        .unwrap_or_else(|err| fail(format!("Template '{template}': {err}")));

    let offline = Arc::new(FifoConnection::new("replay"));
    let watcher = Wait4Prompts::for_graph(&graph, None)
        .unwrap_or_else(|err| fail(format!("Prompts of '{template}': {err}")));
    let prompts = StreamObserver::start("replay-prompts", watcher, offline.clone(), None);

    let chunks = replayer.replay_into(offline.bus());
    if let Some(Err(err)) = prompts.result() {
        fail(format!("Replay stopped after an ambiguous prompt: {err}"));
    }
    let detected = prompts.with_handler(|w| {
        w.occurrences()
            .iter()
            .map(|o| o.state.clone())
            .collect::<Vec<_>>()
    });
    prompts.cancel();

    println!("Replayed {chunks} chunks");
    println!(
        "Initial state: {}",
        replayer.initial_state().unwrap_or("<not recorded>")
    );
    println!("Recorded state changes:");
    for (from, to) in replayer.state_changes() {
        println!("  {from} -> {to}");
    }
    println!("Detected prompts: {}", detected.join(" -> "));

    if let Some(output) = normalized_output {
        let normalized = SessionRecorder::normalize_jsonl(&recording, NormalizeOptions::default())
            .unwrap_or_else(|err| fail(format!("Failed to normalize recording: {err}")));
        if let Err(err) = fs::write(&output, normalized) {
            fail(format!("Failed to write '{output}': {err}"));
        }
        println!("Normalized recording written to {output}");
    }
}
