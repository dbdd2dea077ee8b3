use std::sync::Arc;

use clinav::config::NOT_CONNECTED;
use clinav::connection::{Connection, FifoConnection};
use clinav::device::DeviceStateGraph;
use clinav::events::Wait4Prompts;
use clinav::navigator::Device;
use clinav::observer::StreamObserver;
use clinav::recording::{
    NormalizeOptions, SessionEvent, SessionRecordLevel, SessionRecorder, SessionReplayer,
};
use clinav::templates::{self, UNIX_LOCAL, UNIX_LOCAL_ROOT};

fn local_shell() -> Arc<FifoConnection> {
    let mut root = false;
    Arc::new(FifoConnection::with_responder("local", move |sent: &str| {
        let output = match sent {
            "\n" => "\n",
            "su\n" => return Some("su\nPassword: ".to_string()),
            "toor\n" => {
                root = true;
                "\n"
            }
            "exit\n" => {
                root = false;
                "exit\n"
            }
            _ => return None,
        };
        let prompt = if root { "local# " } else { "local$ " };
        Some(format!("{output}{prompt}"))
    }))
}

async fn recorded_session() -> String {
    let topology = templates::unix_local()
        .respond_on(UNIX_LOCAL, UNIX_LOCAL_ROOT, "Password:", "toor")
        .expect("su edge exists");
    let recorder = Arc::new(SessionRecorder::new(SessionRecordLevel::Full));
    let device = Device::from_topology("local", topology, local_shell())
        .expect("valid topology")
        .with_recorder(recorder.clone());

    device.establish(None).await.expect("established");
    device.goto_state(UNIX_LOCAL_ROOT).await.expect("root");
    device.goto_state(UNIX_LOCAL).await.expect("back");

    recorder.to_jsonl().expect("jsonl")
}

#[tokio::test]
async fn recording_keeps_the_navigation_path() {
    let jsonl = recorded_session().await;
    let replayer = SessionReplayer::from_jsonl(&jsonl).expect("replayer");

    assert_eq!(replayer.initial_state(), Some(UNIX_LOCAL));
    replayer
        .expect_state_changes(&[
            (NOT_CONNECTED, UNIX_LOCAL),
            (UNIX_LOCAL, UNIX_LOCAL_ROOT),
            (UNIX_LOCAL_ROOT, UNIX_LOCAL),
        ])
        .expect("recorded path");
}

#[tokio::test]
async fn replayed_chunks_reproduce_prompt_detection() {
    let jsonl = recorded_session().await;
    let mut replayer = SessionReplayer::from_jsonl(&jsonl).expect("replayer");

    let graph = DeviceStateGraph::new(templates::unix_local()).expect("valid");
    let offline = Arc::new(FifoConnection::new("offline"));
    let prompts = StreamObserver::start(
        "prompts",
        Wait4Prompts::for_graph(&graph, Some(3)).expect("prompts"),
        offline.clone(),
        None,
    );

    assert!(replayer.replay_into(offline.bus()) > 0);

    let states = prompts
        .result()
        .expect("resolved")
        .expect("no ambiguity")
        .into_iter()
        .map(|o| o.state)
        .collect::<Vec<_>>();
    assert_eq!(states, vec![UNIX_LOCAL, UNIX_LOCAL_ROOT, UNIX_LOCAL]);
    assert!(offline.sent().is_empty());
}

#[tokio::test]
async fn normalized_recording_drops_raw_chunks() {
    let jsonl = recorded_session().await;
    let normalized =
        SessionRecorder::normalize_jsonl(&jsonl, NormalizeOptions::default()).expect("normalize");

    let entries = SessionRecorder::from_jsonl(&normalized)
        .expect("restore")
        .entries();
    assert!(!entries.is_empty());
    assert!(entries
        .iter()
        .all(|e| !matches!(e.event, SessionEvent::RawChunk { .. })));
}
