//! Exact-write checks for the command dispatcher

use std::time::Duration;
use thrustlog_core::core::dispatcher::{
    ChannelIntents, CommandDispatcher, DispatchEnd, DispatcherConfig, PreReadyPolicy,
};
use thrustlog_core::core::transport::Connection;
use thrustlog_core::{HandshakeMode, ProtocolState};
use tokio::sync::watch;
use tokio_test::io::Builder;

fn dispatcher(
    mock: tokio_test::io::Mock,
    state: ProtocolState,
    config: DispatcherConfig,
) -> (CommandDispatcher, watch::Sender<ProtocolState>) {
    let conn = Connection::new("mock", Box::new(tokio::io::empty()), Box::new(mock));
    let (_reader, writer, _close) = conn.split();
    let (tx, rx) = watch::channel(state);
    (CommandDispatcher::new(writer, rx, config), tx)
}

#[tokio::test(start_paused = true)]
async fn speed_invalid_stop_sequence() {
    let mock = Builder::new().write(b"5\n").write(b"-\n").build();
    let (d, _state) = dispatcher(mock, ProtocolState::Running, DispatcherConfig::default());

    let (tx, mut intents) = ChannelIntents::channel(8);
    for intent in ["5", "q", "-", "7"] {
        tx.send(intent.to_string()).await.unwrap();
    }

    let summary = d.run(&mut intents).await.unwrap();
    assert_eq!(summary.end, DispatchEnd::Stopped);
    assert_eq!(summary.sent.len(), 2);
    assert_eq!(intents.rejections().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn queued_stop_ends_operator_input() {
    let mock = Builder::new().write(b"-\n").build();
    let config = DispatcherConfig {
        pre_ready: PreReadyPolicy::Queue,
        ..DispatcherConfig::default()
    };
    let (d, state) = dispatcher(mock, ProtocolState::AwaitingReady, config);
    let (tx, mut intents) = ChannelIntents::channel(8);
    tx.send("-".to_string()).await.unwrap();

    let script = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = state.send(ProtocolState::Running);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = tx.send("5".to_string()).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = state.send(ProtocolState::Complete);
    };
    let (summary, ()) = tokio::join!(d.run(&mut intents), script);

    let summary = summary.unwrap();
    assert_eq!(summary.sent, vec![thrustlog_core::Command::Stop]);
    assert_eq!(summary.end, DispatchEnd::Stopped);
}

#[tokio::test(start_paused = true)]
async fn stops_when_session_completes() {
    let mock = Builder::new().build();
    let (d, state) = dispatcher(mock, ProtocolState::AwaitingReady, DispatcherConfig::default());
    let (_tx, mut intents) = ChannelIntents::channel(8);

    let finish = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        state.send(ProtocolState::Complete).unwrap();
    };
    let (summary, ()) = tokio::join!(d.run(&mut intents), finish);

    assert_eq!(
        summary.unwrap().end,
        DispatchEnd::SessionFinished(ProtocolState::Complete)
    );
}

#[tokio::test(start_paused = true)]
async fn auto_start_waits_for_running() {
    let mock = Builder::new().write(b"START\n").build();
    let config = DispatcherConfig {
        mode: HandshakeMode::Marker,
        auto_start: Some(Duration::from_secs(2)),
        ..DispatcherConfig::default()
    };
    let (d, state) = dispatcher(mock, ProtocolState::AwaitingReady, config);
    let (_tx, mut intents) = ChannelIntents::channel(8);

    let started = tokio::time::Instant::now();
    let script = async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        state.send(ProtocolState::Running).unwrap();
        // START is due 2 s after running starts, then give it time to drain.
        tokio::time::sleep(Duration::from_secs(4)).await;
        state.send(ProtocolState::Complete).unwrap();
    };
    let (summary, ()) = tokio::join!(d.run(&mut intents), script);

    let summary = summary.unwrap();
    assert_eq!(summary.sent, vec![thrustlog_core::Command::Start]);
    assert!(started.elapsed() >= Duration::from_secs(9));
}

#[tokio::test]
async fn session_gone_ends_run() {
    let mock = Builder::new().build();
    let (d, state) = dispatcher(mock, ProtocolState::Running, DispatcherConfig::default());
    drop(state);

    let summary = d.run(&mut thrustlog_core::NoIntents).await.unwrap();
    assert_eq!(summary.end, DispatchEnd::SessionGone);
}
