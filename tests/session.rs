//! End-to-end session tests over an in-memory link

mod common;

use common::{OutputFiles, ScriptedTransport};
use std::time::Duration;
use thrustlog_core::core::dispatcher::{ChannelIntents, DispatchEnd, DispatchError, NoIntents};
use thrustlog_core::core::protocol::{Command, FramingError, RawLine, SpeedLevel};
use thrustlog_core::core::sink::{RawLogSink, SampleSink, SinkError, Sinks};
use thrustlog_core::core::transport::TransportError;
use thrustlog_core::{
    AppConfig, Deployment, HandshakeMode, MemoryTransport, PreReadyPolicy, ProtocolState,
    SampleLayout, Session, SessionConfig, SessionError, TelemetrySample,
};
use tokio::time::Instant;

struct Discard;

impl RawLogSink for Discard {
    fn append(&mut self, _line: &RawLine) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl SampleSink for Discard {
    fn append(&mut self, _sample: &TelemetrySample) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

fn speed(level: u8) -> Command {
    Command::SetSpeed(SpeedLevel::new(level).unwrap())
}

fn preset(deployment: Deployment) -> SessionConfig {
    AppConfig {
        deployment,
        ..AppConfig::default()
    }
    .session_config()
}

#[tokio::test]
async fn marker_ready_session_records_both_streams() {
    let files = OutputFiles::new();
    let (mut transport, mut device) = MemoryTransport::pair("rig");
    let config = preset(Deployment::Interactive);
    let (session, dispatcher) =
        Session::open(&mut transport, config, files.sinks(SampleLayout::SpeedOnly))
            .await
            .unwrap();
    let mut state = session.watch_state();

    for line in [
        "System Ready",
        "timestamp,100,speed,3",
        "",
        "timestamp,200,speed,6",
        "Test complete",
    ] {
        device.send_line(line).await.unwrap();
    }

    let (_tx, mut intents) = ChannelIntents::channel(4);
    let (report, summary) = session.run_with(dispatcher, &mut intents).await;
    let report = report.unwrap();

    assert!(report.completed);
    assert_eq!(report.final_state, ProtocolState::Closed);
    assert_eq!(report.lines.lines, 4);
    assert_eq!(report.lines.samples, 2);
    assert!(matches!(
        summary.unwrap().end,
        DispatchEnd::SessionFinished(_)
    ));
    assert_eq!(*state.borrow_and_update(), ProtocolState::Closed);

    let transitions: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        transitions,
        [
            ProtocolState::AwaitingReady,
            ProtocolState::Running,
            ProtocolState::Complete,
            ProtocolState::Closed,
        ]
    );

    assert_eq!(
        files.raw(),
        "System Ready\ntimestamp,100,speed,3\ntimestamp,200,speed,6\nTest complete\n"
    );
    assert_eq!(files.table(), "Timestamp,Speed\n100,3\n200,6\n");

    // Both link halves are gone, so the device sees the port close.
    assert_eq!(device.recv_all().await.unwrap(), Vec::<String>::new());
}

#[tokio::test(start_paused = true)]
async fn operator_intents_are_written_in_order() {
    let files = OutputFiles::new();
    let (mut transport, mut device) = MemoryTransport::pair("rig");
    let (session, dispatcher) = Session::open(
        &mut transport,
        preset(Deployment::Thrust),
        files.sinks(SampleLayout::SpeedAndWeight),
    )
    .await
    .unwrap();
    assert_eq!(session.state(), ProtocolState::Running);

    let (tx, mut intents) = ChannelIntents::channel(4);
    for intent in ["5", "q", "-"] {
        tx.send(intent.to_string()).await.unwrap();
    }

    let rig = async {
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some("5"));
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some("-"));
        device
            .send(b"timestamp,10,speed,5,weight,40\nTest complete\n")
            .await
            .unwrap();
    };
    let ((report, summary), ()) = tokio::join!(session.run_with(dispatcher, &mut intents), rig);

    let summary = summary.unwrap();
    assert_eq!(summary.sent, vec![speed(5), Command::Stop]);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.end, DispatchEnd::Stopped);
    assert_eq!(intents.rejections().len(), 1);
    assert!(intents.rejections()[0].contains("\"q\""));

    assert!(report.unwrap().completed);
    assert_eq!(files.table(), "Timestamp,Speed,Weight\n10,5,40\n");
}

#[tokio::test(start_paused = true)]
async fn autostart_sends_start_once_after_delay() {
    let files = OutputFiles::new();
    let (mut transport, mut device) = MemoryTransport::pair("rig");
    let config = preset(Deployment::Autostart);
    assert_eq!(config.mode, HandshakeMode::Immediate);
    let (session, dispatcher) =
        Session::open(&mut transport, config, files.sinks(SampleLayout::SpeedOnly))
            .await
            .unwrap();

    let started = Instant::now();
    let rig = async {
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some("START"));
        assert!(started.elapsed() >= Deployment::START_DELAY);
        device.send_line("timestamp,0,speed,1").await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        device.send_line("Test complete").await.unwrap();
    };
    let mut operator = NoIntents;
    let ((report, summary), ()) = tokio::join!(session.run_with(dispatcher, &mut operator), rig);

    assert!(report.unwrap().completed);
    assert_eq!(summary.unwrap().sent, vec![Command::Start]);
    assert_eq!(device.recv_all().await.unwrap(), Vec::<String>::new());
}

#[tokio::test(start_paused = true)]
async fn queued_commands_follow_ready_marker() {
    let files = OutputFiles::new();
    let (mut transport, mut device) = MemoryTransport::pair("rig");
    let config = SessionConfig {
        pre_ready: PreReadyPolicy::Queue,
        ..preset(Deployment::Interactive)
    };
    let (session, dispatcher) =
        Session::open(&mut transport, config, files.sinks(SampleLayout::SpeedOnly))
            .await
            .unwrap();

    let (tx, mut intents) = ChannelIntents::channel(4);
    tx.send("3".into()).await.unwrap();
    tx.send("4".into()).await.unwrap();

    let rig = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        device.send_line("System Ready").await.unwrap();
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some("3"));
        assert_eq!(device.recv_line().await.unwrap().as_deref(), Some("4"));
        device.send_line("Test complete").await.unwrap();
    };
    let ((report, summary), ()) = tokio::join!(session.run_with(dispatcher, &mut intents), rig);

    assert!(report.unwrap().completed);
    let summary = summary.unwrap();
    assert_eq!(summary.sent, vec![speed(3), speed(4)]);
    assert_eq!(summary.dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn queue_is_dropped_when_test_completes_first() {
    let files = OutputFiles::new();
    let (mut transport, mut device) = MemoryTransport::pair("rig");
    let config = SessionConfig {
        pre_ready: PreReadyPolicy::Queue,
        ..preset(Deployment::Interactive)
    };
    let (session, dispatcher) =
        Session::open(&mut transport, config, files.sinks(SampleLayout::SpeedOnly))
            .await
            .unwrap();

    let (tx, mut intents) = ChannelIntents::channel(4);
    tx.send("7".into()).await.unwrap();

    let rig = async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        device.send_line("Test complete").await.unwrap();
    };
    let ((report, summary), ()) = tokio::join!(session.run_with(dispatcher, &mut intents), rig);

    assert!(report.unwrap().completed);
    let summary = summary.unwrap();
    assert!(summary.sent.is_empty());
    assert_eq!(summary.dropped, 1);
    assert_eq!(device.recv_all().await.unwrap(), Vec::<String>::new());
}

#[tokio::test]
async fn commands_before_ready_are_rejected_by_default() {
    let files = OutputFiles::new();
    let (mut transport, mut device) = MemoryTransport::pair("rig");
    let (session, dispatcher) = Session::open(
        &mut transport,
        preset(Deployment::Interactive),
        files.sinks(SampleLayout::SpeedOnly),
    )
    .await
    .unwrap();

    let (tx, mut intents) = ChannelIntents::channel(4);
    tx.send("2".into()).await.unwrap();
    drop(tx);

    let rig = async {
        tokio::task::yield_now().await;
        device.send_line("Test complete").await.unwrap();
    };
    let ((report, summary), ()) = tokio::join!(session.run_with(dispatcher, &mut intents), rig);

    assert!(report.unwrap().completed);
    assert_eq!(summary.unwrap().rejected, 1);
    assert_eq!(intents.rejections().len(), 1);
    assert!(intents.rejections()[0].contains("awaiting-ready"));
}

#[tokio::test]
async fn write_failure_closes_session_with_io_error() {
    let files = OutputFiles::new();
    let (mut device, host) = tokio::io::duplex(1024);
    let writer = tokio_test::io::Builder::new()
        .write_error(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "adapter unplugged",
        ))
        .build();
    let mut transport = ScriptedTransport::new(Box::new(host), Box::new(writer));

    let (session, dispatcher) = Session::open(
        &mut transport,
        preset(Deployment::Thrust),
        files.sinks(SampleLayout::SpeedAndWeight),
    )
    .await
    .unwrap();
    let close = session.close_handle();

    tokio::io::AsyncWriteExt::write_all(&mut device, b"timestamp,1,speed,0,weight,0\n")
        .await
        .unwrap();

    let (tx, mut intents) = ChannelIntents::channel(4);
    tx.send("5".into()).await.unwrap();
    let (report, summary) = session.run_with(dispatcher, &mut intents).await;

    assert!(matches!(
        summary,
        Err(DispatchError::Transport(TransportError::IoError(_)))
    ));
    match report {
        Err(SessionError::WriteFailed(msg)) => assert!(msg.contains("adapter unplugged")),
        other => panic!("expected write failure, got {other:?}"),
    }
    assert!(close.is_closed());
}

#[tokio::test]
async fn framing_overflow_aborts_session() {
    let files = OutputFiles::new();
    let (mut transport, mut device) = MemoryTransport::pair("rig");
    let config = SessionConfig {
        max_pending: Some(32),
        ..preset(Deployment::Interactive)
    };
    let (session, _dispatcher) =
        Session::open(&mut transport, config, files.sinks(SampleLayout::SpeedOnly))
            .await
            .unwrap();

    let mut state = session.watch_state();
    let rig = async {
        device.send_line("System Ready").await.unwrap();
        state
            .wait_for(|s| *s == ProtocolState::Running)
            .await
            .unwrap();
        device.send(&[b'7'; 100]).await.unwrap();
    };
    let (result, ()) = tokio::join!(session.run(), rig);

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Framing(FramingError::Overflow { limit: 32, .. })
    ));
    assert_eq!(files.raw(), "System Ready\n");
    assert_eq!(files.table(), "Timestamp,Speed\n");
}

#[tokio::test]
async fn second_open_of_endpoint_fails() {
    let files = OutputFiles::new();
    let (mut transport, _device) = MemoryTransport::pair("rig");
    let _first = Session::open(
        &mut transport,
        SessionConfig::default(),
        files.sinks(SampleLayout::SpeedOnly),
    )
    .await
    .unwrap();

    let err = Session::open(
        &mut transport,
        SessionConfig::default(),
        files.sinks(SampleLayout::SpeedOnly),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(
        err,
        SessionError::Connection(TransportError::PortInUse(_))
    ));
}

#[tokio::test]
async fn failed_open_keeps_previous_outputs() {
    let files = OutputFiles::new();
    std::fs::write(&files.raw_log, "System Ready\n").unwrap();
    std::fs::write(&files.samples, "Timestamp,Speed\n1,1\n").unwrap();

    let (mut transport, _device) = MemoryTransport::pair("rig");
    let _first = Session::open(
        &mut transport,
        SessionConfig::default(),
        Sinks::new(Box::new(Discard), Box::new(Discard)),
    )
    .await
    .unwrap();

    let err = Session::connect(&mut transport, SessionConfig::default(), || {
        Ok(files.sinks(SampleLayout::SpeedOnly))
    })
    .await
    .err()
    .unwrap();

    assert!(matches!(
        err,
        SessionError::Connection(TransportError::PortInUse(_))
    ));
    assert_eq!(files.raw(), "System Ready\n");
    assert_eq!(files.table(), "Timestamp,Speed\n1,1\n");
}
