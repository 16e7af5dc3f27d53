//! Chunk-boundary behaviour of the line framer

use thrustlog_core::core::protocol::{
    FramingError, LineClass, LineFramer, RawLine, SampleLayout, TelemetryParser,
    TelemetrySample,
};

const STREAM: &[u8] = b"Booting rig v2\r\nSystem Ready\n\ntimestamp,100,speed,3,weight,12\n  \ntimestamp,200,speed,6,weight,-4\ntimestamp,abc,speed,5,weight,1\nTest complete\n";

fn frame_in_chunks(data: &[u8], splits: &[usize]) -> Vec<RawLine> {
    let mut framer = LineFramer::new();
    let mut lines = Vec::new();
    let mut start = 0;
    for &end in splits.iter().chain(std::iter::once(&data.len())) {
        for line in framer.feed(&data[start..end]) {
            lines.push(line.unwrap());
        }
        start = end;
    }
    assert_eq!(framer.pending(), 0);
    lines
}

#[test]
fn any_single_split_yields_the_same_lines() {
    let whole = frame_in_chunks(STREAM, &[]);
    assert_eq!(whole.len(), 6);

    for split in 0..=STREAM.len() {
        assert_eq!(frame_in_chunks(STREAM, &[split]), whole, "split at {split}");
    }
}

#[test]
fn byte_at_a_time_yields_the_same_lines() {
    let whole = frame_in_chunks(STREAM, &[]);
    let splits: Vec<usize> = (1..STREAM.len()).collect();
    assert_eq!(frame_in_chunks(STREAM, &splits), whole);
}

#[test]
fn framed_stream_classifies_as_expected() {
    let parser = TelemetryParser::new(SampleLayout::SpeedAndWeight);
    let classes: Vec<LineClass> = frame_in_chunks(STREAM, &[7, 40, 41, 90])
        .iter()
        .map(|line| parser.classify(line))
        .collect();

    assert_eq!(classes[0], LineClass::Diagnostic);
    assert_eq!(classes[1], LineClass::Ready);
    assert_eq!(
        classes[2],
        LineClass::Telemetry(TelemetrySample::with_weight(100, 3, 12))
    );
    assert_eq!(
        classes[3],
        LineClass::Telemetry(TelemetrySample::with_weight(200, 6, -4))
    );
    assert!(matches!(classes[4], LineClass::Malformed(_)));
    assert_eq!(classes[5], LineClass::Complete);
}

#[test]
fn overflowing_tail_never_hides_complete_lines() {
    let mut data = b"System Ready\nTest complete\n".to_vec();
    data.extend_from_slice(&[b'x'; 20]);

    for split in 0..=data.len() {
        let mut framer = LineFramer::with_limit(Some(16));
        let mut lines = Vec::new();
        let mut overflowed = false;
        for chunk in [&data[..split], &data[split..]] {
            for item in framer.feed(chunk) {
                match item {
                    Ok(line) => lines.push(line.into_string()),
                    Err(FramingError::Overflow { limit, .. }) => {
                        assert_eq!(limit, 16);
                        overflowed = true;
                    }
                    Err(e) => panic!("unexpected error {e}"),
                }
            }
        }
        assert_eq!(lines, ["System Ready", "Test complete"], "split at {split}");
        assert!(overflowed, "split at {split}");
    }
}
