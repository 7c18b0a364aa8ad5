//! Decoder invariants and scenario 2 ("chunk-split assistant") from
//! SPEC_FULL §8, exercised through the public `LineDecoder`.

use agent_supervisor::{LineDecoder, StreamSegment};

#[test]
fn test_line_split_across_two_chunks_yields_one_text_segment() {
    let mut decoder = LineDecoder::new();

    let first = decoder.push(br#"{"type":"ass"#);
    assert!(first.is_empty(), "no complete line yet");

    let second = decoder.push(b"istant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"A\"}]}}\n");
    assert_eq!(second.len(), 1);
    match &second[0] {
        StreamSegment::Text { content } => assert_eq!(content, "A"),
        other => panic!("expected Text segment, got {other:?}"),
    }

    assert!(decoder.flush().is_empty());
}

#[test]
fn test_malformed_line_yields_no_segments_and_does_not_panic() {
    let mut decoder = LineDecoder::new();
    let segments = decoder.push(b"not json at all\n");
    assert!(segments.is_empty());

    let segments = decoder.push(b"{\"unexpected\": \"shape\"}\n");
    assert!(segments.is_empty());
}

#[test]
fn test_flush_drains_a_trailing_line_with_no_newline() {
    let mut decoder = LineDecoder::new();
    assert!(decoder.push(br#"{"type":"assistant","#).is_empty());
    let remainder = decoder.push(br#""message":{"content":[{"type":"text","text":"B"}]}}"#);
    assert!(remainder.is_empty(), "no newline yet, nothing should decode");

    let flushed = decoder.flush();
    assert_eq!(flushed.len(), 1);
    match &flushed[0] {
        StreamSegment::Text { content } => assert_eq!(content, "B"),
        other => panic!("expected Text segment, got {other:?}"),
    }
}

#[test]
fn test_decoder_is_idempotent_across_repeated_empty_flushes() {
    let mut decoder = LineDecoder::new();
    decoder.push(b"{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"C\"}]}}\n");
    assert!(decoder.flush().is_empty());
    assert!(decoder.flush().is_empty());
}
