//! Property-based tests for STOMP frame encoding/decoding
//!
//! Decoding must never panic on hostile input, and frames built through the
//! public API must survive an encode/decode cycle unchanged.

use crewchat_proto::{Command, Frame, Packet};
use proptest::prelude::*;

/// Commands whose headers are escaped on the wire
fn escaped_command() -> impl Strategy<Value = Command> {
    prop_oneof![
        Just(Command::Send),
        Just(Command::Subscribe),
        Just(Command::Unsubscribe),
        Just(Command::Message),
        Just(Command::Receipt),
        Just(Command::Error),
        Just(Command::Disconnect),
    ]
}

/// Header names without `content-length`, which the encoder manages itself
fn header_name() -> impl Strategy<Value = String> {
    "[a-z\\-:\\\\\n]{1,12}".prop_filter("content-length is derived", |n| n != "content-length")
}

fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (
        escaped_command(),
        prop::collection::vec((header_name(), "[ -~\n\r]{0,24}"), 0..6),
        prop::collection::vec(any::<u8>(), 0..512),
    )
        .prop_map(|(command, headers, body)| {
            headers
                .into_iter()
                .fold(Frame::new(command), |frame, (name, value)| frame.with_header(name, value))
                .with_body(body)
        })
}

#[test]
fn prop_decode_never_panics() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..2048))| {
        let _ = Frame::decode(&bytes);
    });
}

#[test]
fn prop_escaped_frame_roundtrip() {
    proptest!(|(frame in arbitrary_frame())| {
        let wire = frame.to_bytes().unwrap();
        let decoded = Frame::decode(&wire).unwrap();

        let Packet::Frame(decoded) = decoded else {
            return Err(TestCaseError::fail("decoded a heart-beat"));
        };

        // PROPERTY: body and command survive byte-for-byte
        prop_assert_eq!(decoded.command, frame.command);
        prop_assert_eq!(&decoded.body, &frame.body);

        // PROPERTY: every original header is present in order
        let original: Vec<_> = frame.headers().collect();
        let received: Vec<_> = decoded.headers().take(original.len()).collect();
        prop_assert_eq!(received, original);
    });
}

#[test]
fn prop_trailing_eols_are_ignored() {
    proptest!(|(frame in arbitrary_frame(), eols in 0usize..4)| {
        let mut wire = frame.to_bytes().unwrap();
        wire.extend(std::iter::repeat_n(b'\n', eols));

        let Packet::Frame(decoded) = Frame::decode(&wire).unwrap() else {
            return Err(TestCaseError::fail("decoded a heart-beat"));
        };
        prop_assert_eq!(&decoded.body, &frame.body);
    });
}
