//! Generated checks for round-tripping and fragmentation invariance.

use bytes::{BufMut, BytesMut};
use proptest::{
    collection::{hash_map, vec},
    prelude::{Just, Strategy, any, prop_oneof},
    prop_assert,
    prop_assert_eq,
    test_runner::{Config as ProptestConfig, RngAlgorithm, TestCaseError, TestRng, TestRunner},
};
use rstest::rstest;
use serde_json::{Map, Value};

use crate::codec::{CodecError, FrameDecoder, FramingError, MAX_FRAME_LENGTH, encode};

fn deterministic_runner(cases: u32) -> TestRunner {
    let config = ProptestConfig {
        cases,
        ..ProptestConfig::default()
    };
    let rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
    TestRunner::new_with_rng(config, rng)
}

/// JSON values without floats, whose textual form is not bit-stable.
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<String>().prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..6).prop_map(Value::Array),
            hash_map(any::<String>(), inner, 0..6)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

#[test]
fn generated_values_round_trip() {
    let mut runner = deterministic_runner(256);

    runner
        .run(&json_strategy(), |value| {
            let frame = encode(&value)
                .map_err(|err| TestCaseError::fail(format!("encode failed: {err}")))?;
            let mut decoder = FrameDecoder::<Value>::new();
            let decoded = decoder
                .feed(&frame)
                .map_err(|err| TestCaseError::fail(format!("decode failed: {err}")))?;

            prop_assert_eq!(decoded.len(), 1);
            prop_assert_eq!(&decoded[0], &value);

            let reencoded = encode(&decoded[0])
                .map_err(|err| TestCaseError::fail(format!("re-encode failed: {err}")))?;
            prop_assert_eq!(reencoded, frame);
            Ok(())
        })
        .expect("generated values should round-trip");
}

#[rstest]
#[case::single_bytes(1..2, 64)]
#[case::small_chunks(1..8, 96)]
#[case::mixed_chunks(1..64, 128)]
fn fragmentation_does_not_change_decoded_sequence(
    #[case] chunk_sizes: std::ops::Range<usize>,
    #[case] cases: u32,
) {
    let mut runner = deterministic_runner(cases);
    let strategy = (
        vec(json_strategy(), 1..8),
        vec(chunk_sizes, 1..32),
    );

    runner
        .run(&strategy, |(values, sizes)| {
            let mut wire = BytesMut::new();
            for value in &values {
                let frame = encode(value)
                    .map_err(|err| TestCaseError::fail(format!("encode failed: {err}")))?;
                wire.extend_from_slice(&frame);
            }

            let mut whole = FrameDecoder::<Value>::new();
            let expected = whole
                .feed(&wire)
                .map_err(|err| TestCaseError::fail(format!("decode failed: {err}")))?;
            prop_assert_eq!(&expected, &values);

            let mut chunked = FrameDecoder::<Value>::new();
            let mut decoded = Vec::new();
            let mut rest: &[u8] = &wire;
            let mut sizes = sizes.iter().cycle();
            while !rest.is_empty() {
                let size = sizes.next().copied().unwrap_or(1).min(rest.len());
                let (chunk, tail) = rest.split_at(size);
                decoded.extend(
                    chunked
                        .feed(chunk)
                        .map_err(|err| TestCaseError::fail(format!("decode failed: {err}")))?,
                );
                rest = tail;
            }

            prop_assert_eq!(decoded, values);
            prop_assert!(chunked.buffered_len() == 0);
            Ok(())
        })
        .expect("chunked decoding should match whole-buffer decoding");
}

#[rstest]
#[case::single_bytes(1..2, 48)]
#[case::mixed_chunks(1..64, 96)]
fn oversized_frames_do_not_swallow_earlier_messages(
    #[case] chunk_sizes: std::ops::Range<usize>,
    #[case] cases: u32,
) {
    let mut runner = deterministic_runner(cases);
    let strategy = (
        vec(json_strategy(), 0..6),
        vec(chunk_sizes, 1..32),
        0x00a0_0001_u32..=u32::MAX,
    );

    runner
        .run(&strategy, |(values, sizes, declared)| {
            let mut wire = BytesMut::new();
            for value in &values {
                let frame = encode(value)
                    .map_err(|err| TestCaseError::fail(format!("encode failed: {err}")))?;
                wire.extend_from_slice(&frame);
            }
            prop_assert!(declared as usize > MAX_FRAME_LENGTH);
            wire.put_u32(declared);

            let whole = feed_until_error(&wire, &[wire.len()]);
            let chunked = feed_until_error(&wire, &sizes);
            prop_assert_eq!(&whole.0, &values);
            prop_assert_eq!(&chunked.0, &values);
            prop_assert!(whole.1 && chunked.1, "oversized header must be reported");
            Ok(())
        })
        .expect("messages ahead of an oversized frame should always be delivered");
}

/// Feed `wire` in chunks cycling through `sizes`; returns the messages seen
/// and whether an oversized-frame error ended the stream.
fn feed_until_error(wire: &[u8], sizes: &[usize]) -> (Vec<Value>, bool) {
    let mut decoder = FrameDecoder::<Value>::new();
    let mut decoded = Vec::new();
    let mut rest = wire;
    let mut sizes = sizes.iter().cycle();
    while !rest.is_empty() {
        let size = sizes.next().copied().unwrap_or(1).clamp(1, rest.len());
        let (chunk, tail) = rest.split_at(size);
        match decoder.feed(chunk) {
            Ok(values) => decoded.extend(values),
            Err(err) => {
                decoded.extend(err.decoded);
                let oversized = matches!(
                    err.source,
                    CodecError::Framing(FramingError::OversizedFrame { .. })
                );
                return (decoded, oversized);
            }
        }
        rest = tail;
    }
    (decoded, false)
}
