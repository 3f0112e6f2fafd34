use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use scalelink_core::config::FrameMode;
use scalelink_core::frame::FrameDecoder;
use scalelink_core::FramingError;

/// Frame bytes or framing errors, without timestamps
#[derive(Debug, PartialEq)]
enum Item {
    Frame(Vec<u8>),
    Error(FramingError),
}

fn decode_chunks(mut decoder: FrameDecoder, chunks: &[&[u8]]) -> Vec<Item> {
    let mut out = Vec::new();
    for chunk in chunks {
        for result in decoder.feed(chunk) {
            out.push(match result {
                Ok(frame) => Item::Frame(frame.bytes),
                Err(e) => Item::Error(e),
            });
        }
    }
    out
}

fn random_split<'a>(stream: &'a [u8], rng: &mut StdRng) -> Vec<&'a [u8]> {
    let mut chunks = Vec::new();
    let mut rest = stream;
    while !rest.is_empty() {
        let n = rng.gen_range(1..=rest.len().min(7));
        let (head, tail) = rest.split_at(n);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

fn assert_chunking_invariant(make: impl Fn() -> FrameDecoder, stream: &[u8]) {
    let whole = decode_chunks(make(), &[stream]);
    let bytewise: Vec<&[u8]> = stream.chunks(1).collect();
    assert_eq!(decode_chunks(make(), &bytewise), whole);

    let mut rng = StdRng::seed_from_u64(0x5ca1e);
    for _ in 0..200 {
        let chunks = random_split(stream, &mut rng);
        assert_eq!(decode_chunks(make(), &chunks), whole);
    }
}

#[test]
fn test_status_prefix_stream_is_chunk_invariant() {
    let stream = b"H0000.15\rL0000.10\r\r F0000.00 \rD0001.50\r\nF0012.50\rF00";
    let make = || FrameDecoder::new(FrameMode::Terminator(b"\r".to_vec()), 32, true);
    assert_chunking_invariant(make, stream);
    assert_eq!(decode_chunks(make(), &[stream]).len(), 5);
}

#[test]
fn test_multi_byte_terminator_is_chunk_invariant() {
    let stream = b"+0012.5kg,S\r\n-0001.0kg,U\r\r\n\r\n+0000.0kg\r\n";
    let make = || FrameDecoder::new(FrameMode::Terminator(b"\r\n".to_vec()), 32, false);
    assert_chunking_invariant(make, stream);
    assert_eq!(
        decode_chunks(make(), &[stream]),
        vec![
            Item::Frame(b"+0012.5kg,S".to_vec()),
            Item::Frame(b"-0001.0kg,U\r".to_vec()),
            Item::Frame(b"+0000.0kg".to_vec()),
        ]
    );
}

#[test]
fn test_overflow_is_chunk_invariant() {
    let mut stream = b"F0001.00\r".to_vec();
    stream.extend(std::iter::repeat(b'X').take(40));
    stream.extend_from_slice(b"\rF0002.00\rAAAAAAAAAAAA\r\nF0003.00\r");
    let make = || FrameDecoder::new(FrameMode::Terminator(b"\r".to_vec()), 10, true);
    assert_chunking_invariant(make, &stream);
}

#[test]
fn test_decoder_recovers_after_oversized_input() {
    let decoder = FrameDecoder::new(FrameMode::Terminator(b"\r".to_vec()), 16, true);
    let garbage = vec![b'#'; 100];
    let items = decode_chunks(decoder, &[&garbage, b"\rF0001.00\rF0002.00\r"]);
    assert_eq!(
        items,
        vec![
            Item::Error(FramingError::Overflow { limit: 16 }),
            Item::Frame(b"F0001.00".to_vec()),
            Item::Frame(b"F0002.00".to_vec()),
        ]
    );
}

#[test]
fn test_fixed_length_is_chunk_invariant() {
    let stream = b"..\x02F0001\x02F0002noise\x02F0003\x02F";
    let make = || {
        FrameDecoder::new(
            FrameMode::FixedLength {
                length: 6,
                sync_byte: Some(0x02),
            },
            64,
            false,
        )
    };
    assert_chunking_invariant(make, stream);
    let items = decode_chunks(make(), &[stream]);
    assert_eq!(
        items,
        vec![
            Item::Error(FramingError::Garbage { discarded: 2 }),
            Item::Frame(b"\x02F0001".to_vec()),
            Item::Frame(b"\x02F0002".to_vec()),
            Item::Error(FramingError::Garbage { discarded: 5 }),
            Item::Frame(b"\x02F0003".to_vec()),
        ]
    );
}
