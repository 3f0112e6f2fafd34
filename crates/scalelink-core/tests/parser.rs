use pretty_assertions::assert_eq;
use scalelink_core::checksum::ChecksumKind;
use scalelink_core::config::RecordLayout;
use scalelink_core::frame::RawFrame;
use scalelink_core::parser::WeightParser;
use scalelink_core::reading::StabilitySource;
use scalelink_core::{ParseError, WeightUnit};

const CHECKSUMS: [ChecksumKind; 3] = [ChecksumKind::Xor8, ChecksumKind::Sum8, ChecksumKind::Crc32];

fn signed(checksum: ChecksumKind) -> WeightParser {
    WeightParser::new(RecordLayout::Signed, checksum, WeightUnit::Kilogram)
}

#[test]
fn test_checksummed_frame_parses() {
    for kind in CHECKSUMS {
        let frame = RawFrame::new(kind.append(b"+0012.5kg,S"));
        let reading = signed(kind).parse(frame).unwrap();
        assert_eq!(reading.value, 12.5, "{kind:?}");
        assert_eq!(reading.unit, WeightUnit::Kilogram);
        assert!(reading.stable);
        assert_eq!(reading.source, StabilitySource::Device);
    }
}

#[test]
fn test_flipped_digit_fails_checksum() {
    for kind in CHECKSUMS {
        let trailer = kind.trailer(b"+0012.5kg,S");
        let mut corrupted = b"+0013.5kg,S".to_vec();
        corrupted.extend_from_slice(trailer.as_bytes());

        let err = signed(kind).parse(RawFrame::new(corrupted)).unwrap_err();
        match err {
            ParseError::ChecksumFailed { expected, actual } => {
                assert_eq!(expected, kind.compute(b"+0012.5kg,S"));
                assert_eq!(actual, kind.compute(b"+0013.5kg,S"));
            }
            other => panic!("{kind:?}: expected ChecksumFailed, got {other:?}"),
        }
    }
}

#[test]
fn test_frame_timestamp_carried_into_reading() {
    let frame = RawFrame::new(b"+0001.0kg".to_vec());
    let completed_at = frame.completed_at;
    let reading = signed(ChecksumKind::None).parse(frame).unwrap();
    assert_eq!(reading.timestamp, completed_at);
    assert_eq!(reading.source, StabilitySource::Inferred);
}

#[test]
fn test_gram_readings_normalize() {
    let reading = signed(ChecksumKind::None)
        .parse(RawFrame::new(b"+1250g,S".to_vec()))
        .unwrap();
    assert_eq!(reading.unit, WeightUnit::Gram);
    assert_eq!(reading.kilograms(), 1.25);
}

#[test]
fn test_production_frames() {
    let parser = WeightParser::new(
        RecordLayout::StatusPrefix,
        ChecksumKind::None,
        WeightUnit::Kilogram,
    );
    let cases: [(&[u8], f64, bool, StabilitySource); 4] = [
        (b"H0000.15", 0.15, false, StabilitySource::Inferred),
        (b"L0000.10", 0.10, false, StabilitySource::Inferred),
        (b"F0000.00", 0.0, true, StabilitySource::Device),
        (b"D0002.35", 2.35, false, StabilitySource::Device),
    ];
    for (bytes, value, stable, source) in cases {
        let reading = parser.parse(RawFrame::new(bytes.to_vec())).unwrap();
        assert_eq!((reading.value, reading.stable, reading.source), (value, stable, source));
    }
}

#[test]
fn test_errors_are_classified() {
    let parser = signed(ChecksumKind::None);
    let parse = |bytes: &[u8]| parser.parse(RawFrame::new(bytes.to_vec()));

    assert!(matches!(parse(b"+00x2.5kg"), Err(ParseError::Malformed(_))));
    assert!(matches!(parse(b"kg"), Err(ParseError::Malformed(_))));
    assert_eq!(
        parse(b"+0012.5oz,S"),
        Err(ParseError::UnknownUnit("oz".to_string()))
    );
}
