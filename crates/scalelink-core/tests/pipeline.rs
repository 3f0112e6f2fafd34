//! Simulator → decoder → parser → filter without the engine thread

use std::time::{Duration, Instant};

use scalelink_core::checksum::ChecksumKind;
use scalelink_core::config::RecordLayout;
use scalelink_core::frame::FrameDecoder;
use scalelink_core::parser::WeightParser;
use scalelink_core::simulator::SimulatedScale;
use scalelink_core::stability::StabilityFilter;
use scalelink_core::transport::Transport;
use scalelink_core::{ScaleConfig, StableWeight};

fn run_pipeline(config: &ScaleConfig, seed: u64, reads: usize) -> (Vec<StableWeight>, usize) {
    let mut scale = SimulatedScale::seeded(config, seed)
        .unwrap()
        .with_interval(Duration::ZERO);
    let mut decoder = FrameDecoder::from_config(&config.framing);
    let parser = WeightParser::from_config(&config.format);
    let mut filter = StabilityFilter::from_config(&config.stability);

    let mut published = Vec::new();
    let mut errors = 0;
    for _ in 0..reads {
        let chunk = scale.read(Duration::from_millis(10)).unwrap();
        for frame in decoder.feed(&chunk) {
            match frame.map_err(|e| e.to_string()).and_then(|f| parser.parse(f).map_err(|e| e.to_string())) {
                Ok(reading) => published.extend(filter.push(reading, Instant::now())),
                Err(_) => errors += 1,
            }
        }
    }
    (published, errors)
}

#[test]
fn test_simulated_status_prefix_settles() {
    let (published, errors) = run_pipeline(&ScaleConfig::default(), 42, 400);
    assert_eq!(errors, 0);
    assert!(published.iter().any(|w| w.kilograms() >= 0.5));
    assert!(published.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(published.iter().all(|w| w.reading.stable));
}

#[test]
fn test_simulated_signed_with_crc_settles() {
    let mut config = ScaleConfig::default();
    config.format.layout = RecordLayout::Signed;
    config.format.checksum = ChecksumKind::Crc32;
    config.framing.terminator = "\\r\\n".to_string();

    let (published, errors) = run_pipeline(&config, 7, 400);
    assert_eq!(errors, 0);
    assert!(published.iter().any(|w| w.kilograms() >= 0.5));
}

#[test]
fn test_simulated_inferred_stability() {
    // Without trusting device flags, the window decides
    let mut config = ScaleConfig::default();
    config.stability.window = 5;
    config.stability.tolerance_kg = 0.01;
    let mut scale = SimulatedScale::seeded(&config, 9)
        .unwrap()
        .with_interval(Duration::ZERO);
    let mut decoder = FrameDecoder::from_config(&config.framing);
    let parser = WeightParser::from_config(&config.format);
    let mut filter = StabilityFilter::from_config(&config.stability);

    let mut published = 0;
    for _ in 0..400 {
        let chunk = scale.read(Duration::from_millis(10)).unwrap();
        for frame in decoder.feed(&chunk).filter_map(Result::ok) {
            let mut reading = parser.parse(frame).unwrap();
            reading.source = scalelink_core::reading::StabilitySource::Inferred;
            reading.stable = false;
            if filter.push(reading, Instant::now()).is_some() {
                published += 1;
            }
        }
    }
    assert!(published >= 2);
}

#[test]
fn test_padded_record_checksum_survives_framing() {
    let mut config = ScaleConfig::default();
    config.format.layout = RecordLayout::Signed;
    config.format.checksum = ChecksumKind::Xor8;
    config.framing.terminator = "\\r\\n".to_string();

    let mut stream = ChecksumKind::Xor8.append(b" +0012.5kg,S");
    stream.extend_from_slice(b"\r\n");
    let mut decoder = FrameDecoder::from_config(&config.framing);
    let parser = WeightParser::from_config(&config.format);

    let frames: Vec<_> = decoder.feed(&stream).collect();
    assert_eq!(frames.len(), 1);
    let reading = parser.parse(frames[0].clone().unwrap()).unwrap();
    assert_eq!(reading.value, 12.5);
    assert_eq!(reading.unit, scalelink_core::WeightUnit::Kilogram);
    assert!(reading.stable);

    // Same record behind a bare \r terminator leaves a leading \n on the next frame
    config.framing.terminator = "\\r".to_string();
    let mut decoder = FrameDecoder::from_config(&config.framing);
    let mut twice = stream.clone();
    twice.extend_from_slice(&stream);
    let values: Vec<f64> = decoder
        .feed(&twice)
        .map(|frame| parser.parse(frame.unwrap()).unwrap().value)
        .collect();
    assert_eq!(values, vec![12.5, 12.5]);
}
