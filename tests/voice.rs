//! Voice pipeline integration tests
//!
//! Tests audio components without requiring audio hardware

use std::io::Cursor;
use std::sync::Arc;

use aiva_client::voice::{
    BLOCK_SIZE, BlockAssembler, PlaybackScheduler, SAMPLE_RATE, pcm, samples_to_wav,
};

mod common;
use common::{MockOutput, audio_payload};

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

#[test]
fn test_capture_chunks_into_wire_blocks() {
    let mut assembler = BlockAssembler::new(BLOCK_SIZE);
    let mut blocks = Vec::new();

    // Host callbacks deliver odd-sized buffers
    let speech = generate_sine_samples(440.0, 0.5, 0.5);
    for chunk in speech.chunks(441) {
        assembler.push(chunk, |b| blocks.push(b));
    }

    assert_eq!(blocks.len(), speech.len() / BLOCK_SIZE);
    assert!(blocks.iter().all(|b| b.len() == BLOCK_SIZE));
    assert_eq!(assembler.pending(), speech.len() % BLOCK_SIZE);
    assert_eq!(blocks.concat(), speech[..blocks.len() * BLOCK_SIZE]);
}

#[test]
fn test_wire_block_is_little_endian_pcm() {
    let block = generate_sine_samples(440.0, BLOCK_SIZE as f32 / SAMPLE_RATE as f32, 0.8);
    let bytes = pcm::encode_block(&block);
    assert_eq!(bytes.len(), block.len() * 2);

    for (sample, pair) in block.iter().zip(bytes.chunks_exact(2)) {
        assert_eq!(i16::from_le_bytes([pair[0], pair[1]]), pcm::float_to_i16(*sample));
    }
}

#[test]
fn test_hex_and_base64_payloads_agree() {
    use base64::Engine;

    let bytes = pcm::encode_block(&[0.25, -0.25, 0.75, -1.0]);
    let from_hex = pcm::decode_payload(&hex::encode(&bytes)).unwrap();
    let from_b64 =
        pcm::decode_payload(&base64::engine::general_purpose::STANDARD.encode(&bytes)).unwrap();
    assert_eq!(from_hex, from_b64);
    assert_eq!(from_hex.len(), 4);
    assert_eq!(from_hex[3], -1.0);
}

#[test]
fn test_samples_to_wav() {
    let samples = generate_sine_samples(440.0, 0.1, 0.5);
    let wav_data = samples_to_wav(&samples, SAMPLE_RATE).unwrap();

    // Check WAV header magic
    assert_eq!(&wav_data[0..4], b"RIFF");
    assert_eq!(&wav_data[8..12], b"WAVE");

    // WAV should have reasonable size
    assert!(wav_data.len() > 44); // WAV header is 44 bytes
}

#[test]
fn test_wav_roundtrip() {
    let original_samples: Vec<f32> = vec![0.0, 0.5, -0.5, 1.0, -1.0, 0.25];
    let wav_data = samples_to_wav(&original_samples, SAMPLE_RATE).unwrap();

    // Read WAV back
    let cursor = Cursor::new(wav_data);
    let mut reader = hound::WavReader::new(cursor).unwrap();

    let spec = reader.spec();
    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);

    // Same quantization as the wire format
    let read_samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    let expected: Vec<i16> = original_samples.iter().map(|s| pcm::float_to_i16(*s)).collect();
    assert_eq!(read_samples, expected);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_drains_backlog_in_order() {
    let output = Arc::new(MockOutput::default());
    let mut scheduler = PlaybackScheduler::new(output.clone());

    for label in 1..=5 {
        scheduler.enqueue_and_drain(audio_payload(label));
    }
    while !scheduler.is_idle() {
        scheduler.step().await;
    }

    assert_eq!(output.labels(), vec![1, 2, 3, 4, 5]);
    assert_eq!(output.max_concurrent(), 1);
    assert_eq!(scheduler.rendered(), 5);
}
