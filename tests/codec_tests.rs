use base64::{engine::general_purpose::STANDARD, Engine};

use cyberguard_voice::audio::codec::{
    decode_frames, encode_frame, CAPTURE_FRAME_SAMPLES, PLAYBACK_SAMPLE_RATE,
};

#[test]
fn round_trip_is_lossless_within_quantization() {
    // A frame of varied in-range samples.
    let samples: Vec<f32> = (0..512)
        .map(|i| ((i as f32) * 0.013).sin() * 0.9)
        .collect();

    let blob = encode_frame(&samples);
    assert_eq!(blob.mime_type, "audio/pcm;rate=16000");

    let decoded = decode_frames(&blob.data, 16_000, 1).unwrap();
    assert_eq!(decoded.channels.len(), 1);
    assert_eq!(decoded.frame_count(), samples.len());

    for (orig, round) in samples.iter().zip(&decoded.channels[0]) {
        assert!(
            (orig - round).abs() <= 1.0 / 32768.0,
            "sample drifted beyond quantization error: {} vs {}",
            orig,
            round
        );
    }
}

#[test]
fn empty_frame_encodes_empty_payload() {
    let blob = encode_frame(&[]);
    assert_eq!(blob.data, "");
    assert_eq!(blob.mime_type, "audio/pcm;rate=16000");

    let decoded = decode_frames(&blob.data, PLAYBACK_SAMPLE_RATE, 1).unwrap();
    assert_eq!(decoded.frame_count(), 0);
}

#[test]
fn silent_capture_frame_is_all_zero_bytes() {
    let frame = vec![0.0f32; CAPTURE_FRAME_SAMPLES];
    let blob = encode_frame(&frame);

    let bytes = STANDARD.decode(&blob.data).unwrap();
    assert_eq!(bytes.len(), CAPTURE_FRAME_SAMPLES * 2);
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn out_of_range_samples_wrap_not_clamp() {
    // 1.0 * 32768 exceeds i16::MAX and wraps to the negative extreme.
    let blob = encode_frame(&[1.0]);
    let decoded = decode_frames(&blob.data, 16_000, 1).unwrap();
    assert_eq!(decoded.channels[0][0], -1.0);
}

#[test]
fn sample_count_not_divisible_by_channels_truncates() {
    // 5 samples across 2 channels: only 2 whole frames exist.
    let mut bytes = Vec::new();
    for v in [100i16, 200, 300, 400, 500] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    let payload = STANDARD.encode(&bytes);

    let decoded = decode_frames(&payload, PLAYBACK_SAMPLE_RATE, 2).unwrap();
    assert_eq!(decoded.channels.len(), 2);
    assert_eq!(decoded.frame_count(), 2);
    // Interleaved extraction: channel 0 gets samples 0 and 2.
    assert_eq!(decoded.channels[0][0], 100.0 / 32768.0);
    assert_eq!(decoded.channels[0][1], 300.0 / 32768.0);
    assert_eq!(decoded.channels[1][0], 200.0 / 32768.0);
    assert_eq!(decoded.channels[1][1], 400.0 / 32768.0);
}

#[test]
fn odd_byte_count_drops_trailing_byte() {
    let payload = STANDARD.encode([0x12u8, 0x34, 0x56]);
    let decoded = decode_frames(&payload, PLAYBACK_SAMPLE_RATE, 1).unwrap();
    assert_eq!(decoded.frame_count(), 1);
}

#[test]
fn invalid_base64_is_an_error() {
    assert!(decode_frames("!!!not base64!!!", PLAYBACK_SAMPLE_RATE, 1).is_err());
}

#[test]
fn multichannel_deinterleave_divides_frames() {
    // 4 samples, 2 channels -> 2 frames per channel.
    let mut bytes = Vec::new();
    for v in [1000i16, -1000, 2000, -2000] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    let payload = STANDARD.encode(&bytes);

    let decoded = decode_frames(&payload, PLAYBACK_SAMPLE_RATE, 2).unwrap();
    assert_eq!(decoded.frame_count(), 2);
    assert!((decoded.duration() - 2.0 / PLAYBACK_SAMPLE_RATE as f64).abs() < 1e-9);
}
