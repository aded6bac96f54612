use anyhow::Result;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

const RESAMPLE_CHUNK: usize = 1024;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // No cutoff frequency, pass all frequencies
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Interprets little-endian byte pairs as PCM16 samples. A trailing odd byte is dropped.
pub fn decode_pcm16_le(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Samples of silence lasting `secs` at `sample_rate`.
pub fn silence(secs: f32, sample_rate: u32) -> Vec<i16> {
    let count = (secs.max(0.0) * sample_rate as f32).round() as usize;
    vec![0; count]
}

/// Resamples mono PCM16 audio, compensating for the resampler's delay so the
/// output length matches the input duration.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(from_rate as f64, to_rate as f64, RESAMPLE_CHUNK)?;
    let input = convert_i16_to_f32(samples);
    let expected = (samples.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<f32> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut position = 0;
    while input.len() - position >= resampler.input_frames_next() {
        let frames = resampler.input_frames_next();
        let wave = [&input[position..position + frames]];
        let out = resampler.process(&wave[..], None)?;
        output.extend_from_slice(&out[0]);
        position += frames;
    }
    if position < input.len() {
        let wave = [&input[position..]];
        let out = resampler.process_partial(Some(&wave[..]), None)?;
        output.extend_from_slice(&out[0]);
    }
    while output.len() < expected + delay {
        let out = resampler.process_partial(None::<&[&[f32]]>, None)?;
        if out[0].is_empty() {
            break;
        }
        output.extend_from_slice(&out[0]);
    }

    let end = (delay + expected).min(output.len());
    let start = delay.min(end);
    Ok(convert_f32_to_i16(&output[start..end]))
}
