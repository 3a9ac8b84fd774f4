//! 8 kHz → 16 kHz resampling for the recognizer, normalized to f32.

use rubato::{FftFixedIn, Resampler};

const INPUT_RATE: usize = 8000;
const OUTPUT_RATE: usize = 16000;
const CHUNK: usize = 1024;

/// Upsamples one chunk of 8 kHz PCM to 16 kHz f32 in [-1, 1].
///
/// A fresh resampler per chunk keeps segments independent. The FFT
/// resampler pads partial chunks and carries an internal delay, so the
/// output is flushed past that delay and trimmed to exactly twice the
/// input length.
pub fn upsample_to_16k(pcm: &[i16]) -> anyhow::Result<Vec<f32>> {
    if pcm.is_empty() {
        return Ok(Vec::new());
    }

    let samples: Vec<f32> = pcm.iter().map(|&s| s as f32 / 32768.0).collect();
    let mut resampler = FftFixedIn::<f32>::new(INPUT_RATE, OUTPUT_RATE, CHUNK, 2, 1)?;
    let delay = resampler.output_delay();
    let expected = samples.len() * 2;

    let mut out = Vec::with_capacity(expected + 2 * CHUNK);
    for chunk in samples.chunks(CHUNK) {
        let processed = if chunk.len() == CHUNK {
            resampler.process(&[chunk], None)?
        } else {
            resampler.process_partial(Some(&[chunk]), None)?
        };
        out.extend_from_slice(&processed[0]);
    }
    while out.len() < delay + expected {
        let tail = resampler.process_partial::<&[f32]>(None, None)?;
        if tail[0].is_empty() {
            break;
        }
        out.extend_from_slice(&tail[0]);
    }

    Ok(out.into_iter().skip(delay).take(expected).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(upsample_to_16k(&[]).unwrap().is_empty());
    }

    #[test]
    fn output_doubles_the_sample_count() {
        for len in [160usize, 1024, 16000] {
            let pcm: Vec<i16> = (0..len).map(|i| ((i % 200) as i16 - 100) * 50).collect();
            let out = upsample_to_16k(&pcm).unwrap();
            assert_eq!(out.len(), 2 * len, "input length {len}");
        }
    }

    #[test]
    fn silence_stays_silent() {
        let out = upsample_to_16k(&[0i16; 4000]).unwrap();
        assert!(out.iter().all(|&s| s.abs() < 1e-6));
    }

    #[test]
    fn output_is_normalized() {
        let pcm = vec![i16::MAX; 8000];
        let out = upsample_to_16k(&pcm).unwrap();
        // A full-scale step passes through near full scale; windowing may
        // ring slightly at the edges.
        assert!(out.iter().all(|&s| s.abs() <= 1.5));
        assert!(out.iter().any(|&s| s.abs() > 0.5));
    }
}
