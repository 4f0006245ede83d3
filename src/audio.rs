//! Post-processing of raw model output into a WAV byte stream.
//!
//! Models return audio in several shapes: a bare sample array, a
//! `(samples, sample_rate)` pair, or a keyed mapping. [`RawOutput`] captures
//! those shapes; [`to_wav`] collapses them to mono, applies peak-safe RMS
//! normalization and encodes 16-bit PCM.

use std::collections::BTreeMap;
use std::io::Cursor;

use ndarray::{arr0, Array1, ArrayD, Axis, IxDyn};

use crate::error::{TtsError, TtsResult};

/// Sample rate assumed until a model reports its own.
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Peak amplitude at or below which a clip is treated as silence.
const SILENCE_PEAK: f64 = 1e-8;

/// Floor for the RMS divisor.
const MIN_RMS: f64 = 1e-8;

const PCM_SCALE: f32 = 32767.0;

/// A value stored in a mapping-shaped model output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    Audio(ArrayD<f32>),
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Audio exactly as a model returned it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// A bare sample array of any shape.
    Samples(ArrayD<f32>),
    /// A pair whose second element may carry the sample rate.
    WithRate(ArrayD<f32>, OutputValue),
    /// A mapping holding audio under `"audio"` or `"wav"`, and optionally `"sample_rate"`.
    Mapping(BTreeMap<String, OutputValue>),
}

impl RawOutput {
    /// Wrap a flat mono sample buffer.
    pub fn from_samples(samples: Vec<f32>) -> Self {
        RawOutput::Samples(Array1::from(samples).into_dyn())
    }

    /// The sample rate the output carries itself, if any.
    pub fn reported_sample_rate(&self) -> Option<i64> {
        match self {
            RawOutput::WithRate(_, OutputValue::Integer(rate)) => Some(*rate),
            RawOutput::Mapping(map) => match map.get("sample_rate") {
                Some(OutputValue::Integer(rate)) => Some(*rate),
                _ => None,
            },
            _ => None,
        }
    }

    /// Rate to encode with: the reported rate when present, else `fallback`.
    pub fn effective_sample_rate(&self, fallback: u32) -> TtsResult<u32> {
        match self.reported_sample_rate() {
            None => Ok(fallback),
            Some(rate) => u32::try_from(rate)
                .ok()
                .filter(|r| *r > 0)
                .ok_or_else(|| {
                    TtsError::Generation(format!("model reported an invalid sample rate: {rate}"))
                }),
        }
    }

    fn into_audio(self) -> TtsResult<ArrayD<f32>> {
        match self {
            RawOutput::Samples(audio) | RawOutput::WithRate(audio, _) => Ok(audio),
            RawOutput::Mapping(mut map) => {
                let value = map.remove("audio").or_else(|| map.remove("wav")).ok_or_else(|| {
                    TtsError::Generation(
                        "model output mapping has no 'audio' or 'wav' entry".to_string(),
                    )
                })?;
                value.into_array()
            }
        }
    }
}

impl OutputValue {
    fn into_array(self) -> TtsResult<ArrayD<f32>> {
        match self {
            OutputValue::Audio(audio) => Ok(audio),
            OutputValue::Integer(v) => Ok(arr0(v as f32).into_dyn()),
            OutputValue::Float(v) => Ok(arr0(v as f32).into_dyn()),
            OutputValue::Text(_) => Err(TtsError::Generation(
                "model returned non-numeric audio".to_string(),
            )),
        }
    }
}

/// Convert raw model output into WAV bytes.
pub fn to_wav(
    output: RawOutput,
    sample_rate: u32,
    target_rms_db: f64,
    target_peak_db: f64,
) -> TtsResult<Vec<u8>> {
    let mut samples = to_mono(output.into_audio()?)?;
    normalize_levels(&mut samples, target_rms_db, target_peak_db);
    encode_wav(&to_pcm16(&samples), sample_rate)
}

/// Squeeze singleton axes and keep the first channel of anything still
/// multi-dimensional.
pub fn to_mono(audio: ArrayD<f32>) -> TtsResult<Vec<f32>> {
    let shape: Vec<usize> = audio.shape().iter().copied().filter(|&d| d != 1).collect();
    let data: Vec<f32> = audio.iter().copied().collect();
    let squeezed = ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| TtsError::Generation(format!("unexpected audio shape: {e}")))?;

    if squeezed.ndim() == 0 || squeezed.is_empty() {
        return Err(TtsError::Generation(
            "Model returned an empty audio tensor.".to_string(),
        ));
    }

    if squeezed.ndim() == 1 {
        return Ok(squeezed.iter().copied().collect());
    }
    Ok(squeezed.index_axis(Axis(0), 0).iter().copied().collect())
}

fn db_to_amp(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Boost quiet clips toward `target_rms_db` without exceeding `target_peak_db`.
///
/// Returns the gain applied, or `None` when the buffer was left untouched.
pub fn normalize_levels(samples: &mut [f32], target_rms_db: f64, target_peak_db: f64) -> Option<f64> {
    let peak = samples
        .iter()
        .fold(0.0f64, |acc, &s| acc.max(f64::from(s).abs()));
    if peak <= SILENCE_PEAK {
        return None;
    }

    let peak_gain = db_to_amp(target_peak_db) / peak;
    let mean_square =
        samples.iter().map(|&s| f64::from(s).powi(2)).sum::<f64>() / samples.len() as f64;
    let rms = mean_square.sqrt();
    let rms_gain = (db_to_amp(target_rms_db) / rms.max(MIN_RMS)).max(1.0);

    let gain = peak_gain.min(rms_gain);
    if gain <= 0.0 {
        return None;
    }

    for sample in samples.iter_mut() {
        *sample = (f64::from(*sample) * gain) as f32;
    }
    Some(gain)
}

/// Clamp to [-1, 1] and truncate to signed 16-bit.
pub fn to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * PCM_SCALE) as i16)
        .collect()
}

/// Encode mono 16-bit PCM as a canonical WAV file in memory.
pub fn encode_wav(pcm: &[i16], sample_rate: u32) -> TtsResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut bytes = Vec::with_capacity(44 + pcm.len() * 2);
    let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec)?;
    for &sample in pcm {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn read_back(bytes: &[u8]) -> (hound::WavSpec, Vec<i16>) {
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        let samples = reader.into_samples::<i16>().map(|s| s.unwrap()).collect();
        (spec, samples)
    }

    #[test]
    fn silence_is_left_untouched() {
        let mut silent = vec![0.0, 1e-9, -5e-9, 0.0];
        let before = silent.clone();
        assert_eq!(normalize_levels(&mut silent, -16.0, -1.0), None);
        assert_eq!(silent, before);
    }

    #[test]
    fn loud_clip_is_limited_by_peak_target() {
        let mut samples = vec![0.9, -0.9, 0.9, -0.9];
        let gain = normalize_levels(&mut samples, -16.0, -1.0).unwrap();

        let target_peak = db_to_amp(-1.0);
        assert!((gain - target_peak / 0.9).abs() < 1e-9);
        for s in samples {
            assert!(f64::from(s.abs()) <= target_peak + 1e-6);
        }
    }

    #[test]
    fn quiet_clip_is_boosted_toward_rms_target() {
        // A short click in mostly-quiet audio: RMS boost would overshoot the peak.
        let mut spiky = vec![0.0; 100];
        spiky[10] = 0.05;
        let gain = normalize_levels(&mut spiky, -16.0, -1.0).unwrap();
        assert!((gain - db_to_amp(-1.0) / 0.05).abs() < 1e-9);

        // A steady quiet tone: RMS gain wins and stays below the peak ceiling.
        let mut steady = vec![0.01, -0.01, 0.01, -0.01];
        let gain = normalize_levels(&mut steady, -16.0, -1.0).unwrap();
        assert!((gain - db_to_amp(-16.0) / 0.01).abs() < 1e-6);
        assert!(gain >= 1.0);
    }

    #[test]
    fn rms_step_never_attenuates() {
        // RMS is already above the target, peak has headroom: gain is exactly 1.
        let mut samples = vec![0.5, -0.5, 0.5, -0.5];
        let gain = normalize_levels(&mut samples, -16.0, 0.0).unwrap();
        assert_eq!(gain, 1.0);
        assert_eq!(samples, vec![0.5, -0.5, 0.5, -0.5]);
    }

    #[test]
    fn pcm_conversion_clamps_and_truncates() {
        assert_eq!(
            to_pcm16(&[1.5, -1.5, 0.5, -0.5, 0.0]),
            vec![32767, -32767, 16383, -16383, 0]
        );
    }

    #[test]
    fn wav_header_matches_samples() {
        let pcm: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        let bytes = encode_wav(&pcm, 22_050).unwrap();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + pcm.len() * 2);

        let (spec, decoded) = read_back(&bytes);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(spec.sample_rate, 22_050);
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn multichannel_output_keeps_first_channel() {
        let stereo = Array2::from_shape_vec((2, 3), vec![0.1, 0.2, 0.3, 0.9, 0.9, 0.9])
            .unwrap()
            .into_dyn();
        assert_eq!(to_mono(stereo).unwrap(), vec![0.1, 0.2, 0.3]);

        let batched = ArrayD::from_shape_vec(IxDyn(&[1, 1, 4]), vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(to_mono(batched).unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn scalar_and_empty_outputs_are_rejected() {
        let scalar = arr0(0.5f32).into_dyn();
        assert!(matches!(to_mono(scalar), Err(TtsError::Generation(_))));

        let single = ArrayD::from_shape_vec(IxDyn(&[1, 1]), vec![0.5]).unwrap();
        assert!(matches!(to_mono(single), Err(TtsError::Generation(_))));

        let empty = ArrayD::<f32>::zeros(IxDyn(&[0]));
        assert!(matches!(to_mono(empty), Err(TtsError::Generation(_))));
    }

    #[test]
    fn mapping_output_prefers_audio_then_wav() {
        let mut map = BTreeMap::new();
        map.insert(
            "wav".to_string(),
            OutputValue::Audio(Array1::from(vec![0.9f32, 0.9]).into_dyn()),
        );
        map.insert(
            "audio".to_string(),
            OutputValue::Audio(Array1::from(vec![0.1f32, 0.2, 0.3]).into_dyn()),
        );
        map.insert("sample_rate".to_string(), OutputValue::Integer(16_000));
        let output = RawOutput::Mapping(map);

        assert_eq!(output.effective_sample_rate(24_000).unwrap(), 16_000);
        let bytes = to_wav(output, 16_000, -16.0, -1.0).unwrap();
        let (spec, samples) = read_back(&bytes);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(samples.len(), 3);
    }

    #[test]
    fn mapping_without_audio_is_a_generation_error() {
        let mut map = BTreeMap::new();
        map.insert("sample_rate".to_string(), OutputValue::Integer(16_000));
        let err = to_wav(RawOutput::Mapping(map), 16_000, -16.0, -1.0).unwrap_err();
        assert!(matches!(err, TtsError::Generation(_)));
    }

    #[test]
    fn pair_rate_only_counts_when_integer() {
        let samples = Array1::from(vec![0.1f32, 0.2]).into_dyn();
        let with_int = RawOutput::WithRate(samples.clone(), OutputValue::Integer(44_100));
        assert_eq!(with_int.effective_sample_rate(24_000).unwrap(), 44_100);

        let with_float = RawOutput::WithRate(samples.clone(), OutputValue::Float(44_100.0));
        assert_eq!(with_float.effective_sample_rate(24_000).unwrap(), 24_000);

        let negative = RawOutput::WithRate(samples, OutputValue::Integer(-1));
        assert!(negative.effective_sample_rate(24_000).is_err());
    }

    #[test]
    fn encoding_is_deterministic() {
        let make = || RawOutput::from_samples((0..1000).map(|i| (i as f32 * 0.01).sin() * 0.2).collect());
        let first = to_wav(make(), 24_000, -16.0, -1.0).unwrap();
        let second = to_wav(make(), 24_000, -16.0, -1.0).unwrap();
        assert_eq!(first, second);

        let (_, samples) = read_back(&first);
        let ceiling = (db_to_amp(-1.0) * 32767.0).ceil() as i16;
        assert_eq!(samples.len(), 1000);
        assert!(samples.iter().all(|s| s.abs() <= ceiling));
    }
}
