//! WAV decoding for streamed speech and PCM format conversion.
//!
//! The backend streams each speech turn as a sequence of chunks. The first
//! chunk of a turn carries a RIFF header; later chunks may be raw PCM that
//! continues the same stream, split at arbitrary byte offsets.

use crate::audio::output::AudioClip;
use crate::error::{Result, VocalisError};
use std::io::Cursor;

/// Sample layout of the stream established by the last RIFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub float: bool,
}

impl StreamFormat {
    fn from_spec(spec: hound::WavSpec) -> Result<Self> {
        let float = spec.sample_format == hound::SampleFormat::Float;
        let supported = match (float, spec.bits_per_sample) {
            (true, 32) => true,
            (false, 8 | 16 | 24 | 32) => true,
            _ => false,
        };
        if !supported || spec.channels == 0 || spec.sample_rate == 0 {
            return Err(VocalisError::Decode {
                message: format!(
                    "unsupported WAV layout: {}ch/{}Hz/{}-bit {}",
                    spec.channels,
                    spec.sample_rate,
                    spec.bits_per_sample,
                    if float { "float" } else { "int" }
                ),
            });
        }
        Ok(Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            float,
        })
    }

    fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }
}

/// Turns speech chunks into playable clips, one turn at a time.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    format: Option<StreamFormat>,
    carry: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The format of the current stream, once a header has been seen.
    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Decode one chunk.
    ///
    /// Returns `Ok(None)` when the chunk held less than one whole frame; the
    /// bytes are kept and prepended to the next chunk.
    ///
    /// # Errors
    /// Returns `VocalisError::Decode` for a malformed header, or for raw PCM
    /// arriving before any header established the stream format.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<Option<AudioClip>> {
        let pcm = if bytes.starts_with(b"RIFF") {
            let (format, offset) = parse_header(bytes)?;
            self.format = Some(format);
            self.carry.clear();
            &bytes[offset..]
        } else {
            if self.format.is_none() {
                return Err(VocalisError::Decode {
                    message: "chunk has no WAV header and no stream format is known".to_string(),
                });
            }
            bytes
        };

        let Some(format) = self.format else {
            return Ok(None);
        };

        self.carry.extend_from_slice(pcm);
        let frame = format.bytes_per_frame();
        let whole = self.carry.len() - self.carry.len() % frame;
        if whole == 0 {
            return Ok(None);
        }

        let samples = pcm_to_i16(&self.carry[..whole], &format);
        self.carry.drain(..whole);

        Ok(Some(AudioClip {
            samples,
            channels: format.channels,
            sample_rate: format.sample_rate,
        }))
    }

    /// Forget the stream format and any buffered partial frame.
    pub fn reset(&mut self) {
        self.format = None;
        self.carry.clear();
    }
}

/// Parse a RIFF header, returning the format and the offset of the PCM data.
fn parse_header(bytes: &[u8]) -> Result<(StreamFormat, usize)> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|e| VocalisError::Decode {
        message: format!("Failed to parse WAV header: {}", e),
    })?;
    let format = StreamFormat::from_spec(reader.spec())?;
    let offset = reader.into_inner().position() as usize;
    Ok((format, offset.min(bytes.len())))
}

fn pcm_to_i16(bytes: &[u8], format: &StreamFormat) -> Vec<i16> {
    match (format.float, format.bits_per_sample) {
        (true, _) => bytes
            .chunks_exact(4)
            .map(|b| f32_to_i16(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            .collect(),
        (false, 8) => bytes.iter().map(|&b| ((b as i16) - 128) << 8).collect(),
        (false, 16) => bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect(),
        (false, 24) => bytes
            .chunks_exact(3)
            .map(|b| i16::from_le_bytes([b[1], b[2]]))
            .collect(),
        _ => bytes
            .chunks_exact(4)
            .map(|b| i16::from_le_bytes([b[2], b[3]]))
            .collect(),
    }
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Mix multi-channel audio to mono and resample to the target rate.
pub fn convert_to_mono(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    let mono: Vec<i16> = if channels <= 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|frame| {
                let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                (sum / channels as i32) as i16
            })
            .collect()
    };

    resample(&mono, source_rate, target_rate)
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_decode_complete_wav_chunk() {
        let samples: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        let wav = make_wav_data(24000, 1, &samples);

        let mut decoder = ChunkDecoder::new();
        let clip = decoder.decode(&wav).unwrap().unwrap();

        assert_eq!(clip.samples, samples);
        assert_eq!(clip.channels, 1);
        assert_eq!(clip.sample_rate, 24000);
        assert_eq!(
            decoder.format(),
            Some(StreamFormat {
                channels: 1,
                sample_rate: 24000,
                bits_per_sample: 16,
                float: false,
            })
        );
    }

    #[test]
    fn test_headerless_chunk_continues_stream_format() {
        let mut decoder = ChunkDecoder::new();
        decoder.decode(&make_wav_data(22050, 2, &[1, 2, 3, 4])).unwrap();

        let clip = decoder.decode(&pcm_bytes(&[5, 6, 7, 8])).unwrap().unwrap();

        assert_eq!(clip.samples, vec![5, 6, 7, 8]);
        assert_eq!(clip.channels, 2);
        assert_eq!(clip.sample_rate, 22050);
    }

    #[test]
    fn test_wav_split_mid_sample_is_reassembled() {
        let samples: Vec<i16> = vec![100, -200, 300, -400, 500, -600];
        let wav = make_wav_data(16000, 1, &samples);
        // Cut one byte into the fourth sample
        let split = wav.len() - 5;

        let mut decoder = ChunkDecoder::new();
        let first = decoder.decode(&wav[..split]).unwrap().unwrap();
        let second = decoder.decode(&wav[split..]).unwrap().unwrap();

        let mut joined = first.samples;
        joined.extend(second.samples);
        assert_eq!(joined, samples);
    }

    #[test]
    fn test_partial_frame_only_returns_none() {
        let mut decoder = ChunkDecoder::new();
        decoder.decode(&make_wav_data(16000, 1, &[])).unwrap();

        assert!(decoder.decode(&[0x10]).unwrap().is_none());
        let clip = decoder.decode(&[0x00]).unwrap().unwrap();
        assert_eq!(clip.samples, vec![0x10]);
    }

    #[test]
    fn test_headerless_chunk_without_format_is_decode_error() {
        let mut decoder = ChunkDecoder::new();
        let result = decoder.decode(&pcm_bytes(&[1, 2, 3]));
        assert!(matches!(result, Err(VocalisError::Decode { .. })));
    }

    #[test]
    fn test_malformed_header_is_decode_error() {
        let mut decoder = ChunkDecoder::new();
        let result = decoder.decode(b"RIFF\x00\x00\x00\x00garbage");
        assert!(matches!(result, Err(VocalisError::Decode { .. })));
    }

    #[test]
    fn test_reset_forgets_format() {
        let mut decoder = ChunkDecoder::new();
        decoder.decode(&make_wav_data(16000, 1, &[1, 2])).unwrap();
        decoder.reset();
        assert!(decoder.format().is_none());
        assert!(decoder.decode(&pcm_bytes(&[1])).is_err());
    }

    #[test]
    fn test_float_wav_is_converted_to_i16() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [0.0f32, 1.0, -1.0, 0.5] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let mut decoder = ChunkDecoder::new();
        let clip = decoder.decode(&cursor.into_inner()).unwrap().unwrap();
        assert_eq!(clip.samples, vec![0, i16::MAX, -i16::MAX, i16::MAX / 2]);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![1i16, 2, 3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn test_resample_halves_length_when_downsampling() {
        let samples = vec![0i16; 3200];
        assert_eq!(resample(&samples, 32000, 16000).len(), 1600);
    }

    #[test]
    fn test_resample_empty_input() {
        assert!(resample(&[], 48000, 16000).is_empty());
    }

    #[test]
    fn test_convert_to_mono_averages_channels() {
        let stereo = vec![100i16, 300, -100, -300];
        assert_eq!(convert_to_mono(&stereo, 2, 16000, 16000), vec![200, -200]);
    }
}
