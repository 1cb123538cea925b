//! WAV file capture source for offline runs.
//!
//! Delivers the file through the same `BlockFramer` the live callback uses,
//! so the handler sees identical fixed-size blocks, plus one short final
//! block if the file does not end on a block boundary.

use std::{fs::File, io::BufReader, path::Path};

use tracing::info;

use super::{AudioBlock, BlockFramer, CaptureParams, SampleFormat};
use crate::{
    config::PipelineConfig,
    error::{BenderError, Result},
};

/// Interleaved samples read per framer push.
const READ_CHUNK: usize = 4096;

pub struct WavSource {
    reader: hound::WavReader<BufReader<File>>,
    params: CaptureParams,
}

impl WavSource {
    /// Open `path` and read its header.
    ///
    /// # Errors
    /// `BenderError::AudioDevice` if the file cannot be read or is not 16- or
    /// 32-bit integer PCM.
    pub fn open(path: impl AsRef<Path>, block_length: usize) -> Result<Self> {
        let path = path.as_ref();
        let reader = hound::WavReader::open(path)
            .map_err(|e| BenderError::AudioDevice(format!("{}: {e}", path.display())))?;
        let spec = reader.spec();
        let format = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => SampleFormat::S16,
            (hound::SampleFormat::Int, 32) => SampleFormat::S32,
            (kind, bits) => {
                return Err(BenderError::AudioDevice(format!(
                    "{}: unsupported {bits}-bit {kind:?} samples",
                    path.display()
                )))
            }
        };

        info!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            format = ?format,
            frames = reader.duration(),
            "opened wav source"
        );

        Ok(Self {
            reader,
            params: CaptureParams {
                device: None,
                sample_rate: spec.sample_rate,
                channels: spec.channels,
                format,
                block_length,
            },
        })
    }

    pub fn params(&self) -> &CaptureParams {
        &self.params
    }

    /// Frames per channel in the file.
    pub fn frames(&self) -> u32 {
        self.reader.duration()
    }

    /// `config` with the capture-side fields replaced by the file's own.
    pub fn configure(&self, config: PipelineConfig) -> PipelineConfig {
        PipelineConfig {
            native_sample_rate: self.params.sample_rate,
            channels: self.params.channels,
            sample_format: self.params.format,
            block_length: self.params.block_length,
            ..config
        }
    }

    /// Feed the whole file to `handler` block by block. Returns the number of
    /// blocks delivered.
    ///
    /// # Errors
    /// `BenderError::AudioStream` if a sample cannot be decoded; blocks
    /// delivered before the error stand.
    pub fn run<H>(mut self, mut handler: H) -> Result<u64>
    where
        H: FnMut(&mut AudioBlock),
    {
        let mut framer = BlockFramer::new(&self.params);
        let mut chunk: Vec<i32> = Vec::with_capacity(READ_CHUNK);
        let mut delivered = 0u64;

        for sample in self.reader.samples::<i32>() {
            chunk.push(sample.map_err(|e| BenderError::AudioStream(e.to_string()))?);
            if chunk.len() == READ_CHUNK {
                delivered += framer.push(&chunk, &mut handler) as u64;
                chunk.clear();
            }
        }
        delivered += framer.push(&chunk, &mut handler) as u64;
        if framer.flush(&mut handler) {
            delivered += 1;
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_wav(dir: &tempfile::TempDir, spec: hound::WavSpec, frames: usize) -> PathBuf {
        let path = dir.path().join("input.wav");
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for n in 0..frames * spec.channels as usize {
            match spec.bits_per_sample {
                16 => writer.write_sample((n % 1000) as i16).unwrap(),
                _ => writer.write_sample((n as i32) << 8).unwrap(),
            }
        }
        writer.finalize().unwrap();
        path
    }

    fn spec(channels: u16, bits: u16) -> hound::WavSpec {
        hound::WavSpec {
            channels,
            sample_rate: 48_000,
            bits_per_sample: bits,
            sample_format: hound::SampleFormat::Int,
        }
    }

    #[test]
    fn delivers_full_blocks_then_short_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(&dir, spec(2, 16), 2_500);
        let source = WavSource::open(&path, 1024).unwrap();
        assert_eq!(source.params().format, SampleFormat::S16);
        assert_eq!(source.frames(), 2_500);

        let mut sizes = Vec::new();
        let mut first = None;
        let blocks = source
            .run(|block| {
                sizes.push(block.frames());
                if first.is_none() {
                    first = Some(block.samples[1]);
                }
            })
            .unwrap();
        assert_eq!(blocks, 3);
        assert_eq!(sizes, vec![1024, 1024, 452]);
        assert_eq!(first, Some(1));
    }

    #[test]
    fn thirty_two_bit_samples_keep_full_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(&dir, spec(1, 32), 1024);
        let source = WavSource::open(&path, 1024).unwrap();
        assert_eq!(source.params().format, SampleFormat::S32);
        let mut last = 0;
        source.run(|block| last = block.samples[1023]).unwrap();
        assert_eq!(last, 1023 << 8);
    }

    #[test]
    fn configure_adopts_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(&dir, spec(1, 16), 10);
        let source = WavSource::open(&path, 512).unwrap();
        let cfg = source.configure(PipelineConfig::default());
        assert_eq!(cfg.channels, 1);
        assert_eq!(cfg.sample_format, SampleFormat::S16);
        assert_eq!(cfg.block_length, 512);
        assert_eq!(cfg.target_sample_rate, 16_000);
    }

    #[test]
    fn float_wav_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0.0f32).unwrap();
        writer.finalize().unwrap();
        assert!(matches!(
            WavSource::open(&path, 1024),
            Err(BenderError::AudioDevice(_))
        ));
    }

    #[test]
    fn missing_file_is_a_device_error() {
        let err = WavSource::open("/nonexistent/bender.wav", 1024).err().unwrap();
        assert!(err.is_config());
    }
}
