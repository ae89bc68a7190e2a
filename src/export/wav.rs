//! WAV file export.

use crate::error::{Result, SoundRomError};
use crate::mixer::RenderOutput;
use std::path::Path;

/// Write a render to a canonical 16-bit PCM WAV file.
pub fn write_wav<P: AsRef<Path>>(output: &RenderOutput, path: P) -> Result<()> {
    let spec = hound::WavSpec {
        channels: output.channels as u16,
        sample_rate: output.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path.as_ref(), spec)
        .map_err(|e| SoundRomError::Export(format!("failed to create WAV file: {e}")))?;

    for &sample in &output.samples {
        writer
            .write_sample(sample)
            .map_err(|e| SoundRomError::Export(format!("failed to write sample: {e}")))?;
    }

    writer
        .finalize()
        .map_err(|e| SoundRomError::Export(format!("failed to finalize WAV file: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_a_readable_mono_wav() {
        let output = RenderOutput {
            sample_rate: 8_000,
            channels: 1,
            samples: vec![0, 1000, -1000, 32767, -32768],
        };
        let dir = std::env::temp_dir();
        let path = dir.join("soundrom_core_test_mono.wav");
        write_wav(&output, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.spec().bits_per_sample, 16);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn writes_a_readable_stereo_wav() {
        let output = RenderOutput {
            sample_rate: 44_100,
            channels: 2,
            samples: vec![100, -100, 200, -200],
        };
        let dir = std::env::temp_dir();
        let path = dir.join("soundrom_core_test_stereo.wav");
        write_wav(&output, &path).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        std::fs::remove_file(&path).ok();
    }
}
