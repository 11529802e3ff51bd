use std::time::Duration;

/// One interleaved buffer of samples as delivered by the capture driver.
///
/// Samples are normalised `f32` values in `[-1, 1]`; frame `n` of channel `c`
/// lives at `samples[n * channels + c]`. Blocks borrow the driver's buffer and
/// are never retained past the notification that produced them.
#[derive(Debug, Clone, Copy)]
pub struct AudioBlock<'a> {
    samples: &'a [f32],
    channels: usize,
}

impl<'a> AudioBlock<'a> {
    /// Wraps an interleaved buffer. A zero channel count is treated as mono.
    pub fn new(samples: &'a [f32], channels: usize) -> Self {
        Self {
            samples,
            channels: channels.max(1),
        }
    }

    pub fn samples(&self) -> &'a [f32] {
        self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of complete frames in the block.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}

/// Driver status flags reported alongside a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStatus {
    /// Input data was discarded because the reader fell behind.
    pub input_overflow: bool,
}

impl BlockStatus {
    pub fn is_clean(&self) -> bool {
        !self.input_overflow
    }
}

/// Metadata that accompanies every captured [`AudioBlock`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockInfo {
    pub frames: usize,
    /// Capture time relative to the start of the stream.
    pub timestamp: Duration,
    pub status: BlockStatus,
}

/// Converts raw blocks into a single scalar loudness value.
///
/// Loudness is the root-mean-square energy of each channel; multi-channel
/// blocks report the mean of the per-channel values while mono blocks use
/// their RMS directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoudnessEstimator;

impl LoudnessEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Returns the RMS of every channel in the block.
    pub fn channel_rms(&self, block: &AudioBlock<'_>) -> Vec<f32> {
        let channels = block.channels();
        let frames = block.frames();
        if frames == 0 {
            return vec![0.0; channels];
        }

        let mut sums = vec![0.0_f32; channels];
        for frame in block.samples().chunks_exact(channels) {
            for (sum, sample) in sums.iter_mut().zip(frame) {
                *sum += sample * sample;
            }
        }

        sums.into_iter()
            .map(|sum| (sum / frames as f32).sqrt())
            .collect()
    }

    /// Computes the loudness of a block. Empty blocks are silent.
    pub fn estimate(&self, block: &AudioBlock<'_>) -> f32 {
        if block.channels() == 1 {
            return compute_rms(block.samples());
        }

        let per_channel = self.channel_rms(block);
        per_channel.iter().sum::<f32>() / per_channel.len() as f32
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}
