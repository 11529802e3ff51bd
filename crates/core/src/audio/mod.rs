use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::Sender;
use tracing::{error, info, warn};

use crate::{
    AudioBlock, AudioConfig, BlockInfo, BlockStatus, DiscoLightsError, LoudnessEstimator, Result,
    SharedWindow,
};

/// Receiving end of the capture-notification path.
///
/// Every captured block is reduced to one loudness value and pushed into the
/// shared smoothing window. Driver failures are forwarded to the pipeline so
/// they surface instead of being swallowed.
#[derive(Clone)]
pub struct CaptureSink {
    estimator: LoudnessEstimator,
    window: SharedWindow,
    faults: Sender<DiscoLightsError>,
}

impl CaptureSink {
    pub fn new(window: SharedWindow, faults: Sender<DiscoLightsError>) -> Self {
        Self {
            estimator: LoudnessEstimator::new(),
            window,
            faults,
        }
    }

    /// Handles one capture notification and returns the block's loudness.
    pub fn deliver(&self, block: &AudioBlock<'_>, info: &BlockInfo) -> f32 {
        if !info.status.is_clean() {
            warn!(status = ?info.status, frames = info.frames, "capture status");
        }

        let loudness = self.estimator.estimate(block);
        if let Err(err) = self.window.push(loudness) {
            self.report(err);
        }
        loudness
    }

    /// Forwards a stream failure to the pipeline.
    pub fn report(&self, err: DiscoLightsError) {
        error!(%err, "audio stream error");
        let _ = self.faults.try_send(err);
    }
}

impl std::fmt::Debug for CaptureSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSink").finish()
    }
}

/// A running (or ready) input stream.
pub trait CaptureStream {
    fn start(&mut self) -> Result<()>;
    /// Stops capture immediately; no notification fires afterwards.
    fn abort(&mut self) -> Result<()>;
}

/// Audio input able to open a stream that feeds a [`CaptureSink`].
pub trait AudioCaptureDevice {
    fn open(&mut self, channels: u16, sink: CaptureSink) -> Result<Box<dyn CaptureStream>>;
}

/// Input device backed by the platform's default cpal host.
#[derive(Debug, Clone, Default)]
pub struct CpalCaptureDevice {
    config: AudioConfig,
}

impl CpalCaptureDevice {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    fn select_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match &self.config.device {
            Some(wanted) => host
                .input_devices()
                .map_err(audio_error)?
                .find(|device| {
                    device
                        .name()
                        .map(|name| name.contains(wanted.as_str()))
                        .unwrap_or(false)
                })
                .ok_or_else(|| DiscoLightsError::Audio(format!("no input device matching `{wanted}`"))),
            None => host
                .default_input_device()
                .ok_or_else(|| DiscoLightsError::Audio("no default input device available".into())),
        }
    }
}

impl AudioCaptureDevice for CpalCaptureDevice {
    fn open(&mut self, channels: u16, sink: CaptureSink) -> Result<Box<dyn CaptureStream>> {
        let device = self.select_device()?;
        let supported = device.default_input_config().map_err(audio_error)?;
        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: self
                .config
                .sample_rate
                .map(cpal::SampleRate)
                .unwrap_or_else(|| supported.sample_rate()),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            device = device.name().unwrap_or_else(|_| "unknown".to_string()),
            channels,
            sample_rate = stream_config.sample_rate.0,
            format = ?supported.sample_format(),
            "opening input stream"
        );

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, sink)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, sink)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, sink)?,
            other => {
                return Err(DiscoLightsError::Audio(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        };

        Ok(Box::new(CpalStream {
            stream: Some(stream),
        }))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: CaptureSink,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let error_sink = sink.clone();
    let mut framer = BlockFramer::new(usize::from(config.channels), config.sample_rate.0);
    let mut first_capture: Option<cpal::StreamInstant> = None;

    device
        .build_input_stream(
            config,
            move |data: &[T], callback: &cpal::InputCallbackInfo| {
                let capture = callback.timestamp().capture;
                let origin = *first_capture.get_or_insert(capture);
                let elapsed = capture.duration_since(&origin).unwrap_or_default();
                framer.forward(data, elapsed, &sink);
            },
            move |err| error_sink.report(DiscoLightsError::Audio(err.to_string())),
            None,
        )
        .map_err(audio_error)
}

/// Turns raw driver buffers into normalised [`AudioBlock`]s for a
/// [`CaptureSink`].
///
/// The driver does not report dropped input, so a block whose capture time
/// lands well after the end of the previous block is flagged as an overflow.
#[derive(Debug)]
struct BlockFramer {
    channels: usize,
    sample_rate: u32,
    converted: Vec<f32>,
    /// Capture time and length of the previous block.
    previous: Option<(Duration, usize)>,
}

impl BlockFramer {
    fn new(channels: usize, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate: sample_rate.max(1),
            converted: Vec::new(),
            previous: None,
        }
    }

    fn forward<T>(&mut self, data: &[T], elapsed: Duration, sink: &CaptureSink) -> BlockInfo
    where
        T: Sample,
        f32: FromSample<T>,
    {
        self.converted.clear();
        self.converted
            .extend(data.iter().map(|&sample| sample.to_sample::<f32>()));

        let block = AudioBlock::new(&self.converted, self.channels);
        let info = BlockInfo {
            frames: block.frames(),
            timestamp: elapsed,
            status: BlockStatus {
                input_overflow: self.gap_before(elapsed),
            },
        };
        sink.deliver(&block, &info);

        self.previous = Some((elapsed, info.frames));
        info
    }

    /// Whether more than half a block of input went missing since the
    /// previous block.
    fn gap_before(&self, elapsed: Duration) -> bool {
        let Some((start, frames)) = self.previous else {
            return false;
        };
        let length = Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate));
        elapsed > start + length + length / 2
    }
}

struct CpalStream {
    stream: Option<cpal::Stream>,
}

impl CaptureStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        match &self.stream {
            Some(stream) => stream.play().map_err(audio_error),
            None => Err(DiscoLightsError::Audio("stream already aborted".into())),
        }
    }

    fn abort(&mut self) -> Result<()> {
        // dropping the stream tears down the driver callback
        match self.stream.take() {
            Some(stream) => stream.pause().map_err(audio_error),
            None => Ok(()),
        }
    }
}

fn audio_error(err: impl std::fmt::Display) -> DiscoLightsError {
    DiscoLightsError::Audio(err.to_string())
}

/// Names of the input devices the default host exposes.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    Ok(host
        .input_devices()
        .map_err(audio_error)?
        .map(|device| device.name().unwrap_or_else(|_| "Unknown Device".to_string()))
        .collect())
}
