//! Microphone capture
//!
//! Outbound audio is mono 16 kHz. The capture device is opened at that rate
//! when it supports it natively; otherwise it is opened at its default
//! configuration and the session resamples each chunk down to 16 kHz with
//! [`StreamResampler`]. Stopping capture drops the stream, which releases
//! the microphone handle.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Sample rate for outbound speech frames (16kHz)
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Source of captured audio chunks, injectable so sessions can run without
/// audio hardware
pub trait CaptureSource {
    /// Begin producing mono f32 chunks at [`CaptureSource::sample_rate`]
    /// into `frames`. No-op when already capturing.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot start
    fn start(&mut self, frames: mpsc::UnboundedSender<Vec<f32>>) -> Result<()>;

    /// Stop producing chunks and release the device handle
    fn stop(&mut self);

    /// The rate chunks are produced at
    fn sample_rate(&self) -> u32;

    /// Whether capture is currently running
    fn is_capturing(&self) -> bool;
}

/// Captures audio from the default input device
pub struct MicCapture {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
}

impl MicCapture {
    /// Open the default input device, preferring a native mono 16 kHz
    /// configuration and falling back to the device default.
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Capture("no input device available".to_string()))?;

        let config = Self::pick_config(&device)?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "microphone capture initialized"
        );

        Ok(Self {
            device,
            config,
            stream: None,
        })
    }

    fn pick_config(device: &Device) -> Result<StreamConfig> {
        let native_mono = device
            .supported_input_configs()
            .map_err(|e| Error::Capture(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(CAPTURE_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(CAPTURE_SAMPLE_RATE)
            });

        if let Some(supported) = native_mono {
            return Ok(supported
                .with_sample_rate(SampleRate(CAPTURE_SAMPLE_RATE))
                .config());
        }

        // No native 16 kHz mono; capture at the device default and let the
        // session resample
        let default = device
            .default_input_config()
            .map_err(|e| Error::Capture(e.to_string()))?;
        tracing::debug!(
            rate = default.sample_rate().0,
            channels = default.channels(),
            "no native 16 kHz mono input, capturing at device default"
        );
        Ok(default.config())
    }
}

impl CaptureSource for MicCapture {
    fn start(&mut self, frames: mpsc::UnboundedSender<Vec<f32>>) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = usize::from(self.config.channels);

        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Downmix interleaved channels to mono
                    #[allow(clippy::cast_precision_loss)]
                    let mono: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                            .collect()
                    };
                    // Receiver gone means capture has been disarmed
                    let _ = frames.send(mono);
                },
                |err| {
                    tracing::error!(error = %err, "microphone capture error");
                },
                None,
            )
            .map_err(|e| Error::Capture(e.to_string()))?;

        stream.play().map_err(|e| Error::Capture(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("microphone capture started");
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("microphone capture stopped, device released");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }
}

/// Streaming resampler for capture chunks whose device rate is not 16 kHz.
///
/// Buffers input across chunk boundaries so the fixed-size FFT resampler
/// sees a continuous stream rather than per-callback fragments.
pub struct StreamResampler {
    inner: FftFixedIn<f64>,
    pending: Vec<f64>,
    chunk_size: usize,
}

impl StreamResampler {
    /// Create a mono resampler from `from_rate` to `to_rate`.
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be initialized
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let chunk_size = 1024;
        let sub_chunks = 2;

        let inner = FftFixedIn::<f64>::new(
            from_rate as usize,
            to_rate as usize,
            chunk_size,
            sub_chunks,
            1,
        )
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        Ok(Self {
            inner,
            pending: Vec::new(),
            chunk_size,
        })
    }

    /// Feed one capture chunk; returns whatever resampled output is ready.
    /// Input shorter than the internal chunk size is held until more arrives.
    ///
    /// # Errors
    ///
    /// Returns error if resampling fails
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend(samples.iter().map(|&s| f64::from(s)));

        let mut output = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let chunk: Vec<f64> = self.pending.drain(..self.chunk_size).collect();
            let result = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            #[allow(clippy::cast_possible_truncation)]
            output.extend(result[0].iter().map(|&s| s as f32));
        }

        Ok(output)
    }
}
