//! Speech playback
//!
//! Inbound playback buffers are 24 kHz mono PCM, one playback unit per
//! binary frame. [`SpeechPlaybackQueue`] plays them strictly in arrival
//! order, one at a time, on a dedicated worker thread; the output device
//! stays open between buffers so the next utterance resumes without
//! reopening latency.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::audio::pcm;
use crate::{Error, Result};

/// Sample rate of inbound synthesized speech (24kHz)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Plays one buffer to completion, injectable so queue ordering can be
/// tested without audio hardware
pub trait PlaybackSink: Send {
    /// Play the samples as one unit, returning when playback finishes.
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    fn play(&mut self, samples: Vec<f32>) -> Result<()>;
}

/// Sink backed by the default output device
pub struct SpeakerSink {
    config: StreamConfig,
}

impl SpeakerSink {
    /// Open the default output device at 24 kHz, mono preferred.
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device or configuration exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "speech playback initialized"
        );

        Ok(Self { config })
    }
}

impl PlaybackSink for SpeakerSink {
    fn play(&mut self, samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let config = self.config.clone();
        let channels = usize::from(config.channels);

        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(Mutex::new(0_usize));
        let finished = Arc::new(Mutex::new(false));

        let samples_cb = Arc::clone(&samples);
        let position_cb = Arc::clone(&position);
        let finished_cb = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position_cb.lock().unwrap();

                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples_cb.len() {
                            samples_cb[*pos]
                        } else {
                            *finished_cb.lock().unwrap() = true;
                            0.0
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }

                        if *pos < samples_cb.len() {
                            *pos += 1;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "speech playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        // Wait for natural completion, bounded by the buffer's duration
        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let start = std::time::Instant::now();
        let timeout = std::time::Duration::from_millis(duration_ms + 500);

        while !*finished.lock().unwrap() {
            if start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        drop(stream);
        tracing::trace!(samples = sample_count, "playback unit complete");

        Ok(())
    }
}

/// Queue state shared between the session and the worker thread
struct QueueState {
    buffers: VecDeque<Vec<u8>>,
    playing: bool,
    shutdown: bool,
}

struct QueueShared {
    state: Mutex<QueueState>,
    signal: Condvar,
}

/// Plays inbound audio buffers strictly in arrival order, one at a time
pub struct SpeechPlaybackQueue {
    shared: Arc<QueueShared>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SpeechPlaybackQueue {
    /// Start the queue over the given sink
    #[must_use]
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState {
                buffers: VecDeque::new(),
                playing: false,
                shutdown: false,
            }),
            signal: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("speech-playback".to_string())
            .spawn(move || drain_loop(&worker_shared, sink))
            .ok();

        Self { shared, worker }
    }

    /// Append one PCM buffer; playback begins immediately when idle
    pub fn enqueue(&self, buffer: Vec<u8>) {
        let mut state = self.shared.state.lock().unwrap();
        state.buffers.push_back(buffer);
        drop(state);
        self.shared.signal.notify_all();
    }

    /// Discard all queued-but-unplayed buffers. A buffer already playing
    /// finishes naturally.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock().unwrap();
        let dropped = state.buffers.len();
        state.buffers.clear();
        drop(state);
        if dropped > 0 {
            tracing::debug!(dropped, "discarded pending playback buffers");
        }
    }

    /// Number of queued-but-unplayed buffers
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.state.lock().unwrap().buffers.len()
    }

    /// Whether nothing is queued or playing
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.buffers.is_empty() && !state.playing
    }

    /// Block until the queue drains and the current buffer finishes
    pub fn wait_until_idle(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while (!state.buffers.is_empty() || state.playing) && !state.shutdown {
            state = self.shared.signal.wait(state).unwrap();
        }
    }
}

impl Drop for SpeechPlaybackQueue {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.buffers.clear();
            state.shutdown = true;
        }
        self.shared.signal.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn drain_loop(shared: &QueueShared, mut sink: Box<dyn PlaybackSink>) {
    loop {
        let buffer = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(buffer) = state.buffers.pop_front() {
                    state.playing = true;
                    break buffer;
                }
                state = shared.signal.wait(state).unwrap();
            }
        };

        let samples = pcm::decode_i16le(&buffer);
        if let Err(e) = sink.play(samples) {
            tracing::warn!(error = %e, "speech playback failed, dropping buffer");
        }

        let mut state = shared.state.lock().unwrap();
        state.playing = false;
        drop(state);
        shared.signal.notify_all();
    }
}
