//! Audio capture, playback, and PCM conversion
//!
//! Outbound frames are mono 16 kHz i16 PCM; inbound playback buffers are
//! mono 24 kHz i16 PCM. Devices are scoped: the microphone is held only
//! while capture is armed, the output device only by the playback worker.

mod capture;
pub mod pcm;
mod playback;

pub use capture::{CAPTURE_SAMPLE_RATE, CaptureSource, MicCapture, StreamResampler};
pub use playback::{PLAYBACK_SAMPLE_RATE, PlaybackSink, SpeakerSink, SpeechPlaybackQueue};
