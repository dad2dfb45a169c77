//! Voice processing module
//!
//! Microphone capture and PCM encoding on the way out, ordered playback of
//! synthesized speech on the way in.

pub mod capture;
pub mod encoder;
pub mod pcm;
pub mod playback;
pub mod scheduler;

pub use capture::{BLOCK_SIZE, BlockAssembler, Microphone, MicrophoneOptions, SAMPLE_RATE, samples_to_wav};
pub use encoder::AudioEncoder;
pub use playback::{
    OutputDevice, OutputProvider, OutputState, PLAYBACK_SAMPLE_RATE, SpeakerOutput,
    SpeakerProvider,
};
pub use scheduler::{PlaybackScheduler, RETRY_DELAY};
