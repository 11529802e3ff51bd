//! Core library for the Disco Lights application.
//!
//! Ambient audio is captured block by block, reduced to a loudness value,
//! smoothed over a bounded window and mapped through a threshold table onto
//! brightness and color commands for networked lights. Each module owns one
//! stage of that pipeline; the bridge and the audio driver sit behind traits
//! so the pipeline can be exercised without hardware.

pub mod analysis;
pub mod audio;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod lights;
pub mod mapping;
pub mod pipeline;
pub mod smoothing;

pub use analysis::{AudioBlock, BlockInfo, BlockStatus, LoudnessEstimator};
pub use audio::{
    list_input_devices, AudioCaptureDevice, CaptureSink, CaptureStream, CpalCaptureDevice,
};
pub use bootstrap::{
    establish_session, pair_new_user, ConnectionBootstrap, FileSessionStore, HueBootstrap,
    Session,
};
pub use config::{AppConfig, AudioConfig, BridgeConfig, Profile};
pub use error::{DiscoLightsError, Result};
pub use lights::{HueClient, HueController, HueLight, LightController, LightHandle};
pub use mapping::{LightColor, LightCommand, ThresholdBand, ThresholdMapper};
pub use pipeline::{CaptureLoop, PipelineState, TickReport};
pub use smoothing::{SharedWindow, SmoothingWindow};
