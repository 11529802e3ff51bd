//! Light-side collaborators of the pipeline.
//!
//! The pipeline only talks to lights through [`LightHandle`] and enumerates
//! them through [`LightController`]; the [`hue`] module provides the bridge
//! backed implementation.

pub mod hue;

use crate::{LightCommand, Result, Session};

pub use hue::{HueClient, HueController, HueLight};

/// A single physical light.
pub trait LightHandle {
    /// Stable identifier used for logging.
    fn id(&self) -> &str;
    fn set_on(&self) -> Result<()>;
    fn set_off(&self) -> Result<()>;
    /// Brightness on a 0-255 scale.
    fn set_brightness(&self, level: u8) -> Result<()>;
    fn set_color(&self, hue: u16, saturation: u8) -> Result<()>;

    /// Applies a tick's command: brightness first, then the optional color.
    fn apply(&self, command: &LightCommand) -> Result<()> {
        self.set_brightness(command.brightness)?;
        if let Some(color) = command.color {
            self.set_color(color.hue, color.saturation)?;
        }
        Ok(())
    }
}

/// Enumerates the lights reachable through an authenticated session.
pub trait LightController {
    type Light: LightHandle;

    fn fetch_lights(&self, session: &Session) -> Result<Vec<Self::Light>>;
}
