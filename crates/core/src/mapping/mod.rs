use serde::{Deserialize, Serialize};

/// Color descriptor understood by the bridge: a hue index plus saturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightColor {
    pub hue: u16,
    pub saturation: u8,
}

impl LightColor {
    pub const fn new(hue: u16, saturation: u8) -> Self {
        Self { hue, saturation }
    }
}

/// Light state computed for a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightCommand {
    pub brightness: u8,
    pub color: Option<LightColor>,
}

impl LightCommand {
    /// Brightness zero without any power toggle.
    pub const fn dark() -> Self {
        Self {
            brightness: 0,
            color: None,
        }
    }

    pub fn is_dark(&self) -> bool {
        self.brightness == 0
    }
}

/// One rule of the threshold table: loudness strictly above `lower_bound`
/// selects `brightness` and, optionally, `color`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub lower_bound: f32,
    pub brightness: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<LightColor>,
}

impl ThresholdBand {
    pub const fn new(lower_bound: f32, brightness: u8) -> Self {
        Self {
            lower_bound,
            brightness,
            color: None,
        }
    }

    pub fn with_color(mut self, color: LightColor) -> Self {
        self.color = Some(color);
        self
    }

    fn command(&self) -> LightCommand {
        LightCommand {
            brightness: self.brightness,
            color: self.color,
        }
    }
}

/// Maps smoothed loudness onto a [`LightCommand`].
///
/// Bands are sorted by descending lower bound at construction, so the order in
/// which they are supplied does not matter. The first band the input exceeds
/// wins; when none match the lights go dark.
#[derive(Debug, Clone, Default)]
pub struct ThresholdMapper {
    bands: Vec<ThresholdBand>,
}

impl ThresholdMapper {
    pub fn new(bands: impl IntoIterator<Item = ThresholdBand>) -> Self {
        let mut bands: Vec<ThresholdBand> = bands.into_iter().collect();
        bands.sort_by(|a, b| b.lower_bound.total_cmp(&a.lower_bound));
        Self { bands }
    }

    /// Bands in evaluation order.
    pub fn bands(&self) -> &[ThresholdBand] {
        &self.bands
    }

    pub fn map(&self, loudness: f32) -> LightCommand {
        self.bands
            .iter()
            .find(|band| loudness > band.lower_bound)
            .map(ThresholdBand::command)
            .unwrap_or_else(LightCommand::dark)
    }
}

/// Color every band of the fine-grained preset is pinned to.
pub const FINE_PRESET_COLOR: LightColor = LightColor::new(3, 128);

/// Four colorized bands that only differ in brightness.
pub fn fine_bands() -> Vec<ThresholdBand> {
    vec![
        ThresholdBand::new(0.4, 255).with_color(FINE_PRESET_COLOR),
        ThresholdBand::new(0.3, 196).with_color(FINE_PRESET_COLOR),
        ThresholdBand::new(0.2, 164).with_color(FINE_PRESET_COLOR),
        ThresholdBand::new(0.1, 128).with_color(FINE_PRESET_COLOR),
    ]
}

/// Two brightness-only bands.
pub fn coarse_bands() -> Vec<ThresholdBand> {
    vec![ThresholdBand::new(0.1, 255), ThresholdBand::new(0.05, 128)]
}
