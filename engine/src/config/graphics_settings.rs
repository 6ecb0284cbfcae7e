use serde::{Deserialize, Serialize};

use crate::{config::config_manager::Config, lod::MAX_HIGHEST_LOD};

/// User-facing rendering knobs, persisted to `graphics.ron`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphicsSettings {
    /// Render distance at LOD 0, in chunks.
    pub render_distance: i32,
    /// Scale applied to the render distance of coarser LODs.
    pub lod_factor: f64,
    /// Power-of-two exponent of the coarsest voxel size.
    pub highest_lod: u32,
    pub bloom: bool,
    /// Vertical field of view, degrees.
    pub fov: f32,
    pub vsync: bool,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        GraphicsSettings {
            render_distance: 8,
            lod_factor: 1.0,
            highest_lod: 3,
            bloom: true,
            fov: 70.0,
            vsync: true,
        }
    }
}

impl Config for GraphicsSettings {
    fn get_path() -> &'static str {
        "graphics.ron"
    }

    fn is_valid(&self) -> bool {
        self.render_distance > 0
            && (0.5..=2.0).contains(&self.lod_factor)
            && self.highest_lod <= MAX_HIGHEST_LOD
            && self.fov > 0.0
            && self.fov < 180.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(GraphicsSettings::default().is_valid());
    }

    #[test]
    fn test_out_of_range_settings_rejected() {
        let mut settings = GraphicsSettings::default();
        settings.highest_lod = 9;
        assert!(!settings.is_valid());

        settings = GraphicsSettings::default();
        settings.lod_factor = 0.1;
        assert!(!settings.is_valid());

        settings = GraphicsSettings::default();
        settings.render_distance = 0;
        assert!(!settings.is_valid());
    }

    #[test]
    fn test_ron_round_trip() {
        let settings = GraphicsSettings {
            render_distance: 12,
            lod_factor: 1.5,
            highest_lod: 4,
            bloom: false,
            fov: 90.0,
            vsync: false,
        };
        let text = ron::ser::to_string(&settings).unwrap();
        let parsed: GraphicsSettings = ron::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
