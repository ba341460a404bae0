use image::{GrayImage, ImageBuffer};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Soft tissue window, used when a series carries no usable window.
pub const FALLBACK_WINDOW: WindowLevel = WindowLevel {
    center: 40.0,
    width: 400.0,
};

/// Linear VOI window in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowLevel {
    pub center: f64,
    pub width: f64,
}

impl Default for WindowLevel {
    fn default() -> Self {
        FALLBACK_WINDOW
    }
}

impl WindowLevel {
    /// Falls back to [`FALLBACK_WINDOW`] unless both values are present and the width is positive.
    pub fn from_optional(center: Option<f64>, width: Option<f64>) -> Self {
        match (center, width) {
            (Some(center), Some(width)) if width > 0.0 => Self { center, width },
            _ => FALLBACK_WINDOW,
        }
    }

    pub fn lower(&self) -> f64 {
        self.center - self.width / 2.0
    }

    pub fn upper(&self) -> f64 {
        self.center + self.width / 2.0
    }

    #[inline]
    pub fn apply(&self, value: f64) -> u8 {
        (((value - self.lower()) / self.width) * 255.0)
            .round()
            .clamp(0.0, 255.0) as u8
    }

    /// Renders a `columns` x `rows` intensity plane through this window.
    pub fn render(&self, plane: &[i16], columns: u32, rows: u32) -> Option<GrayImage> {
        let pixel_data: Vec<u8> = plane
            .par_iter()
            .map(|&value| self.apply(f64::from(value)))
            .collect();
        ImageBuffer::from_raw(columns, rows, pixel_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_window_bounds_to_full_range() {
        let window = WindowLevel {
            center: 40.0,
            width: 400.0,
        };
        assert_eq!(window.apply(-160.0), 0);
        assert_eq!(window.apply(240.0), 255);
        assert_eq!(window.apply(-1000.0), 0);
        assert_eq!(window.apply(3000.0), 255);
        assert_eq!(window.apply(40.0), 128);
    }

    #[test]
    fn unusable_window_falls_back() {
        assert_eq!(WindowLevel::from_optional(Some(50.0), Some(0.0)), FALLBACK_WINDOW);
        assert_eq!(WindowLevel::from_optional(None, Some(300.0)), FALLBACK_WINDOW);
        assert_eq!(
            WindowLevel::from_optional(Some(300.0), Some(1500.0)),
            WindowLevel {
                center: 300.0,
                width: 1500.0
            }
        );
    }

    #[test]
    fn renders_plane_with_matching_size() {
        let image = FALLBACK_WINDOW
            .render(&[-1000, 40, 1000, 0, 0, 0], 3, 2)
            .unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0).0, [0]);
        assert_eq!(image.get_pixel(2, 0).0, [255]);
        assert!(FALLBACK_WINDOW.render(&[0; 5], 3, 2).is_none());
    }
}
