//! Dense RGBA lookup textures for volume rendering presets.
//!
//! The texture covers the CT range `[-1024, 3071]` HU, one entry per HU.

use image::{ImageBuffer, RgbaImage};
use serde::{Deserialize, Serialize};

pub const TEXTURE_SIZE: usize = 4096;
pub const MIN_INTENSITY: i32 = -1024;
pub const MAX_INTENSITY: i32 = MIN_INTENSITY + TEXTURE_SIZE as i32 - 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    pub intensity: i32,
    pub color: [u8; 3],
    /// In `[0, 1]`.
    pub opacity: f32,
}

impl ControlPoint {
    pub const fn new(intensity: i32, color: [u8; 3], opacity: f32) -> Self {
        Self {
            intensity,
            color,
            opacity,
        }
    }

    fn rgba(&self) -> [u8; 4] {
        let [r, g, b] = self.color;
        [r, g, b, to_byte(f64::from(self.opacity) * 255.0)]
    }
}

/// Named set of control points, in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferFunctionPreset {
    pub name: String,
    pub points: Vec<ControlPoint>,
}

impl TransferFunctionPreset {
    pub fn new(name: impl Into<String>, points: Vec<ControlPoint>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFunctionTexture(Vec<[u8; 4]>);

impl TransferFunctionTexture {
    pub fn entries(&self) -> &[[u8; 4]] {
        &self.0
    }

    /// Entry for a physical intensity, clamped to the texture domain.
    pub fn at(&self, intensity: i32) -> [u8; 4] {
        self.0[intensity_to_index(intensity)]
    }

    /// Tightly packed RGBA bytes, ready for a 1-D texture upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.0)
    }

    /// The texture as a 4096x1 image.
    pub fn to_image(&self) -> Option<RgbaImage> {
        ImageBuffer::from_raw(TEXTURE_SIZE as u32, 1, self.as_bytes().to_vec())
    }
}

pub fn intensity_to_index(intensity: i32) -> usize {
    (intensity - MIN_INTENSITY).clamp(0, TEXTURE_SIZE as i32 - 1) as usize
}

fn to_byte(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Samples the piecewise linear curve through `points` (sorted by intensity).
fn sample(points: &[ControlPoint], intensity: i32) -> [u8; 4] {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return [0; 4];
    };
    if intensity <= first.intensity {
        return first.rgba();
    }
    if intensity >= last.intensity {
        return last.rgba();
    }

    let upper = points.partition_point(|point| point.intensity <= intensity);
    let (lower, upper) = (&points[upper - 1], &points[upper]);
    let span = upper.intensity - lower.intensity;
    let t = if span == 0 {
        0.0
    } else {
        f64::from(intensity - lower.intensity) / f64::from(span)
    };

    let channel = |i: usize| to_byte(lerp(f64::from(lower.color[i]), f64::from(upper.color[i]), t));
    let opacity = lerp(f64::from(lower.opacity), f64::from(upper.opacity), t);
    [channel(0), channel(1), channel(2), to_byte(opacity * 255.0)]
}

/// Builds the lookup texture for `preset`. An empty preset is fully transparent.
pub fn generate(preset: &TransferFunctionPreset) -> TransferFunctionTexture {
    let mut points = preset.points.clone();
    points.sort_by_key(|point| point.intensity);

    TransferFunctionTexture(
        (MIN_INTENSITY..=MAX_INTENSITY)
            .map(|intensity| sample(&points, intensity))
            .collect(),
    )
}

const BONE: &[ControlPoint] = &[
    ControlPoint::new(-1024, [0, 0, 0], 0.0),
    ControlPoint::new(150, [140, 64, 38], 0.0),
    ControlPoint::new(300, [230, 200, 150], 0.35),
    ControlPoint::new(800, [255, 240, 220], 0.75),
    ControlPoint::new(3071, [255, 255, 255], 0.9),
];

const SKIN_SURFACE: &[ControlPoint] = &[
    ControlPoint::new(-1024, [0, 0, 0], 0.0),
    ControlPoint::new(-500, [194, 105, 82], 0.0),
    ControlPoint::new(-300, [194, 105, 82], 0.45),
    ControlPoint::new(200, [230, 170, 140], 0.6),
    ControlPoint::new(3071, [255, 255, 255], 0.8),
];

const CT_ANGIOGRAPHY: &[ControlPoint] = &[
    ControlPoint::new(-1024, [0, 0, 0], 0.0),
    ControlPoint::new(100, [120, 0, 0], 0.0),
    ControlPoint::new(200, [200, 40, 30], 0.3),
    ControlPoint::new(400, [240, 200, 160], 0.7),
    ControlPoint::new(1000, [255, 255, 255], 0.9),
    ControlPoint::new(3071, [255, 255, 255], 1.0),
];

const MAXIMUM_INTENSITY: &[ControlPoint] = &[
    ControlPoint::new(-1024, [0, 0, 0], 0.0),
    ControlPoint::new(3071, [255, 255, 255], 1.0),
];

const BUILTIN: &[(&str, &[ControlPoint])] = &[
    ("Bone", BONE),
    ("Skin Surface", SKIN_SURFACE),
    ("CT Angiography", CT_ANGIOGRAPHY),
    ("Maximum Intensity", MAXIMUM_INTENSITY),
];

pub fn builtin_presets() -> Vec<TransferFunctionPreset> {
    BUILTIN
        .iter()
        .map(|(name, points)| TransferFunctionPreset::new(*name, points.to_vec()))
        .collect()
}

/// Looks up a built-in preset, ignoring case.
pub fn builtin_preset(name: &str) -> Option<TransferFunctionPreset> {
    builtin_presets()
        .into_iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(name))
}
