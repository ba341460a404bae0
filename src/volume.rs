use crate::enums::{Axis, Interpolation};
use crate::interpolator::{isotropic_shape, sample_bilinear, source_position};
use crate::projection::ProjectionRequest;
use crate::window::WindowLevel;

use glam::DVec3;
use image::{GrayImage, ImageBuffer};
use ndarray::{Array3, ArrayView2, s};
use rayon::prelude::*;

/// A reconstructed scalar volume in physical intensity units.
///
/// `data` is indexed `[slice, row, column]` in standard layout, so
/// `data.as_slice()` is the flat `[slice][row][col]` buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeData {
    pub data: Array3<i16>,
    /// (x, y, z) in mm: column spacing, row spacing, slice spacing.
    pub spacing: (f64, f64, f64),
    /// Patient position of the first voxel of the first slice.
    pub origin: DVec3,
    /// Row direction, column direction, slice normal.
    pub orientation: [DVec3; 3],
    pub window: WindowLevel,
}

impl VolumeData {
    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// (columns, rows, slices)
    pub fn dimensions(&self) -> (usize, usize, usize) {
        let (slices, rows, columns) = self.data.dim();
        (columns, rows, slices)
    }

    pub fn data(&self) -> &Array3<i16> {
        &self.data
    }

    /// Flat `[slice][row][col]` intensities, if `data` is in standard layout.
    pub fn as_slice(&self) -> Option<&[i16]> {
        self.data.as_slice()
    }

    /// Builds the message that hands a private copy of this volume to a
    /// projection worker.
    pub fn projection_init(&self) -> ProjectionRequest {
        let (columns, rows, total_slices) = self.dimensions();
        ProjectionRequest::Init {
            columns,
            rows,
            total_slices,
            buffer: self.data.iter().copied().collect(),
        }
    }

    pub fn get_slice_from_axis(&self, index: usize, axis: Axis) -> Option<ArrayView2<'_, i16>> {
        if !self.is_valid_index(index, axis) {
            return None;
        }
        let slice = match axis {
            Axis::Axial => self.data.slice(s![index, .., ..]),
            Axis::Coronal => self.data.slice(s![.., index, ..]),
            Axis::Sagittal => self.data.slice(s![.., .., index]),
        };
        Some(slice)
    }

    fn get_output_dimensions(&self, axis: Axis) -> (u32, u32) {
        let interpolated_dim = isotropic_shape(self.spacing, self.dim());
        // Always return (width, height) - standard image convention
        match axis {
            Axis::Axial => (interpolated_dim.2, interpolated_dim.1),
            Axis::Coronal => (interpolated_dim.2, interpolated_dim.0),
            Axis::Sagittal => (interpolated_dim.1, interpolated_dim.0),
        }
    }

    /// Renders an MPR plane through `window` (the volume's default window if `None`).
    pub fn get_image_from_axis(
        &self,
        index: usize,
        axis: Axis,
        interpolation: Interpolation,
        window: Option<WindowLevel>,
    ) -> Option<GrayImage> {
        let window = window.unwrap_or(self.window);
        let slice = self.get_slice_from_axis(index, axis)?;

        match interpolation {
            Interpolation::None => Self::slice_to_image(&slice, &window),
            Interpolation::Bilinear => {
                let (width, height) = self.get_output_dimensions(axis);
                Self::interpolate_slice(&slice, width, height, &window)
            }
        }
    }

    fn slice_to_image(slice: &ArrayView2<'_, i16>, window: &WindowLevel) -> Option<GrayImage> {
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice.iter().map(|&v| window.apply(f64::from(v))).collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }

    fn interpolate_slice(
        slice: &ArrayView2<'_, i16>,
        width: u32,
        height: u32,
        window: &WindowLevel,
    ) -> Option<GrayImage> {
        let (slice_height, slice_width) = slice.dim();

        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map_iter(|y| {
                let row = source_position(y, height, slice_height);
                (0..width).map(move |x| {
                    let column = source_position(x, width, slice_width);
                    window.apply(f64::from(sample_bilinear(slice, row, column)))
                })
            })
            .collect();

        ImageBuffer::from_raw(width, height, pixel_data)
    }

    fn is_valid_index(&self, index: usize, axis: Axis) -> bool {
        let dim = self.data.dim();
        let max_index = match axis {
            Axis::Axial => dim.0,
            Axis::Coronal => dim.1,
            Axis::Sagittal => dim.2,
        };
        index < max_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::FALLBACK_WINDOW;

    fn volume() -> VolumeData {
        // 2 slices, 2 rows, 3 columns
        let data = Array3::from_shape_vec((2, 2, 3), (0..12).map(|v| v * 10).collect()).unwrap();
        VolumeData {
            data,
            spacing: (1.0, 1.0, 2.0),
            origin: DVec3::ZERO,
            orientation: [DVec3::X, DVec3::Y, DVec3::Z],
            window: WindowLevel {
                center: 55.0,
                width: 110.0,
            },
        }
    }

    #[test]
    fn dimensions_are_columns_rows_slices() {
        let volume = volume();
        assert_eq!(volume.dimensions(), (3, 2, 2));
        assert_eq!(volume.as_slice().unwrap()[7], 70);
    }

    #[test]
    fn extracts_planes_along_each_axis() {
        let volume = volume();
        let axial = volume.get_slice_from_axis(1, Axis::Axial).unwrap();
        assert_eq!(axial.iter().copied().collect::<Vec<_>>(), [60, 70, 80, 90, 100, 110]);

        let coronal = volume.get_slice_from_axis(0, Axis::Coronal).unwrap();
        assert_eq!(coronal.iter().copied().collect::<Vec<_>>(), [0, 10, 20, 60, 70, 80]);

        let sagittal = volume.get_slice_from_axis(2, Axis::Sagittal).unwrap();
        assert_eq!(sagittal.iter().copied().collect::<Vec<_>>(), [20, 50, 80, 110]);

        assert!(volume.get_slice_from_axis(3, Axis::Sagittal).is_none());
    }

    #[test]
    fn interpolated_planes_preserve_aspect_ratio() {
        let volume = volume();
        let image = volume
            .get_image_from_axis(0, Axis::Coronal, Interpolation::Bilinear, None)
            .unwrap();
        // Two slices 2 mm apart become four rows at 1 mm.
        assert_eq!(image.dimensions(), (3, 4));

        let image = volume
            .get_image_from_axis(0, Axis::Coronal, Interpolation::None, Some(FALLBACK_WINDOW))
            .unwrap();
        assert_eq!(image.dimensions(), (3, 2));
    }

    #[test]
    fn init_message_carries_a_copy_of_the_buffer() {
        let volume = volume();
        match volume.projection_init() {
            ProjectionRequest::Init {
                columns,
                rows,
                total_slices,
                buffer,
            } => {
                assert_eq!((columns, rows, total_slices), (3, 2, 2));
                assert_eq!(buffer, volume.as_slice().unwrap());
            }
            other => panic!("unexpected request {other:?}"),
        }
    }
}
