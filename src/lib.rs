//! # DICOM-MPR library
//!
//! This crate reconstructs a series of DICOM slices into one signed 16 bit
//! volume in physical units and derives the views a viewer needs from it.

//!
//! This library is part of the dicom-rs ecosystem and leverages its components
//! to read instance metadata. The reconstruction pipeline is:
//!  - [`geometry`]: compute the slice normal, order slices along it and check
//!    that the stack is consistent ([`ValidationResult`])
//!  - [`volume_loader`]: pull each slice's bytes through a [`ByteCache`]
//!    (falling back to a [`ByteFetch`] collaborator), decode them with the
//!    [`PixelDecoder`], rescale and place them into a [`VolumeData`]
//!  - [`projection`]: slab maximum-intensity projections on a dedicated
//!    worker that owns its own copy of the volume
//!  - [`transfer_function`]: 4096 entry RGBA lookup textures for volume
//!    rendering presets
//!
//! Uncompressed little endian and JPEG 2000 pixel data are supported. JPEG
//! 2000 decoding goes through a process-wide lock because the codec is not
//! safe to call concurrently.
//!
//!  The volume can be sliced in the three different medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//!  Library consumers can chose whether the planes should be interpolated to
//!  preserve the physical aspect ratio of the volume. DICOM files are assumed
//!  to have the following attributes:
//!   - Single frame, single sample, 16 bit stored values
//!   - Images from the same series sharing one orientation
//!
//! # Roadmap
//!
//!  - Trilinear interpolation
//!  - Oblique MPR planes
//!
//! # Examples
//!
//! ## Reading a directory of DICOM files into a volume
//!
//! Read all DICOM files from the dicom/ directory, sort them along the slice
//! normal and render the sagittal plane at the center of the volume.
//!
//! ```no_run
//! # use dicom_mpr::{ByteCache, VolumeLoader, enums::{Axis, Interpolation}};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let cache = ByteCache::default();
//! let volume = VolumeLoader::load_from_directory("dicom", &cache).await?;
//! let (columns, _, _) = volume.dimensions();
//! let image = volume
//!     .get_image_from_axis(columns / 2, Axis::Sagittal, Interpolation::Bilinear, None)
//!     .expect("should have returned image at center of volume");
//! image.save("result.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Generating a transfer function texture
//!
//! ```
//! # use dicom_mpr::transfer_function::{builtin_preset, generate, TEXTURE_SIZE};
//! let preset = builtin_preset("Bone").unwrap();
//! let texture = generate(&preset);
//! assert_eq!(texture.entries().len(), TEXTURE_SIZE);
//! ```

pub mod cache;
pub mod config;
pub mod decoder;
pub mod enums;
pub mod fetch;
pub mod geometry;
pub mod instance;
mod interpolator;
pub mod projection;
pub mod transfer_function;
pub mod volume;
pub mod volume_loader;
pub mod window;

#[cfg(test)]
mod testing;

pub use cache::ByteCache;
pub use decoder::PixelDecoder;
pub use fetch::ByteFetch;
pub use geometry::ValidationResult;
pub use instance::Instance;
pub use volume::VolumeData;
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
