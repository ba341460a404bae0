//! Turns one slice's raw Part 10 bytes into a typed intensity array.
//!
//! The Part 10 container is parsed with dicom-rs. Two paths exist after that.
//! Native (uncompressed) pixel data is reinterpreted from the Pixel Data
//! value. The fragments of encapsulated JPEG 2000 pixel data are joined and
//! handed to an external [`J2kCodec`], whose output byte order is then
//! corrected with [`needs_byte_swap`].

use crate::enums::{PixelRepresentation, TransferSyntax};
use crate::instance::{Instance, read_part10};

use dicom::core::value::Value;
use dicom::object::ReadError;
use dicom_dictionary_std::tags;
use log::{debug, warn};
use rayon::prelude::*;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// How far into the pixel data the start-of-codestream marker is searched for.
pub const CODESTREAM_SCAN_LIMIT: usize = 4000;
/// Upper bound of samples inspected by the byte-swap heuristic.
pub const BYTE_SWAP_SAMPLES: usize = 200;
/// Window center used by the byte-swap heuristic when the instance has none.
pub const DEFAULT_WINDOW_CENTER: f64 = 40.0;

const SOC_MARKER: [u8; 2] = [0xFF, 0x4F];
const EOC_MARKER: [u8; 2] = [0xFF, 0xD9];

/// The external codec keeps global state that concurrent calls corrupt.
static CODEC_LOCK: Mutex<()> = Mutex::new(());

pub type CodecError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("No pixel data element found")]
    MissingPixelData,

    #[error("Invalid image dimensions {rows}x{columns}")]
    InvalidDimensions { rows: u32, columns: u32 },

    #[error("Codec failed on a {buffer_size} byte codestream: {message}")]
    DecodeFailure { buffer_size: usize, message: String },

    #[error("Pixel data truncated: need {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Unsupported transfer syntax {0}")]
    UnsupportedTransferSyntax(String),

    #[error("Malformed Part 10 stream: {0}")]
    Malformed(#[from] ReadError),
}

/// A JPEG 2000 codestream decoder.
///
/// Implementations return 16 bit samples, two bytes per pixel, in whatever byte
/// order the underlying codec produced.
pub trait J2kCodec: Send + Sync {
    fn decode(&self, codestream: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// [`J2kCodec`] backed by OpenJPEG.
#[cfg(feature = "openjpeg")]
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenJpegCodec;

#[cfg(feature = "openjpeg")]
impl J2kCodec for OpenJpegCodec {
    fn decode(&self, codestream: &[u8]) -> Result<Vec<u8>, CodecError> {
        let image = jpeg2k::Image::from_bytes(codestream).map_err(|err| err.to_string())?;
        let component = image
            .components()
            .first()
            .ok_or("codestream has no image components")?;
        Ok(component
            .data()
            .iter()
            .flat_map(|&sample| (sample as u16).to_le_bytes())
            .collect())
    }
}

/// Decoded intensities of one slice, before rescaling.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    Signed(Vec<i16>),
    Unsigned(Vec<u16>),
}

impl PixelBuffer {
    fn from_le_bytes(bytes: &[u8], representation: PixelRepresentation) -> Self {
        let words = bytes.chunks_exact(2).map(|pair| [pair[0], pair[1]]);
        match representation {
            PixelRepresentation::Signed => {
                PixelBuffer::Signed(words.map(i16::from_le_bytes).collect())
            }
            PixelRepresentation::Unsigned => {
                PixelBuffer::Unsigned(words.map(u16::from_le_bytes).collect())
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::Signed(values) => values.len(),
            PixelBuffer::Unsigned(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes `round(value * slope + intercept)` into `out`, saturating at the `i16` range.
    pub fn rescale_into(&self, slope: f64, intercept: f64, out: &mut [i16]) {
        match self {
            PixelBuffer::Signed(values) => rescale(values, slope, intercept, out),
            PixelBuffer::Unsigned(values) => rescale(values, slope, intercept, out),
        }
    }
}

fn rescale<T>(values: &[T], slope: f64, intercept: f64, out: &mut [i16])
where
    T: Copy + Into<f64> + Sync,
{
    out.par_iter_mut()
        .zip(values.par_iter())
        .for_each(|(out, &value)| *out = (value.into() * slope + intercept).round() as i16);
}

pub struct PixelDecoder {
    codec: Option<Box<dyn J2kCodec>>,
}

impl Default for PixelDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PixelDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelDecoder")
            .field("codec", &self.codec.is_some())
            .finish()
    }
}

impl PixelDecoder {
    /// Decoder using the built-in JPEG 2000 codec, if the crate was built with one.
    pub fn new() -> Self {
        #[cfg(feature = "openjpeg")]
        let codec: Option<Box<dyn J2kCodec>> = Some(Box::new(OpenJpegCodec));
        #[cfg(not(feature = "openjpeg"))]
        let codec: Option<Box<dyn J2kCodec>> = None;
        Self { codec }
    }

    pub fn with_codec(codec: impl J2kCodec + 'static) -> Self {
        Self {
            codec: Some(Box::new(codec)),
        }
    }

    /// Decodes the pixel data of `bytes`, using `instance` for the transfer
    /// syntax, pixel representation, image size and the rescale/window values
    /// the byte-swap heuristic needs.
    ///
    /// # Errors
    ///
    /// Fails when the image size is unusable, the Pixel Data element is missing
    /// or shorter than `rows * columns` samples, or the codec rejects the
    /// codestream.
    pub fn decode(&self, bytes: &[u8], instance: &Instance) -> Result<PixelBuffer, DecodeError> {
        if instance.rows == 0 || instance.columns == 0 {
            return Err(DecodeError::InvalidDimensions {
                rows: instance.rows,
                columns: instance.columns,
            });
        }
        let unsupported =
            || DecodeError::UnsupportedTransferSyntax(instance.transfer_syntax_uid.clone());
        let needed = instance.pixel_count() * 2;

        match TransferSyntax::from_uid(&instance.transfer_syntax_uid) {
            TransferSyntax::ImplicitVrLittleEndian | TransferSyntax::ExplicitVrLittleEndian => {
                let value = pixel_data_value(bytes)?;
                let payload = value.get(..needed).ok_or(DecodeError::Truncated {
                    needed,
                    available: value.len(),
                })?;
                Ok(PixelBuffer::from_le_bytes(
                    payload,
                    instance.pixel_representation,
                ))
            }
            TransferSyntax::Jpeg2000Lossless | TransferSyntax::Jpeg2000 => {
                let codec = self.codec.as_deref().ok_or_else(unsupported)?;
                let value = pixel_data_value(bytes)?;
                let codestream = extract_codestream(&value);

                let mut decoded = {
                    let _guard = CODEC_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
                    codec.decode(codestream)
                }
                .map_err(|err| DecodeError::DecodeFailure {
                    buffer_size: codestream.len(),
                    message: err.to_string(),
                })?;

                let window_center = instance.window_center.unwrap_or(DEFAULT_WINDOW_CENTER);
                if needs_byte_swap(
                    &decoded,
                    instance.pixel_representation,
                    instance.rescale_slope,
                    instance.rescale_intercept,
                    window_center,
                ) {
                    debug!("byte-swapping decoded samples of {}", instance.id);
                    swap_bytes(&mut decoded);
                }

                let payload = decoded.get(..needed).ok_or(DecodeError::Truncated {
                    needed,
                    available: decoded.len(),
                })?;
                Ok(PixelBuffer::from_le_bytes(
                    payload,
                    instance.pixel_representation,
                ))
            }
            TransferSyntax::Other => Err(unsupported()),
        }
    }
}

/// Bytes of the top level Pixel Data element. Encapsulated fragments are
/// concatenated without their item headers; the basic offset table is not
/// part of them.
fn pixel_data_value(bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let object = read_part10(bytes)?;
    let element = object
        .element(tags::PIXEL_DATA)
        .map_err(|_| DecodeError::MissingPixelData)?;
    match element.value() {
        Value::Primitive(value) => Ok(value.to_bytes().into_owned()),
        Value::PixelSequence(sequence) => Ok(sequence.fragments().concat()),
        _ => Err(DecodeError::MissingPixelData),
    }
}

/// Position of the start-of-codestream marker within the first
/// [`CODESTREAM_SCAN_LIMIT`] bytes.
pub fn find_codestream_start(value: &[u8]) -> Option<usize> {
    let window = &value[..value.len().min(CODESTREAM_SCAN_LIMIT)];
    window.windows(2).position(|pair| pair == SOC_MARKER)
}

/// Cuts the codestream out of an encapsulated Pixel Data value.
///
/// A value without a start marker is passed on from its first byte.
// TODO: reject slices without a start-of-codestream marker instead of decoding from offset 0.
fn extract_codestream(value: &[u8]) -> &[u8] {
    let start = find_codestream_start(value).unwrap_or_else(|| {
        warn!(
            "start-of-codestream marker not found in the first {CODESTREAM_SCAN_LIMIT} bytes, decoding from offset 0"
        );
        0
    });
    let codestream = &value[start..];
    match codestream.windows(2).rposition(|pair| pair == EOC_MARKER) {
        Some(end) => &codestream[..end + 2],
        None => codestream,
    }
}

/// Decides whether decoded 16 bit samples are in the wrong byte order.
///
/// Up to [`BYTE_SWAP_SAMPLES`] non-zero samples from the middle third of the
/// buffer are rescaled both as decoded and byte-swapped. The order whose values
/// lie closer to `window_center` in total wins; ties keep the decoded order.
pub fn needs_byte_swap(
    decoded: &[u8],
    representation: PixelRepresentation,
    slope: f64,
    intercept: f64,
    window_center: f64,
) -> bool {
    let sample_count = decoded.len() / 2;
    let start = sample_count / 3;
    let end = sample_count * 2 / 3;
    if end <= start {
        return false;
    }
    let step = ((end - start) / BYTE_SWAP_SAMPLES).max(1);

    let value_of = |pair: [u8; 2]| -> f64 {
        match representation {
            PixelRepresentation::Signed => f64::from(i16::from_le_bytes(pair)),
            PixelRepresentation::Unsigned => f64::from(u16::from_le_bytes(pair)),
        }
    };

    let (mut as_decoded, mut swapped) = (0.0, 0.0);
    for index in (start..end).step_by(step).take(BYTE_SWAP_SAMPLES) {
        let pair = [decoded[index * 2], decoded[index * 2 + 1]];
        let value = value_of(pair);
        if value == 0.0 {
            continue;
        }
        let swapped_value = value_of([pair[1], pair[0]]);
        as_decoded += (value * slope + intercept - window_center).abs();
        swapped += (swapped_value * slope + intercept - window_center).abs();
    }
    swapped < as_decoded
}

fn swap_bytes(buffer: &mut [u8]) {
    buffer.chunks_exact_mut(2).for_each(|pair| pair.swap(0, 1));
}
