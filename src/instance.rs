//! Per-slice metadata.

use crate::enums::PixelRepresentation;

use dicom::core::Tag;
use dicom::object::{DefaultDicomObject, FileDicomObject, InMemDicomObject, ReadError};
use dicom_dictionary_std::tags;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Missing required attribute {name} {tag}")]
    MissingAttribute { name: &'static str, tag: Tag },

    #[error("Attribute {name} has {found} values, expected {expected}")]
    WrongMultiplicity {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("DICOM error: {0}")]
    Dicom(#[from] ReadError),
}

/// One slice's decoded metadata. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub id: String,
    pub rows: u32,
    pub columns: u32,
    /// (row spacing, column spacing) in mm.
    pub pixel_spacing: [f64; 2],
    pub slice_thickness: Option<f64>,
    pub image_position_patient: [f64; 3],
    pub image_orientation_patient: [f64; 6],
    pub window_center: Option<f64>,
    pub window_width: Option<f64>,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    pub photometric_interpretation: String,
    pub samples_per_pixel: u16,
    pub modality: String,
    /// Externally assigned ordering hint, usually the Instance Number.
    pub sort_hint: Option<i32>,
    pub transfer_syntax_uid: String,
    pub pixel_representation: PixelRepresentation,
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            id: String::new(),
            rows: 0,
            columns: 0,
            pixel_spacing: [1.0, 1.0],
            slice_thickness: None,
            image_position_patient: [0.0; 3],
            image_orientation_patient: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            window_center: None,
            window_width: None,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            photometric_interpretation: "MONOCHROME2".to_owned(),
            samples_per_pixel: 1,
            modality: String::new(),
            sort_hint: None,
            transfer_syntax_uid: dicom_dictionary_std::uids::EXPLICIT_VR_LITTLE_ENDIAN.to_owned(),
            pixel_representation: PixelRepresentation::Unsigned,
        }
    }
}

impl Instance {
    /// Reads the instance metadata from a parsed DICOM file.
    ///
    /// # Errors
    ///
    /// Returns an error if the SOP Instance UID, the image size or the patient
    /// geometry is missing.
    pub fn from_dicom_object(
        dicom_object: &FileDicomObject<InMemDicomObject>,
    ) -> Result<Self, MetadataError> {
        let id = string(dicom_object, tags::SOP_INSTANCE_UID)
            .ok_or(MetadataError::MissingAttribute {
                name: "SOPInstanceUID",
                tag: tags::SOP_INSTANCE_UID,
            })?;
        let rows = int::<u32>(dicom_object, tags::ROWS).ok_or(MetadataError::MissingAttribute {
            name: "Rows",
            tag: tags::ROWS,
        })?;
        let columns =
            int::<u32>(dicom_object, tags::COLUMNS).ok_or(MetadataError::MissingAttribute {
                name: "Columns",
                tag: tags::COLUMNS,
            })?;
        let image_position_patient = fixed::<3>(
            dicom_object,
            tags::IMAGE_POSITION_PATIENT,
            "ImagePositionPatient",
        )?;
        let image_orientation_patient = fixed::<6>(
            dicom_object,
            tags::IMAGE_ORIENTATION_PATIENT,
            "ImageOrientationPatient",
        )?;

        let pixel_spacing = floats(dicom_object, tags::PIXEL_SPACING)
            .filter(|values| values.len() >= 2)
            .map(|values| [values[0], values[1]])
            .unwrap_or([1.0, 1.0]);

        Ok(Self {
            id,
            rows,
            columns,
            pixel_spacing,
            slice_thickness: first_float(dicom_object, tags::SLICE_THICKNESS),
            image_position_patient,
            image_orientation_patient,
            window_center: first_float(dicom_object, tags::WINDOW_CENTER),
            window_width: first_float(dicom_object, tags::WINDOW_WIDTH),
            rescale_slope: first_float(dicom_object, tags::RESCALE_SLOPE).unwrap_or(1.0),
            rescale_intercept: first_float(dicom_object, tags::RESCALE_INTERCEPT).unwrap_or(0.0),
            photometric_interpretation: string(dicom_object, tags::PHOTOMETRIC_INTERPRETATION)
                .unwrap_or_else(|| "MONOCHROME2".to_owned()),
            samples_per_pixel: int::<u16>(dicom_object, tags::SAMPLES_PER_PIXEL).unwrap_or(1),
            modality: string(dicom_object, tags::MODALITY).unwrap_or_default(),
            sort_hint: int::<i32>(dicom_object, tags::INSTANCE_NUMBER),
            transfer_syntax_uid: dicom_object
                .meta()
                .transfer_syntax()
                .trim_end_matches(['\0', ' '])
                .to_owned(),
            pixel_representation: int::<u16>(dicom_object, tags::PIXEL_REPRESENTATION)
                .map(PixelRepresentation::from)
                .unwrap_or_default(),
        })
    }

    /// Parses a Part 10 byte stream (with or without the 128 byte preamble).
    pub fn from_dicom_bytes(bytes: &[u8]) -> Result<Self, MetadataError> {
        Self::from_dicom_object(&read_part10(bytes)?)
    }

    /// Row direction cosines.
    pub fn row_direction(&self) -> [f64; 3] {
        let o = &self.image_orientation_patient;
        [o[0], o[1], o[2]]
    }

    /// Column direction cosines.
    pub fn column_direction(&self) -> [f64; 3] {
        let o = &self.image_orientation_patient;
        [o[3], o[4], o[5]]
    }

    pub fn pixel_count(&self) -> usize {
        self.rows as usize * self.columns as usize
    }
}

/// Parses a Part 10 stream that starts either at the preamble or at the
/// `DICM` magic.
pub(crate) fn read_part10(bytes: &[u8]) -> Result<DefaultDicomObject, ReadError> {
    let body = match bytes.get(128..132) {
        Some(magic) if magic == b"DICM" => &bytes[128..],
        _ => bytes,
    };
    dicom::object::from_reader(body)
}

fn string(dicom_object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<String> {
    let value = dicom_object.element(tag).ok()?.to_str().ok()?;
    let value = value.trim_end_matches(['\0', ' ']).trim();
    (!value.is_empty()).then(|| value.to_owned())
}

fn int<T: TryFrom<i64>>(dicom_object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<T> {
    let value = dicom_object.element(tag).ok()?.to_int::<i64>().ok()?;
    T::try_from(value).ok()
}

fn floats(dicom_object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<Vec<f64>> {
    dicom_object.element(tag).ok()?.to_multi_float64().ok()
}

fn first_float(dicom_object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<f64> {
    floats(dicom_object, tag)?.first().copied()
}

fn fixed<const N: usize>(
    dicom_object: &FileDicomObject<InMemDicomObject>,
    tag: Tag,
    name: &'static str,
) -> Result<[f64; N], MetadataError> {
    let values = floats(dicom_object, tag).ok_or(MetadataError::MissingAttribute { name, tag })?;
    values
        .get(..N)
        .and_then(|values| <[f64; N]>::try_from(values).ok())
        .ok_or(MetadataError::WrongMultiplicity {
            name,
            expected: N,
            found: values.len(),
        })
}
