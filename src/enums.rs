use dicom_dictionary_std::uids;
use serde::{Deserialize, Serialize};

/// Anatomical axis a plane is cut along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Axial,
    Coronal,
    Sagittal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Bilinear,
    // TODO: trilinear resampling for oblique planes once they are supported by `VolumeData`.
    None,
}

/// Pixel Representation (0028,0103): whether stored values are two's complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelRepresentation {
    #[default]
    Unsigned,
    Signed,
}

impl From<u16> for PixelRepresentation {
    fn from(value: u16) -> Self {
        if value == 1 {
            PixelRepresentation::Signed
        } else {
            PixelRepresentation::Unsigned
        }
    }
}

/// The transfer syntaxes the pixel decoder distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSyntax {
    ImplicitVrLittleEndian,
    ExplicitVrLittleEndian,
    Jpeg2000Lossless,
    Jpeg2000,
    Other,
}

impl TransferSyntax {
    pub fn from_uid(uid: &str) -> Self {
        match uid.trim_end_matches(['\0', ' ']) {
            uids::IMPLICIT_VR_LITTLE_ENDIAN => TransferSyntax::ImplicitVrLittleEndian,
            uids::EXPLICIT_VR_LITTLE_ENDIAN => TransferSyntax::ExplicitVrLittleEndian,
            uids::JPEG2000_LOSSLESS => TransferSyntax::Jpeg2000Lossless,
            uids::JPEG2000 => TransferSyntax::Jpeg2000,
            _ => TransferSyntax::Other,
        }
    }

    pub fn is_jpeg2000(self) -> bool {
        matches!(
            self,
            TransferSyntax::Jpeg2000Lossless | TransferSyntax::Jpeg2000
        )
    }

    /// Whether the data set following the file meta group uses implicit VR encoding.
    pub fn is_implicit_vr(self) -> bool {
        matches!(self, TransferSyntax::ImplicitVrLittleEndian)
    }
}
