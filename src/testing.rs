//! Synthetic Part 10 streams and instances for unit tests.

use crate::instance::Instance;

use dicom::core::value::{PixelFragmentSequence, Value};
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::object::mem::InMemElement;
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};
use dicom_dictionary_std::{tags, uids};

pub(crate) fn le_bytes(values: &[u16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Axial instance at height `z` with uncompressed unsigned pixel data.
pub(crate) fn test_instance(id: &str, rows: u32, columns: u32, z: f64) -> Instance {
    Instance {
        id: id.to_owned(),
        rows,
        columns,
        pixel_spacing: [0.5, 0.5],
        slice_thickness: Some(2.0),
        image_position_patient: [0.0, 0.0, z],
        transfer_syntax_uid: uids::EXPLICIT_VR_LITTLE_ENDIAN.to_owned(),
        ..Instance::default()
    }
}

pub(crate) fn ds(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
}

/// Native Pixel Data holding `values`.
pub(crate) fn native_pixel_data(values: &[u16]) -> InMemElement {
    DataElement::new(
        tags::PIXEL_DATA,
        VR::OW,
        PrimitiveValue::U16(values.iter().copied().collect()),
    )
}

/// Encapsulated Pixel Data with an empty offset table and one item per fragment.
pub(crate) fn encapsulated_pixel_data(fragments: Vec<Vec<u8>>) -> InMemElement {
    DataElement::new(
        tags::PIXEL_DATA,
        VR::OB,
        Value::PixelSequence(PixelFragmentSequence::new(Vec::<u32>::new(), fragments)),
    )
}

/// Complete Part 10 stream (preamble included) of a CT image data set.
pub(crate) fn part10(
    transfer_syntax: &str,
    elements: impl IntoIterator<Item = InMemElement>,
) -> Vec<u8> {
    let file = InMemDicomObject::from_element_iter(elements)
        .with_meta(
            FileMetaTableBuilder::new()
                .transfer_syntax(transfer_syntax)
                .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
                .media_storage_sop_instance_uid("1.2.3"),
        )
        .unwrap();
    let mut bytes = Vec::new();
    file.write_all(&mut bytes).unwrap();
    bytes
}
