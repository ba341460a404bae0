use crate::{
    cache::ByteCache,
    decoder::{DecodeError, PixelDecoder},
    fetch::{ByteFetch, DirectoryFetcher, FetchError},
    geometry::{self, GeometryError},
    instance::{Instance, MetadataError},
    volume::VolumeData,
    window::WindowLevel,
};

use dicom::object::open_file;
use glam::DVec3;
use log::{debug, info, warn};
use ndarray::Array3;
use std::{fs, path::Path};
use thiserror::Error;
use web_time::Instant;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No DICOM instances to reconstruct")]
    EmptyStack,

    #[error("Invalid image dimensions {rows}x{columns}")]
    InvalidDimensions { rows: u32, columns: u32 },

    #[error("Instance {instance_id} does not match the stack geometry")]
    InconsistentGeometry { instance_id: String },

    #[error("Stack is not reconstructable: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Failed to fetch instance {instance_id}")]
    Fetch {
        instance_id: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to decode instance {instance_id}")]
    Decode {
        instance_id: String,
        #[source]
        source: DecodeError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl From<GeometryError> for VolumeLoaderError {
    fn from(err: GeometryError) -> Self {
        match err {
            GeometryError::EmptyStack => Self::EmptyStack,
        }
    }
}

/// Instances found in a directory together with a fetcher for their bytes.
#[derive(Debug)]
pub struct DirectoryScan {
    pub instances: Vec<Instance>,
    pub fetcher: DirectoryFetcher,
}

/// Assembles sorted instances into one [`VolumeData`].
///
/// Slice bytes come from the cache when present, otherwise from the fetcher
/// (and are then cached). Slices are decoded one at a time.
pub struct VolumeLoader<'a> {
    cache: &'a ByteCache,
    fetcher: &'a dyn ByteFetch,
    decoder: PixelDecoder,
}

impl<'a> VolumeLoader<'a> {
    pub fn new(cache: &'a ByteCache, fetcher: &'a dyn ByteFetch) -> Self {
        Self {
            cache,
            fetcher,
            decoder: PixelDecoder::new(),
        }
    }

    pub fn with_decoder(mut self, decoder: PixelDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Build a volume from instances already in stack order
    ///
    /// # Arguments
    ///
    /// * `sorted` - Instances ordered along the slice normal
    /// * `on_progress` - Called with `(loaded, total)` after every slice
    ///
    /// # Errors
    ///
    /// Any slice that cannot be fetched or decoded aborts the build; the error
    /// names the instance. No partial volume is returned.
    pub async fn build(
        &self,
        sorted: &[Instance],
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<VolumeData, VolumeLoaderError> {
        let first = sorted.first().ok_or(VolumeLoaderError::EmptyStack)?;
        if first.rows == 0 || first.columns == 0 {
            return Err(VolumeLoaderError::InvalidDimensions {
                rows: first.rows,
                columns: first.columns,
            });
        }
        if let Some(mismatch) = sorted
            .iter()
            .find(|instance| (instance.rows, instance.columns) != (first.rows, first.columns))
        {
            return Err(VolumeLoaderError::InconsistentGeometry {
                instance_id: mismatch.id.clone(),
            });
        }

        let start = Instant::now();
        let (rows, columns) = (first.rows as usize, first.columns as usize);
        let slice_len = rows * columns;
        let total = sorted.len();
        info!("Building {columns}x{rows}x{total} volume");

        let mut buffer = vec![0i16; slice_len * total];
        for (index, (instance, out)) in sorted
            .iter()
            .zip(buffer.chunks_exact_mut(slice_len))
            .enumerate()
        {
            let bytes = self.slice_bytes(instance).await?;
            let pixels =
                self.decoder
                    .decode(&bytes, instance)
                    .map_err(|source| VolumeLoaderError::Decode {
                        instance_id: instance.id.clone(),
                        source,
                    })?;
            pixels.rescale_into(instance.rescale_slope, instance.rescale_intercept, out);

            debug!("Loaded slice {}/{total} ({})", index + 1, instance.id);
            on_progress(index + 1, total);
        }

        let stack = geometry::sort_by_position(sorted)?;
        let data = Array3::from_shape_vec((total, rows, columns), buffer).map_err(|_| {
            VolumeLoaderError::InvalidDimensions {
                rows: first.rows,
                columns: first.columns,
            }
        })?;

        let volume = VolumeData {
            data,
            spacing: (
                first.pixel_spacing[1],
                first.pixel_spacing[0],
                stack.average_spacing,
            ),
            origin: DVec3::from_array(first.image_position_patient),
            orientation: [
                DVec3::from_array(first.row_direction()).normalize_or_zero(),
                DVec3::from_array(first.column_direction()).normalize_or_zero(),
                stack.normal,
            ],
            window: WindowLevel::from_optional(first.window_center, first.window_width),
        };
        info!("Built volume in {:?}", start.elapsed());
        Ok(volume)
    }

    async fn slice_bytes(&self, instance: &Instance) -> Result<Vec<u8>, VolumeLoaderError> {
        if let Some(bytes) = self.cache.get(&instance.id) {
            return Ok(bytes);
        }
        let bytes = self
            .fetcher
            .fetch(&instance.id)
            .await
            .map_err(|source| VolumeLoaderError::Fetch {
                instance_id: instance.id.clone(),
                source,
            })?;
        self.cache.put(&instance.id, &bytes);
        Ok(bytes)
    }

    /// Read the metadata of every ".dcm" file in a directory
    ///
    /// # Errors
    ///
    /// Returns error if the directory holds no ".dcm" files or one of them
    /// cannot be parsed
    pub fn scan_directory(path: impl AsRef<Path>) -> Result<DirectoryScan, VolumeLoaderError> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(VolumeLoaderError::EmptyStack);
        }

        let mut fetcher = DirectoryFetcher::new();
        let instances = paths
            .iter()
            .map(|path| {
                let instance = Instance::from_dicom_object(&open_file(path)?)?;
                fetcher.insert(instance.id.clone(), path);
                Ok(instance)
            })
            .collect::<Result<Vec<_>, VolumeLoaderError>>()?;

        Ok(DirectoryScan { instances, fetcher })
    }

    /// Load a volume from a directory containing .dcm files
    ///
    /// The stack is validated first; validation errors abort the load and
    /// warnings are logged.
    pub async fn load_from_directory(
        path: impl AsRef<Path>,
        cache: &ByteCache,
    ) -> Result<VolumeData, VolumeLoaderError> {
        let DirectoryScan { instances, fetcher } = Self::scan_directory(path)?;

        let report = geometry::validate(&instances);
        if !report.valid {
            return Err(VolumeLoaderError::Invalid(report.errors));
        }
        for warning in &report.warnings {
            warn!("{warning}");
        }

        let stack = geometry::sort_by_position(&instances)?;
        VolumeLoader::new(cache, &fetcher)
            .build(&stack.sorted, |_, _| {})
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::J2kCodec;
    use crate::testing::{
        encapsulated_pixel_data, le_bytes, native_pixel_data, part10, test_instance,
    };

    use async_trait::async_trait;
    use dicom_dictionary_std::uids;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn slice_bytes(values: &[u16]) -> Vec<u8> {
        part10(uids::EXPLICIT_VR_LITTLE_ENDIAN, [native_pixel_data(values)])
    }

    fn stack() -> (Vec<Instance>, HashMap<String, Vec<u8>>) {
        let instances = vec![
            test_instance("a", 2, 2, 0.0),
            test_instance("b", 2, 2, 2.0),
            test_instance("c", 2, 2, 4.0),
        ];
        let store = HashMap::from([
            ("a".to_owned(), slice_bytes(&[1, 2, 3, 4])),
            ("b".to_owned(), slice_bytes(&[5, 6, 7, 8])),
            ("c".to_owned(), slice_bytes(&[9, 10, 11, 12])),
        ]);
        (instances, store)
    }

    struct CountingFetcher {
        inner: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ByteFetch for CountingFetcher {
        async fn fetch(&self, instance_id: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch(instance_id).await
        }
    }

    #[tokio::test]
    async fn places_slices_in_given_order() {
        let (instances, store) = stack();
        let cache = ByteCache::default();
        let volume = VolumeLoader::new(&cache, &store)
            .build(&instances, |_, _| {})
            .await
            .unwrap();

        assert_eq!(volume.dimensions(), (2, 2, 3));
        assert_eq!(
            volume.as_slice().unwrap(),
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
        );
        assert_eq!(volume.spacing, (0.5, 0.5, 2.0));
        assert_eq!(volume.origin, DVec3::ZERO);
        assert_eq!(volume.orientation, [DVec3::X, DVec3::Y, DVec3::Z]);
    }

    #[tokio::test]
    async fn applies_rescale_and_window() {
        let (mut instances, store) = stack();
        for instance in &mut instances {
            instance.rescale_slope = 2.0;
            instance.rescale_intercept = -1024.0;
        }
        instances[0].window_center = Some(300.0);
        instances[0].window_width = Some(1500.0);

        let cache = ByteCache::default();
        let volume = VolumeLoader::new(&cache, &store)
            .build(&instances, |_, _| {})
            .await
            .unwrap();

        assert_eq!(volume.as_slice().unwrap()[0], -1022);
        assert_eq!(volume.as_slice().unwrap()[11], -1000);
        assert_eq!(
            volume.window,
            WindowLevel {
                center: 300.0,
                width: 1500.0
            }
        );
    }

    #[tokio::test]
    async fn reports_progress_per_slice() {
        let (instances, store) = stack();
        let cache = ByteCache::default();
        let mut progress = Vec::new();
        VolumeLoader::new(&cache, &store)
            .build(&instances, |loaded, total| progress.push((loaded, total)))
            .await
            .unwrap();

        assert_eq!(progress, [(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn cached_slices_are_not_fetched_again() {
        let (instances, store) = stack();
        let fetcher = CountingFetcher {
            inner: store,
            calls: AtomicUsize::new(0),
        };
        let cache = ByteCache::default();
        let loader = VolumeLoader::new(&cache, &fetcher);

        loader.build(&instances, |_, _| {}).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().entries, 3);

        loader.build(&instances, |_, _| {}).await.unwrap();
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().hits, 3);
    }

    #[tokio::test]
    async fn fetch_failure_names_the_instance() {
        let (instances, mut store) = stack();
        store.remove("b");
        let cache = ByteCache::default();
        let mut progress = 0;
        let err = VolumeLoader::new(&cache, &store)
            .build(&instances, |loaded, _| progress = loaded)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VolumeLoaderError::Fetch { ref instance_id, .. } if instance_id == "b"
        ));
        assert_eq!(progress, 1);
    }

    #[tokio::test]
    async fn decode_failure_names_the_instance() {
        let (instances, mut store) = stack();
        store.insert("c".to_owned(), slice_bytes(&[1, 2]));
        let cache = ByteCache::default();
        let err = VolumeLoader::new(&cache, &store)
            .build(&instances, |_, _| {})
            .await
            .unwrap_err();

        match err {
            VolumeLoaderError::Decode {
                instance_id,
                source: DecodeError::Truncated { .. },
            } => assert_eq!(instance_id, "c"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_mismatched_and_empty_stacks() {
        let (mut instances, store) = stack();
        let cache = ByteCache::default();
        let loader = VolumeLoader::new(&cache, &store);

        assert!(matches!(
            loader.build(&[], |_, _| {}).await,
            Err(VolumeLoaderError::EmptyStack)
        ));

        instances[2].columns = 3;
        assert!(matches!(
            loader.build(&instances, |_, _| {}).await,
            Err(VolumeLoaderError::InconsistentGeometry { ref instance_id }) if instance_id == "c"
        ));

        instances[0].rows = 0;
        assert!(matches!(
            loader.build(&instances, |_, _| {}).await,
            Err(VolumeLoaderError::InvalidDimensions { rows: 0, columns: 2 })
        ));
    }

    struct FixedCodec(Vec<u8>);

    impl J2kCodec for FixedCodec {
        fn decode(&self, _codestream: &[u8]) -> Result<Vec<u8>, crate::decoder::CodecError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn uses_the_configured_codec() {
        let mut instance = test_instance("j", 1, 2, 0.0);
        instance.transfer_syntax_uid = uids::JPEG2000_LOSSLESS.to_owned();
        let store = HashMap::from([(
            "j".to_owned(),
            part10(
                uids::JPEG2000_LOSSLESS,
                [encapsulated_pixel_data(vec![vec![0xFF, 0x4F, 0xFF, 0x51, 0xFF, 0xD9]])],
            ),
        )]);
        let cache = ByteCache::default();
        let volume = VolumeLoader::new(&cache, &store)
            .with_decoder(PixelDecoder::with_codec(FixedCodec(le_bytes(&[40, 41]))))
            .build(std::slice::from_ref(&instance), |_, _| {})
            .await
            .unwrap();

        assert_eq!(volume.as_slice().unwrap(), [40, 41]);
        assert_eq!(volume.spacing.2, 2.0);
    }
}
