//! Slab maximum-intensity projection on an isolated worker.
//!
//! The worker owns a private copy of the volume and talks to its caller only
//! through [`ProjectionRequest`] and [`ProjectionResponse`] messages. Requests
//! are processed in the order they are received, and every response echoes
//! the request identifier it belongs to.
//!
//! ```no_run
//! # use dicom_mpr::projection::{ProjectionRequest, ProjectionResponse, ProjectionWorker};
//! # async fn run(volume: dicom_mpr::volume::VolumeData) -> Result<(), Box<dyn std::error::Error>> {
//! let mut worker = ProjectionWorker::spawn()?;
//! worker.send(volume.projection_init())?;
//! assert_eq!(worker.recv().await, Some(ProjectionResponse::Ready));
//!
//! worker.send(ProjectionRequest::ComputeSlice {
//!     z: 40,
//!     slab_half_size: 5,
//!     request_id: 1,
//! })?;
//! if let Some(ProjectionResponse::SliceResult { buffer, .. }) = worker.recv().await {
//!     println!("{} pixels", buffer.len());
//! }
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use log::debug;
use rayon::prelude::*;
use std::thread::{self, JoinHandle};
use thiserror::Error;

pub type RequestId = u64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("Projection engine is not initialized")]
    NotInitialized,

    #[error("Volume of {columns}x{rows}x{total_slices} is empty")]
    EmptyVolume {
        columns: usize,
        rows: usize,
        total_slices: usize,
    },

    #[error("Buffer holds {actual} values, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Slice {z} is out of range for {total_slices} slices")]
    SliceOutOfRange { z: usize, total_slices: usize },

    #[error("Projection worker has stopped")]
    WorkerStopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionRequest {
    Init {
        columns: usize,
        rows: usize,
        total_slices: usize,
        buffer: Vec<i16>,
    },
    ComputeSlice {
        z: usize,
        slab_half_size: usize,
        request_id: RequestId,
    },
    ComputeBatch {
        indices: Vec<usize>,
        slab_half_size: usize,
        request_id: RequestId,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionResponse {
    Ready,
    SliceResult {
        z: usize,
        slab_half_size: usize,
        request_id: RequestId,
        buffer: Vec<i16>,
    },
    BatchComplete {
        request_id: RequestId,
    },
    Error {
        message: String,
        /// `None` for a failed `Init`, which carries no identifier.
        request_id: Option<RequestId>,
    },
}

/// A volume buffer with per-pixel maximum projection over slice ranges.
#[derive(Debug, Clone)]
pub struct SlabProjector {
    columns: usize,
    rows: usize,
    total_slices: usize,
    buffer: Vec<i16>,
}

impl SlabProjector {
    pub fn new(
        columns: usize,
        rows: usize,
        total_slices: usize,
        buffer: Vec<i16>,
    ) -> Result<Self, ProjectionError> {
        if columns == 0 || rows == 0 || total_slices == 0 {
            return Err(ProjectionError::EmptyVolume {
                columns,
                rows,
                total_slices,
            });
        }
        let expected = columns * rows * total_slices;
        if buffer.len() != expected {
            return Err(ProjectionError::BufferSizeMismatch {
                expected,
                actual: buffer.len(),
            });
        }
        Ok(Self {
            columns,
            rows,
            total_slices,
            buffer,
        })
    }

    pub fn total_slices(&self) -> usize {
        self.total_slices
    }

    fn plane(&self, z: usize) -> &[i16] {
        let plane_len = self.columns * self.rows;
        &self.buffer[z * plane_len..(z + 1) * plane_len]
    }

    /// Maximum over slices `z - slab_half_size ..= z + slab_half_size`, clamped to the volume.
    ///
    /// A half size of 0 returns slice `z` unchanged.
    pub fn compute_slice(&self, z: usize, slab_half_size: usize) -> Result<Vec<i16>, ProjectionError> {
        if z >= self.total_slices {
            return Err(ProjectionError::SliceOutOfRange {
                z,
                total_slices: self.total_slices,
            });
        }
        let z_start = z.saturating_sub(slab_half_size);
        let z_end = z.saturating_add(slab_half_size).min(self.total_slices - 1);

        let mut result = self.plane(z_start).to_vec();
        for slice in z_start + 1..=z_end {
            result
                .par_chunks_mut(self.columns)
                .zip(self.plane(slice).par_chunks(self.columns))
                .for_each(|(row, source)| {
                    row.iter_mut()
                        .zip(source)
                        .for_each(|(value, &candidate)| *value = (*value).max(candidate));
                });
        }
        Ok(result)
    }
}

/// Request handling state of one worker.
#[derive(Debug, Default)]
pub struct ProjectionEngine {
    projector: Option<SlabProjector>,
}

impl ProjectionEngine {
    pub fn is_ready(&self) -> bool {
        self.projector.is_some()
    }

    /// Handles one request, passing each response to `emit` as soon as it exists.
    pub fn handle(&mut self, request: ProjectionRequest, mut emit: impl FnMut(ProjectionResponse)) {
        match request {
            ProjectionRequest::Init {
                columns,
                rows,
                total_slices,
                buffer,
            } => match SlabProjector::new(columns, rows, total_slices, buffer) {
                Ok(projector) => {
                    debug!("projection engine ready for {columns}x{rows}x{total_slices}");
                    self.projector = Some(projector);
                    emit(ProjectionResponse::Ready);
                }
                Err(err) => {
                    self.projector = None;
                    emit(ProjectionResponse::Error {
                        message: err.to_string(),
                        request_id: None,
                    });
                }
            },
            ProjectionRequest::ComputeSlice {
                z,
                slab_half_size,
                request_id,
            } => emit(self.slice_response(z, slab_half_size, request_id)),
            ProjectionRequest::ComputeBatch {
                indices,
                slab_half_size,
                request_id,
            } => {
                if self.projector.is_none() {
                    emit(not_initialized(request_id));
                    return;
                }
                for z in indices {
                    emit(self.slice_response(z, slab_half_size, request_id));
                }
                emit(ProjectionResponse::BatchComplete { request_id });
            }
        }
    }

    fn slice_response(
        &self,
        z: usize,
        slab_half_size: usize,
        request_id: RequestId,
    ) -> ProjectionResponse {
        let Some(projector) = &self.projector else {
            return not_initialized(request_id);
        };
        match projector.compute_slice(z, slab_half_size) {
            Ok(buffer) => ProjectionResponse::SliceResult {
                z,
                slab_half_size,
                request_id,
                buffer,
            },
            Err(err) => ProjectionResponse::Error {
                message: err.to_string(),
                request_id: Some(request_id),
            },
        }
    }
}

fn not_initialized(request_id: RequestId) -> ProjectionResponse {
    ProjectionResponse::Error {
        message: ProjectionError::NotInitialized.to_string(),
        request_id: Some(request_id),
    }
}

/// A [`ProjectionEngine`] running on its own thread.
///
/// Dropping the worker closes its request channel and joins the thread.
pub struct ProjectionWorker {
    requests: UnboundedSender<ProjectionRequest>,
    responses: UnboundedReceiver<ProjectionResponse>,
    handle: Option<JoinHandle<()>>,
}

impl ProjectionWorker {
    pub fn spawn() -> std::io::Result<Self> {
        let (requests, mut request_rx) = mpsc::unbounded::<ProjectionRequest>();
        let (response_tx, responses) = mpsc::unbounded();

        let handle = thread::Builder::new()
            .name("slab-projection".to_owned())
            .spawn(move || {
                futures::executor::block_on(async move {
                    let mut engine = ProjectionEngine::default();
                    while let Some(request) = request_rx.next().await {
                        engine.handle(request, |response| {
                            // A closed receiver means nobody waits for results any more.
                            let _ = response_tx.unbounded_send(response);
                        });
                    }
                    debug!("projection worker stopped");
                });
            })?;

        Ok(Self {
            requests,
            responses,
            handle: Some(handle),
        })
    }

    pub fn send(&self, request: ProjectionRequest) -> Result<(), ProjectionError> {
        self.requests
            .unbounded_send(request)
            .map_err(|_| ProjectionError::WorkerStopped)
    }

    /// Next response, or `None` once the worker has stopped.
    pub async fn recv(&mut self) -> Option<ProjectionResponse> {
        self.responses.next().await
    }
}

impl Drop for ProjectionWorker {
    fn drop(&mut self) {
        self.requests.close_channel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
