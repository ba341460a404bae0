use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use dicom_mpr::{
    ByteCache, VolumeData, VolumeLoader,
    config::{self, Settings},
    enums::Axis,
    geometry,
    projection::{ProjectionRequest, ProjectionResponse, ProjectionWorker},
    transfer_function::{self, TransferFunctionPreset},
};
use env_logger::{Builder, Env};
use log::info;

/// Reconstruct a DICOM series into a volume and export its views
#[derive(Parser, Debug)]
#[command(name = "dicom-mpr")]
#[command(about = "Reconstruct a DICOM series and export MIP, MPR and transfer function images")]
struct Args {
    /// Directory containing the .dcm files of one series
    input: PathBuf,

    /// JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where the PNG files are written
    #[arg(short, long, default_value = "out")]
    output_dir: PathBuf,

    /// Slices on each side of the central slice included in the MIP
    #[arg(long)]
    slab: Option<usize>,

    /// Central slice of the MIP (defaults to the middle of the stack)
    #[arg(long)]
    slice: Option<usize>,

    /// Transfer function preset name
    #[arg(short, long)]
    preset: Option<String>,

    /// JSON file with additional transfer function presets
    #[arg(long)]
    presets_file: Option<PathBuf>,

    /// Also dump the volume as raw native-endian i16 values
    #[arg(long)]
    raw: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match &args.config {
        Some(path) => Settings::from_json_file(path)
            .with_context(|| format!("reading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(slab) = args.slab {
        settings.slab_half_size = slab;
    }
    if let Some(preset) = &args.preset {
        settings.preset = preset.clone();
    }
    let preset = find_preset(&settings.preset, args.presets_file.as_deref())?;

    let scan = VolumeLoader::scan_directory(&args.input)
        .with_context(|| format!("scanning {}", args.input.display()))?;
    let report = geometry::validate(&scan.instances);
    println!(
        "Validation of {} instances: {}",
        scan.instances.len(),
        if report.valid { "ok" } else { "failed" }
    );
    for error in &report.errors {
        println!("  error: {error}");
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    if !report.valid {
        bail!("{} is not a reconstructable series", args.input.display());
    }

    let stack = geometry::sort_by_position(&scan.instances)?;
    let cache = ByteCache::new(settings.cache_capacity_bytes);
    let volume = VolumeLoader::new(&cache, &scan.fetcher)
        .build(&stack.sorted, |loaded, total| {
            info!("Loaded {loaded}/{total} slices");
        })
        .await?;
    info!("Cache: {:?}", cache.stats());

    std::fs::create_dir_all(&args.output_dir)?;
    let (columns, rows, slices) = volume.dimensions();

    let z = args.slice.unwrap_or(slices / 2);
    let mip = project(&volume, z, settings.slab_half_size).await?;
    volume
        .window
        .render(&mip, columns as u32, rows as u32)
        .ok_or_else(|| anyhow!("MIP plane does not fit {columns}x{rows}"))?
        .save(args.output_dir.join("mip.png"))?;

    for (axis, index, name) in [
        (Axis::Axial, slices / 2, "axial.png"),
        (Axis::Coronal, rows / 2, "coronal.png"),
        (Axis::Sagittal, columns / 2, "sagittal.png"),
    ] {
        volume
            .get_image_from_axis(index, axis, settings.interpolation, None)
            .ok_or_else(|| anyhow!("no {axis:?} plane at {index}"))?
            .save(args.output_dir.join(name))?;
    }

    transfer_function::generate(&preset)
        .to_image()
        .ok_or_else(|| anyhow!("transfer function texture has the wrong size"))?
        .save(args.output_dir.join("transfer_function.png"))?;

    if args.raw {
        let data = volume
            .as_slice()
            .ok_or_else(|| anyhow!("volume is not contiguous"))?;
        std::fs::write(
            args.output_dir.join("volume.raw"),
            bytemuck::cast_slice::<i16, u8>(data),
        )?;
    }

    info!(
        "Wrote {columns}x{rows}x{slices} volume views to {}",
        args.output_dir.display()
    );
    Ok(())
}

fn find_preset(name: &str, presets_file: Option<&Path>) -> Result<TransferFunctionPreset> {
    let mut presets = match presets_file {
        Some(path) => config::load_presets(path)
            .with_context(|| format!("reading presets from {}", path.display()))?,
        None => Vec::new(),
    };
    presets.extend(transfer_function::builtin_presets());
    presets
        .into_iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("unknown transfer function preset {name:?}"))
}

async fn project(volume: &VolumeData, z: usize, slab_half_size: usize) -> Result<Vec<i16>> {
    let mut worker = ProjectionWorker::spawn()?;
    worker.send(volume.projection_init())?;
    worker.send(ProjectionRequest::ComputeSlice {
        z,
        slab_half_size,
        request_id: 1,
    })?;

    while let Some(response) = worker.recv().await {
        match response {
            ProjectionResponse::Ready => info!("Projection worker ready"),
            ProjectionResponse::SliceResult { buffer, .. } => return Ok(buffer),
            ProjectionResponse::Error { message, .. } => bail!("projection failed: {message}"),
            ProjectionResponse::BatchComplete { .. } => {}
        }
    }
    bail!("projection worker stopped before answering")
}
