// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! stepvol CLI

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stepvol::cli::{Reporter, ViewerRunner};
use stepvol::geometry::{enumerate_faces, Shape};
use stepvol::io::{read_step_file, StlFormat};
use stepvol::{FaceManifest, Kernel, VolumeConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepvol")]
#[command(about = "Per-face STL export and volume measurement for STEP models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ./stepvol.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export faces and measure the volume of a STEP file
    Measure {
        /// Input STEP file
        input: Option<PathBuf>,

        #[command(flatten)]
        options: MeasureOptions,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export every face as its own STL file
    Export {
        /// Input STEP file
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// STL encoding (binary, ascii)
        #[arg(short, long)]
        format: Option<StlFormat>,
    },

    /// List the faces of a STEP file in export order
    Faces {
        /// Input STEP file
        input: PathBuf,
    },

    /// Resolve a picked file or actor name back to its face
    Pick {
        /// Picked name, e.g. face_0007 or faces_out/face_0007.stl
        name: String,

        /// Directory holding faces.json
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

#[derive(Args)]
struct MeasureOptions {
    /// Output directory for face files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Sewing tolerance in mm
    #[arg(short, long)]
    tolerance: Option<f64>,

    /// Voxel pitch in mm
    #[arg(short, long)]
    pitch: Option<f64>,

    /// Output unit (mm3, cm3, m3)
    #[arg(short, long)]
    unit: Option<String>,

    /// Further tolerances to try when the shape does not close
    #[arg(long, value_delimiter = ',')]
    escalate: Vec<f64>,

    /// Include the bounding box volume
    #[arg(long)]
    bbox: bool,

    /// Also voxelize closed solids and report the deviation
    #[arg(long)]
    cross_check: bool,

    /// Skip writing face files
    #[arg(long)]
    no_export: bool,

    /// Open the exported faces in the viewer
    #[arg(long)]
    show: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        Reporter::report_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "stepvol=debug" } else { "stepvol=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Measure { input, options, json } => measure_command(config, input, options, json, cli.verbose),
        Commands::Export {
            input,
            output_dir,
            format,
        } => export_command(config, &input, output_dir, format, cli.verbose),
        Commands::Faces { input } => faces_command(&config, &input),
        Commands::Pick { name, dir } => pick_command(&config, &name, dir),
        Commands::Version => {
            println!("stepvol v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<VolumeConfig> {
    match path {
        Some(path) => {
            let mut config = VolumeConfig::from_file(path)?;
            config.apply_overrides(|key| std::env::var(key).ok());
            Ok(config)
        }
        None => Ok(VolumeConfig::load()?),
    }
}

fn spinner(verbose: bool, message: &str) -> Result<Option<ProgressBar>> {
    if !verbose {
        return Ok(None);
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(Some(pb))
}

fn measure_command(
    mut config: VolumeConfig,
    input: Option<PathBuf>,
    options: MeasureOptions,
    json: bool,
    verbose: bool,
) -> Result<()> {
    if let Some(input) = input {
        config.source_path = Some(input);
    }
    if let Some(dir) = options.output_dir {
        config.output_dir = dir;
    }
    if let Some(tolerance) = options.tolerance {
        config.tolerance_mm = tolerance;
    }
    if let Some(pitch) = options.pitch {
        config.pitch_mm = pitch;
    }
    if let Some(unit) = options.unit {
        config.output_unit = unit;
    }
    if !options.escalate.is_empty() {
        config.escalation = options.escalate;
    }
    config.include_bbox |= options.bbox;
    config.cross_check |= options.cross_check;
    config.show_visualization |= options.show;
    if options.no_export {
        config.export_faces = false;
    }

    let Some(source) = config.source_path.clone() else {
        bail!("no input file given (pass a path or set source_path)");
    };

    // Configuration errors surface here, before the file is read
    let kernel = Kernel::new(config)?;

    let pb = spinner(verbose && !json, &format!("Measuring {}", source.display()))?;
    let outcome = kernel
        .run(&source)
        .with_context(|| format!("Failed to measure {}", source.display()));
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let outcome = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.report)?);
    } else {
        Reporter::report_volume(&outcome.report);
        if verbose {
            let path: Vec<String> = outcome.stages.iter().map(|s| format!("{s:?}")).collect();
            Reporter::report_info(&format!("Stages: {}", path.join(" → ")));
        }
    }

    if kernel.config().show_visualization {
        match &outcome.manifest {
            Some(manifest) => {
                let viewer = ViewerRunner::new(kernel.config().viewer_command.as_deref());
                viewer.show(&kernel.config().output_dir, manifest)?;
            }
            None => Reporter::report_warning("visualization needs exported faces; drop --no-export"),
        }
    }
    Ok(())
}

fn export_command(
    mut config: VolumeConfig,
    input: &Path,
    output_dir: Option<PathBuf>,
    format: Option<StlFormat>,
    verbose: bool,
) -> Result<()> {
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }
    if let Some(format) = format {
        config.stl_format = format;
    }
    let kernel = Kernel::new(config)?;

    let model = read_step_file(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let pb = spinner(verbose, "Exporting faces")?;
    let exported = kernel.export(&model, Some(input));
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let (summary, _) = exported.context("Failed to export faces")?;

    Reporter::report_export(&summary);
    if summary.skipped.is_empty() {
        Reporter::success(&format!("{} faces exported", summary.written.len()));
    } else {
        Reporter::report_warning(&format!("{} degenerate faces skipped", summary.skipped.len()));
    }
    Ok(())
}

fn faces_command(config: &VolumeConfig, input: &Path) -> Result<()> {
    let model = read_step_file(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let faces = enumerate_faces(&model)?;

    println!("{}", format!("{:>6}  {:>8}  {:<12}  {}", "index", "entity", "surface", "file").bold());
    for face in &faces {
        let entity = face.step_id().map(|id| format!("#{id}")).unwrap_or_else(|| "-".into());
        println!(
            "{:>6}  {:>8}  {:<12}  {}",
            face.index(),
            entity,
            face.surface().kind(),
            face.file_stem().bright_black()
        );
    }

    let mesh = model.surface_mesh(&config.mesh);
    Reporter::report_info(&format!(
        "{} faces, {} triangles at export quality",
        faces.len(),
        mesh.triangle_count()
    ));
    Ok(())
}

fn pick_command(config: &VolumeConfig, name: &str, dir: Option<PathBuf>) -> Result<()> {
    let dir = dir.unwrap_or_else(|| config.output_dir.clone());
    let manifest =
        FaceManifest::load(&dir).with_context(|| format!("Failed to load face manifest from {}", dir.display()))?;

    match manifest.resolve_pick(name) {
        Some(entry) => {
            Reporter::report_pick(entry);
            Ok(())
        }
        None => bail!("'{name}' does not match an exported face in {}", dir.display()),
    }
}
