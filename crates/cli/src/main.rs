//! geoshift CLI - change detection between two rasters of the same area

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use geoshift_algorithms::engine::{CancelToken, TracingSink};
use geoshift_algorithms::pipeline::{run_with_progress, AnalysisConfig, AnalysisOutput, AnalysisRequest};
use geoshift_algorithms::reproject::{FootprintPolicy, ResamplingMethod};
use geoshift_algorithms::scorer::NoRuntimeLoader;
use geoshift_algorithms::statistics::AreaUnits;
use geoshift_colormap::{raster_to_rgba, ColormapParams, OverlayImage};
use geoshift_core::change::{AnalysisMode, ChangeClass, ModelUse, ScoreSource};
use geoshift_core::io::{RasterSource, ReadOptions};
use geoshift_core::{Stage, CRS};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "geoshift")]
#[command(author, version, about = "Change detection between two rasters", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a raster file
    Info {
        /// Input raster file
        input: PathBuf,
    },
    /// Detect change between a before and an after raster
    Analyze {
        /// Earlier raster (GeoTIFF, PNG or JPEG)
        before: PathBuf,
        /// Later raster of the same area
        after: PathBuf,
        /// Analysis mode: landuse, deforestation, water, structures, disaster
        #[arg(short, long)]
        mode: Option<String>,
        /// Heuristic change threshold for the selected mode
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Threshold applied to model scores for the selected mode
        #[arg(long)]
        model_threshold: Option<f32>,
        /// Full-scale sample value for intensity scores (e.g. 10000 for
        /// scaled reflectance); defaults to the sample type's range
        #[arg(long)]
        value_scale: Option<f32>,
        /// Resampling method for both rasters: nearest, bilinear
        #[arg(short, long)]
        resampling: Option<String>,
        /// Cover the union of both footprints instead of their intersection
        #[arg(long)]
        union: bool,
        /// Model file for the selected mode
        #[arg(long)]
        model: Option<PathBuf>,
        /// Time limit for one model call, in milliseconds
        #[arg(long)]
        scorer_timeout_ms: Option<u64>,
        /// Read rasters decimated so the longer axis fits this many pixels
        #[arg(long)]
        max_dim: Option<usize>,
        /// Decoded-size budget per raster, in MiB
        #[arg(long)]
        memory_budget_mb: Option<u64>,
        /// CRS of the shared grid (EPSG:<code> or a +proj string)
        #[arg(long)]
        target_crs: Option<String>,
        /// CRS to assume for the before raster
        #[arg(long)]
        before_crs: Option<String>,
        /// CRS to assume for the after raster
        #[arg(long)]
        after_crs: Option<String>,
        /// Report changed area in hectares
        #[arg(long)]
        hectares: bool,
        /// Also write the score heatmap as score.png
        #[arg(long)]
        score_png: bool,
        /// JSON analysis configuration; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Output directory for overlay.png and summary.json
        #[arg(short, long)]
        out_dir: PathBuf,
    },
    /// List analysis modes with their defaults
    Modes,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Open => "Reading rasters...",
        Stage::Align => "Aligning rasters...",
        Stage::Analyze => "Scoring change...",
        Stage::Summarize => "Summarizing area...",
        Stage::Render => "Rendering overlay...",
    }
}

fn parse_crs(s: &str) -> Result<CRS> {
    CRS::parse(s).with_context(|| format!("Invalid CRS: {}", s))
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

fn write_png(image: &OverlayImage, path: &Path) -> Result<()> {
    let rgba = image::RgbaImage::from_raw(
        image.cols() as u32,
        image.rows() as u32,
        image.as_bytes().to_vec(),
    )
    .ok_or_else(|| anyhow!("Overlay buffer does not match its dimensions"))?;
    rgba.save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn write_outputs(out: &AnalysisOutput, out_dir: &Path, score_png: bool) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    write_png(&out.overlay, &out_dir.join("overlay.png"))?;

    if score_png {
        let result = &out.result;
        let params = ColormapParams::for_scores(result.policy(), result.threshold());
        write_png(&raster_to_rgba(result.score(), &params), &out_dir.join("score.png"))?;
    }

    let json = serde_json::to_string_pretty(&out.summary).context("Failed to encode summary")?;
    let summary_path = out_dir.join("summary.json");
    std::fs::write(&summary_path, json)
        .with_context(|| format!("Failed to write {}", summary_path.display()))
}

fn print_summary(out: &AnalysisOutput) {
    let result = &out.result;
    let stats = &out.stats;
    let mode = result.mode();

    println!("Mode: {}", mode.label());
    println!("Threshold: {:.4}", result.threshold());
    match result.source() {
        ScoreSource::Heuristic => println!("Scorer: heuristic"),
        ScoreSource::Model { name } => println!("Scorer: model {}", name),
    }
    let (rows, cols) = out.pair.shape();
    println!("Grid: {} x {} ({} bands)", cols, rows, out.pair.bands());
    if let Some(crs) = out.pair.crs() {
        println!("CRS: {}", crs);
    }
    println!(
        "Changed: {} of {} pixels ({:.2}%, {:?})",
        stats.changed_pixels,
        stats.valid_pixels,
        stats.percent_changed,
        stats.extent()
    );
    for class in &stats.by_class {
        if class.class == ChangeClass::NoChange || class.pixels == 0 {
            continue;
        }
        match class.hectares {
            Some(ha) => println!(
                "  {}: {} pixels, {:.2} ha",
                class.class.describe(mode),
                class.pixels,
                ha
            ),
            None => println!("  {}: {} pixels", class.class.describe(mode), class.pixels),
        }
    }
    for warning in result.warnings() {
        println!("Warning: {}", warning);
    }
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Info { input } => {
            let source = RasterSource::open(&input, ReadOptions::default())
                .with_context(|| format!("Failed to open {}", input.display()))?;
            let meta = source.info();

            println!("File: {}", input.display());
            println!("Format: {}", meta.format);
            println!(
                "Dimensions: {} x {} ({} bands, {:?})",
                meta.cols, meta.rows, meta.bands, meta.kind
            );
            match &meta.transform {
                Some(t) => {
                    let (x, y) = t.resolution();
                    let (min_x, min_y, max_x, max_y) = t.bounds(meta.cols, meta.rows);
                    println!("Cell size: {} x {}", x, y);
                    println!(
                        "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                        min_x, min_y, max_x, max_y
                    );
                }
                None => println!("Georeference: none"),
            }
            if let Some(crs) = &meta.crs {
                println!("CRS: {}", crs);
            }
            if let Some(nodata) = meta.nodata {
                println!("NoData: {}", nodata);
            }
            println!(
                "Chunks: {} x {}{}",
                meta.chunk_shape.1,
                meta.chunk_shape.0,
                if meta.supports_windowed_reads() {
                    " (windowed reads)"
                } else {
                    ""
                }
            );
        }

        Commands::Analyze {
            before,
            after,
            mode,
            threshold,
            model_threshold,
            value_scale,
            resampling,
            union,
            model,
            scorer_timeout_ms,
            max_dim,
            memory_budget_mb,
            target_crs,
            before_crs,
            after_crs,
            hectares,
            score_png,
            config,
            out_dir,
        } => {
            let mut cfg = load_config(config.as_deref())?;
            if let Some(m) = mode {
                cfg.mode = m.parse::<AnalysisMode>()?;
            }
            let selected = cfg.mode;
            if let Some(t) = threshold {
                cfg.overrides_mut(selected).threshold = Some(t);
            }
            if let Some(t) = model_threshold {
                cfg.overrides_mut(selected).model_threshold = Some(t);
            }
            if let Some(path) = model {
                cfg.overrides_mut(selected).model = Some(path);
            }
            if let Some(v) = value_scale {
                cfg.read.value_scale = Some(v);
            }
            if let Some(r) = resampling {
                cfg.resampling = Some(r.parse::<ResamplingMethod>()?);
            }
            if union {
                cfg.footprint = FootprintPolicy::Union;
            }
            if let Some(ms) = scorer_timeout_ms {
                cfg.scorer_timeout_ms = ms;
            }
            if let Some(d) = max_dim {
                cfg.read.max_dimension = Some(d);
            }
            if let Some(mb) = memory_budget_mb {
                cfg.read.memory_budget_bytes = mb * 1024 * 1024;
            }
            if let Some(s) = target_crs {
                cfg.target_crs = parse_crs(&s)?;
            }
            if let Some(s) = before_crs {
                cfg.before_crs = Some(parse_crs(&s)?);
            }
            if let Some(s) = after_crs {
                cfg.after_crs = Some(parse_crs(&s)?);
            }
            if hectares {
                cfg.area_units = AreaUnits::Hectares;
            }

            let request = AnalysisRequest::new(before, after);
            let start = Instant::now();
            let pb = spinner("Starting analysis...");
            let out = run_with_progress(
                &request,
                &cfg,
                &NoRuntimeLoader,
                Arc::new(TracingSink),
                &CancelToken::new(),
                &mut |stage| pb.set_message(stage_message(stage)),
            );
            pb.finish_and_clear();
            let out = out.with_context(|| format!("{} analysis failed", selected.label()))?;

            write_outputs(&out, &out_dir, score_png)?;
            let elapsed = start.elapsed();
            info!("Analysis finished in {:.2?}", elapsed);

            print_summary(&out);
            println!("Outputs saved to: {}", out_dir.display());
            println!("  Processing time: {:.2?}", elapsed);
        }

        Commands::Modes => {
            println!(
                "{:<14} {:<18} {:>10} {:>8}  model",
                "mode", "label", "threshold", "model>="
            );
            for &mode in AnalysisMode::ALL {
                let model = match mode.model_use() {
                    ModelUse::Never => "never",
                    ModelUse::Prefers => "optional",
                    ModelUse::Requires => "required (heuristic fallback)",
                };
                println!(
                    "{:<14} {:<18} {:>10.4} {:>8.2}  {}",
                    mode.name(),
                    mode.label(),
                    mode.default_threshold(),
                    mode.default_model_threshold(),
                    model
                );
            }
        }
    }

    Ok(())
}
