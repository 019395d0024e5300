//! Command-line front end for project setup and ROI persistence.
//!
//! `rhythm init` lays out a project, `rhythm rois` builds the ROI module and
//! saves its artifacts, `rhythm show` prints what a project has recorded.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_yaml::Value;

use rhythm::StoreError;
use rhythm::core::module::ModuleName;
use rhythm::core::polygon::Polygon;
use rhythm::core::target::{check_config_filename, derived_data_path};
use rhythm::core::types::{SaveOptions, Verbosity};
use rhythm::exit_codes;
use rhythm::io::config_doc::{load_config, project_root, run_info_path};
use rhythm::io::init::{InitOptions, init_project};
use rhythm::io::persist::Persister;
use rhythm::io::run_info::load_run_info;
use rhythm::io::settings::{SETTINGS_FILENAME, StoreSettings, load_settings};
use rhythm::logging;
use rhythm::rois::{RoiSource, Rois};

#[derive(Parser)]
#[command(
    name = "rhythm",
    version,
    about = "Run-artifact persistence for facial-movement analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the project layout, `configs/config.yaml` and `rhythm.toml`.
    Init {
        /// Project root directory (created if missing).
        root: PathBuf,
        /// Recorded as `general.run_name`.
        #[arg(long)]
        run_name: Option<String>,
        /// Overwrite an existing config and settings file.
        #[arg(short, long)]
        force: bool,
    },
    /// Build ROI masks and save config, run data and run info.
    Rois {
        /// Path to the project's `config.yaml`.
        #[arg(long)]
        config: PathBuf,
        /// JSON file with polygons: `[[[x, y], ...], ...]`.
        #[arg(long, requires_all = ["height", "width"], conflicts_with = "masks_from")]
        points: Option<PathBuf>,
        /// Frame height in pixels (with `--points`).
        #[arg(long)]
        height: Option<usize>,
        /// Frame width in pixels (with `--points`).
        #[arg(long)]
        width: Option<usize>,
        /// Reuse masks from a previous `ROIs.frd`.
        #[arg(long, required_unless_present = "points")]
        masks_from: Option<PathBuf>,
        /// Skip artifacts that already exist instead of replacing them.
        #[arg(long)]
        no_overwrite: bool,
        /// Notice level: 0 silent, 1 warnings, 2 all.
        #[arg(short, long)]
        verbose: Option<u8>,
    },
    /// Print recorded modules, or one module's entries and data summary.
    Show {
        /// Path to the project's `config.yaml`.
        #[arg(long)]
        config: PathBuf,
        /// Module name, e.g. `ROIs`.
        #[arg(long)]
        module: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    let default_filter = match &cli.command {
        Command::Rois {
            verbose: Some(level),
            ..
        } if *level >= 2 => "info",
        _ => "warn",
    };
    logging::init(default_filter);

    if let Err(err) = run(cli) {
        eprintln!("{err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Init {
            root,
            run_name,
            force,
        } => cmd_init(&root, InitOptions { force, run_name }),
        Command::Rois {
            config,
            points,
            height,
            width,
            masks_from,
            no_overwrite,
            verbose,
        } => {
            let source = match (points, masks_from) {
                (Some(points), _) => {
                    let image_hw = height
                        .zip(width)
                        .context("--points requires --height and --width")?;
                    RoiSource::Points {
                        polygons: read_polygons(&points)?,
                        image_hw,
                    }
                }
                (None, Some(path)) => RoiSource::File(path),
                (None, None) => return Err(anyhow!("one of --points or --masks-from is required")),
            };
            cmd_rois(&config, source, no_overwrite, verbose)
        }
        Command::Show { config, module } => cmd_show(&config, module.as_deref()),
    }
}

fn cmd_init(root: &Path, options: InitOptions) -> Result<()> {
    let paths = init_project(root, &options)?;
    println!("{}", paths.config_path.display());
    Ok(())
}

fn cmd_rois(
    config: &Path,
    source: RoiSource<'_>,
    no_overwrite: bool,
    verbose: Option<u8>,
) -> Result<()> {
    check_config_filename(config)?;
    if !config.is_file() {
        return Err(StoreError::precondition(format!(
            "config document {} must exist and be a file",
            config.display()
        ))
        .into());
    }
    let mut settings = project_settings(config)?;
    if no_overwrite {
        settings.overwrite = false;
    }
    if let Some(level) = verbose {
        settings.verbosity = Verbosity::try_from(level).map_err(anyhow::Error::msg)?;
    }
    let persister = Persister::new(settings.save_options());

    let rois = Rois::new(source, persister.registry(), settings.verbosity)?;
    let [config_outcome, data_outcome, info_outcome] = persister.save_all(&rois, config)?;
    println!("{rois}");
    println!("config: {}", config_outcome.as_str());
    println!("run_data: {}", data_outcome.as_str());
    println!("run_info: {}", info_outcome.as_str());
    Ok(())
}

fn cmd_show(config: &Path, module: Option<&str>) -> Result<()> {
    let doc = load_config(config)?;
    let Some(name) = module else {
        for key in doc.keys().filter_map(Value::as_str) {
            println!("{key}");
        }
        return Ok(());
    };
    let name = ModuleName::new(name)?;

    let entry = doc
        .get(name.as_str())
        .with_context(|| format!("module '{name}' has no entry in {}", config.display()))?;
    print!("{}", serde_yaml::to_string(entry).context("serialize config entry")?);

    if let Some(path) = run_info_path(&doc).filter(|p| p.is_file()) {
        if let Some(info) = load_run_info(&path)?.get(name.as_str()) {
            println!("run_info: {info}");
        }
    }

    if let Some(root) = project_root(&doc) {
        let data_path = derived_data_path(&root, &name);
        if data_path.is_file() {
            let persister = Persister::new(SaveOptions::default());
            for line in persister.load_run_data(&data_path)?.describe() {
                println!("{line}");
            }
        }
    }
    Ok(())
}

/// Project settings from `<paths.project>/rhythm.toml`, or defaults if the
/// config registers no project root.
fn project_settings(config: &Path) -> Result<StoreSettings> {
    let doc = load_config(config)?;
    match project_root(&doc) {
        Some(root) => load_settings(&root.join(SETTINGS_FILENAME)),
        None => Ok(StoreSettings::default()),
    }
}

fn read_polygons(path: &Path) -> Result<Vec<Polygon>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse polygons in {}", path.display()))
}

fn exit_code(err: &anyhow::Error) -> i32 {
    let precondition = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<StoreError>())
        .any(StoreError::is_precondition);
    if precondition {
        exit_codes::PRECONDITION
    } else {
        exit_codes::INVALID
    }
}
