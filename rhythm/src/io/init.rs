//! Project scaffolding: directory layout, `config.yaml` and `rhythm.toml`.
//!
//! Creating `config.yaml` is the job of project initialization only; the
//! save operations require it to exist already.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_yaml::{Mapping, Value};

use super::config_doc::{
    DATE_MODIFIED_KEY, GENERAL_KEY, PATHS_KEY, PROJECT_KEY, RUN_INFO_KEY, now_timestamp,
    write_config,
};
use super::settings::{SETTINGS_FILENAME, StoreSettings, write_settings};
use crate::core::target::{ANALYSIS_DIR, CONFIG_FILENAME, default_run_info_path};

/// All canonical paths within a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub configs_dir: PathBuf,
    pub analysis_dir: PathBuf,
    pub visualizations_dir: PathBuf,
    pub config_path: PathBuf,
    pub run_info_path: PathBuf,
    pub settings_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let configs_dir = root.join("configs");
        Self {
            root: root.clone(),
            configs_dir: configs_dir.clone(),
            analysis_dir: root.join(ANALYSIS_DIR),
            visualizations_dir: root.join("visualizations"),
            config_path: configs_dir.join(CONFIG_FILENAME),
            run_info_path: default_run_info_path(&root),
            settings_path: root.join(SETTINGS_FILENAME),
        }
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite an existing `config.yaml` and `rhythm.toml`.
    pub force: bool,
    /// Recorded as `general.run_name`.
    pub run_name: Option<String>,
}

/// Create the project layout in `root`.
///
/// Fails if `configs/config.yaml` already exists unless `options.force` is set.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    fs::create_dir_all(root).with_context(|| format!("create directory {}", root.display()))?;
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve project root {}", root.display()))?;
    let paths = ProjectPaths::new(&root);

    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }

    create_dir(&paths.configs_dir)?;
    create_dir(&paths.analysis_dir)?;
    create_dir(&paths.visualizations_dir)?;

    write_config(&paths.config_path, &default_config(&paths, options.run_name.as_deref()))
        .with_context(|| format!("write {}", paths.config_path.display()))?;
    if options.force || !paths.settings_path.exists() {
        write_settings(&paths.settings_path, &StoreSettings::default())?;
    }

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn default_config(paths: &ProjectPaths, run_name: Option<&str>) -> Mapping {
    let now = now_timestamp();

    let mut general = Mapping::new();
    general.insert(Value::from("date_created"), Value::from(now.as_str()));
    general.insert(Value::from(DATE_MODIFIED_KEY), Value::from(now.as_str()));
    general.insert(
        Value::from("run_name"),
        run_name.map_or(Value::Null, Value::from),
    );

    let mut path_section = Mapping::new();
    path_section.insert(Value::from(PROJECT_KEY), path_value(&paths.root));
    path_section.insert(Value::from("config"), path_value(&paths.config_path));
    path_section.insert(Value::from(RUN_INFO_KEY), path_value(&paths.run_info_path));

    let mut doc = Mapping::new();
    doc.insert(Value::from(GENERAL_KEY), Value::Mapping(general));
    doc.insert(Value::from(PATHS_KEY), Value::Mapping(path_section));
    doc
}

fn path_value(path: &Path) -> Value {
    Value::from(path.to_string_lossy().into_owned())
}
