//! Addressing rules shared by the save operations.
//!
//! A save is aimed either directly at its store or at the project's
//! `config.yaml`, from which the store path is derived. Filenames are fixed
//! (`config.yaml`, `run_info.json`) or derived from the module name
//! (`<module>.frd`); a mismatch is rejected, never silently renamed.

use std::path::{Path, PathBuf};

use super::module::ModuleName;
use crate::error::{StoreError, StoreResult};

pub const CONFIG_FILENAME: &str = "config.yaml";
pub const RUN_INFO_FILENAME: &str = "run_info.json";
/// Extension of the per-module bulk-data container.
pub const DATA_EXTENSION: &str = "frd";
/// Directory under the project root holding per-module data files.
pub const ANALYSIS_DIR: &str = "analysis_files";

/// Where a save operation should write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveTarget {
    /// Path of the store itself.
    Direct(PathBuf),
    /// Path of the project's `config.yaml`; the store path is derived from it.
    FromConfig(PathBuf),
}

impl SaveTarget {
    /// Build a target from two optional paths, exactly one of which must be set.
    pub fn from_paths(direct: Option<PathBuf>, config: Option<PathBuf>) -> StoreResult<Self> {
        match (direct, config) {
            (Some(direct), None) => Ok(Self::Direct(direct)),
            (None, Some(config)) => Ok(Self::FromConfig(config)),
            (Some(_), Some(_)) => Err(StoreError::precondition(
                "either a direct path or a config path must be given, not both",
            )),
            (None, None) => Err(StoreError::precondition(
                "either a direct path or a config path must be given",
            )),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Direct(path) | Self::FromConfig(path) => path,
        }
    }
}

/// Filename of a module's data container: `<module>.frd`.
pub fn data_filename(module: &ModuleName) -> String {
    format!("{module}.{DATA_EXTENSION}")
}

/// `<project_root>/analysis_files/<module>.frd`
pub fn derived_data_path(project_root: &Path, module: &ModuleName) -> PathBuf {
    project_root.join(ANALYSIS_DIR).join(data_filename(module))
}

/// `<project_root>/analysis_files/run_info.json`, used when the config
/// document registers a project root but no explicit run-info path.
pub fn default_run_info_path(project_root: &Path) -> PathBuf {
    project_root.join(ANALYSIS_DIR).join(RUN_INFO_FILENAME)
}

pub fn check_config_filename(path: &Path) -> StoreResult<()> {
    check_filename(path, CONFIG_FILENAME, "config path")
}

pub fn check_run_info_filename(path: &Path) -> StoreResult<()> {
    check_filename(path, RUN_INFO_FILENAME, "run info path")
}

pub fn check_data_filename(path: &Path, module: &ModuleName) -> StoreResult<()> {
    check_filename(path, &data_filename(module), "run data path")
}

fn check_filename(path: &Path, expected: &str, what: &str) -> StoreResult<()> {
    let name = path.file_name().and_then(|name| name.to_str());
    if name == Some(expected) {
        return Ok(());
    }
    Err(StoreError::precondition(format!(
        "{what} must be named {expected} (got {})",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rois() -> ModuleName {
        ModuleName::new("ROIs").expect("name")
    }

    #[test]
    fn target_requires_exactly_one_path() {
        let direct = Some(PathBuf::from("a/run_info.json"));
        let config = Some(PathBuf::from("a/config.yaml"));

        assert_eq!(
            SaveTarget::from_paths(direct.clone(), None).expect("direct"),
            SaveTarget::Direct(PathBuf::from("a/run_info.json"))
        );
        assert_eq!(
            SaveTarget::from_paths(None, config.clone()).expect("config"),
            SaveTarget::FromConfig(PathBuf::from("a/config.yaml"))
        );
        assert!(SaveTarget::from_paths(direct, config).unwrap_err().is_precondition());
        assert!(SaveTarget::from_paths(None, None).unwrap_err().is_precondition());
    }

    #[test]
    fn derived_data_path_uses_module_stem() {
        let path = derived_data_path(Path::new("/proj"), &rois());
        assert_eq!(path, PathBuf::from("/proj/analysis_files/ROIs.frd"));
        check_data_filename(&path, &rois()).expect("derived name matches");
    }

    #[test]
    fn data_filename_mismatch_is_rejected() {
        for bad in ["ROIs.h5", "rois.frd", "ROIs", "ROIs.frd.bak", "other/"] {
            let err = check_data_filename(Path::new(bad), &rois()).unwrap_err();
            assert!(err.to_string().contains("ROIs.frd"), "{bad}");
        }
    }

    #[test]
    fn fixed_filenames_are_enforced() {
        check_config_filename(Path::new("/p/configs/config.yaml")).expect("config");
        check_run_info_filename(Path::new("run_info.json")).expect("run info");
        assert!(check_config_filename(Path::new("/p/config.yml")).is_err());
        assert!(check_run_info_filename(Path::new("/p/run_info.yaml")).is_err());
    }
}
