//! The run-artifact persistence protocol.
//!
//! Three independent save operations share one addressing scheme
//! ([`SaveTarget`]) and one overwrite policy:
//!
//! - [`Persister::save_config`] merges the module's config record into the
//!   project's `config.yaml` and stamps `general.date_modified`.
//! - [`Persister::save_run_info`] merges the run-info record into
//!   `run_info.json`, creating the document if needed.
//! - [`Persister::save_run_data`] writes the run-data tree to
//!   `<project>/analysis_files/<module>.frd`, recovering once from a handle
//!   left open in this process.
//!
//! Precondition failures are raised before anything is written. Skips caused
//! by `overwrite = false` are reported as [`SaveOutcome::Skipped`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::config_doc;
use super::container::{
    ContainerError, ContainerHandle, EncodeOptions, HandleRegistry, WriteMode, read_container,
    write_container,
};
use super::run_info;
use crate::core::module::Module;
use crate::core::policy::{decide_entry, is_stale};
use crate::core::records::{DataTree, Record};
use crate::core::target::{
    SaveTarget, check_config_filename, check_data_filename, check_run_info_filename,
    default_run_info_path, derived_data_path,
};
use crate::core::types::{EntryDecision, SaveOptions, SaveOutcome};
use crate::error::{StoreError, StoreResult};

/// Message signature of a write refused because the file is held open.
static ALREADY_OPEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)unable.*already open").expect("already-open pattern"));

/// Writes a run-data container to disk.
///
/// [`FileWriter`] is the real implementation; tests substitute writers that
/// fail on demand to exercise the already-open recovery.
pub trait ContainerWriter {
    fn write(
        &self,
        path: &Path,
        tree: &DataTree,
        options: EncodeOptions,
        mode: WriteMode,
        registry: &HandleRegistry,
    ) -> Result<(), ContainerError>;
}

/// Writer backed by [`write_container`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FileWriter;

impl ContainerWriter for FileWriter {
    fn write(
        &self,
        path: &Path,
        tree: &DataTree,
        options: EncodeOptions,
        mode: WriteMode,
        registry: &HandleRegistry,
    ) -> Result<(), ContainerError> {
        write_container(path, tree, options, mode, registry)
    }
}

/// Saves module artifacts into a project.
///
/// Owns the registry of open data-container handles; every container this
/// persister opens or writes goes through it.
#[derive(Debug, Clone)]
pub struct Persister<W = FileWriter> {
    options: SaveOptions,
    registry: HandleRegistry,
    writer: W,
}

impl Persister {
    pub fn new(options: SaveOptions) -> Self {
        Self::with_registry(options, HandleRegistry::new())
    }

    /// Share an existing registry (e.g. with readers opened elsewhere).
    pub fn with_registry(options: SaveOptions, registry: HandleRegistry) -> Self {
        Self::with_writer(options, registry, FileWriter)
    }
}

impl Default for Persister {
    fn default() -> Self {
        Self::new(SaveOptions::default())
    }
}

impl<W: ContainerWriter> Persister<W> {
    pub fn with_writer(options: SaveOptions, registry: HandleRegistry, writer: W) -> Self {
        Self {
            options,
            registry,
            writer,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn options(&self) -> &SaveOptions {
        &self.options
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Merge the module's config record into `config.yaml`.
    ///
    /// The document must already exist; this never creates it.
    pub fn save_config(
        &self,
        module: &dyn Module,
        config_path: &Path,
    ) -> StoreResult<SaveOutcome> {
        let name = module.name();
        let record = module.config().ok_or_else(|| missing_record(module, "config"))?;
        check_existing_config(config_path)?;

        let mut doc = config_doc::load_config(config_path)?;
        let exists = config_doc::has_entry(&doc, name.as_str());
        let decision = decide_entry(exists, self.options.overwrite);
        if !self.announce(decision, name.as_str(), config_path) {
            return Ok(SaveOutcome::Skipped);
        }

        config_doc::set_entry(&mut doc, name.as_str(), record, config_path)?;
        config_doc::touch_date_modified(&mut doc, &config_doc::now_timestamp())?;
        if self.options.verbosity.all() {
            info!(path = %config_path.display(), "saving config.yaml");
        }
        config_doc::write_config(config_path, &doc)?;
        Ok(decision.into())
    }

    /// Merge the module's run-info record into `run_info.json`.
    ///
    /// Requires the run-data record too: info about a run that produced no
    /// data describes an incomplete run.
    pub fn save_run_info(
        &self,
        module: &dyn Module,
        target: &SaveTarget,
    ) -> StoreResult<SaveOutcome> {
        let name = module.name();
        let record = module.run_info().ok_or_else(|| missing_record(module, "run info"))?;
        module.run_data().ok_or_else(|| missing_record(module, "run data"))?;
        let path = self.resolve_run_info_path(target)?;

        let mut doc = if path.exists() {
            if self.options.verbosity.all() {
                info!(path = %path.display(), "loading run_info.json");
            }
            run_info::load_run_info(&path)?
        } else {
            if self.options.verbosity.warnings() {
                warn!(path = %path.display(), "no existing run_info.json; creating a new one");
            }
            Record::new()
        };

        let decision = decide_entry(doc.contains_key(name.as_str()), self.options.overwrite);
        if !self.announce(decision, name.as_str(), &path) {
            return Ok(SaveOutcome::Skipped);
        }
        doc.insert(name.to_string(), Value::Object(record.clone()));
        if self.options.verbosity.all() {
            info!(path = %path.display(), "saving run_info.json");
        }
        run_info::write_run_info(&path, &doc)?;
        Ok(decision.into())
    }

    /// Write the module's run-data tree to its container file.
    pub fn save_run_data(
        &self,
        module: &dyn Module,
        target: &SaveTarget,
    ) -> StoreResult<SaveOutcome> {
        let name = module.name();
        let tree = module.run_data().ok_or_else(|| missing_record(module, "run data"))?;
        let path = self.resolve_run_data_path(module, target)?;

        let existed = path.exists();
        if existed {
            if !self.options.overwrite {
                if self.options.verbosity.warnings() {
                    warn!(
                        module = %name,
                        path = %path.display(),
                        "file exists and overwrite is disabled; not saving"
                    );
                }
                return Ok(SaveOutcome::Skipped);
            }
            if self.options.verbosity.warnings() {
                warn!(module = %name, path = %path.display(), "overwriting existing file");
            }
        }

        let missing_parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty() && !p.exists());
        if let Some(parent) = missing_parent {
            if self.options.verbosity.all() {
                info!(path = %parent.display(), "creating directory");
            }
            fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
        }

        if self.options.verbosity.all() {
            info!(module = %name, path = %path.display(), "saving run data");
        }
        self.write_with_recovery(&path, tree)?;
        self.verify_written(&path);

        Ok(if existed {
            SaveOutcome::Overwritten
        } else {
            SaveOutcome::Written
        })
    }

    /// Save config, run data and run info, in that order, all addressed
    /// through `config_path`. Stops at the first failure.
    pub fn save_all(
        &self,
        module: &dyn Module,
        config_path: &Path,
    ) -> StoreResult<[SaveOutcome; 3]> {
        let target = SaveTarget::FromConfig(config_path.to_path_buf());
        let config = self.save_config(module, config_path)?;
        let data = self.save_run_data(module, &target)?;
        let info = self.save_run_info(module, &target)?;
        Ok([config, data, info])
    }

    /// Read a module's data container through this persister's registry.
    pub fn load_run_data(&self, path: &Path) -> StoreResult<DataTree> {
        Ok(read_container(path, &self.registry)?)
    }

    /// Open a data container and keep the handle registered until dropped.
    pub fn open_run_data(&self, path: &Path) -> StoreResult<ContainerHandle> {
        Ok(ContainerHandle::open(path, &self.registry)?)
    }

    fn write_with_recovery(&self, path: &Path, tree: &DataTree) -> StoreResult<()> {
        let mode = if self.options.overwrite {
            WriteMode::Truncate
        } else {
            WriteMode::CreateNew
        };
        let options = EncodeOptions {
            compression: self
                .options
                .use_compression
                .then_some(self.options.compression_level),
            track_order: self.options.track_order,
        };

        match self.writer.write(path, tree, options, mode, &self.registry) {
            Ok(()) => Ok(()),
            Err(err) if is_already_open(&err) => {
                let closed = self.registry.close_all();
                if self.options.verbosity.warnings() {
                    warn!(
                        path = %path.display(),
                        closed,
                        "file is already open; closed open container handles and retrying"
                    );
                }
                self.writer
                    .write(path, tree, options, mode, &self.registry)
                    .map_err(StoreError::from)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn verify_written(&self, path: &Path) {
        let modified = match fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                if self.options.verbosity.warnings() {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "saved run data but the file cannot be inspected"
                    );
                }
                return;
            }
        };
        let stale = is_stale(modified, SystemTime::now(), self.options.stale_after);
        if stale && self.options.verbosity.warnings() {
            warn!(
                path = %path.display(),
                "saving run data may have failed; file was not modified recently"
            );
        }
    }

    fn resolve_run_info_path(&self, target: &SaveTarget) -> StoreResult<PathBuf> {
        match target {
            SaveTarget::Direct(path) => {
                check_run_info_filename(path)?;
                Ok(path.clone())
            }
            SaveTarget::FromConfig(config_path) => {
                check_existing_config(config_path)?;
                let doc = config_doc::load_config(config_path)?;
                let path = config_doc::run_info_path(&doc)
                    .or_else(|| {
                        config_doc::project_root(&doc).map(|root| default_run_info_path(&root))
                    })
                    .ok_or_else(|| {
                        StoreError::precondition(format!(
                            "{} registers neither paths.run_info nor paths.project",
                            config_path.display()
                        ))
                    })?;
                debug!(path = %path.display(), "run info path derived from config");
                Ok(path)
            }
        }
    }

    fn resolve_run_data_path(
        &self,
        module: &dyn Module,
        target: &SaveTarget,
    ) -> StoreResult<PathBuf> {
        let path = match target {
            SaveTarget::Direct(path) => path.clone(),
            SaveTarget::FromConfig(config_path) => {
                check_existing_config(config_path)?;
                let doc = config_doc::load_config(config_path)?;
                let root = config_doc::project_root(&doc).ok_or_else(|| {
                    StoreError::precondition(format!(
                        "{} must register paths.project",
                        config_path.display()
                    ))
                })?;
                let path = derived_data_path(&root, module.name());
                if self.options.verbosity.all() {
                    info!(
                        path = %path.display(),
                        "using paths.project from config.yaml for run data"
                    );
                }
                path
            }
        };
        check_data_filename(&path, module.name())?;
        Ok(path)
    }

    /// Log the entry decision. Returns false when the save should stop.
    fn announce(&self, decision: EntryDecision, name: &str, path: &Path) -> bool {
        let verbosity = self.options.verbosity;
        match decision {
            EntryDecision::Skip => {
                if verbosity.warnings() {
                    warn!(
                        module = name,
                        path = %path.display(),
                        "entry exists and overwrite is disabled; not saving"
                    );
                }
                false
            }
            EntryDecision::Overwrite => {
                if verbosity.warnings() {
                    warn!(module = name, path = %path.display(), "overwriting existing entry");
                }
                true
            }
            EntryDecision::Insert => {
                if verbosity.all() {
                    info!(module = name, path = %path.display(), "adding entry");
                }
                true
            }
        }
    }
}

/// True for the one recoverable write failure: the target is held open.
pub fn is_already_open(err: &ContainerError) -> bool {
    match err {
        ContainerError::AlreadyOpen(_) => true,
        ContainerError::Io { source, .. } => ALREADY_OPEN_RE.is_match(&source.to_string()),
        _ => false,
    }
}

fn missing_record(module: &dyn Module, what: &str) -> StoreError {
    StoreError::precondition(format!(
        "{what} record of module '{}' is not set; the module likely did not run",
        module.name()
    ))
}

fn check_existing_config(path: &Path) -> StoreResult<()> {
    check_config_filename(path)?;
    if !path.is_file() {
        return Err(StoreError::precondition(format!(
            "config document {} must exist and be a file",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Verbosity;
    use crate::test_support::{StubModule, TempProject, bool_masks};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::io;

    const MASKS: &str = "mask_images";

    /// Fails with the scripted errors first, then writes for real.
    struct ScriptedWriter {
        failures: RefCell<VecDeque<ContainerError>>,
        calls: Cell<usize>,
    }

    impl ScriptedWriter {
        fn new(failures: Vec<ContainerError>) -> Self {
            Self {
                failures: RefCell::new(failures.into()),
                calls: Cell::new(0),
            }
        }
    }

    impl ContainerWriter for ScriptedWriter {
        fn write(
            &self,
            path: &Path,
            tree: &DataTree,
            options: EncodeOptions,
            mode: WriteMode,
            registry: &HandleRegistry,
        ) -> Result<(), ContainerError> {
            self.calls.set(self.calls.get() + 1);
            match self.failures.borrow_mut().pop_front() {
                Some(err) => Err(err),
                None => FileWriter.write(path, tree, options, mode, registry),
            }
        }
    }

    fn scripted(failures: Vec<ContainerError>) -> Persister<ScriptedWriter> {
        let options = SaveOptions {
            verbosity: Verbosity::Silent,
            ..SaveOptions::default()
        };
        Persister::with_writer(options, HandleRegistry::new(), ScriptedWriter::new(failures))
    }

    fn io_failure(path: &Path, message: &str) -> ContainerError {
        ContainerError::Io {
            path: path.to_path_buf(),
            source: io::Error::other(message.to_string()),
        }
    }

    fn quiet(overwrite: bool) -> Persister {
        Persister::new(SaveOptions {
            overwrite,
            verbosity: Verbosity::Silent,
            ..SaveOptions::default()
        })
    }

    #[test]
    fn config_save_requires_a_config_record() {
        let project = TempProject::new();
        let module = StubModule::new("ROIs").without_config();
        let err = quiet(true).save_config(&module, &project.config_path).unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn config_save_never_creates_the_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.yaml");
        let err = quiet(true)
            .save_config(&StubModule::new("ROIs"), &path)
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(!path.exists());
    }

    #[test]
    fn config_save_rejects_misnamed_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.yaml");
        fs::write(&path, "general: {}\n").expect("write");
        let err = quiet(true)
            .save_config(&StubModule::new("ROIs"), &path)
            .unwrap_err();
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    fn run_info_save_requires_run_data() {
        let project = TempProject::new();
        let module = StubModule::new("ROIs").without_run_data();
        let target = SaveTarget::FromConfig(project.config_path.clone());

        let err = quiet(true).save_run_info(&module, &target).unwrap_err();
        assert!(err.to_string().contains("run data"));
        assert!(!project.paths.run_info_path.exists());
    }

    #[test]
    fn run_info_is_created_with_parent_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("a").join("b").join("run_info.json");
        let module = StubModule::new("ROIs");

        let outcome = quiet(true)
            .save_run_info(&module, &SaveTarget::Direct(path.clone()))
            .expect("save");
        assert_eq!(outcome, SaveOutcome::Written);
        let doc = run_info::load_run_info(&path).expect("load");
        assert_eq!(doc.get("ROIs"), Some(&Value::Object(module.run_info_record())));
    }

    #[test]
    fn run_info_direct_path_must_be_named_run_info_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = quiet(true)
            .save_run_info(
                &StubModule::new("ROIs"),
                &SaveTarget::Direct(temp.path().join("info.json")),
            )
            .unwrap_err();
        assert!(err.is_precondition());
    }

    #[test]
    fn run_info_respects_overwrite_policy() {
        let project = TempProject::new();
        let target = SaveTarget::FromConfig(project.config_path.clone());
        let first = StubModule::new("ROIs").with_run_info_field("attempt", 1.into());
        let second = StubModule::new("ROIs").with_run_info_field("attempt", 2.into());

        let outcome = quiet(true).save_run_info(&first, &target).expect("first");
        assert_eq!(outcome, SaveOutcome::Written);
        let outcome = quiet(false).save_run_info(&second, &target).expect("skip");
        assert_eq!(outcome, SaveOutcome::Skipped);
        let doc = run_info::load_run_info(&project.paths.run_info_path).expect("load");
        assert_eq!(doc["ROIs"]["attempt"], 1);

        assert_eq!(
            quiet(true).save_run_info(&second, &target).expect("overwrite"),
            SaveOutcome::Overwritten
        );
        let doc = run_info::load_run_info(&project.paths.run_info_path).expect("load");
        assert_eq!(doc["ROIs"]["attempt"], 2);
    }

    #[test]
    fn run_data_direct_path_must_match_module_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let module = StubModule::new("ROIs");
        for bad in ["rois.frd", "ROIs.h5", "PointTracker.frd"] {
            let path = temp.path().join(bad);
            let err = quiet(true)
                .save_run_data(&module, &SaveTarget::Direct(path.clone()))
                .unwrap_err();
            assert!(err.is_precondition(), "{bad}");
            assert!(!path.exists());
        }
    }

    #[test]
    fn run_data_from_config_requires_project_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("config.yaml");
        fs::write(&config_path, "general:\n  date_modified: x\n").expect("write");

        let err = quiet(true)
            .save_run_data(&StubModule::new("ROIs"), &SaveTarget::FromConfig(config_path))
            .unwrap_err();
        assert!(err.to_string().contains("paths.project"));
    }

    #[test]
    fn run_data_retries_once_after_closing_open_handles() {
        let project = TempProject::new();
        let persister = quiet(true);
        let module = StubModule::new("ROIs").with_run_data_entry(MASKS, bool_masks(2, 8, 8));
        let target = SaveTarget::FromConfig(project.config_path.clone());
        persister.save_run_data(&module, &target).expect("first save");

        let path = project.data_path("ROIs");
        let held = persister.open_run_data(&path).expect("open");
        let updated = StubModule::new("ROIs").with_run_data_entry(MASKS, bool_masks(3, 8, 8));

        let outcome = persister.save_run_data(&updated, &target).expect("save with open handle");
        assert_eq!(outcome, SaveOutcome::Overwritten);
        assert!(held.is_closed());
        assert_eq!(persister.registry().open_count(), 0);
        assert_eq!(
            persister.load_run_data(&path).expect("load"),
            updated.run_data_tree()
        );
    }

    #[test]
    fn already_open_signature_matches_text_errors() {
        let typed = ContainerError::AlreadyOpen(PathBuf::from("x.frd"));
        assert!(is_already_open(&typed));

        let text = ContainerError::Io {
            path: PathBuf::from("x.frd"),
            source: io::Error::other("Unable to create file (file is already open for read-only)"),
        };
        assert!(is_already_open(&text));

        let other = ContainerError::Io {
            path: PathBuf::from("x.frd"),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "permission denied"),
        };
        assert!(!is_already_open(&other));
    }

    #[test]
    fn already_open_text_error_is_retried_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ROIs.frd");
        let module = StubModule::new("ROIs");
        let persister = scripted(vec![io_failure(
            &path,
            "Unable to create file (file is already open for write)",
        )]);

        let outcome = persister
            .save_run_data(&module, &SaveTarget::Direct(path.clone()))
            .expect("retry succeeds");
        assert_eq!(outcome, SaveOutcome::Written);
        assert_eq!(persister.writer().calls.get(), 2);
        assert_eq!(
            persister.load_run_data(&path).expect("load"),
            module.run_data_tree()
        );
    }

    #[test]
    fn second_already_open_failure_propagates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ROIs.frd");
        let persister = scripted(vec![
            ContainerError::AlreadyOpen(path.clone()),
            ContainerError::AlreadyOpen(path.clone()),
        ]);

        let err = persister
            .save_run_data(&StubModule::new("ROIs"), &SaveTarget::Direct(path.clone()))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Container(ContainerError::AlreadyOpen(_))
        ));
        assert_eq!(persister.writer().calls.get(), 2);
        assert!(!path.exists());
    }

    #[test]
    fn other_write_failures_are_not_retried() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("ROIs.frd");
        let persister = scripted(vec![io_failure(&path, "disk quota exceeded")]);

        let err = persister
            .save_run_data(&StubModule::new("ROIs"), &SaveTarget::Direct(path.clone()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Container(ContainerError::Io { .. })));
        assert_eq!(persister.writer().calls.get(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn unrecoverable_write_errors_propagate() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A directory squatting on the target path cannot be opened for writing.
        let path = temp.path().join("ROIs.frd");
        fs::create_dir(&path).expect("mkdir");

        let err = quiet(true)
            .save_run_data(&StubModule::new("ROIs"), &SaveTarget::Direct(path))
            .unwrap_err();
        assert!(matches!(err, StoreError::Container(ContainerError::Io { .. })));
    }

    #[test]
    fn save_all_writes_three_artifacts() {
        let project = TempProject::new();
        let module = StubModule::new("ROIs");

        let outcomes = quiet(true).save_all(&module, &project.config_path).expect("save all");
        assert_eq!(outcomes, [SaveOutcome::Written; 3]);
        assert!(project.data_path("ROIs").is_file());
        assert!(project.paths.run_info_path.is_file());
    }
}
