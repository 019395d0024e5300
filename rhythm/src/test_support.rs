//! Test-only fixtures: stub modules and throwaway projects.

use std::path::PathBuf;

use ndarray::{Array1, Array2};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::module::{Module, ModuleName};
use crate::core::records::{DataNode, DataTree, Record};
use crate::core::target::derived_data_path;
use crate::io::init::{InitOptions, ProjectPaths, init_project};

/// A module with fixed records, built field by field.
#[derive(Debug, Clone)]
pub struct StubModule {
    name: ModuleName,
    config: Option<Record>,
    run_info: Option<Record>,
    run_data: Option<DataTree>,
}

impl StubModule {
    /// A module with a small record of each kind.
    pub fn new(name: &str) -> Self {
        let mut config = Record::new();
        config.insert("alpha".to_string(), Value::from(1));
        let mut run_info = Record::new();
        run_info.insert("frames".to_string(), Value::from(10));
        let mut run_data = DataTree::new();
        run_data.insert("trace", Array1::from(vec![0.5_f64, 1.5, 2.5, 3.5, 4.5]));
        Self {
            name: ModuleName::new(name).expect("valid module name"),
            config: Some(config),
            run_info: Some(run_info),
            run_data: Some(run_data),
        }
    }

    pub fn without_config(mut self) -> Self {
        self.config = None;
        self
    }

    pub fn without_run_info(mut self) -> Self {
        self.run_info = None;
        self
    }

    pub fn without_run_data(mut self) -> Self {
        self.run_data = None;
        self
    }

    pub fn with_config_field(mut self, key: &str, value: Value) -> Self {
        self.config
            .get_or_insert_with(Record::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn with_run_info_field(mut self, key: &str, value: Value) -> Self {
        self.run_info
            .get_or_insert_with(Record::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn with_run_data_entry(mut self, key: &str, node: impl Into<DataNode>) -> Self {
        self.run_data
            .get_or_insert_with(DataTree::new)
            .insert(key, node);
        self
    }

    pub fn config_record(&self) -> Record {
        self.config.clone().expect("config record set")
    }

    pub fn run_info_record(&self) -> Record {
        self.run_info.clone().expect("run info record set")
    }

    pub fn run_data_tree(&self) -> DataTree {
        self.run_data.clone().expect("run data set")
    }
}

impl Module for StubModule {
    fn name(&self) -> &ModuleName {
        &self.name
    }

    fn config(&self) -> Option<&Record> {
        self.config.as_ref()
    }

    fn run_info(&self) -> Option<&Record> {
        self.run_info.as_ref()
    }

    fn run_data(&self) -> Option<&DataTree> {
        self.run_data.as_ref()
    }
}

/// An initialized project in a temp directory, removed on drop.
pub struct TempProject {
    pub paths: ProjectPaths,
    pub config_path: PathBuf,
    _dir: TempDir,
}

impl TempProject {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = InitOptions {
            force: false,
            run_name: Some("test".to_string()),
        };
        let paths = init_project(dir.path(), &options).expect("init project");
        Self {
            config_path: paths.config_path.clone(),
            paths,
            _dir: dir,
        }
    }

    /// Where run data of module `name` lands when addressed via the config.
    pub fn data_path(&self, name: &str) -> PathBuf {
        let name = ModuleName::new(name).expect("valid module name");
        derived_data_path(&self.paths.root, &name)
    }
}

impl Default for TempProject {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` deterministic `height x width` masks; mask `i` marks column `i`.
pub fn mask_arrays(count: usize, height: usize, width: usize) -> Vec<Array2<bool>> {
    (0..count)
        .map(|idx| Array2::from_shape_fn((height, width), |(_, col)| col == idx % width.max(1)))
        .collect()
}

/// [`mask_arrays`] as a run-data list node.
pub fn bool_masks(count: usize, height: usize, width: usize) -> DataNode {
    DataNode::List(
        mask_arrays(count, height, width)
            .into_iter()
            .map(DataNode::from)
            .collect(),
    )
}
