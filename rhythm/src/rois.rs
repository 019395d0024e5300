//! Region-of-interest selection module.
//!
//! Produces one boolean mask per region, all with the video frame's height
//! and width. Regions come from an interactive selector, a previous run's
//! data file, explicit polygon vertices, or ready-made masks.

use std::fmt;
use std::path::PathBuf;

use ndarray::{Array2, Ix2};
use serde_json::Value;
use tracing::{debug, info};

use crate::core::module::{Module, ModuleName};
use crate::core::polygon::{Polygon, rasterize};
use crate::core::records::{DataNode, DataTree, Record};
use crate::core::types::Verbosity;
use crate::error::{StoreError, StoreResult};
use crate::io::container::{HandleRegistry, read_container};

pub const ROIS_MODULE: &str = "ROIs";

/// Key of the mask list in the run-data tree.
pub const MASKS_KEY: &str = "mask_images";

/// Captures region boundaries from a user, e.g. by clicking on an image.
pub trait PointSelector {
    /// Return one polygon per selected region, vertices as `[x, y]`.
    fn select(&mut self, image_hw: (usize, usize)) -> StoreResult<Vec<Polygon>>;
}

/// Where the regions come from.
pub enum RoiSource<'a> {
    Interactive {
        selector: &'a mut dyn PointSelector,
        image_hw: (usize, usize),
    },
    /// A data file written by a previous run of this module.
    File(PathBuf),
    Points {
        polygons: Vec<Polygon>,
        image_hw: (usize, usize),
    },
    Masks(Vec<Array2<bool>>),
}

impl RoiSource<'_> {
    fn mode(&self) -> &'static str {
        match self {
            Self::Interactive { .. } => "gui",
            Self::File(_) => "file",
            Self::Points { .. } => "points",
            Self::Masks(_) => "mask",
        }
    }
}

/// Selected regions plus the three records the persistence protocol saves.
#[derive(Debug, Clone)]
pub struct Rois {
    name: ModuleName,
    select_mode: &'static str,
    points: Option<Vec<Polygon>>,
    masks: Vec<Array2<bool>>,
    config: Record,
    run_info: Record,
    run_data: DataTree,
}

impl Rois {
    /// Resolve `source` into masks. `registry` is used to read a previous
    /// run's data file.
    pub fn new(
        source: RoiSource<'_>,
        registry: &HandleRegistry,
        verbosity: Verbosity,
    ) -> StoreResult<Self> {
        let select_mode = source.mode();
        let mut file_path = None;
        let mut example_image = false;

        let (points, masks) = match source {
            RoiSource::Interactive { selector, image_hw } => {
                if verbosity.all() {
                    info!("starting interactive region selection");
                }
                example_image = true;
                let polygons = selector.select(image_hw)?;
                let masks = masks_from_polygons(&polygons, image_hw)?;
                (Some(polygons), masks)
            }
            RoiSource::File(path) => {
                if !path.is_file() {
                    return Err(StoreError::precondition(format!(
                        "ROI file {} does not exist",
                        path.display()
                    )));
                }
                let tree = read_container(&path, registry)?;
                file_path = Some(path);
                (None, masks_from_tree(&tree)?)
            }
            RoiSource::Points { polygons, image_hw } => {
                example_image = true;
                let masks = masks_from_polygons(&polygons, image_hw)?;
                (Some(polygons), masks)
            }
            RoiSource::Masks(masks) => {
                if verbosity.all() {
                    info!("initializing regions from mask images");
                }
                (None, masks)
            }
        };
        check_masks(&masks)?;
        debug!(mode = select_mode, regions = masks.len(), "regions resolved");

        let points_value = points.as_deref().map_or(Value::Null, points_to_json);
        let mut config = Record::new();
        config.insert("select_mode".into(), select_mode.into());
        config.insert("example_image".into(), example_image.into());
        config.insert(
            "file_path".into(),
            file_path
                .as_ref()
                .map_or(Value::Null, |p| p.to_string_lossy().into_owned().into()),
        );
        config.insert("points".into(), points_value.clone());
        config.insert("mask_images".into(), true.into());
        config.insert("verbose".into(), u8::from(verbosity).into());

        let mut run_info = Record::new();
        run_info.insert("points".into(), points_value);

        let mut run_data = DataTree::new();
        run_data.insert(
            MASKS_KEY,
            DataNode::List(masks.iter().cloned().map(DataNode::from).collect()),
        );

        Ok(Self {
            name: ModuleName::new(ROIS_MODULE)?,
            select_mode,
            points,
            masks,
            config,
            run_info,
            run_data,
        })
    }

    pub fn masks(&self) -> &[Array2<bool>] {
        &self.masks
    }

    pub fn points(&self) -> Option<&[Polygon]> {
        self.points.as_deref()
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Array2<bool>> {
        self.masks.iter()
    }

    /// Frame `(height, width)` shared by every mask.
    pub fn image_hw(&self) -> (usize, usize) {
        self.masks[0].dim()
    }
}

impl Module for Rois {
    fn name(&self) -> &ModuleName {
        &self.name
    }

    fn config(&self) -> Option<&Record> {
        Some(&self.config)
    }

    fn run_info(&self) -> Option<&Record> {
        Some(&self.run_info)
    }

    fn run_data(&self) -> Option<&DataTree> {
        Some(&self.run_data)
    }
}

impl fmt::Display for Rois {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ROIs. Select mode: {}. Number of ROIs: {}.",
            self.select_mode,
            self.masks.len()
        )
    }
}

impl<'a> IntoIterator for &'a Rois {
    type Item = &'a Array2<bool>;
    type IntoIter = std::slice::Iter<'a, Array2<bool>>;

    fn into_iter(self) -> Self::IntoIter {
        self.masks.iter()
    }
}

fn masks_from_polygons(
    polygons: &[Polygon],
    (height, width): (usize, usize),
) -> StoreResult<Vec<Array2<bool>>> {
    if height == 0 || width == 0 {
        return Err(StoreError::precondition(format!(
            "image size must be non-zero (got {height}x{width})"
        )));
    }
    polygons
        .iter()
        .enumerate()
        .map(|(idx, polygon)| {
            if polygon.len() < 3 {
                return Err(StoreError::precondition(format!(
                    "region {idx} needs at least 3 vertices (got {})",
                    polygon.len()
                )));
            }
            if polygon.iter().flatten().any(|v| !v.is_finite()) {
                return Err(StoreError::precondition(format!(
                    "region {idx} has a non-finite vertex"
                )));
            }
            Ok(rasterize(polygon, height, width))
        })
        .collect()
}

fn masks_from_tree(tree: &DataTree) -> StoreResult<Vec<Array2<bool>>> {
    let items = tree
        .get(MASKS_KEY)
        .and_then(DataNode::as_list)
        .ok_or_else(|| {
            StoreError::precondition(format!("'{MASKS_KEY}' list not found in ROI file"))
        })?;
    items
        .iter()
        .enumerate()
        .map(|(idx, node)| {
            node.as_array()
                .and_then(|array| array.as_bool())
                .and_then(|array| array.clone().into_dimensionality::<Ix2>().ok())
                .ok_or_else(|| {
                    StoreError::precondition(format!(
                        "'{MASKS_KEY}[{idx}]' must be a 2-D bool array"
                    ))
                })
        })
        .collect()
}

fn check_masks(masks: &[Array2<bool>]) -> StoreResult<()> {
    let Some(first) = masks.first() else {
        return Err(StoreError::precondition("at least one region is required"));
    };
    if let Some((idx, mask)) = masks.iter().enumerate().find(|(_, m)| m.dim() != first.dim()) {
        return Err(StoreError::precondition(format!(
            "mask {idx} has shape {:?}, expected {:?}",
            mask.dim(),
            first.dim()
        )));
    }
    Ok(())
}

fn points_to_json(polygons: &[Polygon]) -> Value {
    polygons
        .iter()
        .map(|polygon| {
            polygon
                .iter()
                .map(|[x, y]| Value::from(vec![*x, *y]))
                .collect::<Value>()
        })
        .collect()
}
