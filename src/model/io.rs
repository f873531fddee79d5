//! Model artifact persistence
//!
//! A saved model is two files sharing a stem:
//! - `<stem>.bin`: bincode snapshot of every named parameter tensor
//! - `<stem>_config.json`: `{scanpath_shape, mfcc_shape, num_classes}`
//!
//! Loading reads the metadata first, checks it against the stored input
//! layers, rebuilds an empty network of that shape, and fills it from the
//! snapshot. The live network is only replaced once
//! every step has succeeded.

use super::temporal::sequence_kernel_shape;
use super::visual::hidden_kernel_shape;
use super::{EngagementModel, HybridNetwork, ModelConfig};
use crate::error::EngageError;
use crate::nn::Module;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Shape expectations stored next to the parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub scanpath_shape: [usize; 3],
    pub mfcc_shape: [usize; 2],
    pub num_classes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ParameterSnapshot {
    parameters: BTreeMap<String, StoredTensor>,
}

/// Parameter whose shape carries the embedding width
const EMBEDDING_WIDTH_PARAM: &str = "visual::dense2::bias";

/// `(<stem>.bin, <stem>_config.json)`
pub fn artifact_paths(stem: impl AsRef<Path>) -> (PathBuf, PathBuf) {
    let stem = stem.as_ref().as_os_str();
    let mut weights = stem.to_owned();
    weights.push(".bin");
    let mut metadata = stem.to_owned();
    metadata.push("_config.json");
    (PathBuf::from(weights), PathBuf::from(metadata))
}

fn snapshot_of(network: &HybridNetwork) -> ParameterSnapshot {
    let mut snapshot = ParameterSnapshot::default();
    network.visit_parameters(&mut |p| {
        snapshot.parameters.insert(
            p.name().to_string(),
            StoredTensor {
                shape: p.shape().to_vec(),
                data: p.data().to_vec(),
            },
        );
    });
    snapshot
}

fn read_metadata(path: &Path) -> Result<ModelMetadata, EngageError> {
    let file = File::open(path).map_err(|e| EngageError::model_load(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| EngageError::model_load(path, e))
}

fn read_snapshot(path: &Path) -> Result<ParameterSnapshot, EngageError> {
    let file = File::open(path).map_err(|e| EngageError::model_load(path, e))?;
    bincode::deserialize_from(BufReader::new(file)).map_err(|e| EngageError::model_load(path, e))
}

/// Input-facing parameters whose shapes follow from the metadata
fn expected_input_shapes(metadata: &ModelMetadata) -> Option<[(&'static str, [usize; 2]); 2]> {
    Some([
        (
            "visual::dense1::kernel",
            hidden_kernel_shape(metadata.scanpath_shape[0])?,
        ),
        (
            "temporal::lstm1::kernel",
            sequence_kernel_shape(metadata.mfcc_shape[1])?,
        ),
    ])
}

/// Reject metadata that disagrees with the stored weights before any
/// network of that shape is allocated
fn check_metadata(
    metadata: &ModelMetadata,
    snapshot: &ParameterSnapshot,
    weights_path: &Path,
) -> Result<(), EngageError> {
    let expected = expected_input_shapes(metadata).ok_or_else(|| {
        EngageError::model_load(
            weights_path,
            format!("metadata shape {:?} overflows", metadata.scanpath_shape),
        )
    })?;
    for (name, shape) in expected {
        let stored = snapshot.parameters.get(name).ok_or_else(|| {
            EngageError::model_load(weights_path, format!("missing parameter {name}"))
        })?;
        if stored.shape != shape {
            return Err(EngageError::model_load(
                weights_path,
                format!(
                    "metadata implies {name} of shape {shape:?}, weights store {:?}",
                    stored.shape
                ),
            ));
        }
    }
    Ok(())
}

fn restore(
    base: &ModelConfig,
    metadata: ModelMetadata,
    mut snapshot: ParameterSnapshot,
    weights_path: &Path,
) -> Result<(ModelConfig, HybridNetwork), EngageError> {
    check_metadata(&metadata, &snapshot, weights_path)?;

    let embedding_dim = snapshot
        .parameters
        .get(EMBEDDING_WIDTH_PARAM)
        .and_then(|t| t.shape.first().copied())
        .ok_or_else(|| {
            EngageError::model_load(weights_path, format!("missing parameter {EMBEDDING_WIDTH_PARAM}"))
        })?;

    let config = ModelConfig {
        scanpath_shape: metadata.scanpath_shape,
        mfcc_shape: metadata.mfcc_shape,
        num_classes: metadata.num_classes,
        embedding_dim,
        ..base.clone()
    };
    let mut network =
        HybridNetwork::new(&config).map_err(|e| EngageError::model_load(weights_path, e))?;

    let mut failure: Option<EngageError> = None;
    let mut restored = 0usize;
    network.visit_parameters_mut(&mut |p| {
        if failure.is_some() {
            return;
        }
        match snapshot.parameters.remove(p.name()) {
            Some(stored) => match p.assign(&stored.shape, &stored.data) {
                Ok(()) => restored += 1,
                Err(e) => failure = Some(EngageError::model_load(weights_path, e)),
            },
            None => {
                failure = Some(EngageError::model_load(
                    weights_path,
                    format!("missing parameter {}", p.name()),
                ))
            }
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    if let Some(extra) = snapshot.parameters.keys().next() {
        return Err(EngageError::model_load(
            weights_path,
            format!("unexpected parameter {extra}"),
        ));
    }

    info!(parameters = restored, embedding_dim, "parameters restored");
    Ok((config, network))
}

impl EngagementModel {
    /// Write `<stem>.bin` and `<stem>_config.json`
    pub fn save(&self, stem: impl AsRef<Path>) -> Result<(), EngageError> {
        let network = self.network()?;
        let (weights_path, metadata_path) = artifact_paths(&stem);

        let writer = BufWriter::new(File::create(&weights_path)?);
        bincode::serialize_into(writer, &snapshot_of(network))
            .map_err(|e| EngageError::EncodingError(e.to_string()))?;

        let writer = BufWriter::new(File::create(&metadata_path)?);
        serde_json::to_writer_pretty(writer, &self.config.metadata())?;

        info!(
            weights = %weights_path.display(),
            metadata = %metadata_path.display(),
            "model saved"
        );
        Ok(())
    }

    /// Replace the weights with a saved artifact.
    ///
    /// On any failure the error is returned and the current state (built or
    /// not) is left exactly as it was.
    pub fn load(&mut self, stem: impl AsRef<Path>) -> Result<(), EngageError> {
        let (weights_path, metadata_path) = artifact_paths(&stem);
        let outcome = read_metadata(&metadata_path).and_then(|metadata| {
            let snapshot = read_snapshot(&weights_path)?;
            restore(&self.config, metadata, snapshot, &weights_path)
        });

        match outcome {
            Ok((config, network)) => {
                self.install(config, network);
                info!(stem = %stem.as_ref().display(), "model loaded");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "model load failed, keeping previous state");
                Err(err)
            }
        }
    }

    /// Build an unbuilt model from a saved artifact
    pub fn from_artifact(stem: impl AsRef<Path>) -> Result<Self, EngageError> {
        let mut model = Self::default();
        model.load(stem)?;
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NormalizedSequence, ScanpathTensor};
    use tempfile::tempdir;

    fn small_config(seed: u64) -> ModelConfig {
        ModelConfig {
            scanpath_shape: [8, 8, 3],
            mfcc_shape: [5, 3],
            embedding_dim: 8,
            seed,
            ..ModelConfig::default()
        }
    }

    fn attention_readout(model: &EngagementModel) -> f64 {
        let scanpath = ScanpathTensor::from_vec(8, vec![0.5; 192]).unwrap();
        let sequence = NormalizedSequence::from_vec(5, 3, vec![0.25; 15]).unwrap();
        model.predict(&scanpath, &sequence).unwrap().attention_score
    }

    #[test]
    fn test_artifact_paths() {
        let (bin, json) = artifact_paths("models/hybrid");
        assert_eq!(bin, PathBuf::from("models/hybrid.bin"));
        assert_eq!(json, PathBuf::from("models/hybrid_config.json"));
    }

    #[test]
    fn test_save_then_load_restores_predictions() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("hybrid");
        let saved = EngagementModel::built(small_config(1)).unwrap();
        saved.save(&stem).unwrap();

        let mut loaded = EngagementModel::new(small_config(99));
        loaded.load(&stem).unwrap();

        assert!(loaded.is_built());
        assert_eq!(loaded.config().embedding_dim, 8);
        assert!((attention_readout(&saved) - attention_readout(&loaded)).abs() < 1e-12);

        let text = std::fs::read_to_string(dir.path().join("hybrid_config.json")).unwrap();
        let meta: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(meta["scanpath_shape"], serde_json::json!([8, 8, 3]));
        assert_eq!(meta["mfcc_shape"], serde_json::json!([5, 3]));
        assert_eq!(meta["num_classes"], 4);
    }

    #[test]
    fn test_save_unbuilt_model_fails() {
        let dir = tempdir().unwrap();
        let model = EngagementModel::new(small_config(1));
        assert!(matches!(
            model.save(dir.path().join("x")),
            Err(EngageError::ModelNotBuilt)
        ));
    }

    #[test]
    fn test_missing_artifact_leaves_model_untouched() {
        let dir = tempdir().unwrap();
        let mut model = EngagementModel::built(small_config(3)).unwrap();
        let before = attention_readout(&model);

        let err = model.load(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, EngageError::ModelLoad { .. }));
        assert!(model.is_built());
        assert_eq!(attention_readout(&model), before);

        let mut unbuilt = EngagementModel::new(small_config(3));
        assert!(unbuilt.load(dir.path().join("absent")).is_err());
        assert!(!unbuilt.is_built());
    }

    #[test]
    fn test_corrupt_weights_leave_model_untouched() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("hybrid");
        EngagementModel::built(small_config(1)).unwrap().save(&stem).unwrap();
        std::fs::write(dir.path().join("hybrid.bin"), b"not a snapshot").unwrap();

        let mut model = EngagementModel::built(small_config(7)).unwrap();
        let before = attention_readout(&model);
        assert!(model.load(&stem).is_err());
        assert_eq!(attention_readout(&model), before);
        assert_eq!(model.config().seed, 7);
    }

    #[test]
    fn test_metadata_shape_disagreeing_with_weights_fails() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("hybrid");
        EngagementModel::built(small_config(1)).unwrap().save(&stem).unwrap();
        let meta = ModelMetadata {
            scanpath_shape: [8, 8, 3],
            mfcc_shape: [5, 4],
            num_classes: 4,
        };
        std::fs::write(
            dir.path().join("hybrid_config.json"),
            serde_json::to_string(&meta).unwrap(),
        )
        .unwrap();

        let mut model = EngagementModel::new(small_config(1));
        assert!(model.load(&stem).is_err());
        assert!(!model.is_built());
    }

    #[test]
    fn test_oversized_metadata_fails_before_building() {
        let dir = tempdir().unwrap();
        let stem = dir.path().join("hybrid");
        EngagementModel::built(small_config(1)).unwrap().save(&stem).unwrap();
        std::fs::write(
            dir.path().join("hybrid_config.json"),
            r#"{"scanpath_shape":[100000,100000,3],"mfcc_shape":[5,3],"num_classes":4}"#,
        )
        .unwrap();

        let mut model = EngagementModel::built(small_config(7)).unwrap();
        let before = attention_readout(&model);
        let err = model.load(&stem).unwrap_err();
        assert!(matches!(err, EngageError::ModelLoad { .. }));
        assert!(err.to_string().contains("visual::dense1::kernel"));
        assert_eq!(attention_readout(&model), before);

        std::fs::write(
            dir.path().join("hybrid_config.json"),
            format!(
                r#"{{"scanpath_shape":[{},{},3],"mfcc_shape":[5,3],"num_classes":4}}"#,
                usize::MAX,
                usize::MAX
            ),
        )
        .unwrap();
        assert!(model.load(&stem).is_err());
        assert_eq!(model.config().seed, 7);
    }

    #[test]
    fn test_expected_input_shapes_follow_metadata() {
        let meta = ModelMetadata {
            scanpath_shape: [50, 50, 3],
            mfcc_shape: [100, 13],
            num_classes: 4,
        };
        let shapes = expected_input_shapes(&meta).unwrap();
        assert_eq!(shapes[0], ("visual::dense1::kernel", [6 * 6 * 128, 256]));
        assert_eq!(shapes[1], ("temporal::lstm1::kernel", [13, 512]));
    }
}
