//! # Checkpoint Store
//!
//! Durable snapshots of every trainable variable, one safetensors file per
//! global step, plus a small JSON index naming the latest and retained
//! steps. Files are written beside their destination, verified, then
//! renamed, so a reader never observes a partial checkpoint.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Index file inside the output directory.
pub const CHECKPOINT_INDEX: &str = "checkpoint.json";

/// Contents of [`CHECKPOINT_INDEX`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointIndex {
    pub latest_step: Option<usize>,
    /// Retained steps, oldest first.
    pub steps: Vec<usize>,
}

/// A checkpoint on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub step: usize,
    pub path: PathBuf,
}

pub struct CheckpointStore {
    dir: PathBuf,
    keep_max: usize,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>, keep_max: usize) -> Self {
        Self {
            dir: dir.into(),
            keep_max: keep_max.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `model.ckpt-<step>.safetensors` inside the store directory.
    pub fn checkpoint_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("model.ckpt-{step}.safetensors"))
    }

    /// The current index; empty when nothing has been saved yet.
    pub fn index(&self) -> Result<CheckpointIndex> {
        let path = self.dir.join(CHECKPOINT_INDEX);
        if !path.exists() {
            return Ok(CheckpointIndex::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("corrupt checkpoint index {}", path.display()))
    }

    /// Most recent checkpoint, if any.
    pub fn latest(&self) -> Result<Option<Checkpoint>> {
        let Some(step) = self.index()?.latest_step else {
            return Ok(None);
        };
        let path = self.checkpoint_path(step);
        if !path.is_file() {
            bail!(
                "checkpoint index names step {step} but {} is missing",
                path.display()
            );
        }
        Ok(Some(Checkpoint { step, path }))
    }

    /// Persist every variable of `varmap` as the checkpoint for `step`.
    ///
    /// `step` may repeat the latest saved step but never precede it.
    pub fn save(&self, varmap: &VarMap, step: usize) -> Result<Checkpoint> {
        let mut index = self.index()?;
        if let Some(latest) = index.latest_step.filter(|&latest| step < latest) {
            bail!("cannot save step {step}: {} already holds step {latest}", self.dir.display());
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let tensors: HashMap<String, Tensor> = {
            let vars = varmap
                .data()
                .lock()
                .map_err(|_| anyhow!("variable map lock poisoned"))?;
            vars.iter()
                .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
                .collect()
        };

        let path = self.checkpoint_path(step);
        let tmp = tmp_path(&path);
        let written = candle_core::safetensors::save(&tensors, &tmp)
            .with_context(|| format!("failed to write {}", tmp.display()))
            .and_then(|()| verify_checkpoint(&tmp, tensors.len()))
            .and_then(|()| {
                std::fs::rename(&tmp, &path)
                    .with_context(|| format!("failed to move checkpoint into {}", path.display()))
            });
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        if !index.steps.contains(&step) {
            index.steps.push(step);
        }
        index.steps.sort_unstable();
        index.latest_step = Some(step);

        let excess = index.steps.len().saturating_sub(self.keep_max);
        let dropped: Vec<usize> = index.steps.drain(..excess).collect();
        self.write_index(&index)?;

        for old in dropped {
            let old_path = self.checkpoint_path(old);
            if old_path.exists() {
                std::fs::remove_file(&old_path)
                    .with_context(|| format!("failed to remove {}", old_path.display()))?;
                debug!("Removed old checkpoint {}", old_path.display());
            }
        }

        info!("Saving checkpoints for {step} into {}", path.display());
        Ok(Checkpoint { step, path })
    }

    /// Overwrite every variable of `varmap` from `checkpoint`.
    ///
    /// The checkpoint must hold a tensor for each variable.
    pub fn restore(&self, varmap: &VarMap, checkpoint: &Checkpoint, device: &Device) -> Result<usize> {
        let saved = candle_core::safetensors::load(&checkpoint.path, device)
            .with_context(|| format!("failed to read {}", checkpoint.path.display()))?;
        let vars = varmap
            .data()
            .lock()
            .map_err(|_| anyhow!("variable map lock poisoned"))?;

        let mut missing: Vec<&str> = vars
            .keys()
            .filter(|name| !saved.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            missing.sort_unstable();
            bail!(
                "checkpoint {} lacks {} variables: {}",
                checkpoint.path.display(),
                missing.len(),
                missing.join(", ")
            );
        }

        for (name, var) in vars.iter() {
            if let Some(tensor) = saved.get(name) {
                var.set(&tensor.to_dtype(var.dtype())?)
                    .with_context(|| format!("checkpoint tensor {name} does not fit"))?;
            }
        }

        info!(
            "Restored {} variables from {} (step {})",
            vars.len(),
            checkpoint.path.display(),
            checkpoint.step
        );
        Ok(vars.len())
    }

    fn write_index(&self, index: &CheckpointIndex) -> Result<()> {
        let path = self.dir.join(CHECKPOINT_INDEX);
        let tmp = tmp_path(&path);
        let written = std::fs::write(&tmp, serde_json::to_string_pretty(index)?)
            .with_context(|| format!("failed to write {}", tmp.display()))
            .and_then(|()| {
                std::fs::rename(&tmp, &path)
                    .with_context(|| format!("failed to move index into {}", path.display()))
            });
        if written.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        written
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Re-read a freshly written file and confirm it parses with the expected
/// tensor count.
fn verify_checkpoint(path: &Path, expected: usize) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed = safetensors::SafeTensors::deserialize(&bytes)
        .map_err(|e| anyhow!("checkpoint {} is unreadable: {e}", path.display()))?;
    let found = parsed.names().len();
    if found != expected {
        bail!(
            "checkpoint {} holds {found} tensors, expected {expected}",
            path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{Init, VarBuilder};

    fn varmap_with(values: &[f32]) -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        vb.get_with_hints(values.len(), "output_bias", Init::Const(0.0)).unwrap();
        vb.get_with_hints((2, 2), "bert.pooler.dense.weight", Init::Const(1.0))
            .unwrap();
        varmap.data().lock().unwrap()["output_bias"]
            .set(&Tensor::new(values, &Device::Cpu).unwrap())
            .unwrap();
        varmap
    }

    fn bias(varmap: &VarMap) -> Vec<f32> {
        varmap.data().lock().unwrap()["output_bias"]
            .as_tensor()
            .to_vec1()
            .unwrap()
    }

    #[test]
    fn empty_store_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 5);
        assert_eq!(store.index().unwrap(), CheckpointIndex::default());
        assert!(store.latest().unwrap().is_none());
    }

    #[test]
    fn save_then_restore_round_trips_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 5);
        let source = varmap_with(&[0.5, -1.0, 2.0, 0.25]);

        let saved = store.save(&source, 300).unwrap();
        assert_eq!(saved.path, dir.path().join("model.ckpt-300.safetensors"));
        assert!(!tmp_path(&saved.path).exists());
        assert!(!dir.path().join("checkpoint.json.tmp").exists());

        let target = varmap_with(&[0.0; 4]);
        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest, saved);
        assert_eq!(store.restore(&target, &latest, &Device::Cpu).unwrap(), 2);
        assert_eq!(bias(&target), vec![0.5, -1.0, 2.0, 0.25]);
    }

    #[test]
    fn retains_only_newest_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 2);
        let varmap = varmap_with(&[1.0; 4]);

        for step in [100, 200, 300] {
            store.save(&varmap, step).unwrap();
        }

        let index = store.index().unwrap();
        assert_eq!(index.latest_step, Some(300));
        assert_eq!(index.steps, vec![200, 300]);
        assert!(!store.checkpoint_path(100).exists());
        assert!(store.checkpoint_path(200).exists());
    }

    #[test]
    fn resaving_a_step_does_not_duplicate_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 5);
        let varmap = varmap_with(&[1.0; 4]);
        store.save(&varmap, 0).unwrap();
        store.save(&varmap, 0).unwrap();
        assert_eq!(store.index().unwrap().steps, vec![0]);
    }

    #[test]
    fn restore_rejects_checkpoint_missing_variables() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 5);

        let partial = VarMap::new();
        VarBuilder::from_varmap(&partial, DType::F32, &Device::Cpu)
            .get_with_hints(4, "output_bias", Init::Const(0.0))
            .unwrap();
        let checkpoint = store.save(&partial, 10).unwrap();

        let full = varmap_with(&[0.0; 4]);
        let err = store.restore(&full, &checkpoint, &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("bert.pooler.dense.weight"));
    }

    #[test]
    fn verification_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.safetensors");
        std::fs::write(&path, b"not a safetensors file").unwrap();
        assert!(verify_checkpoint(&path, 1).is_err());
    }

    #[test]
    fn dangling_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CHECKPOINT_INDEX),
            r#"{"latest_step": 42, "steps": [42]}"#,
        )
        .unwrap();
        let store = CheckpointStore::new(dir.path(), 5);
        assert!(store.latest().is_err());
    }

    #[test]
    fn refuses_steps_older_than_latest() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 2);
        let varmap = varmap_with(&[1.0; 4]);
        store.save(&varmap, 300).unwrap();
        store.save(&varmap, 400).unwrap();

        let err = store.save(&varmap, 100).unwrap_err();
        assert!(err.to_string().contains("cannot save step 100"));
        assert!(!store.checkpoint_path(100).exists());

        let index = store.index().unwrap();
        assert_eq!(index.latest_step, Some(400));
        assert_eq!(index.steps, vec![300, 400]);
        assert_eq!(store.latest().unwrap().unwrap().step, 400);
    }

    #[test]
    fn failed_save_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), 5);
        // A non-empty directory where the checkpoint belongs blocks the rename.
        let blocked = store.checkpoint_path(7);
        std::fs::create_dir_all(blocked.join("occupied")).unwrap();

        assert!(store.save(&varmap_with(&[1.0; 4]), 7).is_err());
        assert!(!tmp_path(&blocked).exists());
        assert_eq!(store.index().unwrap(), CheckpointIndex::default());
    }
}
