//! Append-only stage history of one physical system.
//!
//! Each record carries the digest of the snapshot it consumed and of the
//! snapshot it produced. [`RunHistory::append`] only accepts a record whose
//! input digest matches the previous record's output digest, so the history
//! always forms an unbroken chain.

use chrono::{DateTime, Utc};
use mdflow_core::{MdError, Result, StageName, StructureProvider};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Result of one executed stage. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord<S> {
    stage: StageName,
    log: String,
    snapshot: S,
    trajectory: Option<PathBuf>,
    /// Absent for the externally supplied initial snapshot
    input_digest: Option<String>,
    output_digest: String,
    created_at: DateTime<Utc>,
}

impl<S: StructureProvider> StageRecord<S> {
    pub fn new(
        stage: StageName,
        log: String,
        snapshot: S,
        trajectory: Option<PathBuf>,
        input_digest: Option<String>,
    ) -> Result<Self> {
        let output_digest = snapshot.digest()?;
        Ok(Self {
            stage,
            log,
            snapshot,
            trajectory,
            input_digest,
            output_digest,
            created_at: Utc::now(),
        })
    }

    /// Bookend record for an externally prepared system.
    pub fn setup(snapshot: S) -> Result<Self> {
        Self::new(StageName::Setup, String::new(), snapshot, None, None)
    }

    /// Consumes the record, yielding its snapshot.
    pub fn into_snapshot(self) -> S {
        self.snapshot
    }
}

impl<S> StageRecord<S> {
    pub fn stage(&self) -> StageName {
        self.stage
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn snapshot(&self) -> &S {
        &self.snapshot
    }

    pub fn trajectory(&self) -> Option<&Path> {
        self.trajectory.as_deref()
    }

    pub fn input_digest(&self) -> Option<&str> {
        self.input_digest.as_deref()
    }

    pub fn output_digest(&self) -> &str {
        &self.output_digest
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Ordered stage records, insertion order = execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistory<S> {
    records: Vec<StageRecord<S>>,
}

impl<S> Default for RunHistory<S> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<S> RunHistory<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StageRecord<S>] {
        &self.records
    }

    pub fn last(&self) -> Option<&StageRecord<S>> {
        self.records.last()
    }

    /// Snapshot the next stage must consume.
    pub fn latest_snapshot(&self) -> Option<&S> {
        self.last().map(StageRecord::snapshot)
    }

    /// Appends `record` if it continues the chain.
    pub fn append(&mut self, record: StageRecord<S>) -> Result<()> {
        if let Some(last) = self.records.last() {
            if record.input_digest() != Some(last.output_digest()) {
                return Err(MdError::validation(format!(
                    "{} record does not consume the snapshot produced by {} (expected input {}, got {})",
                    record.stage,
                    last.stage,
                    last.output_digest,
                    record.input_digest.as_deref().unwrap_or("none")
                )));
            }
        }
        log::debug!("Appended {} record ({} total)", record.stage, self.records.len() + 1);
        self.records.push(record);
        Ok(())
    }

    fn verify_chain(&self) -> Result<()> {
        for pair in self.records.windows(2) {
            if pair[1].input_digest() != Some(pair[0].output_digest()) {
                return Err(MdError::validation(format!(
                    "broken run history between {} and {}",
                    pair[0].stage, pair[1].stage
                )));
            }
        }
        Ok(())
    }
}

impl<S: StructureProvider + Serialize + DeserializeOwned> RunHistory<S> {
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Loads a history and re-checks the digest chain, including each
    /// record's output digest against its stored snapshot.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let history: Self = serde_json::from_slice(&data)?;
        history.verify_chain()?;
        for record in &history.records {
            if record.snapshot.digest()? != record.output_digest {
                return Err(MdError::validation(format!(
                    "{} record snapshot does not match its digest",
                    record.stage
                )));
            }
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdflow_core::{
        AtomParameters, BoxVectors, Molecule, MoleculeAtom, ParametrizedStructure, SystemSnapshot,
    };

    fn snapshot() -> SystemSnapshot {
        SystemSnapshot::new(
            Molecule {
                title: "argon".into(),
                atoms: vec![MoleculeAtom {
                    name: "AR".into(),
                    element: 18,
                    residue_name: "AR".into(),
                    residue_number: 1,
                }],
                bonds: vec![],
                coords: vec![[1.0, 1.0, 1.0]],
            },
            ParametrizedStructure {
                atoms: vec![AtomParameters { mass: 39.948, charge: 0.0, sigma: 0.34, epsilon: 0.99 }],
                bonds: vec![],
                positions: vec![[0.1, 0.1, 0.1]],
                velocities: None,
                box_vectors: Some(BoxVectors::orthorhombic(1.0, 1.0, 1.0)),
            },
        )
        .unwrap()
    }

    fn next_record(history: &RunHistory<SystemSnapshot>, stage: StageName) -> StageRecord<SystemSnapshot> {
        let last = history.last().unwrap();
        let moved = last
            .snapshot()
            .with_state(vec![[0.2, 0.1, 0.1]], Some(vec![[0.0; 3]]), None)
            .unwrap();
        StageRecord::new(stage, "ok".into(), moved, None, Some(last.output_digest().to_string())).unwrap()
    }

    #[test]
    fn test_empty_history_is_valid() {
        let history: RunHistory<SystemSnapshot> = RunHistory::new();
        assert!(history.is_empty());
        assert!(history.latest_snapshot().is_none());
    }

    #[test]
    fn test_chain_is_enforced() {
        let mut history = RunHistory::new();
        history.append(StageRecord::setup(snapshot()).unwrap()).unwrap();
        let good = next_record(&history, StageName::Minimization);
        history.append(good).unwrap();

        let stale = StageRecord::new(StageName::Nvt, String::new(), snapshot(), None, None).unwrap();
        assert!(history.append(stale).is_err());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = RunHistory::new();
        history.append(StageRecord::setup(snapshot()).unwrap()).unwrap();
        let rec = next_record(&history, StageName::Minimization);
        history.append(rec).unwrap();
        history.save(&path).unwrap();

        let loaded: RunHistory<SystemSnapshot> = RunHistory::load(&path).unwrap();
        assert_eq!(loaded, history);
        assert_eq!(loaded.records()[1].stage(), StageName::Minimization);
    }

    #[test]
    fn test_load_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = RunHistory::new();
        history.append(StageRecord::setup(snapshot()).unwrap()).unwrap();
        history.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap().replace("\"AR\"", "\"XE\"");
        std::fs::write(&path, text).unwrap();
        assert!(RunHistory::<SystemSnapshot>::load(&path).is_err());
    }
}
