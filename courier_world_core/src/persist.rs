//! Saving and loading learned tables and reward histories as JSON.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::{ConfigError, EnvConfig},
    diagnostics::RewardHistory,
    q_table::QTable,
};

/// Bumped whenever the on-disk layout of [`PolicyFile`] changes.
pub const POLICY_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported policy format version {found} (expected {expected})")]
    Version { expected: u32, found: u32 },
    #[error("policy holds {found} tables but the environment has {expected} agents")]
    AgentCountMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Learned tables together with the environment they were trained in.
/// State keys depend on the grid size, so the two travel together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyFile {
    pub version: u32,
    pub env: EnvConfig,
    /// Table of agent `i` at index `i`.
    pub tables: Vec<QTable>,
}

impl PolicyFile {
    pub fn new(env: EnvConfig, tables: Vec<QTable>) -> Self {
        PolicyFile {
            version: POLICY_FORMAT_VERSION,
            env,
            tables,
        }
    }

    /// Checks the version, the stored environment and the table count.
    pub fn validate(&self) -> Result<(), PersistError> {
        if self.version != POLICY_FORMAT_VERSION {
            return Err(PersistError::Version {
                expected: POLICY_FORMAT_VERSION,
                found: self.version,
            });
        }
        self.env.validate()?;
        if self.tables.len() != self.env.num_agents {
            return Err(PersistError::AgentCountMismatch {
                expected: self.env.num_agents,
                found: self.tables.len(),
            });
        }
        Ok(())
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistError> {
        write_json(path, self)
    }

    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let file = File::open(path)?;
        let policy: PolicyFile = serde_json::from_reader(BufReader::new(file))?;
        policy.validate()?;
        Ok(policy)
    }
}

/// Writes the sampled reward history for plotting.
pub fn write_history<P: AsRef<Path>>(path: P, history: &RewardHistory) -> Result<(), PersistError> {
    write_json(path, history)
}

pub fn read_history<P: AsRef<Path>>(path: P) -> Result<RewardHistory, PersistError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<(), PersistError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{config::PackageMode, state_key::StateKey};

    fn sample_policy() -> PolicyFile {
        let mut first = QTable::new();
        first.insert(StateKey(17), [0.1, -2.5, 1.0 / 3.0, 0.0, 1e-9, 1234.5678]);
        first.insert(StateKey(3_999), [-1.0; 6]);
        let mut second = QTable::new();
        second.insert(StateKey(42), [0.0, 0.0, 7.0, 0.0, 0.0, 0.0]);
        PolicyFile::new(
            EnvConfig::new(2, 6, 3).with_package_mode(PackageMode::PerAgent),
            vec![first, second],
        )
    }

    #[test]
    fn policy_survives_a_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let policy = sample_policy();

        policy.write_to_file(&path).unwrap();
        let loaded = PolicyFile::read_from_file(&path).unwrap();
        assert_eq!(loaded, policy);
    }

    #[test]
    fn mismatched_table_count_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let mut policy = sample_policy();
        policy.tables.pop();

        policy.write_to_file(&path).unwrap();
        assert!(matches!(
            PolicyFile::read_from_file(&path),
            Err(PersistError::AgentCountMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut policy = sample_policy();
        policy.version = 99;
        assert!(matches!(
            policy.validate(),
            Err(PersistError::Version { found: 99, .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            PolicyFile::read_from_file(dir.path().join("absent.json")),
            Err(PersistError::Io(_))
        ));
    }

    #[test]
    fn history_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rewards.json");
        let mut history = RewardHistory::new(2, 10);
        history.record(0, &[-3.0, 12.5]);
        history.record(10, &[4.0, 8.0]);

        write_history(&path, &history).unwrap();
        assert_eq!(read_history(&path).unwrap(), history);
    }
}
