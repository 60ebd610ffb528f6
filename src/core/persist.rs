//! Store persistence
//!
//! The whole store is saved as one JSON state file (`state.json` in the data
//! directory unless configured otherwise). Unlike an export document, the state keeps
//! rule ids, id counters and list versions so a restarted store continues exactly
//! where it stopped.
//!
//! Writes are atomic (temp file + rename) and followed by a SHA-256 sidecar
//! (`state.json.sha256`). A checksum mismatch on load is logged but tolerated, since
//! the file may have been edited by hand.
//!
//! Separate processes sharing one state file hold a [`StateLock`] from load to save,
//! so each load-mutate-save cycle sees the previous cycle's result.

use super::address_set::AddressSet;
use super::nat::NatRule;
use super::ordered_list::{MAX_RULES, OrderedRuleList};
use super::policy::Policy;
use super::rule::Entry;
use crate::core::error::{Error, PersistError, Result};
use crate::utils::data_dir;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current state file format version
pub const STATE_VERSION: u32 = 1;

/// One rule list with its counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "R: Entry"))]
pub struct PersistedList<R> {
    pub next_id: u64,
    pub version: u64,
    pub rules: Vec<R>,
}

impl<R> Default for PersistedList<R> {
    fn default() -> Self {
        Self {
            next_id: 1,
            version: 0,
            rules: Vec::new(),
        }
    }
}

impl<R: Entry> PersistedList<R> {
    pub fn from_list(list: &OrderedRuleList<R>) -> Self {
        Self {
            next_id: list.next_id(),
            version: list.version(),
            rules: list.to_vec(),
        }
    }

    /// # Errors
    ///
    /// Fails if a rule lacks an id, ids repeat, or a rule is invalid.
    pub fn into_list(self) -> Result<OrderedRuleList<R>> {
        OrderedRuleList::from_parts(self.rules, self.next_id, self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub format_version: u32,
    #[serde(default)]
    pub policies: PersistedList<Policy>,
    #[serde(default)]
    pub nat: PersistedList<NatRule>,
    #[serde(default)]
    pub address_sets: Vec<AddressSet>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            format_version: STATE_VERSION,
            policies: PersistedList::default(),
            nat: PersistedList::default(),
            address_sets: Vec::new(),
        }
    }
}

/// Default state file location in the data directory.
///
/// # Errors
///
/// Fails if no data directory can be determined.
pub fn default_state_path() -> Result<PathBuf> {
    let mut path = data_dir().ok_or(PersistError::DataDirUnavailable)?;
    path.push("state.json");
    Ok(path)
}

fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".sha256");
    PathBuf::from(name)
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Exclusive advisory lock on a state file, released on drop.
///
/// The lock lives on a `.lock` sidecar because saving replaces the state file's inode.
pub struct StateLock {
    _guard: Flock<std::fs::File>,
    path: PathBuf,
}

impl StateLock {
    /// Blocks until no other holder has the lock for `state_path`.
    ///
    /// # Errors
    ///
    /// Fails if the lock file cannot be created or locked.
    pub async fn acquire(state_path: &Path) -> Result<Self> {
        use std::os::unix::fs::OpenOptionsExt;

        if let Some(parent) = state_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let path = lock_path(state_path);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .mode(0o600)
            .open(&path)?;

        let guard = tokio::task::spawn_blocking(move || Flock::lock(file, FlockArg::LockExclusive))
            .await
            .map_err(|e| Error::Internal(format!("state lock task failed: {e}")))?
            .map_err(|(_, errno)| Error::Io(std::io::Error::from(errno)))?;

        tracing::debug!("Locked {}", path.display());
        Ok(Self {
            _guard: guard,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(json: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Loads state from `path`. A missing file yields `None`.
///
/// # Errors
///
/// Fails on I/O errors, unparsable content, an unsupported format version, or a list
/// over [`MAX_RULES`].
pub async fn load_state(path: &Path) -> Result<Option<StoreState>> {
    if !tokio::fs::try_exists(path).await? {
        tracing::debug!("No state file at {}", path.display());
        return Ok(None);
    }

    let json = tokio::fs::read_to_string(path).await?;

    if let Ok(expected) = tokio::fs::read_to_string(checksum_path(path)).await {
        let actual = checksum(&json);
        if expected.trim() != actual {
            tracing::warn!(
                "State file {} checksum mismatch (expected: {}, got: {})",
                path.display(),
                expected.trim(),
                actual
            );
        }
    }

    let state: StoreState =
        serde_json::from_str(&json).map_err(|e| PersistError::Corrupted(e.to_string()))?;

    if state.format_version != STATE_VERSION {
        return Err(PersistError::VersionMismatch {
            found: state.format_version,
            expected: STATE_VERSION,
        }
        .into());
    }
    for (list, count) in [
        ("policy", state.policies.rules.len()),
        ("nat", state.nat.rules.len()),
    ] {
        if count > MAX_RULES {
            return Err(PersistError::TooManyRules {
                list,
                count,
                max: MAX_RULES,
            }
            .into());
        }
    }

    tracing::info!(
        "Loaded state from {} ({} policies, {} nat rules, {} address sets)",
        path.display(),
        state.policies.rules.len(),
        state.nat.rules.len(),
        state.address_sets.len()
    );
    Ok(Some(state))
}

/// Saves state atomically to `path`, then writes the checksum sidecar.
///
/// # Errors
///
/// Fails on serialization or I/O errors.
pub async fn save_state(path: &Path, state: &StoreState, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(state)?
    } else {
        serde_json::to_string(state)?
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    #[cfg(unix)]
    {
        use tokio::fs::OpenOptions;
        use tokio::io::AsyncWriteExt;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&temp_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
    }

    #[cfg(not(unix))]
    {
        tokio::fs::write(&temp_path, &json).await?;
    }

    tokio::fs::rename(&temp_path, path).await?;
    tokio::fs::write(checksum_path(path), checksum(&json)).await?;

    tracing::debug!("Saved state to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::Action;
    use crate::core::rule::RuleId;
    use crate::core::store::RuleStore;
    use crate::core::test_helpers::{nat_rule, policy, seeded_store};

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_state(&dir.path().join("state.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = seeded_store();
        store.create(nat_rule(), None, None).unwrap();
        store
            .put_address_set("lan", vec!["10.0.0.0/8".into()])
            .unwrap();
        let state = store.to_state().unwrap();

        save_state(&path, &state, true).await.unwrap();
        assert!(checksum_path(&path).exists());

        let loaded = load_state(&path).await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.policies.next_id, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_state_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state(&path, &StoreState::default(), false).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state(&path, &StoreState::default(), false).await.unwrap();
        tokio::fs::write(checksum_path(&path), "deadbeef").await.unwrap();

        assert!(load_state(&path).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_corrupted_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, "{ truncated").await.unwrap();

        let err = load_state(&path).await.unwrap_err();
        assert!(matches!(err, Error::Persist(PersistError::Corrupted(_))));
    }

    #[tokio::test]
    async fn test_unknown_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, r#"{"format_version": 42}"#)
            .await
            .unwrap();

        let err = load_state(&path).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Persist(PersistError::VersionMismatch { found: 42, .. })
        ));
    }

    async fn create_and_save(path: &Path, action: Action) {
        let _lock = StateLock::acquire(path).await.unwrap();
        let store = match load_state(path).await.unwrap() {
            Some(state) => RuleStore::from_state(state).unwrap(),
            None => RuleStore::new(),
        };
        store.create(policy(action), None, None).unwrap();
        save_state(path, &store.to_state().unwrap(), false)
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_locked_writers_do_not_lose_updates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        // First writer holds the lock while the second one starts
        let first = StateLock::acquire(&path).await.unwrap();
        assert!(first.path().ends_with("state.json.lock"));
        let store = RuleStore::new();
        store.create(policy(Action::Accept), None, None).unwrap();

        let second = tokio::spawn({
            let path = path.clone();
            async move { create_and_save(&path, Action::Drop).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        save_state(&path, &store.to_state().unwrap(), false)
            .await
            .unwrap();
        drop(first);
        second.await.unwrap();

        let state = load_state(&path).await.unwrap().unwrap();
        let ids: Vec<_> = state.policies.rules.iter().map(|p| (p.id, p.action)).collect();
        assert_eq!(
            ids,
            vec![
                (Some(RuleId(1)), Action::Accept),
                (Some(RuleId(2)), Action::Drop)
            ]
        );
    }

    #[tokio::test]
    async fn test_out_of_range_id_in_state_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = StoreState::default();
        let mut rule = policy(Action::Drop);
        rule.id = Some(RuleId(u64::MAX));
        state.policies.rules.push(rule);
        save_state(&path, &state, false).await.unwrap();

        let loaded = load_state(&path).await.unwrap().unwrap();
        assert!(matches!(
            RuleStore::from_state(loaded),
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_restored_store_does_not_reuse_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = seeded_store();
        store.delete::<Policy>(RuleId(2), None).unwrap();
        save_state(&path, &store.to_state().unwrap(), false)
            .await
            .unwrap();

        let state = load_state(&path).await.unwrap().unwrap();
        let restored = RuleStore::from_state(state).unwrap();
        let created = restored.create(policy(Action::Drop), None, None).unwrap();
        assert_eq!(created.rule.id, Some(RuleId(3)));
    }
}
