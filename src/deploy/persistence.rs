//! Persistence backends for the simulated account.
//!
//! - **JSON**: one file per deployed stack plus an `account.json` index
//!   holding retained resources and snapshots
//! - **Memory**: `DashMap`s, for tests
//!
//! Both implement [`StatePersistence`].

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{RetainedResource, SnapshotRecord, StackState, StateError, StateResult};

/// Storage for deployed stacks and account-level leftovers.
pub trait StatePersistence: Send + Sync {
    /// Store the state of a stack, replacing any previous state
    fn save_stack(&self, state: &StackState) -> StateResult<()>;

    /// Load the state of a stack
    fn load_stack(&self, stack_name: &str) -> StateResult<Option<StackState>>;

    /// Forget a stack
    fn delete_stack(&self, stack_name: &str) -> StateResult<()>;

    /// Names of all deployed stacks, sorted
    fn list_stacks(&self) -> StateResult<Vec<String>>;

    /// Record a resource that outlived its stack
    fn record_retained(&self, resource: &RetainedResource) -> StateResult<()>;

    /// Resources that outlived their stacks
    fn retained_resources(&self) -> StateResult<Vec<RetainedResource>>;

    /// Record a final snapshot
    fn record_snapshot(&self, snapshot: &SnapshotRecord) -> StateResult<()>;

    /// All final snapshots
    fn snapshots(&self) -> StateResult<Vec<SnapshotRecord>>;
}

// ============================================================================
// JSON Persistence Backend
// ============================================================================

/// JSON file-based persistence backend.
pub struct JsonPersistence {
    base_dir: PathBuf,
    stacks_dir: PathBuf,
    index: Arc<RwLock<AccountIndex>>,
    write_lock: Mutex<()>,
}

/// Account-wide index kept in `account.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccountIndex {
    stacks: BTreeMap<String, StackSummary>,
    #[serde(default)]
    retained: Vec<RetainedResource>,
    #[serde(default)]
    snapshots: Vec<SnapshotRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StackSummary {
    version: u64,
    resources: usize,
    updated_at: DateTime<Utc>,
    file_path: PathBuf,
}

impl JsonPersistence {
    /// Open (or create) a state directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> StateResult<Self> {
        let base_dir = base_dir.into();
        let stacks_dir = base_dir.join("stacks");
        fs::create_dir_all(&stacks_dir)?;

        let index_path = base_dir.join("account.json");
        let index = if index_path.exists() {
            let reader = BufReader::new(File::open(&index_path)?);
            serde_json::from_reader(reader).map_err(|e| {
                StateError::Persistence(format!("corrupt index {}: {e}", index_path.display()))
            })?
        } else {
            AccountIndex::default()
        };

        Ok(Self {
            base_dir,
            stacks_dir,
            index: Arc::new(RwLock::new(index)),
            write_lock: Mutex::new(()),
        })
    }

    /// The state directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn save_index(&self) -> StateResult<()> {
        let _guard = self.write_lock.lock();
        let writer = BufWriter::new(File::create(self.base_dir.join("account.json"))?);
        serde_json::to_writer_pretty(writer, &*self.index.read())?;
        Ok(())
    }

    fn stack_path(&self, stack_name: &str) -> PathBuf {
        self.stacks_dir.join(format!("{stack_name}.json"))
    }
}

impl StatePersistence for JsonPersistence {
    fn save_stack(&self, state: &StackState) -> StateResult<()> {
        let file_path = self.stack_path(&state.stack_name);
        let writer = BufWriter::new(File::create(&file_path)?);
        serde_json::to_writer_pretty(writer, state)?;

        self.index.write().stacks.insert(
            state.stack_name.clone(),
            StackSummary {
                version: state.version,
                resources: state.resources.len(),
                updated_at: state.updated_at,
                file_path,
            },
        );
        self.save_index()
    }

    fn load_stack(&self, stack_name: &str) -> StateResult<Option<StackState>> {
        let file_path = self.stack_path(stack_name);
        if !file_path.exists() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(&file_path)?);
        Ok(Some(serde_json::from_reader(reader)?))
    }

    fn delete_stack(&self, stack_name: &str) -> StateResult<()> {
        let file_path = self.stack_path(stack_name);
        if file_path.exists() {
            fs::remove_file(&file_path)?;
        }
        self.index.write().stacks.remove(stack_name);
        self.save_index()
    }

    fn list_stacks(&self) -> StateResult<Vec<String>> {
        Ok(self.index.read().stacks.keys().cloned().collect())
    }

    fn record_retained(&self, resource: &RetainedResource) -> StateResult<()> {
        self.index.write().retained.push(resource.clone());
        self.save_index()
    }

    fn retained_resources(&self) -> StateResult<Vec<RetainedResource>> {
        Ok(self.index.read().retained.clone())
    }

    fn record_snapshot(&self, snapshot: &SnapshotRecord) -> StateResult<()> {
        self.index.write().snapshots.push(snapshot.clone());
        self.save_index()
    }

    fn snapshots(&self) -> StateResult<Vec<SnapshotRecord>> {
        Ok(self.index.read().snapshots.clone())
    }
}

// ============================================================================
// Memory Persistence Backend
// ============================================================================

/// In-memory persistence backend for testing.
#[derive(Clone)]
pub struct MemoryPersistence {
    stacks: Arc<DashMap<String, StackState>>,
    retained: Arc<RwLock<Vec<RetainedResource>>>,
    snapshots: Arc<RwLock<Vec<SnapshotRecord>>>,
}

impl MemoryPersistence {
    /// Create a new in-memory persistence backend
    pub fn new() -> Self {
        Self {
            stacks: Arc::new(DashMap::new()),
            retained: Arc::new(RwLock::new(Vec::new())),
            snapshots: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for MemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl StatePersistence for MemoryPersistence {
    fn save_stack(&self, state: &StackState) -> StateResult<()> {
        self.stacks.insert(state.stack_name.clone(), state.clone());
        Ok(())
    }

    fn load_stack(&self, stack_name: &str) -> StateResult<Option<StackState>> {
        Ok(self.stacks.get(stack_name).map(|r| r.value().clone()))
    }

    fn delete_stack(&self, stack_name: &str) -> StateResult<()> {
        self.stacks.remove(stack_name);
        Ok(())
    }

    fn list_stacks(&self) -> StateResult<Vec<String>> {
        let mut names: Vec<String> = self.stacks.iter().map(|r| r.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    fn record_retained(&self, resource: &RetainedResource) -> StateResult<()> {
        self.retained.write().push(resource.clone());
        Ok(())
    }

    fn retained_resources(&self) -> StateResult<Vec<RetainedResource>> {
        Ok(self.retained.read().clone())
    }

    fn record_snapshot(&self, snapshot: &SnapshotRecord) -> StateResult<()> {
        self.snapshots.write().push(snapshot.clone());
        Ok(())
    }

    fn snapshots(&self) -> StateResult<Vec<SnapshotRecord>> {
        Ok(self.snapshots.read().clone())
    }
}
