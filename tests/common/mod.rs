//! In-memory collaborators for reconciler tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hot_backup_operator::adapters::{
    ClusterBackup, ClusterConnector, MemberAgent, ResourceStore, Upload, UploadConfig,
    UploadFactory,
};
use hot_backup_operator::crd::{
    BackupType, Hazelcast, HazelcastMemberStatus, HazelcastPhase, HazelcastSpec, HazelcastStatus,
    HotBackup, HotBackupSpec, HotBackupState, PersistenceSpec, ResourceKey, FINALIZER_NAME,
};
use hot_backup_operator::reconcilers::{HotBackupReconciler, RetryConfig};
use hot_backup_operator::{Error, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Resource store
// ============================================================================

#[derive(Default)]
struct StoreState {
    backups: HashMap<ResourceKey, HotBackup>,
    hazelcasts: HashMap<ResourceKey, Hazelcast>,
    version: u64,
    history: Vec<(ResourceKey, HotBackupState)>,
}

impl StoreState {
    fn next_version(&mut self) -> Option<String> {
        self.version += 1;
        Some(self.version.to_string())
    }
}

/// Resource store with resourceVersion conflict detection
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<StoreState>,
    status_conflicts: AtomicU32,
    status_writes: AtomicU32,
    stalled_read: Mutex<Option<CancellationToken>>,
}

impl FakeStore {
    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn insert_backup(&self, mut backup: HotBackup) {
        let mut st = self.lock();
        backup.metadata.resource_version = st.next_version();
        st.backups.insert(ResourceKey::of(&backup), backup);
    }

    pub fn insert_hazelcast(&self, hazelcast: Hazelcast) {
        self.lock()
            .hazelcasts
            .insert(ResourceKey::of(&hazelcast), hazelcast);
    }

    pub fn backup(&self, key: &ResourceKey) -> Option<HotBackup> {
        self.lock().backups.get(key).cloned()
    }

    pub fn state(&self, key: &ResourceKey) -> HotBackupState {
        self.backup(key).map(|b| b.state()).unwrap_or_default()
    }

    pub fn message(&self, key: &ResourceKey) -> Option<String> {
        self.backup(key)
            .and_then(|b| b.status)
            .and_then(|s| s.message)
    }

    /// Simulate a user editing the spec
    pub fn edit_spec(&self, key: &ResourceKey, edit: impl FnOnce(&mut HotBackupSpec)) {
        let mut st = self.lock();
        let version = st.next_version();
        let backup = st.backups.get_mut(key).expect("backup exists");
        edit(&mut backup.spec);
        backup.metadata.resource_version = version;
    }

    /// Simulate a user deleting the resource
    pub fn mark_deleting(&self, key: &ResourceKey) {
        let mut st = self.lock();
        let version = st.next_version();
        let backup = st.backups.get_mut(key).expect("backup exists");
        backup.metadata.deletion_timestamp = Some(Time(Utc::now()));
        backup.metadata.resource_version = version;
    }

    /// States written for `key`, in order
    pub fn history(&self, key: &ResourceKey) -> Vec<HotBackupState> {
        self.lock()
            .history
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, s)| *s)
            .collect()
    }

    /// Fail the next `n` status writes with a conflict
    pub fn inject_status_conflicts(&self, n: u32) {
        self.status_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn status_write_attempts(&self) -> u32 {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Hold the next `get_backup` after it took its snapshot, until the
    /// returned gate is cancelled
    pub fn stall_next_backup_read(&self) -> CancellationToken {
        let gate = CancellationToken::new();
        *self.stalled_read.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Whether the stall armed by `stall_next_backup_read` is still unused
    pub fn stall_armed(&self) -> bool {
        self.stalled_read.lock().unwrap().is_some()
    }
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn get_backup(&self, key: &ResourceKey) -> Result<Option<HotBackup>> {
        let snapshot = self.backup(key);
        let gate = self.stalled_read.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.cancelled().await;
        }
        Ok(snapshot)
    }

    async fn replace_backup(&self, backup: &HotBackup) -> Result<HotBackup> {
        let key = ResourceKey::of(backup);
        let mut st = self.lock();
        let (current_version, current_status) = match st.backups.get(&key) {
            Some(current) => (
                current.metadata.resource_version.clone(),
                current.status.clone(),
            ),
            None => return Err(Error::NotFound(key.to_string())),
        };
        if current_version != backup.metadata.resource_version {
            return Err(Error::Conflict(key.to_string()));
        }

        let mut next = backup.clone();
        next.status = current_status;
        next.metadata.resource_version = st.next_version();

        let finalizers_done = next
            .metadata
            .finalizers
            .as_ref()
            .map_or(true, |f| f.is_empty());
        if next.metadata.deletion_timestamp.is_some() && finalizers_done {
            st.backups.remove(&key);
        } else {
            st.backups.insert(key, next.clone());
        }
        Ok(next)
    }

    async fn replace_backup_status(&self, backup: &HotBackup) -> Result<HotBackup> {
        let key = ResourceKey::of(backup);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .status_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Conflict(key.to_string()));
        }

        let mut st = self.lock();
        let current_version = match st.backups.get(&key) {
            Some(current) => current.metadata.resource_version.clone(),
            None => return Err(Error::NotFound(key.to_string())),
        };
        if current_version != backup.metadata.resource_version {
            return Err(Error::Conflict(key.to_string()));
        }

        let version = st.next_version();
        let state = backup.state();
        let current = st.backups.get_mut(&key).expect("checked above");
        current.status = backup.status.clone();
        current.metadata.resource_version = version;
        let updated = current.clone();
        st.history.push((key, state));
        Ok(updated)
    }

    async fn get_hazelcast(&self, key: &ResourceKey) -> Result<Option<Hazelcast>> {
        Ok(self.lock().hazelcasts.get(key).cloned())
    }
}

// ============================================================================
// Cluster and members
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Stay busy until the run is cancelled
    Block,
}

pub struct FakeMember {
    address: String,
    behavior: Behavior,
    cancels: AtomicUsize,
}

impl FakeMember {
    pub fn new(address: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            behavior,
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemberAgent for FakeMember {
    fn address(&self) -> &str {
        &self.address
    }

    async fn wait(&self, token: &CancellationToken) -> Result<()> {
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(Error::agent(format!(
                "member {} local backup failed",
                self.address
            ))),
            Behavior::Block => {
                token.cancelled().await;
                Err(Error::Cancelled)
            }
        }
    }

    async fn cancel(&self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeCluster {
    pub members: Vec<Arc<FakeMember>>,
    pub fail_start: bool,
    pub starts: AtomicUsize,
    pub interrupts: AtomicUsize,
    pub connects: AtomicUsize,
}

impl FakeCluster {
    pub fn new(members: Vec<Arc<FakeMember>>) -> Arc<Self> {
        Self::build(members, false)
    }

    pub fn failing_start(members: Vec<Arc<FakeMember>>) -> Arc<Self> {
        Self::build(members, true)
    }

    fn build(members: Vec<Arc<FakeMember>>, fail_start: bool) -> Arc<Self> {
        Arc::new(Self {
            members,
            fail_start,
            starts: AtomicUsize::new(0),
            interrupts: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn member_cancels(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.cancels()).collect()
    }
}

#[async_trait]
impl ClusterBackup for FakeCluster {
    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(Error::agent("cluster rejected hot backup"));
        }
        Ok(())
    }

    async fn interrupt(&self) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn members(&self) -> Vec<Arc<dyn MemberAgent>> {
        self.members
            .iter()
            .map(|m| m.clone() as Arc<dyn MemberAgent>)
            .collect()
    }
}

pub struct FakeConnector {
    cluster: Arc<FakeCluster>,
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, _hazelcast: &Hazelcast) -> Result<Arc<dyn ClusterBackup>> {
        self.cluster.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.cluster.clone())
    }
}

// ============================================================================
// Uploads
// ============================================================================

#[derive(Default)]
pub struct FakeUploads {
    behaviors: Mutex<HashMap<String, Behavior>>,
    created: Mutex<Vec<UploadConfig>>,
    cancels: Arc<AtomicUsize>,
}

impl FakeUploads {
    /// Uploads from `address` behave as given; others succeed
    pub fn set_behavior(&self, address: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(address.to_string(), behavior);
    }

    pub fn created(&self) -> Vec<UploadConfig> {
        self.created.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl UploadFactory for FakeUploads {
    fn create(&self, config: UploadConfig) -> Result<Box<dyn Upload>> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&config.member_address)
            .copied()
            .unwrap_or(Behavior::Succeed);
        let address = config.member_address.clone();
        self.created.lock().unwrap().push(config);
        Ok(Box::new(FakeUpload {
            address,
            behavior,
            cancels: self.cancels.clone(),
        }))
    }
}

struct FakeUpload {
    address: String,
    behavior: Behavior,
    cancels: Arc<AtomicUsize>,
}

#[async_trait]
impl Upload for FakeUpload {
    async fn start(&self, _token: &CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn wait(&self, token: &CancellationToken) -> Result<()> {
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(Error::upload(format!(
                "upload from {} was rejected by the bucket",
                self.address
            ))),
            Behavior::Block => {
                token.cancelled().await;
                Err(Error::Cancelled)
            }
        }
    }

    async fn cancel(&self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub const HAZELCAST: &str = "hz";

pub fn addresses(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("10.0.0.{}:5701", i)).collect()
}

pub fn spec(schedule: Option<&str>) -> HotBackupSpec {
    HotBackupSpec {
        hazelcast_resource_name: HAZELCAST.to_string(),
        schedule: schedule.map(str::to_string),
        bucket_uri: Some("s3://hazelcast-backups/prod".to_string()),
        secret: Some("bucket-credentials".to_string()),
    }
}

pub fn hot_backup(key: &ResourceKey, spec: HotBackupSpec, with_finalizer: bool) -> HotBackup {
    let mut backup = HotBackup::new(&key.name, spec);
    backup.metadata.namespace = Some(key.namespace.clone());
    if with_finalizer {
        backup.metadata.finalizers = Some(vec![FINALIZER_NAME.to_string()]);
    }
    backup
}

pub fn hazelcast(namespace: &str, phase: HazelcastPhase, backup_type: BackupType) -> Hazelcast {
    let mut hz = Hazelcast::new(
        HAZELCAST,
        HazelcastSpec {
            cluster_size: 3,
            persistence: Some(PersistenceSpec {
                base_dir: "/data/hot-restart".to_string(),
                backup_type,
            }),
        },
    );
    hz.metadata.namespace = Some(namespace.to_string());
    hz.status = Some(HazelcastStatus {
        phase: Some(phase),
        members: addresses(3)
            .into_iter()
            .map(|address| HazelcastMemberStatus {
                address,
                uid: None,
                ready: true,
            })
            .collect(),
    });
    hz
}

/// Reconciler wired to in-memory collaborators
pub struct Harness {
    pub store: Arc<FakeStore>,
    pub cluster: Arc<FakeCluster>,
    pub uploads: Arc<FakeUploads>,
    pub reconciler: HotBackupReconciler,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(cluster: Arc<FakeCluster>) -> Self {
        let store = Arc::new(FakeStore::default());
        let uploads = Arc::new(FakeUploads::default());
        let shutdown = CancellationToken::new();
        let reconciler = HotBackupReconciler::new(
            store.clone(),
            Arc::new(FakeConnector {
                cluster: cluster.clone(),
            }),
            uploads.clone(),
            RetryConfig {
                initial_backoff: Duration::from_millis(1),
                ..RetryConfig::default()
            },
            shutdown.clone(),
        );
        Self {
            store,
            cluster,
            uploads,
            reconciler,
            shutdown,
        }
    }

    /// Cluster whose members all succeed
    pub fn healthy(members: usize) -> Self {
        let members = addresses(members)
            .iter()
            .map(|a| FakeMember::new(a, Behavior::Succeed))
            .collect();
        Self::new(FakeCluster::new(members))
    }

    /// Wait until the run for `key` reached a terminal state and released its guard
    pub async fn settle(&self, key: &ResourceKey) {
        wait_until("run to finish", || {
            self.store.state(key).is_finished() && !self.reconciler.run_guard().contains(key)
        })
        .await;
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    if polled.is_err() {
        panic!("timed out waiting for {}", what);
    }
}
