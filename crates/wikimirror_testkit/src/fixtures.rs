//! Test fixtures and mirror helpers.
//!
//! Provides throwaway mirrors, a sync configuration suited to the
//! simulated wiki, and snapshot comparison of mirror state.

use crate::wiki::FakeWiki;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use wikimirror_protocol::StreamKind;
use wikimirror_store::{CheckpointStore, Mirror};
use wikimirror_sync::{PassReport, RetryConfig, SyncConfig, SyncEngine};

/// Returns a configuration suited to [`FakeWiki`]: small batches so
/// listings span several pages, immediate retries, streams run one
/// after another and verification on. [`assert_interval_independent`]
/// also covers parallel streams.
pub fn test_config() -> SyncConfig {
    SyncConfig::new("fake://wiki")
        .with_batch_size(3)
        .with_retry(RetryConfig::immediate(4))
        .with_parallel_streams(false)
        .with_verify(true)
}

/// A test mirror with automatic cleanup.
pub struct TestMirror {
    /// The mirror instance.
    pub mirror: Arc<Mirror>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestMirror {
    /// Creates a new in-memory mirror.
    pub fn memory() -> Self {
        Self {
            mirror: Arc::new(Mirror::open_in_memory().expect("Failed to open in-memory mirror")),
            _temp_dir: None,
        }
    }

    /// Creates a new mirror in a temporary directory.
    pub fn on_disk() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mirror =
            Mirror::open(&temp_dir.path().join("mirror")).expect("Failed to open mirror");
        Self {
            mirror: Arc::new(mirror),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the SQLite file of an on-disk mirror.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.mirror.database_path()
    }

    /// Creates an engine mirroring `wiki` into this mirror.
    pub fn engine(&self, wiki: &Arc<FakeWiki>, config: SyncConfig) -> SyncEngine<FakeWiki> {
        SyncEngine::with_shared_remote(config, Arc::clone(&self.mirror), Arc::clone(wiki))
    }

    /// Runs one pass with [`test_config`].
    ///
    /// # Panics
    ///
    /// Panics if the pass aborts.
    pub fn sync(&self, wiki: &Arc<FakeWiki>) -> PassReport {
        self.sync_with(wiki, test_config())
    }

    /// Runs one pass with `config`.
    ///
    /// # Panics
    ///
    /// Panics if the pass aborts.
    pub fn sync_with(&self, wiki: &Arc<FakeWiki>, config: SyncConfig) -> PassReport {
        self.engine(wiki, config).sync().expect("sync pass aborted")
    }

    /// Captures the mirrored state, checkpoints excluded.
    pub fn snapshot(&self) -> MirrorSnapshot {
        MirrorSnapshot::of(&self.mirror)
    }

    /// Forgets every stream checkpoint.
    pub fn reset_checkpoints(&self) {
        for stream in StreamKind::ALL {
            self.mirror.reset(stream).expect("Failed to reset checkpoint");
        }
    }

    /// Overwrites the stored checkpoint of a stream with an undecodable
    /// timestamp.
    pub fn corrupt_checkpoint(&self, stream: StreamKind) {
        let conn = self.side_connection();
        conn.execute(
            "UPDATE checkpoints SET timestamp = 'garbage' WHERE stream = ?1",
            [stream.as_str()],
        )
        .expect("Failed to corrupt checkpoint");
    }

    /// Drops a table behind the mirror's back, making every later write
    /// to it fail.
    pub fn drop_table(&self, table: &str) {
        let conn = self.side_connection();
        conn.execute_batch(&format!("DROP TABLE {table}"))
            .expect("Failed to drop table");
    }

    fn side_connection(&self) -> rusqlite::Connection {
        let path = self
            .database_path()
            .expect("side connections need an on-disk mirror");
        rusqlite::Connection::open(path).expect("Failed to open side connection")
    }
}

impl std::ops::Deref for TestMirror {
    type Target = Mirror;

    fn deref(&self) -> &Self::Target {
        &self.mirror
    }
}

/// Table-by-table dump of a mirror's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorSnapshot {
    tables: BTreeMap<String, Vec<String>>,
}

impl MirrorSnapshot {
    /// Captures a mirror, checkpoints excluded.
    pub fn of(mirror: &Mirror) -> Self {
        Self {
            tables: mirror.dump(false).expect("Failed to dump mirror"),
        }
    }

    /// Captures a mirror, checkpoints included.
    pub fn with_checkpoints(mirror: &Mirror) -> Self {
        Self {
            tables: mirror.dump(true).expect("Failed to dump mirror"),
        }
    }

    /// Returns the rows of a table.
    pub fn table(&self, name: &str) -> &[String] {
        self.tables.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Describes every row present on one side only.
    pub fn diff(&self, other: &MirrorSnapshot) -> Vec<String> {
        let mut lines = Vec::new();
        let names: std::collections::BTreeSet<&String> =
            self.tables.keys().chain(other.tables.keys()).collect();
        for name in names {
            let left = self.table(name);
            let right = other.table(name);
            for row in left.iter().filter(|row| !right.contains(row)) {
                lines.push(format!("{name} - {row}"));
            }
            for row in right.iter().filter(|row| !left.contains(row)) {
                lines.push(format!("{name} + {row}"));
            }
        }
        lines
    }
}

/// Asserts that two snapshots hold the same state, listing the rows
/// that differ otherwise.
pub fn assert_same_state(left: &MirrorSnapshot, right: &MirrorSnapshot) {
    let diff = left.diff(right);
    assert!(diff.is_empty(), "mirrors differ:\n{}", diff.join("\n"));
}

type Step = Box<dyn Fn(&FakeWiki)>;

/// A scripted sequence of wiki mutations.
#[derive(Default)]
pub struct Scenario {
    steps: Vec<Step>,
}

impl Scenario {
    /// Creates an empty scenario.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step.
    pub fn step(mut self, step: impl Fn(&FakeWiki) + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Builds a scenario from generated steps. Steps whose preconditions
    /// do not hold when they run are skipped.
    pub fn with_steps(steps: Vec<crate::generators::WikiStep>) -> Self {
        let mut scenario = Self::new();
        for step in steps {
            scenario = scenario.step(move |wiki| {
                step.apply(wiki);
            });
        }
        scenario
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the scenario has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every step against a wiki.
    pub fn run(&self, wiki: &FakeWiki) {
        for step in &self.steps {
            step(wiki);
        }
    }
}

/// Checks that the mirrored state does not depend on when passes run,
/// with streams run one after another and in parallel.
///
/// Both modes must arrive at the same state. Returns the final snapshot.
pub fn assert_interval_independent(scenario: &Scenario) -> MirrorSnapshot {
    let sequential = assert_interval_independent_with(scenario, &test_config());
    let parallel =
        assert_interval_independent_with(scenario, &test_config().with_parallel_streams(true));
    assert_same_state(&sequential, &parallel);
    sequential
}

/// Checks that the mirrored state does not depend on when passes run
/// under `config`.
///
/// Plays the scenario once, syncing one mirror after every step, then
/// syncs a fresh mirror once at the end. Both must hold the same state.
/// A further pass must change nothing, and replaying every stream from
/// the beginning must leave the state as it is.
///
/// Returns the final snapshot.
pub fn assert_interval_independent_with(scenario: &Scenario, config: &SyncConfig) -> MirrorSnapshot {
    let wiki = Arc::new(FakeWiki::new());
    let stepwise = TestMirror::memory();
    for step in &scenario.steps {
        step(&wiki);
        let report = stepwise.sync_with(&wiki, config.clone());
        assert!(report.is_complete(), "stepwise pass incomplete: {report:?}");
    }

    let once = TestMirror::memory();
    let report = once.sync_with(&wiki, config.clone());
    assert!(report.is_complete(), "single pass incomplete: {report:?}");

    let snapshot = stepwise.snapshot();
    assert_same_state(&snapshot, &once.snapshot());

    let again = stepwise.sync_with(&wiki, config.clone());
    let counts = again.counts();
    assert_eq!(
        counts.inserted + counts.updated,
        0,
        "a pass without remote changes wrote rows"
    );
    assert_same_state(&snapshot, &stepwise.snapshot());

    stepwise.reset_checkpoints();
    let replay = stepwise.sync_with(&wiki, config.clone());
    assert!(replay.is_complete(), "replay incomplete: {replay:?}");
    assert_same_state(&snapshot, &stepwise.snapshot());

    snapshot
}
