//! Integration tests for the migration runner.
//!
//! These tests run real migrations against `MemoryBackend` and SQLite
//! (in-memory and file-based) databases, verifying that:
//! - Forward runs apply pending steps in registration order, once
//! - Reverts undo a batch in exact reverse apply order
//! - A failing step stops its database's chain and nothing else
//! - Irreversible steps revert as a no-op and leave the ledger consistent
//! - The ledger survives a process restart

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fluent_rs_core::{FluentError, FluentResult, MigrationPhase};
use fluent_rs_db::fields::{FieldConstraint, FieldType, OnDelete};
use fluent_rs_db::row::{Filter, Row};
use fluent_rs_db::value::Value;
use fluent_rs_db_backends::{DatabaseBackend, DatabaseId, Databases, MemoryBackend, SqliteBackend};
use fluent_rs_db_migrations::{
    Connection, Migration, MigrationRegistry, MigrationRunner, MigrationStep, ModelDescriptor,
    RunRequest, RunScope, StepState,
};

// ── Fixtures ────────────────────────────────────────────────────────────

struct AddGalaxyMass;

#[async_trait::async_trait]
impl Migration for AddGalaxyMass {
    fn name(&self) -> &str {
        "AddGalaxyMass"
    }

    async fn prepare(&self, conn: &Connection) -> FluentResult<()> {
        let changes = conn
            .schema("galaxies")
            .field("mass", FieldType::Int64, [FieldConstraint::Default(Value::Int(0))])
            .build()?;
        conn.update(&changes).await
    }

    async fn revert(&self, conn: &Connection) -> FluentResult<()> {
        let changes = conn.schema("galaxies").delete_field("mass").build()?;
        conn.update(&changes).await
    }
}

/// Targets a table that does not exist, so `prepare` fails in the driver.
struct BrokenGalaxyMass;

#[async_trait::async_trait]
impl Migration for BrokenGalaxyMass {
    fn name(&self) -> &str {
        "AddGalaxyMass"
    }

    async fn prepare(&self, conn: &Connection) -> FluentResult<()> {
        let changes = conn
            .schema("galaxy")
            .field("mass", FieldType::Int64, [])
            .build()?;
        conn.update(&changes).await
    }
}

/// A data migration that cannot be undone.
struct SeedGalaxies;

#[async_trait::async_trait]
impl Migration for SeedGalaxies {
    fn name(&self) -> &str {
        "SeedGalaxies"
    }

    async fn prepare(&self, conn: &Connection) -> FluentResult<()> {
        for (id, name) in [
            ("00000000-0000-0000-0000-000000000001", "Milky Way"),
            ("00000000-0000-0000-0000-000000000002", "Andromeda"),
        ] {
            conn.insert(
                "galaxies",
                Row::from_pairs([("id", Value::from(id)), ("name", Value::from(name))]),
            )
            .await?;
        }
        Ok(())
    }

    fn reversible(&self) -> bool {
        false
    }
}

/// Forgot to implement revert.
struct RenameNothing;

#[async_trait::async_trait]
impl Migration for RenameNothing {
    fn name(&self) -> &str {
        "RenameNothing"
    }

    async fn prepare(&self, _conn: &Connection) -> FluentResult<()> {
        Ok(())
    }
}

/// Records the order in which steps run.
struct Recording {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl Migration for Recording {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, _conn: &Connection) -> FluentResult<()> {
        self.log.lock().unwrap().push(format!("prepare {}", self.name));
        Ok(())
    }

    async fn revert(&self, _conn: &Connection) -> FluentResult<()> {
        self.log.lock().unwrap().push(format!("revert {}", self.name));
        Ok(())
    }
}

/// Raises the shutdown signal from inside `prepare`.
struct Shutdown {
    signal: Arc<tokio::sync::watch::Sender<bool>>,
}

#[async_trait::async_trait]
impl Migration for Shutdown {
    fn name(&self) -> &str {
        "Shutdown"
    }

    async fn prepare(&self, _conn: &Connection) -> FluentResult<()> {
        self.signal.send_replace(true);
        Ok(())
    }
}

/// Panics inside `prepare`.
struct Explode;

#[async_trait::async_trait]
impl Migration for Explode {
    fn name(&self) -> &str {
        "Explode"
    }

    async fn prepare(&self, _conn: &Connection) -> FluentResult<()> {
        panic!("galaxy collapsed");
    }
}

/// Takes a while, then flags that it finished.
struct SlowSurvey {
    finished: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl Migration for SlowSurvey {
    fn name(&self) -> &str {
        "SlowSurvey"
    }

    async fn prepare(&self, _conn: &Connection) -> FluentResult<()> {
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Writes its own ledger row, so the runner's ledger write is rejected.
struct SelfRecording;

#[async_trait::async_trait]
impl Migration for SelfRecording {
    fn name(&self) -> &str {
        "SelfRecording"
    }

    async fn prepare(&self, conn: &Connection) -> FluentResult<()> {
        conn.insert(
            "_fluent_migrations",
            Row::from_pairs([
                ("name", Value::from("SelfRecording")),
                ("batch", Value::Int(1)),
                ("sequence", Value::Int(99)),
                ("applied_at", Value::DateTime(chrono::Utc::now())),
            ]),
        )
        .await
    }
}

fn galaxy_model() -> ModelDescriptor {
    ModelDescriptor::new("galaxies")
        .id()
        .field("name", FieldType::String, [FieldConstraint::Required])
}

fn star_model() -> ModelDescriptor {
    ModelDescriptor::new("stars")
        .id()
        .field("name", FieldType::String, [FieldConstraint::Required])
        .field(
            "galaxy_id",
            FieldType::Uuid,
            [
                FieldConstraint::Required,
                FieldConstraint::References {
                    table: "galaxies".into(),
                    column: "id".into(),
                    on_delete: OnDelete::Cascade,
                },
            ],
        )
}

fn create_galaxy() -> MigrationStep {
    MigrationStep::auto_derived("CreateGalaxy", galaxy_model())
}

fn create_star() -> MigrationStep {
    MigrationStep::auto_derived("CreateStar", star_model())
}

fn default_db() -> DatabaseId {
    DatabaseId::from("default")
}

fn memory_runner(registry: MigrationRegistry) -> (MemoryBackend, MigrationRunner) {
    let backend = MemoryBackend::new();
    let databases = Databases::new().with("default", Arc::new(backend.clone()));
    (backend, MigrationRunner::new(registry, databases))
}

fn sqlite_runner(registry: MigrationRegistry) -> (Arc<SqliteBackend>, MigrationRunner) {
    let backend = Arc::new(SqliteBackend::memory().unwrap());
    let databases = Databases::new().with("default", backend.clone());
    (backend, MigrationRunner::new(registry, databases))
}

fn galaxy_registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(AddGalaxyMass, "default").unwrap();
    registry
}

async fn applied(runner: &MigrationRunner) -> Vec<String> {
    runner.ledger().applied_names(&default_db()).await.unwrap()
}

// ── 1. Forward runs ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_forward_applies_galaxy_chain() {
    let (backend, runner) = memory_runner(galaxy_registry());
    let report = runner.run(RunRequest::forward()).await.unwrap();

    let db = report.database(&default_db()).unwrap();
    assert_eq!(db.applied, vec!["CreateGalaxy", "AddGalaxyMass"]);
    assert!(db.failed.is_none());
    assert_eq!(db.batch, Some(1));
    assert!(report.is_success());
    assert_eq!(
        backend.columns("galaxies").await.unwrap(),
        vec!["id", "name", "mass"]
    );
}

#[tokio::test]
async fn test_forward_twice_is_idempotent() {
    let (backend, runner) = memory_runner(galaxy_registry());
    runner.run(RunRequest::forward()).await.unwrap();
    let statements = backend.executed().await.len();

    let second = runner.run(RunRequest::forward()).await.unwrap();
    assert_eq!(second.applied().count(), 0);
    assert_eq!(second.database(&default_db()).unwrap().batch, None);
    assert_eq!(backend.executed().await.len(), statements);
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy", "AddGalaxyMass"]);
}

#[tokio::test]
async fn test_late_registration_joins_next_batch() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    let (backend, runner) = memory_runner(registry.clone());
    runner.run(RunRequest::forward()).await.unwrap();

    registry.register(create_star(), "default").unwrap();
    let databases = Databases::new().with("default", Arc::new(backend.clone()));
    let runner = MigrationRunner::new(registry, databases);
    let report = runner.run(RunRequest::forward()).await.unwrap();

    let db = report.database(&default_db()).unwrap();
    assert_eq!(db.applied, vec!["CreateStar"]);
    assert_eq!(db.batch, Some(2));
    assert_eq!(
        runner.ledger().applied_in_batch(&default_db(), 2).await.unwrap(),
        vec!["CreateStar"]
    );
}

#[tokio::test]
async fn test_forward_single_step() {
    let (_backend, runner) = memory_runner(galaxy_registry());
    let report = runner
        .run(RunRequest::forward().single("CreateGalaxy"))
        .await
        .unwrap();
    assert_eq!(report.applied().map(|(_, n)| n).collect::<Vec<_>>(), vec!["CreateGalaxy"]);
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy"]);

    let again = runner
        .run(RunRequest::forward().single("CreateGalaxy"))
        .await
        .unwrap();
    let db = again.database(&default_db()).unwrap();
    assert!(db.applied.is_empty());
    assert_eq!(db.skipped, vec!["CreateGalaxy"]);
}

#[tokio::test]
async fn test_fake_forward_records_without_executing() {
    let (backend, runner) = memory_runner(galaxy_registry());
    let report = runner.run(RunRequest::forward().fake()).await.unwrap();
    assert_eq!(report.applied().count(), 2);
    assert!(!backend.has_table("galaxies").await.unwrap());
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy", "AddGalaxyMass"]);
}

// ── 2. Failures ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_step_keeps_earlier_steps() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(BrokenGalaxyMass, "default").unwrap();
    registry.register(create_star(), "default").unwrap();
    let (backend, runner) = memory_runner(registry);

    let report = runner.run(RunRequest::forward()).await.unwrap();
    assert!(!report.is_success());

    let db = report.database(&default_db()).unwrap();
    assert_eq!(db.applied, vec!["CreateGalaxy"]);
    assert_eq!(db.skipped, vec!["CreateStar"]);
    let failure = db.failed.as_ref().unwrap();
    assert_eq!(failure.name, "AddGalaxyMass");
    assert_eq!(failure.phase, MigrationPhase::Prepare);
    assert_eq!(failure.batch, 1);
    assert!(failure.error.to_string().contains("AddGalaxyMass"));
    assert!(matches!(
        failure.error.root_cause(),
        FluentError::DatabaseError(_)
    ));

    assert_eq!(applied(&runner).await, vec!["CreateGalaxy"]);
    assert!(backend.has_table("galaxies").await.unwrap());
    assert!(!backend.has_table("stars").await.unwrap());
}

#[tokio::test]
async fn test_failed_step_retried_in_next_batch() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(BrokenGalaxyMass, "default").unwrap();
    let (backend, runner) = memory_runner(registry);
    runner.run(RunRequest::forward()).await.unwrap();

    let mut fixed = MigrationRegistry::new();
    fixed.register(create_galaxy(), "default").unwrap();
    fixed.register(AddGalaxyMass, "default").unwrap();
    let databases = Databases::new().with("default", Arc::new(backend.clone()));
    let runner = MigrationRunner::new(fixed, databases);
    let report = runner.run(RunRequest::forward()).await.unwrap();

    let db = report.database(&default_db()).unwrap();
    assert_eq!(db.applied, vec!["AddGalaxyMass"]);
    assert_eq!(db.batch, Some(2));
}

#[tokio::test]
async fn test_databases_are_isolated() {
    let broken = MemoryBackend::new();
    let healthy = MemoryBackend::new();
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(BrokenGalaxyMass, "default").unwrap();
    registry.register(create_galaxy(), "analytics").unwrap();
    registry.register(AddGalaxyMass, "analytics").unwrap();
    let databases = Databases::new()
        .with("default", Arc::new(broken.clone()))
        .with("analytics", Arc::new(healthy.clone()));
    let runner = MigrationRunner::new(registry, databases);

    let report = runner.run(RunRequest::forward()).await.unwrap();
    let order: Vec<&str> = report.databases.iter().map(|r| r.database.as_str()).collect();
    assert_eq!(order, vec!["default", "analytics"]);

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.as_str(), "default");

    let analytics = report.database(&"analytics".into()).unwrap();
    assert_eq!(analytics.applied, vec!["CreateGalaxy", "AddGalaxyMass"]);
    assert_eq!(
        healthy.columns("galaxies").await.unwrap(),
        vec!["id", "name", "mass"]
    );
}

#[tokio::test]
async fn test_panicking_step_leaves_other_databases_running() {
    let finished = Arc::new(AtomicBool::new(false));
    let surveyed = MemoryBackend::new();
    let mut registry = MigrationRegistry::new();
    registry.register(Explode, "a").unwrap();
    registry.register(create_galaxy(), "a").unwrap();
    registry
        .register(
            SlowSurvey {
                finished: finished.clone(),
            },
            "b",
        )
        .unwrap();
    let databases = Databases::new()
        .with("a", Arc::new(MemoryBackend::new()))
        .with("b", Arc::new(surveyed));
    let runner = MigrationRunner::new(registry, databases);

    let report = runner.run(RunRequest::forward()).await.unwrap();

    let a = report.database(&"a".into()).unwrap();
    let failure = a.failed.as_ref().unwrap();
    assert_eq!(failure.name, "Explode");
    assert_eq!(failure.phase, MigrationPhase::Prepare);
    assert!(matches!(
        failure.error.root_cause(),
        FluentError::OperationalError(msg) if msg.contains("galaxy collapsed")
    ));
    assert_eq!(a.skipped, vec!["CreateGalaxy"]);

    let b = report.database(&"b".into()).unwrap();
    assert_eq!(b.applied, vec!["SlowSurvey"]);
    assert!(finished.load(Ordering::SeqCst));
    assert!(runner
        .ledger()
        .is_applied(&"b".into(), "SlowSurvey")
        .await
        .unwrap());
    assert!(runner.ledger().entries(&"a".into()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ledger_write_failure_after_prepare() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(SelfRecording, "default").unwrap();
    registry.register(create_star(), "default").unwrap();
    let (_backend, runner) = memory_runner(registry);

    let report = runner.run(RunRequest::forward()).await.unwrap();
    let db = report.database(&default_db()).unwrap();
    assert_eq!(db.applied, vec!["CreateGalaxy"]);
    assert_eq!(db.skipped, vec!["CreateStar"]);
    let failure = db.failed.as_ref().unwrap();
    assert_eq!(failure.name, "SelfRecording");
    assert_eq!(failure.phase, MigrationPhase::Record);
    assert!(failure.error.to_string().contains("during record"));
    assert!(matches!(
        failure.error.root_cause(),
        FluentError::LedgerInconsistency { .. }
    ));
}

#[tokio::test]
async fn test_run_restricted_to_one_database() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(create_galaxy(), "analytics").unwrap();
    let analytics = MemoryBackend::new();
    let databases = Databases::new()
        .with("default", Arc::new(MemoryBackend::new()))
        .with("analytics", Arc::new(analytics.clone()));
    let runner = MigrationRunner::new(registry, databases);

    let report = runner
        .run(RunRequest::forward().only(["default"]))
        .await
        .unwrap();
    assert_eq!(report.databases.len(), 1);
    assert!(!analytics.has_table("galaxies").await.unwrap());
}

// ── 3. Reverts ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_revert_is_exact_reverse() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = MigrationRegistry::new();
    for name in ["A", "B", "C"] {
        registry
            .register(
                Recording {
                    name: name.to_string(),
                    log: log.clone(),
                },
                "default",
            )
            .unwrap();
    }
    let (_backend, runner) = memory_runner(registry);
    runner.run(RunRequest::forward()).await.unwrap();
    let report = runner.run(RunRequest::revert()).await.unwrap();

    assert_eq!(
        report.reverted().map(|(_, n)| n).collect::<Vec<_>>(),
        vec!["C", "B", "A"]
    );
    assert_eq!(
        *log.lock().unwrap(),
        vec!["prepare A", "prepare B", "prepare C", "revert C", "revert B", "revert A"]
    );
    assert!(applied(&runner).await.is_empty());
}

#[tokio::test]
async fn test_revert_last_batch_restores_previous_state() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    let (backend, runner) = memory_runner(registry.clone());
    runner.run(RunRequest::forward()).await.unwrap();
    let before = applied(&runner).await;

    registry.register(AddGalaxyMass, "default").unwrap();
    registry.register(create_star(), "default").unwrap();
    let databases = Databases::new().with("default", Arc::new(backend.clone()));
    let runner = MigrationRunner::new(registry, databases);
    runner.run(RunRequest::forward()).await.unwrap();
    assert_eq!(applied(&runner).await.len(), 3);

    let report = runner.run(RunRequest::revert()).await.unwrap();
    let db = report.database(&default_db()).unwrap();
    assert_eq!(db.batch, Some(2));
    assert_eq!(db.reverted, vec!["CreateStar", "AddGalaxyMass"]);
    assert_eq!(applied(&runner).await, before);
    assert_eq!(backend.columns("galaxies").await.unwrap(), vec!["id", "name"]);
    assert!(!backend.has_table("stars").await.unwrap());
}

#[tokio::test]
async fn test_revert_all_walks_batches_newest_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recording = |name: &str| Recording {
        name: name.to_string(),
        log: log.clone(),
    };
    let mut registry = MigrationRegistry::new();
    registry.register(recording("A"), "default").unwrap();
    registry.register(recording("B"), "default").unwrap();
    let (backend, runner) = memory_runner(registry.clone());
    runner.run(RunRequest::forward()).await.unwrap();

    registry.register(recording("C"), "default").unwrap();
    let databases = Databases::new().with("default", Arc::new(backend.clone()));
    let runner = MigrationRunner::new(registry, databases);
    runner.run(RunRequest::forward()).await.unwrap();

    let plan = runner.plan(&RunRequest::revert_all()).await.unwrap();
    let batches: Vec<i64> = plan.steps.iter().map(|s| s.batch).collect();
    assert_eq!(batches, vec![2, 1, 1]);

    let report = runner.run(RunRequest::revert_all()).await.unwrap();
    assert_eq!(
        report.reverted().map(|(_, n)| n).collect::<Vec<_>>(),
        vec!["C", "B", "A"]
    );
    assert!(applied(&runner).await.is_empty());
}

#[tokio::test]
async fn test_revert_single_step() {
    let (backend, runner) = memory_runner(galaxy_registry());
    runner.run(RunRequest::forward()).await.unwrap();
    let report = runner
        .run(RunRequest::revert().single("AddGalaxyMass"))
        .await
        .unwrap();
    assert_eq!(report.reverted().count(), 1);
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy"]);
    assert_eq!(backend.columns("galaxies").await.unwrap(), vec!["id", "name"]);
}

#[tokio::test]
async fn test_irreversible_step_reverts_as_noop() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(SeedGalaxies, "default").unwrap();
    let (backend, runner) = memory_runner(registry);
    runner.run(RunRequest::forward()).await.unwrap();
    assert_eq!(backend.query("galaxies", &Filter::all()).await.unwrap().len(), 2);

    let report = runner
        .run(RunRequest::revert().single("SeedGalaxies"))
        .await
        .unwrap();
    let db = report.database(&default_db()).unwrap();
    assert!(report.is_success());
    assert_eq!(db.irreversible, vec!["SeedGalaxies"]);
    assert_eq!(db.state_of("SeedGalaxies"), Some(StepState::Reverted));
    // The seeded rows stay; only the ledger entry is removed.
    assert_eq!(backend.query("galaxies", &Filter::all()).await.unwrap().len(), 2);
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy"]);
}

#[tokio::test]
async fn test_fake_revert_of_irreversible_step() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(SeedGalaxies, "default").unwrap();
    let (_backend, runner) = memory_runner(registry);
    runner.run(RunRequest::forward()).await.unwrap();

    let report = runner
        .run(RunRequest::revert().single("SeedGalaxies").fake())
        .await
        .unwrap();
    let db = report.database(&default_db()).unwrap();
    assert_eq!(db.reverted, vec!["SeedGalaxies"]);
    assert!(db.irreversible.is_empty());
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy"]);
}

#[tokio::test]
async fn test_missing_revert_is_reported() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(RenameNothing, "default").unwrap();
    let (_backend, runner) = memory_runner(registry);
    runner.run(RunRequest::forward()).await.unwrap();

    let report = runner.run(RunRequest::revert()).await.unwrap();
    let db = report.database(&default_db()).unwrap();
    let failure = db.failed.as_ref().unwrap();
    assert_eq!(failure.name, "RenameNothing");
    assert_eq!(failure.phase, MigrationPhase::Revert);
    assert!(matches!(
        failure.error.root_cause(),
        FluentError::RevertNotImplemented { .. }
    ));
    assert_eq!(db.skipped, vec!["CreateGalaxy"]);
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy", "RenameNothing"]);
}

#[tokio::test]
async fn test_unregistered_ledger_entry_is_inconsistent() {
    let (backend, runner) = memory_runner(galaxy_registry());
    runner.run(RunRequest::forward()).await.unwrap();

    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    let databases = Databases::new().with("default", Arc::new(backend.clone()));
    let runner = MigrationRunner::new(registry, databases);

    let status = runner.status().await.unwrap();
    assert_eq!(status[0].unregistered, vec!["AddGalaxyMass"]);

    let report = runner.run(RunRequest::revert()).await.unwrap();
    let failure = report.failures().next().unwrap().1;
    assert_eq!(failure.name, "AddGalaxyMass");
    assert!(matches!(
        failure.error.root_cause(),
        FluentError::LedgerInconsistency { .. }
    ));
    // Never auto-corrected.
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy", "AddGalaxyMass"]);
}

#[tokio::test]
async fn test_forward_reports_unregistered_ledger_entries() {
    let (backend, runner) = memory_runner(galaxy_registry());
    runner.run(RunRequest::forward()).await.unwrap();

    // AddGalaxyMass renamed to AddGalaxyMassKg.
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry
        .register(
            MigrationStep::auto_derived("AddGalaxyMassKg", ModelDescriptor::new("masses").id()),
            "default",
        )
        .unwrap();
    let databases = Databases::new().with("default", Arc::new(backend.clone()));
    let runner = MigrationRunner::new(registry, databases);

    let report = runner.run(RunRequest::forward()).await.unwrap();
    let db = report.database(&default_db()).unwrap();
    assert_eq!(db.unregistered, vec!["AddGalaxyMass"]);
    assert_eq!(db.applied, vec!["AddGalaxyMassKg"]);
    assert_eq!(
        applied(&runner).await,
        vec!["CreateGalaxy", "AddGalaxyMass", "AddGalaxyMassKg"]
    );
}

#[tokio::test]
async fn test_revert_with_empty_ledger_is_noop() {
    let (_backend, runner) = memory_runner(galaxy_registry());
    let report = runner.run(RunRequest::revert()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.reverted().count(), 0);
    assert_eq!(report.database(&default_db()).unwrap().batch, None);
}

// ── 4. Registration and schema errors ───────────────────────────────────

#[tokio::test]
async fn test_duplicate_field_fails_before_driver_call() {
    let model = galaxy_model().field("name", FieldType::String, []);
    let mut registry = MigrationRegistry::new();
    registry
        .register(MigrationStep::auto_derived("CreateGalaxy", model), "default")
        .unwrap();
    let (backend, runner) = memory_runner(registry);

    let report = runner.run(RunRequest::forward()).await.unwrap();
    let failure = report.failures().next().unwrap().1;
    assert!(matches!(
        failure.error.root_cause(),
        FluentError::DuplicateField { .. }
    ));
    assert!(!backend.has_table("galaxies").await.unwrap());
    assert_eq!(backend.executed().await, vec!["create table _fluent_migrations"]);
}

#[test]
fn test_duplicate_registration() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    assert!(matches!(
        registry.register(create_galaxy(), "default"),
        Err(FluentError::DuplicateName { .. })
    ));
    assert!(registry.register(create_galaxy(), "analytics").is_ok());
}

// ── 5. Cancellation ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_stops_between_steps() {
    let (tx, rx) = tokio::sync::watch::channel(false);
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry
        .register(
            Shutdown {
                signal: Arc::new(tx),
            },
            "default",
        )
        .unwrap();
    registry.register(create_star(), "default").unwrap();
    let (backend, runner) = memory_runner(registry);
    let runner = runner.with_shutdown(rx);

    let report = runner.run(RunRequest::forward()).await.unwrap();
    let db = report.database(&default_db()).unwrap();
    assert!(db.cancelled);
    assert!(report.is_cancelled());
    assert_eq!(db.applied, vec!["CreateGalaxy", "Shutdown"]);
    assert_eq!(db.skipped, vec!["CreateStar"]);
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy", "Shutdown"]);
    assert!(!backend.has_table("stars").await.unwrap());
}

// ── 6. SQLite ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sqlite_forward_and_revert() {
    let mut registry = galaxy_registry();
    registry.register(create_star(), "default").unwrap();
    let (backend, runner) = sqlite_runner(registry);

    let report = runner.run(RunRequest::forward()).await.unwrap();
    assert!(report.is_success());
    assert!(backend.has_table("stars").await.unwrap());
    backend
        .insert(
            "galaxies",
            Row::from_pairs([("id", Value::from("g1")), ("name", Value::from("Milky Way"))]),
        )
        .await
        .unwrap();
    let rows = backend.query("galaxies", &Filter::all()).await.unwrap();
    assert_eq!(rows[0].get::<i64>("mass").unwrap(), 0);

    let report = runner.run(RunRequest::revert()).await.unwrap();
    assert_eq!(
        report.reverted().map(|(_, n)| n).collect::<Vec<_>>(),
        vec!["CreateStar", "AddGalaxyMass", "CreateGalaxy"]
    );
    assert!(!backend.has_table("galaxies").await.unwrap());
    assert!(backend.has_table("_fluent_migrations").await.unwrap());
}

#[tokio::test]
async fn test_sqlite_failed_step() {
    let mut registry = MigrationRegistry::new();
    registry.register(create_galaxy(), "default").unwrap();
    registry.register(BrokenGalaxyMass, "default").unwrap();
    let (_backend, runner) = sqlite_runner(registry);

    let report = runner.run(RunRequest::forward()).await.unwrap();
    let db = report.database(&default_db()).unwrap();
    assert_eq!(db.applied, vec!["CreateGalaxy"]);
    assert_eq!(db.failed.as_ref().unwrap().name, "AddGalaxyMass");
    assert_eq!(applied(&runner).await, vec!["CreateGalaxy"]);
}

#[tokio::test]
async fn test_sqlite_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("galaxies.sqlite3");

    {
        let backend = Arc::new(SqliteBackend::open(&path).unwrap());
        let databases = Databases::new().with("default", backend);
        let runner = MigrationRunner::new(galaxy_registry(), databases);
        runner.run(RunRequest::forward()).await.unwrap();
    }

    let backend = Arc::new(SqliteBackend::open(&path).unwrap());
    let databases = Databases::new().with("default", backend);
    let runner = MigrationRunner::new(galaxy_registry(), databases);

    let status = runner.status().await.unwrap();
    assert!(status[0].pending().is_empty());
    assert!(status[0].steps.iter().all(|s| s.batch == Some(1)));

    let report = runner.run(RunRequest::forward()).await.unwrap();
    assert_eq!(report.applied().count(), 0);
    let entry = runner
        .ledger()
        .get(&default_db(), "AddGalaxyMass")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.sequence, 2);
}

#[tokio::test]
async fn test_sqlite_custom_ledger_table() {
    let (backend, runner) = sqlite_runner(galaxy_registry());
    let runner = runner.with_ledger_table("schema_history");
    runner.run(RunRequest::forward()).await.unwrap();
    assert!(backend.has_table("schema_history").await.unwrap());
    assert!(!backend.has_table("_fluent_migrations").await.unwrap());
}

// ── 7. Planning ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_plan_matches_run() {
    let (_backend, runner) = memory_runner(galaxy_registry());
    let plan = runner.plan(&RunRequest::forward()).await.unwrap();
    assert_eq!(plan.names(&default_db()), vec!["CreateGalaxy", "AddGalaxyMass"]);

    let report = runner.run(RunRequest::forward()).await.unwrap();
    assert_eq!(
        report.applied().map(|(_, n)| n).collect::<Vec<_>>(),
        plan.names(&default_db())
    );
    assert!(runner
        .plan(&RunRequest::forward())
        .await
        .unwrap()
        .is_empty());

    let revert = runner
        .plan(&RunRequest::revert().scope(RunScope::LastBatch))
        .await
        .unwrap();
    assert_eq!(revert.names(&default_db()), vec!["AddGalaxyMass", "CreateGalaxy"]);
}
