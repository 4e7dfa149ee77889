//! Migration execution engine.
//!
//! The [`MigrationRunner`] compares the [`MigrationRegistry`] with the
//! [`MigrationLedger`] and executes what a [`RunRequest`] selects:
//!
//! - **Forward** runs apply every pending step (or one named step) in
//!   registration order, under a fresh batch id.
//! - **Revert** runs undo the newest batch, every batch, or one named step,
//!   in exact reverse apply order.
//!
//! Each database runs as its own tokio task, so a failure on one database
//! never stops another. Within a database execution is strictly sequential
//! and fail-fast: the first failing step stops the chain, steps already
//! applied stay applied, and the [`RunReport`] lists exactly what happened.
//!
//! A shutdown signal (a `watch` channel carrying `true`) is honoured between
//! steps; the step in flight always completes and is recorded.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fluent_rs_core::logging::{migration_span, run_span};
use fluent_rs_core::{FluentError, FluentResult, MigrationPhase, Settings};
use fluent_rs_db_backends::{DatabaseId, Databases};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::connection::Connection;
use crate::ledger::{LedgerEntry, MigrationLedger};
use crate::migration::MigrationStep;
use crate::registry::MigrationRegistry;

/// The direction of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Apply pending migrations.
    Forward,
    /// Revert applied migrations.
    Revert,
}

impl RunMode {
    /// Returns the lowercase name of the mode.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Revert => "revert",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which migrations a run targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunScope {
    /// Every pending (forward) or every applied (revert) migration.
    All,
    /// The newest batch. Revert only.
    LastBatch,
    /// One migration by name.
    Single(String),
}

/// What to run.
///
/// # Examples
///
/// ```
/// use fluent_rs_db_migrations::executor::{RunMode, RunRequest, RunScope};
///
/// let request = RunRequest::revert().only(["analytics"]);
/// assert_eq!(request.mode, RunMode::Revert);
/// assert_eq!(request.scope, RunScope::LastBatch);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// The direction.
    pub mode: RunMode,
    /// The target selection.
    pub scope: RunScope,
    /// Restricts the run to these databases; `None` means every database
    /// with registered migrations.
    pub databases: Option<Vec<DatabaseId>>,
    /// Update the ledger without calling `prepare` / `revert`.
    pub fake: bool,
}

impl RunRequest {
    /// Applies every pending migration.
    pub fn forward() -> Self {
        Self {
            mode: RunMode::Forward,
            scope: RunScope::All,
            databases: None,
            fake: false,
        }
    }

    /// Reverts the newest batch.
    pub fn revert() -> Self {
        Self {
            mode: RunMode::Revert,
            scope: RunScope::LastBatch,
            databases: None,
            fake: false,
        }
    }

    /// Reverts every applied migration.
    pub fn revert_all() -> Self {
        Self::revert().scope(RunScope::All)
    }

    /// Sets the scope.
    pub fn scope(mut self, scope: RunScope) -> Self {
        self.scope = scope;
        self
    }

    /// Targets a single migration by name.
    pub fn single(self, name: impl Into<String>) -> Self {
        self.scope(RunScope::Single(name.into()))
    }

    /// Restricts the run to the given databases.
    pub fn only<I, D>(mut self, databases: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<DatabaseId>,
    {
        self.databases = Some(databases.into_iter().map(Into::into).collect());
        self
    }

    /// Records ledger changes without executing the steps.
    pub fn fake(mut self) -> Self {
        self.fake = true;
        self
    }

    fn validate(&self) -> FluentResult<()> {
        if self.mode == RunMode::Forward && self.scope == RunScope::LastBatch {
            return Err(FluentError::InvalidRunRequest(
                "a forward run cannot target the last batch".to_string(),
            ));
        }
        Ok(())
    }
}

/// The lifecycle state of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// Not started (or never reached).
    Pending,
    /// Executing.
    Running,
    /// Prepared and recorded.
    Applied,
    /// Failed; the chain stopped here.
    Failed,
    /// Reverted and removed from the ledger.
    Reverted,
}

/// The step that stopped a database's chain.
#[derive(Debug)]
pub struct StepFailure {
    /// The step name.
    pub name: String,
    /// The batch the step was running in.
    pub batch: i64,
    /// The phase that failed.
    pub phase: MigrationPhase,
    /// The error, wrapped in [`FluentError::StepFailed`].
    pub error: FluentError,
}

/// The outcome of a run on one database.
#[derive(Debug)]
pub struct DatabaseReport {
    /// The database.
    pub database: DatabaseId,
    /// The run direction.
    pub mode: RunMode,
    /// The batch applied (forward) or the newest batch touched (revert).
    /// `None` when there was nothing to do.
    pub batch: Option<i64>,
    /// Steps applied, in order.
    pub applied: Vec<String>,
    /// Steps reverted, in order.
    pub reverted: Vec<String>,
    /// The step that failed, if any.
    pub failed: Option<StepFailure>,
    /// Steps selected but never started.
    pub skipped: Vec<String>,
    /// Reverted steps that declared themselves irreversible; their revert
    /// was a no-op and only the ledger entry was removed.
    pub irreversible: Vec<String>,
    /// Ledger entries naming no registered step. Reported, never corrected.
    pub unregistered: Vec<String>,
    /// Whether the run stopped because of a shutdown signal.
    pub cancelled: bool,
}

impl DatabaseReport {
    fn new(database: DatabaseId, mode: RunMode) -> Self {
        Self {
            database,
            mode,
            batch: None,
            applied: Vec::new(),
            reverted: Vec::new(),
            failed: None,
            skipped: Vec::new(),
            irreversible: Vec::new(),
            unregistered: Vec::new(),
            cancelled: false,
        }
    }

    /// Returns `true` if no step failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }

    /// Returns the final state of `name` in this run.
    pub fn state_of(&self, name: &str) -> Option<StepState> {
        let named = |list: &[String]| list.iter().any(|n| n == name);
        if named(&self.applied) {
            Some(StepState::Applied)
        } else if named(&self.reverted) {
            Some(StepState::Reverted)
        } else if self.failed.as_ref().is_some_and(|f| f.name == name) {
            Some(StepState::Failed)
        } else if named(&self.skipped) {
            Some(StepState::Pending)
        } else {
            None
        }
    }
}

/// The outcome of a run across databases, in registry order.
#[derive(Debug)]
pub struct RunReport {
    /// The run direction.
    pub mode: RunMode,
    /// One report per targeted database.
    pub databases: Vec<DatabaseReport>,
}

impl RunReport {
    /// Returns the report for `database`.
    pub fn database(&self, database: &DatabaseId) -> Option<&DatabaseReport> {
        self.databases.iter().find(|r| r.database == *database)
    }

    /// Iterates over every applied step as `(database, name)`.
    pub fn applied(&self) -> impl Iterator<Item = (&DatabaseId, &str)> {
        self.databases
            .iter()
            .flat_map(|r| r.applied.iter().map(move |n| (&r.database, n.as_str())))
    }

    /// Iterates over every reverted step as `(database, name)`.
    pub fn reverted(&self) -> impl Iterator<Item = (&DatabaseId, &str)> {
        self.databases
            .iter()
            .flat_map(|r| r.reverted.iter().map(move |n| (&r.database, n.as_str())))
    }

    /// Iterates over the failures, one per failed database.
    pub fn failures(&self) -> impl Iterator<Item = (&DatabaseId, &StepFailure)> {
        self.databases
            .iter()
            .filter_map(|r| r.failed.as_ref().map(|f| (&r.database, f)))
    }

    /// Returns `true` if no database reported a failure.
    pub fn is_success(&self) -> bool {
        self.databases.iter().all(DatabaseReport::is_success)
    }

    /// Returns `true` if any database stopped on a shutdown signal.
    pub fn is_cancelled(&self) -> bool {
        self.databases.iter().any(|r| r.cancelled)
    }
}

/// One step a run would execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    /// The database.
    pub database: DatabaseId,
    /// The step name.
    pub name: String,
    /// The direction.
    pub mode: RunMode,
    /// The batch the step would be applied in, or is being reverted from.
    pub batch: i64,
}

/// The ordered steps a request selects, without executing them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    /// The steps, grouped by database in registry order.
    pub steps: Vec<PlannedStep>,
}

impl MigrationPlan {
    /// Returns whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns the step names for `database`, in execution order.
    pub fn names(&self, database: &DatabaseId) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.database == *database)
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// The ledger state of one registered step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepStatus {
    /// The step name.
    pub name: String,
    /// Whether the step is applied.
    pub applied: bool,
    /// The batch it was applied in.
    pub batch: Option<i64>,
    /// When it was applied.
    pub applied_at: Option<DateTime<Utc>>,
}

/// The migration status of one database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseStatus {
    /// The database.
    pub database: DatabaseId,
    /// Every registered step, in registration order.
    pub steps: Vec<StepStatus>,
    /// Ledger entries whose step is not registered.
    pub unregistered: Vec<String>,
}

impl DatabaseStatus {
    /// Returns the names of registered steps not yet applied.
    pub fn pending(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| !s.applied)
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// The work selected for one database.
enum Selection {
    Forward {
        batch: i64,
        steps: Vec<Arc<MigrationStep>>,
        skipped: Vec<String>,
        unregistered: Vec<String>,
    },
    Revert {
        entries: Vec<LedgerEntry>,
        skipped: Vec<String>,
        unregistered: Vec<String>,
    },
}

impl Selection {
    fn planned(&self, database: &DatabaseId) -> Vec<PlannedStep> {
        match self {
            Self::Forward { batch, steps, .. } => steps
                .iter()
                .map(|step| PlannedStep {
                    database: database.clone(),
                    name: step.name().to_string(),
                    mode: RunMode::Forward,
                    batch: *batch,
                })
                .collect(),
            Self::Revert { entries, .. } => entries
                .iter()
                .map(|entry| PlannedStep {
                    database: database.clone(),
                    name: entry.name.clone(),
                    mode: RunMode::Revert,
                    batch: entry.batch,
                })
                .collect(),
        }
    }
}

/// A step error tagged with the phase that produced it.
type StepOutcome<T> = Result<T, (MigrationPhase, FluentError)>;

/// Converts a failed task into an error, keeping the panic message.
fn join_error(error: JoinError) -> FluentError {
    if !error.is_panic() {
        return FluentError::OperationalError(format!("Task join error: {error}"));
    }
    let payload = error.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    FluentError::OperationalError(format!("migration panicked: {message}"))
}

/// Executes migrations registered in a [`MigrationRegistry`].
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    registry: Arc<MigrationRegistry>,
    databases: Databases,
    ledger: MigrationLedger,
    shutdown: Option<watch::Receiver<bool>>,
}

impl MigrationRunner {
    /// Creates a runner using the default ledger table.
    pub fn new(registry: MigrationRegistry, databases: Databases) -> Self {
        let ledger = MigrationLedger::new(databases.clone());
        Self {
            registry: Arc::new(registry),
            databases,
            ledger,
            shutdown: None,
        }
    }

    /// Creates a runner whose databases and ledger table come from `settings`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured database cannot be opened.
    pub fn from_settings(registry: MigrationRegistry, settings: &Settings) -> FluentResult<Self> {
        let databases = Databases::from_settings(settings)?;
        Ok(Self::new(registry, databases).with_ledger_table(&settings.ledger_table))
    }

    /// Stores the ledger in `table` instead of the default.
    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger = MigrationLedger::with_table(self.databases.clone(), table);
        self
    }

    /// Stops runs between steps once `shutdown` carries `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// The registry.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// The ledger.
    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    /// The databases.
    pub fn databases(&self) -> &Databases {
        &self.databases
    }

    /// Returns a connection to `database`.
    pub fn connection(&self, database: &DatabaseId) -> FluentResult<Connection> {
        Ok(Connection::new(database.clone(), self.databases.get(database)?))
    }

    /// Executes `request`.
    ///
    /// Step failures do not make this return `Err`; they are listed in the
    /// report. `Err` means the run could not start or its bookkeeping failed:
    /// an invalid request, an unknown database or single target, or a ledger
    /// read error.
    pub async fn run(&self, request: RunRequest) -> FluentResult<RunReport> {
        let targets = self.targets(&request)?;
        let mut tasks = JoinSet::new();
        for database in targets.clone() {
            let chain = DatabaseChain {
                connection: self.connection(&database)?,
                registry: Arc::clone(&self.registry),
                ledger: self.ledger.clone(),
                shutdown: self.shutdown.clone(),
                request: request.clone(),
                database,
            };
            let span = run_span(request.mode.as_str(), chain.database.as_str());
            tasks.spawn(chain.execute().instrument(span));
        }

        let mut finished = HashMap::new();
        let mut first_error = None;
        // Every chain runs to completion; errors are collected, never returned early.
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap_or_else(|e| Err(join_error(e))) {
                Ok(report) => {
                    finished.insert(report.database.clone(), report);
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let databases = targets
            .iter()
            .filter_map(|database| finished.remove(database))
            .collect();
        Ok(RunReport {
            mode: request.mode,
            databases,
        })
    }

    /// Returns the steps `request` would execute, without executing them.
    pub async fn plan(&self, request: &RunRequest) -> FluentResult<MigrationPlan> {
        let mut plan = MigrationPlan::default();
        for database in self.targets(request)? {
            let selection = select(&self.registry, &self.ledger, &database, request).await?;
            plan.steps.extend(selection.planned(&database));
        }
        Ok(plan)
    }

    /// Returns the ledger status of every database with registered steps.
    pub async fn status(&self) -> FluentResult<Vec<DatabaseStatus>> {
        let mut statuses = Vec::new();
        for database in self.registry.databases() {
            let entries = self.ledger.entries(database).await?;
            let by_name: HashMap<&str, &LedgerEntry> =
                entries.iter().map(|e| (e.name.as_str(), e)).collect();
            let steps = self
                .registry
                .all_steps(database)
                .map(|step| {
                    let entry = by_name.get(step.name());
                    StepStatus {
                        name: step.name().to_string(),
                        applied: entry.is_some(),
                        batch: entry.map(|e| e.batch),
                        applied_at: entry.map(|e| e.applied_at),
                    }
                })
                .collect();
            let unregistered = entries
                .iter()
                .filter(|e| !self.registry.contains(database, &e.name))
                .map(|e| e.name.clone())
                .collect();
            statuses.push(DatabaseStatus {
                database: database.clone(),
                steps,
                unregistered,
            });
        }
        Ok(statuses)
    }

    /// Resolves and validates the databases a request targets.
    fn targets(&self, request: &RunRequest) -> FluentResult<Vec<DatabaseId>> {
        request.validate()?;
        let targets: Vec<DatabaseId> = match &request.databases {
            Some(requested) => {
                let mut seen = HashSet::new();
                requested
                    .iter()
                    .filter(|d| seen.insert((*d).clone()))
                    .cloned()
                    .collect()
            }
            None => self.registry.databases().to_vec(),
        };
        for database in &targets {
            if !self.databases.contains(database) {
                return Err(FluentError::UnknownDatabase(database.to_string()));
            }
            if let RunScope::Single(name) = &request.scope {
                if !self.registry.contains(database, name) {
                    return Err(FluentError::UnknownMigration {
                        database: database.to_string(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(targets)
    }
}

/// Computes the work a request selects on one database.
async fn select(
    registry: &MigrationRegistry,
    ledger: &MigrationLedger,
    database: &DatabaseId,
    request: &RunRequest,
) -> FluentResult<Selection> {
    let entries = ledger.entries(database).await?;
    let unregistered: Vec<String> = entries
        .iter()
        .filter(|e| !registry.contains(database, &e.name))
        .map(|e| e.name.clone())
        .collect();
    match request.mode {
        RunMode::Forward => {
            let applied: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();
            let batch = entries.iter().map(|e| e.batch).max().map_or(1, |b| b + 1);
            let mut skipped = Vec::new();
            let steps = match &request.scope {
                RunScope::Single(name) if applied.contains(name.as_str()) => {
                    skipped.push(name.clone());
                    Vec::new()
                }
                RunScope::Single(name) => {
                    registry.get(database, name).into_iter().cloned().collect()
                }
                _ => registry
                    .all_steps(database)
                    .filter(|step| !applied.contains(step.name()))
                    .cloned()
                    .collect(),
            };
            Ok(Selection::Forward {
                batch,
                steps,
                skipped,
                unregistered,
            })
        }
        RunMode::Revert => {
            let mut skipped = Vec::new();
            let mut targets: Vec<LedgerEntry> = match &request.scope {
                RunScope::All => entries,
                RunScope::LastBatch => {
                    let latest = entries.iter().map(|e| e.batch).max();
                    entries
                        .into_iter()
                        .filter(|e| Some(e.batch) == latest)
                        .collect()
                }
                RunScope::Single(name) => {
                    let found: Vec<LedgerEntry> =
                        entries.into_iter().filter(|e| e.name == *name).collect();
                    if found.is_empty() {
                        skipped.push(name.clone());
                    }
                    found
                }
            };
            // Newest batch first; within a batch, reverse apply order.
            targets.sort_by(|a, b| b.batch.cmp(&a.batch).then(b.sequence.cmp(&a.sequence)));
            Ok(Selection::Revert {
                entries: targets,
                skipped,
                unregistered,
            })
        }
    }
}

/// The sequential chain of one database within a run.
struct DatabaseChain {
    database: DatabaseId,
    connection: Connection,
    registry: Arc<MigrationRegistry>,
    ledger: MigrationLedger,
    shutdown: Option<watch::Receiver<bool>>,
    request: RunRequest,
}

impl DatabaseChain {
    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn execute(self) -> FluentResult<DatabaseReport> {
        let selection = select(&self.registry, &self.ledger, &self.database, &self.request).await?;
        let mut report = DatabaseReport::new(self.database.clone(), self.request.mode);
        match selection {
            Selection::Forward {
                batch,
                steps,
                skipped,
                unregistered,
            } => {
                report.skipped = skipped;
                report.unregistered = unregistered;
                if steps.is_empty() {
                    tracing::info!(database = %self.database, "no pending migrations");
                } else {
                    report.batch = Some(batch);
                    self.forward(batch, &steps, &mut report).await;
                }
            }
            Selection::Revert {
                entries,
                skipped,
                unregistered,
            } => {
                report.skipped = skipped;
                report.unregistered = unregistered;
                if entries.is_empty() {
                    tracing::info!(database = %self.database, "no migrations to revert");
                } else {
                    report.batch = entries.first().map(|e| e.batch);
                    self.revert(&entries, &mut report).await;
                }
            }
        }
        if !report.unregistered.is_empty() {
            tracing::warn!(
                database = %self.database,
                unregistered = ?report.unregistered,
                "ledger lists migrations that are not registered"
            );
        }
        tracing::info!(
            applied = report.applied.len(),
            reverted = report.reverted.len(),
            skipped = report.skipped.len(),
            failed = report.failed.is_some(),
            cancelled = report.cancelled,
            "database run finished"
        );
        Ok(report)
    }

    async fn forward(
        &self,
        batch: i64,
        steps: &[Arc<MigrationStep>],
        report: &mut DatabaseReport,
    ) {
        for (idx, step) in steps.iter().enumerate() {
            if self.shutdown_requested() {
                self.cancel(report, steps[idx..].iter().map(|s| s.name().to_string()));
                return;
            }
            let span = migration_span(self.database.as_str(), step.name(), batch);
            let outcome = self.apply_step(step, batch).instrument(span).await;
            match outcome {
                Ok(()) => report.applied.push(step.name().to_string()),
                Err((phase, error)) => {
                    self.fail(report, step.name(), batch, phase, error);
                    report
                        .skipped
                        .extend(steps[idx + 1..].iter().map(|s| s.name().to_string()));
                    return;
                }
            }
        }
    }

    async fn apply_step(&self, step: &Arc<MigrationStep>, batch: i64) -> StepOutcome<()> {
        tracing::debug!(state = ?StepState::Running, "preparing migration");
        if !self.request.fake {
            self.run_isolated(step, RunMode::Forward)
                .await
                .map_err(|e| (MigrationPhase::Prepare, e))?;
        }
        self.ledger
            .mark_applied(&self.database, step.name(), batch)
            .await
            .map_err(|e| (MigrationPhase::Record, e))?;
        tracing::info!(
            state = ?StepState::Applied,
            fake = self.request.fake,
            outcome = "applied",
            "migration applied"
        );
        Ok(())
    }

    async fn revert(&self, entries: &[LedgerEntry], report: &mut DatabaseReport) {
        for (idx, entry) in entries.iter().enumerate() {
            if self.shutdown_requested() {
                self.cancel(report, entries[idx..].iter().map(|e| e.name.clone()));
                return;
            }
            let span = migration_span(self.database.as_str(), &entry.name, entry.batch);
            let outcome = self.revert_entry(entry).instrument(span).await;
            match outcome {
                Ok(noop) => {
                    if noop {
                        report.irreversible.push(entry.name.clone());
                    }
                    report.reverted.push(entry.name.clone());
                }
                Err((phase, error)) => {
                    self.fail(report, &entry.name, entry.batch, phase, error);
                    report
                        .skipped
                        .extend(entries[idx + 1..].iter().map(|e| e.name.clone()));
                    return;
                }
            }
        }
    }

    /// Reverts one ledger entry. Returns `true` when the revert was a no-op
    /// because the step is irreversible. Fake reverts never report a no-op.
    async fn revert_entry(&self, entry: &LedgerEntry) -> StepOutcome<bool> {
        let step = self.registry.get(&self.database, &entry.name).ok_or_else(|| {
            (
                MigrationPhase::Revert,
                FluentError::LedgerInconsistency {
                    database: self.database.to_string(),
                    name: entry.name.clone(),
                },
            )
        })?;
        tracing::debug!(state = ?StepState::Running, "reverting migration");

        let noop = !self.request.fake && !step.reversible();
        if self.request.fake {
            tracing::debug!("fake revert");
        } else if noop {
            tracing::info!(outcome = "noop_by_design", "migration is irreversible; revert skipped");
        } else {
            self.run_isolated(step, RunMode::Revert)
                .await
                .map_err(|e| (MigrationPhase::Revert, e))?;
        }
        self.ledger
            .mark_reverted(&self.database, &entry.name)
            .await
            .map_err(|e| (MigrationPhase::Record, e))?;
        if !noop {
            tracing::info!(
                state = ?StepState::Reverted,
                fake = self.request.fake,
                outcome = "reverted",
                "migration reverted"
            );
        }
        Ok(noop)
    }

    /// Runs one direction of `step` on its own task, so a panic fails only
    /// this step and the chain can still report it.
    async fn run_isolated(&self, step: &Arc<MigrationStep>, mode: RunMode) -> FluentResult<()> {
        let step = Arc::clone(step);
        let conn = self.connection.clone();
        let task = tokio::spawn(
            async move {
                match mode {
                    RunMode::Forward => step.prepare(&conn).await,
                    RunMode::Revert => step.revert(&conn).await,
                }
            }
            .in_current_span(),
        );
        task.await.map_err(join_error)?
    }

    fn fail(
        &self,
        report: &mut DatabaseReport,
        name: &str,
        batch: i64,
        phase: MigrationPhase,
        error: FluentError,
    ) {
        let error = error.in_step(name, phase, batch);
        if phase == MigrationPhase::Record {
            tracing::error!(
                database = %self.database,
                migration = name,
                batch,
                phase = %phase,
                state = ?StepState::Failed,
                error = %error,
                "migration ran but its ledger write failed; its changes are unrecorded"
            );
        } else {
            tracing::error!(
                database = %self.database,
                migration = name,
                batch,
                phase = %phase,
                state = ?StepState::Failed,
                error = %error,
                "migration failed"
            );
        }
        let done = match report.mode {
            RunMode::Forward => &report.applied,
            RunMode::Revert => &report.reverted,
        };
        if !done.is_empty() {
            tracing::warn!(
                database = %self.database,
                completed = ?done,
                "stopped after partial progress; completed steps are not rolled back"
            );
        }
        report.failed = Some(StepFailure {
            name: name.to_string(),
            batch,
            phase,
            error,
        });
    }

    fn cancel(&self, report: &mut DatabaseReport, remaining: impl Iterator<Item = String>) {
        report.cancelled = true;
        report.skipped.extend(remaining);
        tracing::warn!(
            database = %self.database,
            skipped = report.skipped.len(),
            "shutdown requested; stopping between steps"
        );
    }
}
