//! Replication orchestrator - main workflow coordinator.
//!
//! A run discovers and orders the source catalog, freezes it into a
//! [`CatalogSnapshot`], then reconciles every target against that snapshot.
//! Discovery and ordering failures abort the run before any target is
//! touched. Each target runs as its own task with its own connections; a
//! failing target never affects the others.

mod report;

pub use report::{
    DiscoveredDatabase, EndpointHealth, FailedOperation, PlannedOperation, ReplicationReport,
    TargetReport, TargetStatus,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConnectionConfig};
use crate::connection::{ConnectionDescriptor, ExecutionPolicy};
use crate::core::catalog::{CatalogSnapshot, DatabaseSnapshot, TableSnapshot};
use crate::core::schema::{ConstraintDescriptor, TableStructure};
use crate::core::traits::PortFactory;
use crate::diff;
use crate::drivers::MysqlPortFactory;
use crate::error::{ReplicateError, Result};
use crate::ordering;

/// Replication orchestrator.
pub struct Replicator {
    config: Config,
    factory: Arc<dyn PortFactory>,
    dry_run: bool,
    parallel_targets: bool,
}

impl Replicator {
    /// Create a replicator that talks to real MySQL/MariaDB servers.
    pub fn new(config: Config) -> Self {
        Self::with_factory(config, Arc::new(MysqlPortFactory::new()))
    }

    /// Create a replicator that opens ports through `factory`.
    pub fn with_factory(config: Config, factory: Arc<dyn PortFactory>) -> Self {
        let parallel_targets = config.settings.parallel_targets;
        Self {
            config,
            factory,
            dry_run: false,
            parallel_targets,
        }
    }

    /// Compute and report operations without issuing any DDL.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Override `settings.parallel_targets`.
    pub fn with_parallel_targets(mut self, parallel: bool) -> Self {
        self.parallel_targets = parallel;
        self
    }

    fn policy(&self) -> ExecutionPolicy {
        ExecutionPolicy::from(&self.config.settings)
    }

    fn descriptor(&self, config: &ConnectionConfig, is_source: bool) -> Result<ConnectionDescriptor> {
        ConnectionDescriptor::from_config(config, is_source, Arc::clone(&self.factory), self.policy())
    }

    /// Run the replication.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ReplicationReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(
            "Starting replication run: {}{}",
            run_id,
            if self.dry_run { " (dry run)" } else { "" }
        );

        // Build every target before touching the source so a bad target
        // section fails before any connection is opened
        let targets = self
            .config
            .other_connections
            .iter()
            .map(|c| self.descriptor(c, false))
            .collect::<Result<Vec<_>>>()?;

        let mut source = self.descriptor(&self.config.replicated_connection, true)?;
        let snapshot = snapshot_with_cleanup(&mut source, &cancel).await?;
        let snapshot = Arc::new(snapshot);

        info!(
            "Phase 4: Replicating {} tables in {} databases to {} targets",
            snapshot.table_count(),
            snapshot.databases.len(),
            targets.len()
        );

        let target_reports = if self.parallel_targets {
            let mut handles = Vec::with_capacity(targets.len());
            for target in targets {
                let label = target.label().to_string();
                let snapshot = Arc::clone(&snapshot);
                let cancel = cancel.clone();
                let dry_run = self.dry_run;
                let handle =
                    tokio::spawn(async move { replicate_target(target, snapshot, dry_run, cancel).await });
                handles.push((label, handle));
            }

            let mut reports = Vec::with_capacity(handles.len());
            for (label, handle) in handles {
                match handle.await {
                    Ok(report) => reports.push(report),
                    Err(e) => {
                        error!("{}: replication task failed: {}", label, e);
                        let mut report = TargetReport::new(label);
                        report.status = TargetStatus::Skipped;
                        report.error = Some(format!("task failed: {}", e));
                        reports.push(report);
                    }
                }
            }
            reports
        } else {
            let mut reports = Vec::with_capacity(targets.len());
            for target in targets {
                reports.push(
                    replicate_target(target, Arc::clone(&snapshot), self.dry_run, cancel.clone())
                        .await,
                );
            }
            reports
        };

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let report = ReplicationReport {
            run_id,
            dry_run: self.dry_run,
            started_at,
            completed_at,
            duration_seconds: duration,
            databases: snapshot.databases.len(),
            tables: snapshot.table_count(),
            targets: target_reports,
        };

        info!(
            "Replication run {} finished in {:.2}s: {}",
            report.run_id,
            report.duration_seconds,
            report.summary()
        );
        Ok(report)
    }

    /// Discover and order the source catalog without touching any target.
    pub async fn discover(&self) -> Result<Vec<DiscoveredDatabase>> {
        let mut source = self.descriptor(&self.config.replicated_connection, true)?;
        let result = discover_and_order(&mut source).await;
        source.close().await;

        let databases = result?;
        Ok(databases
            .into_iter()
            .map(|name| DiscoveredDatabase {
                tables: source
                    .catalog()
                    .tables(&name)
                    .map(<[String]>::to_vec)
                    .unwrap_or_default(),
                name,
            })
            .collect())
    }

    /// Check connectivity to every configured endpoint.
    pub async fn health_check(&self) -> Result<Vec<EndpointHealth>> {
        let mut endpoints = vec![("source", &self.config.replicated_connection)];
        endpoints.extend(self.config.other_connections.iter().map(|c| ("target", c)));

        let mut results = Vec::with_capacity(endpoints.len());
        for (role, config) in endpoints {
            let mut descriptor = self.descriptor(config, role == "source")?;
            let health = match descriptor.ping().await {
                Ok(latency) => {
                    info!("{} {}: OK ({} ms)", role, descriptor.label(), latency.as_millis());
                    EndpointHealth {
                        label: descriptor.label().to_string(),
                        role: role.to_string(),
                        healthy: true,
                        latency_ms: Some(latency.as_millis() as u64),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("{} {}: {}", role, descriptor.label(), e);
                    EndpointHealth {
                        label: descriptor.label().to_string(),
                        role: role.to_string(),
                        healthy: false,
                        latency_ms: None,
                        error: Some(e.format_detailed()),
                    }
                }
            };
            descriptor.close().await;
            results.push(health);
        }
        Ok(results)
    }
}

/// Phases 1-3 on the source, closing its ports on every exit path.
async fn snapshot_with_cleanup(
    source: &mut ConnectionDescriptor,
    cancel: &CancellationToken,
) -> Result<CatalogSnapshot> {
    let result = snapshot_source(source, cancel).await;
    source.close().await;
    result
}

async fn snapshot_source(
    source: &mut ConnectionDescriptor,
    cancel: &CancellationToken,
) -> Result<CatalogSnapshot> {
    let databases = discover_and_order(source).await?;

    info!("Phase 3: Snapshotting source catalog");
    let mut snapshot = CatalogSnapshot::default();
    for database in databases {
        if cancel.is_cancelled() {
            return Err(ReplicateError::Cancelled);
        }
        let result = snapshot_database(source, &database).await;
        source.release_database(&database).await;
        snapshot.databases.push(result?);
    }
    Ok(snapshot)
}

/// Phases 1-2: discover databases and tables, then order each database.
async fn discover_and_order(source: &mut ConnectionDescriptor) -> Result<Vec<String>> {
    info!("Phase 1: Discovering source catalog on {}", source.label());
    let databases = source.discover_databases().await?;
    for database in &databases {
        let tables = source.discover_tables(database).await?;
        info!("{}: {} tables", database, tables.len());
    }
    source.verify_table_selection()?;

    info!("Phase 2: Ordering tables by foreign key dependencies");
    for database in &databases {
        let tables = source
            .catalog()
            .tables(database)
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        let references = source.foreign_key_references(database, &tables).await?;
        let order = ordering::order_tables(database, &tables, &references)?;
        source.apply_order(database, order)?;
        source.release_database(database).await;
    }

    Ok(databases)
}

async fn snapshot_database(
    source: &mut ConnectionDescriptor,
    database: &str,
) -> Result<DatabaseSnapshot> {
    let (charset, collation) = source.database_defaults(database).await;
    let tables = source
        .catalog()
        .tables(database)
        .map(<[String]>::to_vec)
        .unwrap_or_default();

    let mut snapshots = Vec::with_capacity(tables.len());
    for table in tables {
        let create_statement = source.show_create_statement(database, &table).await?;
        let structure = source.describe_table(database, &table).await?;

        let mut constraints = BTreeMap::new();
        for column in structure.columns.iter().filter(|c| c.key.is_keyed()) {
            let descriptors = source
                .describe_constraints_for_column(database, &table, &column.name)
                .await?;
            constraints.insert(column.name.clone(), descriptors);
        }

        debug!(
            "{}.{}: {} columns, {} keyed",
            database,
            table,
            structure.columns.len(),
            constraints.len()
        );
        snapshots.push(TableSnapshot {
            name: table,
            create_statement,
            structure,
            constraints,
        });
    }

    Ok(DatabaseSnapshot {
        name: database.to_string(),
        charset,
        collation,
        tables: snapshots,
    })
}

/// Reconcile one target against the snapshot. Never fails: every outcome
/// lands in the report.
async fn replicate_target(
    mut target: ConnectionDescriptor,
    snapshot: Arc<CatalogSnapshot>,
    dry_run: bool,
    cancel: CancellationToken,
) -> TargetReport {
    let mut report = TargetReport::new(target.label().to_string());
    info!("{}: starting", report.target);

    for database in &snapshot.databases {
        if !target.selects_database(&database.name) {
            debug!("{}: database {} not selected", report.target, database.name);
            continue;
        }
        if cancel.is_cancelled() {
            report.status = TargetStatus::Cancelled;
            break;
        }

        let outcome = replicate_database(&mut target, database, dry_run, &cancel, &mut report).await;
        target.release_database(&database.name).await;

        if let Err(e) = outcome {
            match e {
                ReplicateError::Cancelled => report.status = TargetStatus::Cancelled,
                other => {
                    error!(
                        "{}: cannot ensure database {}, skipping target: {}",
                        report.target, database.name, other
                    );
                    report.status = TargetStatus::Skipped;
                    report.error = Some(other.to_string());
                }
            }
            break;
        }
        report.databases += 1;
    }

    target.close().await;

    match report.status {
        TargetStatus::Completed => info!(
            "{}: completed ({} applied, {} failed{})",
            report.target,
            report.operations_applied,
            report.operations_failed,
            if dry_run {
                format!(", {} planned", report.planned.len())
            } else {
                String::new()
            }
        ),
        TargetStatus::Cancelled => warn!("{}: cancelled", report.target),
        TargetStatus::Skipped => {}
    }
    report
}

/// Ensure one database exists, then diff and apply each table in order.
///
/// Returns `Err` only when the database cannot be ensured or the run was
/// cancelled; table-level failures are recorded and skipped.
async fn replicate_database(
    target: &mut ConnectionDescriptor,
    database: &DatabaseSnapshot,
    dry_run: bool,
    cancel: &CancellationToken,
    report: &mut TargetReport,
) -> Result<()> {
    let db = database.name.as_str();

    if !dry_run {
        target
            .create_database(db, database.charset.as_deref(), database.collation.as_deref())
            .await?;
    }

    for table in &database.tables {
        if !target.selects_table(&table.name) {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(ReplicateError::Cancelled);
        }
        report.tables_checked += 1;

        let current = match target.describe_table(db, &table.name).await {
            Ok(structure) => Some(structure),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!("{}: skipping {}.{}: {}", report.target, db, table.name, e);
                report.record_failure(db, &table.name, "describe table", &e);
                continue;
            }
        };

        let target_constraints = match &current {
            Some(structure) => {
                match extra_column_constraints(target, db, table, structure).await {
                    Ok(constraints) => constraints,
                    Err(e) => {
                        warn!("{}: skipping {}.{}: {}", report.target, db, table.name, e);
                        report.record_failure(db, &table.name, "read target constraints", &e);
                        continue;
                    }
                }
            }
            None => BTreeMap::new(),
        };

        let ops = diff::diff_table(table, current.as_ref(), &target_constraints);
        if ops.is_empty() {
            debug!("{}: {}.{} is in sync", report.target, db, table.name);
            continue;
        }

        for op in ops {
            if dry_run {
                info!("{}: [dry run] {}.{}: {}", report.target, db, table.name, op);
                report.planned.push(PlannedOperation {
                    database: db.to_string(),
                    operation: op,
                });
                continue;
            }

            match target.apply(db, &op).await {
                Ok(()) => report.operations_applied += 1,
                Err(e) => {
                    // Later operations on this table usually depend on this one
                    warn!(
                        "{}: {} failed, skipping rest of {}.{}: {}",
                        report.target, op.kind(), db, table.name, e
                    );
                    report.record_failure(db, &table.name, &op.to_string(), &e);
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Target-side constraints of keyed columns the source lacks.
async fn extra_column_constraints(
    target: &mut ConnectionDescriptor,
    database: &str,
    table: &TableSnapshot,
    current: &TableStructure,
) -> Result<BTreeMap<String, Vec<ConstraintDescriptor>>> {
    let keyed: Vec<String> = diff::extra_columns(&table.structure, current)
        .into_iter()
        .filter(|c| c.key.is_keyed())
        .map(|c| c.name.clone())
        .collect();

    let mut constraints = BTreeMap::new();
    for column in keyed {
        let descriptors = target
            .describe_constraints_for_column(database, &table.name, &column)
            .await?;
        constraints.insert(column, descriptors);
    }
    Ok(constraints)
}
