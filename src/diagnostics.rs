//! Server-side CDC status checks
//!
//! Read-only diagnostics over a regular SQL connection: wal_level, existing
//! replication slots with the WAL they retain, and the publications feeding
//! them. Also the slot teardown used when retiring a consumer.

use crate::core::{CdcConfig, CdcError, CdcResult};
use crate::utils::connection::{PgConnection, PgQueryResult};
use tracing::info;

/// Print a status report for the configured server.
pub fn print_status(config: &CdcConfig) -> CdcResult<()> {
    let connection = PgConnection::connect(&config.sql_conninfo())?;

    let wal_level = query(&connection, "SHOW wal_level;")?
        .getvalue(0, 0)
        .unwrap_or_else(|| "unknown".to_string());
    println!("wal_level: {}", wal_level);
    if wal_level != "logical" {
        println!("  (logical replication requires wal_level = logical)");
    }

    let slots = query(
        &connection,
        "SELECT slot_name, plugin, active, \
         pg_size_pretty(pg_wal_lsn_diff(pg_current_wal_lsn(), restart_lsn)) \
         FROM pg_replication_slots;",
    )?;
    println!("\nReplication slots:");
    if slots.ntuples() == 0 {
        println!("  (none)");
    }
    for row in 0..slots.ntuples() {
        println!(
            "  {} plugin={} active={} retained_wal={}",
            slots.getvalue(row, 0).unwrap_or_default(),
            slots.getvalue(row, 1).unwrap_or_default(),
            slots.getvalue(row, 2).unwrap_or_default(),
            slots.getvalue(row, 3).unwrap_or_default(),
        );
    }

    let publications = query(&connection, "SELECT pubname FROM pg_publication;")?;
    println!("\nPublications:");
    if publications.ntuples() == 0 {
        println!("  (none)");
    }
    for row in 0..publications.ntuples() {
        println!("  {}", publications.getvalue(row, 0).unwrap_or_default());
    }

    let tables = query(
        &connection,
        "SELECT pubname, schemaname, tablename FROM pg_publication_tables;",
    )?;
    println!("\nPublication tables:");
    if tables.ntuples() == 0 {
        println!("  (none)");
    }
    for row in 0..tables.ntuples() {
        println!(
            "  {}: {}.{}",
            tables.getvalue(row, 0).unwrap_or_default(),
            tables.getvalue(row, 1).unwrap_or_default(),
            tables.getvalue(row, 2).unwrap_or_default(),
        );
    }

    Ok(())
}

/// Drop the configured replication slot so the server stops retaining WAL
/// for it.
pub fn drop_slot(config: &CdcConfig) -> CdcResult<()> {
    let connection = PgConnection::connect(&config.sql_conninfo())?;

    let drop_sql = format!(
        "SELECT pg_drop_replication_slot('{}');",
        config.slot_name
    );
    let result = connection.exec(&drop_sql)?;
    if !result.is_ok() {
        return Err(CdcError::slot(format!(
            "Failed to drop replication slot '{}': {}",
            config.slot_name,
            result
                .error_message()
                .unwrap_or_else(|| format!("status {:?}", result.status()))
        )));
    }

    info!("Dropped replication slot: {}", config.slot_name);
    Ok(())
}

fn query(connection: &PgConnection, sql: &str) -> CdcResult<PgQueryResult> {
    let result = connection.exec(sql)?;
    if !result.is_ok() {
        return Err(CdcError::connection(format!(
            "Query failed: {}",
            result
                .error_message()
                .unwrap_or_else(|| format!("status {:?}", result.status()))
        )));
    }
    Ok(result)
}
