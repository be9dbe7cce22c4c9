// src/cli/migrate.rs — Database migration command
//
// Migrations run automatically whenever the store is opened; this command shows
// what is applied and can roll the schema back for development.

use rusqlite::Connection;

use crate::infra::config::Config;
use crate::memory::schema;

pub fn run_migrate(config: &Config, status_only: bool, rollback: Option<u32>) -> anyhow::Result<()> {
    let db_path = config.memory.resolved_db_path();

    if !db_path.exists() && (status_only || rollback.is_some()) {
        println!("No database found at: {}", db_path.display());
        return Ok(());
    }
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(&db_path)?;
    println!("Database: {}", db_path.display());

    if status_only {
        return show_migration_status(&conn);
    }

    if let Some(target) = rollback {
        println!("Rolling back to schema version {target}. Data in dropped tables is lost.");
        schema::rollback_to(&conn, target)?;
    } else {
        schema::run_migrations(&conn)?;
        println!("Migrations complete.");
    }
    show_migration_status(&conn)
}

fn show_migration_status(conn: &Connection) -> anyhow::Result<()> {
    let table_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='_migrations'",
        [],
        |row| row.get(0),
    )?;
    if !table_exists {
        println!("No migrations have been run yet.");
        return Ok(());
    }

    println!("Current schema version: {}", schema::current_version(conn)?);
    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM _migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, u32>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    for row in rows {
        let (version, name, applied_at) = row?;
        println!("  v{version}: {name} (applied {applied_at})");
    }
    Ok(())
}
