// src/cli/migrate.rs — Database migration command
//
// Migrations run automatically when the server opens the store; this command
// gives visibility and a way back for development databases.

use rusqlite::Connection;

use crate::db::schema;
use crate::infra::config::Config;

/// Show migration status, run pending migrations, or revert the latest one.
pub async fn run_migrate(config: &Config, status_only: bool, rollback: bool) -> anyhow::Result<()> {
    let db_path = config.database.resolved_path();

    if !db_path.exists() && (status_only || rollback) {
        println!("No database found at: {}", db_path.display());
        println!("Run `fieldwatch migrate` or `fieldwatch serve` to create it.");
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

    if rollback {
        let current = schema::current_version(&conn)?;
        if current == 0 {
            println!("No migrations to roll back.");
            return Ok(());
        }
        println!("Rolling back migration v{current}. Recorded data in its tables is lost.");
        schema::rollback_to(&conn, current - 1)?;
        return show_migration_status(&conn);
    }

    println!("Running database migrations...");
    schema::run_migrations(&conn)?;
    println!("Migrations complete.");
    show_migration_status(&conn)
}

fn show_migration_status(conn: &Connection) -> anyhow::Result<()> {
    let current = schema::current_version(conn)?;
    println!("Current schema version: {current}");

    let mut stmt =
        conn.prepare("SELECT version, name, applied_at FROM _migrations ORDER BY version")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, u32>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut any = false;
    for row in rows {
        let (version, name, applied_at) = row?;
        if !any {
            println!("Applied migrations:");
            any = true;
        }
        println!("  v{version}: {name} (applied {applied_at})");
    }
    if !any {
        println!("No migrations applied.");
    }
    Ok(())
}
