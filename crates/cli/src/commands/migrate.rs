use anyhow::Context;
use shiftdb_migrate::{
    DatabaseConnection, MigrationEngine, MigrationRecord, MigrationState, RollbackOutcome,
    StatusReport,
};

pub async fn apply(engine: &MigrationEngine, conn: &mut dyn DatabaseConnection) -> anyhow::Result<()> {
    let report = engine.apply(conn).await?;

    if report.is_noop() {
        println!("Nothing to migrate ({} already applied)", report.skipped);
        return Ok(());
    }

    for migration in &report.applied {
        println!("✅ Applied {}", migration.name);
    }
    println!(
        "Applied {} migration(s) in {}ms",
        report.applied_count(),
        report.execution_time_ms
    );
    Ok(())
}

pub async fn rollback(
    engine: &MigrationEngine,
    conn: &mut dyn DatabaseConnection,
    name: Option<&str>,
) -> anyhow::Result<()> {
    match engine.rollback(conn, name).await? {
        RollbackOutcome::NothingToRollBack => match name {
            Some(name) => println!("Migration {} is not applied, nothing to roll back", name),
            None => println!("No migrations to roll back"),
        },
        RollbackOutcome::RolledBack { name } => println!("↩️  Rolled back {}", name),
        RollbackOutcome::Skipped { name, reason } => {
            println!("⚠️  Skipped rollback of {}: {}", name, reason)
        }
    }
    Ok(())
}

pub fn create(engine: &MigrationEngine, name: &str) -> anyhow::Result<()> {
    let created = engine
        .create(name)
        .with_context(|| format!("Failed to create migration '{}'", name))?;

    println!("Created migration: {}", created.base_name);
    println!("  {}", created.up_path.display());
    println!("  {}", created.down_path.display());
    Ok(())
}

pub async fn list(
    engine: &MigrationEngine,
    conn: &mut dyn DatabaseConnection,
    json: bool,
) -> anyhow::Result<()> {
    let records = engine.list(conn).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        print!("{}", format_list(&records));
    }
    Ok(())
}

pub async fn status(
    engine: &MigrationEngine,
    conn: &mut dyn DatabaseConnection,
    json: bool,
) -> anyhow::Result<()> {
    let report = engine.status(conn).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", format_status(&report));
    }
    Ok(())
}

fn format_list(records: &[MigrationRecord]) -> String {
    if records.is_empty() {
        return "No migrations applied\n".to_string();
    }

    let mut out = String::from("Applied migrations:\n");
    for record in records {
        out.push_str(&format!(
            "  {}  {}\n",
            record.applied_at.format("%Y-%m-%d %H:%M:%S"),
            record.name
        ));
    }
    out
}

fn format_status(report: &StatusReport) -> String {
    let mut out = String::from("Migration Status:\n================\n");

    if report.migrations.is_empty() && report.orphaned.is_empty() {
        out.push_str("No migrations found\n");
        return out;
    }

    for migration in &report.migrations {
        let line = match &migration.state {
            MigrationState::Pending => format!("  ⏳ {}\n", migration.name),
            MigrationState::Applied { applied_at, drifted } => format!(
                "  {} {}  (applied {}){}\n",
                if *drifted { "⚠️ " } else { "✅" },
                migration.name,
                applied_at.format("%Y-%m-%d %H:%M:%S"),
                if *drifted { "  changed since applied" } else { "" }
            ),
        };
        out.push_str(&line);
    }

    for record in &report.orphaned {
        out.push_str(&format!("  ❓ {}  (applied, file missing)\n", record.name));
    }

    out.push_str(&format!(
        "\n{} pending, {} applied\n",
        report.pending_count(),
        report.migrations.len() - report.pending_count() + report.orphaned.len()
    ));
    out
}
