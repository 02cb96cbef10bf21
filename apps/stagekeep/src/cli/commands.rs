//! # CLI Command Implementations
//!
//! Each command renders its result as a string (text or JSON) so the caller
//! decides where it goes.

use super::{CliError, Commands};
use crate::config::Config;
use chrono::{NaiveDateTime, TimeDelta};
use stagekeep_core::{
    KeyStore, MemoryStore, RedbKeyStore, StageId, StageReader, format_timestamp,
};

/// Placeholder for a time that has not been recorded.
const NOT_RECORDED: &str = "-";

// =============================================================================
// DISPATCH
// =============================================================================

/// Run one command against the configured database.
///
/// A database file that does not exist is an empty store: nothing has been
/// recorded yet, so the stage state is absent rather than broken. An existing
/// file is opened read-only and never modified.
pub fn run(
    config: &Config,
    command: &Commands,
    json_mode: bool,
    now: NaiveDateTime,
) -> Result<String, CliError> {
    if !config.database.exists() {
        tracing::debug!(
            database = %config.database.display(),
            "stage database not found, treating stage state as absent"
        );
        return dispatch(&MemoryStore::new(), config, command, json_mode, now);
    }

    let store =
        RedbKeyStore::open_read_only(&config.database).map_err(|source| CliError::Database {
            path: config.database.clone(),
            source,
        })?;
    dispatch(&store, config, command, json_mode, now)
}

fn dispatch<S: KeyStore>(
    store: &S,
    config: &Config,
    command: &Commands,
    json_mode: bool,
    now: NaiveDateTime,
) -> Result<String, CliError> {
    tracing::debug!(root = %config.root, ?command, "resolving stage state");
    let reader = StageReader::new(store, config.root.as_str());

    match command {
        Commands::Active => cmd_active(&reader, json_mode),
        Commands::Time { stage } => cmd_time(&reader, stage.as_deref(), json_mode),
        Commands::Stages => cmd_stages(&reader, json_mode),
        Commands::Status => cmd_status(&reader, json_mode, now, config.stage_timeout()?),
    }
}

// =============================================================================
// ACTIVE COMMAND
// =============================================================================

/// Show the active stage.
pub fn cmd_active<S: KeyStore>(
    reader: &StageReader<'_, S>,
    json_mode: bool,
) -> Result<String, CliError> {
    let stage = reader.active_stage()?;

    if json_mode {
        let output = serde_json::json!({
            "root": reader.root(),
            "active_stage": stage,
            "started": stage.is_started(),
        });
        return Ok(serde_json::to_string_pretty(&output)?);
    }
    Ok(stage.to_string())
}

// =============================================================================
// TIME COMMAND
// =============================================================================

/// Show when a stage started; the active stage when none is given.
pub fn cmd_time<S: KeyStore>(
    reader: &StageReader<'_, S>,
    stage: Option<&str>,
    json_mode: bool,
) -> Result<String, CliError> {
    let stage = match stage {
        Some(id) => StageId::new(id),
        None => {
            let active = reader.active_stage()?;
            if !active.is_started() {
                return Err(CliError::NoActiveStage(reader.root().to_string()));
            }
            active
        }
    };
    let start = reader.active_time(stage.as_str())?;

    if json_mode {
        let output = serde_json::json!({
            "root": reader.root(),
            "stage": stage,
            "start": format_timestamp(&start),
        });
        return Ok(serde_json::to_string_pretty(&output)?);
    }
    Ok(format_timestamp(&start))
}

// =============================================================================
// STAGES COMMAND
// =============================================================================

/// List every stage key with its start and end.
///
/// A stage key that has not been stamped yet is listed with no times.
pub fn cmd_stages<S: KeyStore>(
    reader: &StageReader<'_, S>,
    json_mode: bool,
) -> Result<String, CliError> {
    let mut records = Vec::new();
    for id in reader.stages()? {
        records.push(reader.record(id.as_str())?);
    }

    if json_mode {
        let output: Vec<_> = records
            .iter()
            .map(|record| {
                serde_json::json!({
                    "stage": record.stage,
                    "start": record.start.as_ref().map(format_timestamp),
                    "end": record.end.as_ref().map(format_timestamp),
                })
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&output)?);
    }

    if records.is_empty() {
        return Ok(format!("No stages recorded under {}", reader.root()));
    }

    let mut out = format!("{:<8}{:<28}{}", "Stage", "Start", "End");
    for record in &records {
        out.push_str(&format!(
            "\n{:<8}{:<28}{}",
            record.stage.as_str(),
            show_time(record.start),
            show_time(record.end)
        ));
    }
    Ok(out)
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show the active stage, its times and derived status.
pub fn cmd_status<S: KeyStore>(
    reader: &StageReader<'_, S>,
    json_mode: bool,
    now: NaiveDateTime,
    timeout: Option<TimeDelta>,
) -> Result<String, CliError> {
    let report = reader.report(now, timeout)?;
    let elapsed = report.elapsed(now);

    if json_mode {
        let output = serde_json::json!({
            "root": report.root,
            "active_stage": report.active,
            "status": report.status,
            "start": report.start.as_ref().map(format_timestamp),
            "end": report.end.as_ref().map(format_timestamp),
            "elapsed_seconds": elapsed.map(|d| d.num_seconds()),
            "timeout_minutes": timeout.map(|t| t.num_minutes()),
        });
        return Ok(serde_json::to_string_pretty(&output)?);
    }

    let mut out = String::new();
    out.push_str("Stage Status\n");
    out.push_str("============\n");
    out.push_str(&format!("Root:    {}\n", report.root));
    out.push_str(&format!("Active:  {}\n", report.active));
    out.push_str(&format!("Status:  {}\n", report.status));
    out.push_str(&format!("Start:   {}\n", show_time(report.start)));
    out.push_str(&format!("End:     {}\n", show_time(report.end)));
    out.push_str(&format!(
        "Elapsed: {}",
        elapsed.map_or_else(|| NOT_RECORDED.to_string(), format_elapsed)
    ));
    Ok(out)
}

/// Render a recorded time, or the placeholder when there is none.
fn show_time(ts: Option<NaiveDateTime>) -> String {
    ts.as_ref()
        .map(format_timestamp)
        .unwrap_or_else(|| NOT_RECORDED.to_string())
}

/// Render a duration as `Hh MMm SSs`, signed if negative.
pub fn format_elapsed(delta: TimeDelta) -> String {
    let total = delta.num_seconds();
    let sign = if total < 0 { "-" } else { "" };
    let secs = total.unsigned_abs();
    format!(
        "{sign}{}h {:02}m {:02}s",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}
