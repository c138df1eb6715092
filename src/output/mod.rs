//! Console rendering of job reports, batch results and existence snapshots.

use console::style;
use serde::Serialize;
use std::fmt::Write as _;

use crate::cli::OutputFormat;
use crate::pipeline::{BatchResult, ExistenceSnapshot, JobReport, JobStatus, Stage, StagePlan, VideoJob};
use crate::Result;

fn stage_list(stages: &[Stage]) -> String {
    if stages.is_empty() {
        "-".to_string()
    } else {
        stages.iter().map(|s| s.label()).collect::<Vec<_>>().join(", ")
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn format_job_report(report: &JobReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", style("✓").green().bold(), style(&report.video_id).bold());
    let _ = writeln!(out, "  Executed: {}", stage_list(&report.executed));
    let _ = writeln!(out, "  Fetched:  {}", stage_list(&report.fetched));
    let _ = write!(out, "  Skipped:  {}", stage_list(&report.skipped));
    out
}

pub fn format_batch_result(result: &BatchResult) -> String {
    let mut out = String::new();
    for outcome in &result.outcomes {
        match outcome.status {
            JobStatus::Success => {
                let _ = writeln!(out, "  {} {}", style("✓").green(), outcome.video_id);
            }
            JobStatus::Failed => {
                let _ = writeln!(
                    out,
                    "  {} {}: {}",
                    style("✗").red(),
                    outcome.video_id,
                    outcome.error.as_deref().unwrap_or("failed")
                );
            }
        }
    }
    let _ = write!(
        out,
        "{} succeeded, {} failed",
        style(result.succeeded()).green().bold(),
        style(result.failed()).red().bold()
    );
    out
}

#[derive(Serialize)]
struct SnapshotView<'a> {
    video_id: &'a str,
    folder: &'a str,
    stages: Vec<StageStatus>,
}

#[derive(Serialize)]
struct StageStatus {
    stage: Stage,
    file: String,
    exists: bool,
}

fn snapshot_view<'a>(job: &'a VideoJob, snapshot: &ExistenceSnapshot) -> SnapshotView<'a> {
    SnapshotView {
        video_id: &job.video_id,
        folder: &job.folder,
        stages: snapshot
            .entries()
            .map(|(stage, exists)| StageStatus {
                stage,
                file: job.stage_filename(stage),
                exists,
            })
            .collect(),
    }
}

pub fn format_snapshot(job: &VideoJob, snapshot: &ExistenceSnapshot) -> String {
    let mut out = format!("{}", style(job.source_path()).bold());
    for (stage, exists) in snapshot.entries() {
        let mark = if exists { style("✓").green() } else { style("✗").red() };
        let _ = write!(out, "\n  {} {:<14} {}", mark, stage.label(), job.stage_filename(stage));
    }
    out
}

pub fn format_stage_table(plan: &StagePlan) -> String {
    let mut out = String::new();
    let _ = write!(out, "{:<14} {:<18} {:<9} {}", "STAGE", "OUTPUT", "STATUS", "INPUTS");
    for stage in Stage::ALL {
        let inputs: Vec<String> = stage
            .dependencies()
            .iter()
            .map(|dependency| match dependency {
                crate::pipeline::Dependency::Source => "source".to_string(),
                crate::pipeline::Dependency::Required(s) => s.label().to_string(),
                crate::pipeline::Dependency::Optional(s) => format!("{}?", s.label()),
            })
            .collect();
        let status = if plan.is_enabled(stage) { "enabled" } else { "disabled" };
        let _ = write!(
            out,
            "\n{:<14} {:<18} {:<9} {}",
            stage.label(),
            stage.filename("{id}"),
            status,
            if inputs.is_empty() { "-".to_string() } else { inputs.join(", ") }
        );
    }
    out
}

pub fn print_job_report(report: &JobReport, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", format_job_report(report)),
        OutputFormat::Json => println!("{}", to_json(report)?),
    }
    Ok(())
}

pub fn print_batch_result(result: &BatchResult, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", format_batch_result(result)),
        OutputFormat::Json => println!("{}", to_json(result)?),
    }
    Ok(())
}

pub fn print_snapshot(job: &VideoJob, snapshot: &ExistenceSnapshot, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", format_snapshot(job, snapshot)),
        OutputFormat::Json => println!("{}", to_json(&snapshot_view(job, snapshot))?),
    }
    Ok(())
}
