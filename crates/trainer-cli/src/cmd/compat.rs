use crate::cmd::reliability::rows;
use crate::input::{load_config, read_json};
use crate::output::{print_json, print_table};
use anyhow::Context;
use std::path::Path;
use trainer_core::compat::CompatibilityReporter;
use trainer_core::profile::TrainerProfile;
use trainer_core::reliability::ReliabilityEvaluator;
use trainer_core::session::{AttachSession, ExternalCatalog, SessionState};
use trainer_core::types::DependencyValidationStatus;

pub fn run(
    config: Option<&Path>,
    profile: &Path,
    session: Option<&Path>,
    dependency_status: Option<&str>,
    catalog: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let profile: TrainerProfile = read_json(profile, "profile")?;
    let session: SessionState = session
        .map(|p| read_json::<AttachSession>(p, "session"))
        .transpose()?
        .into();
    let dependency_status = dependency_status
        .map(|s| s.parse::<DependencyValidationStatus>())
        .transpose()
        .context("invalid --dependency-status")?;
    let catalog: Option<ExternalCatalog> = catalog
        .map(|p| read_json(p, "catalog"))
        .transpose()?;

    let reporter = CompatibilityReporter::new(ReliabilityEvaluator::with_default_rules(config));
    let report = reporter.build(&profile, &session, dependency_status, catalog.as_ref());

    if json {
        return print_json(&report);
    }

    println!("Profile:          {}", report.profile_id);
    println!(
        "Session:          {}",
        if report.session_attached { "attached" } else { "detached" }
    );
    println!("Runtime mode:     {}", report.runtime_mode);
    println!(
        "Dependencies:     {}",
        report
            .dependency_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Critical unresolved: {}", report.unresolved_critical_symbols);
    println!(
        "Promotion ready:  {}",
        if report.promotion_ready { "yes" } else { "no" }
    );
    println!();

    if !report.actions.is_empty() {
        print_table(
            &["ACTION", "STATE", "REASON", "CONFIDENCE", "NOTE"],
            rows(&report.actions),
        );
    }
    if !report.notes.is_empty() {
        println!();
        for note in &report.notes {
            println!("note: {note}");
        }
    }
    Ok(())
}
