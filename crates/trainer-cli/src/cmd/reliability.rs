use crate::input::{load_config, read_json};
use crate::output::{print_json, print_table};
use std::path::Path;
use trainer_core::profile::TrainerProfile;
use trainer_core::reliability::{ActionReliabilityInfo, ReliabilityEvaluator};
use trainer_core::session::{AttachSession, ExternalCatalog};

pub fn run(
    config: Option<&Path>,
    profile: &Path,
    session: &Path,
    catalog: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let profile: TrainerProfile = read_json(profile, "profile")?;
    let session: AttachSession = read_json(session, "session")?;
    let catalog: Option<ExternalCatalog> = catalog
        .map(|p| read_json(p, "catalog"))
        .transpose()?;

    let evaluator = ReliabilityEvaluator::with_default_rules(config);
    let actions = evaluator.evaluate(&profile, &session, catalog.as_ref());

    if json {
        return print_json(&serde_json::json!({
            "profileId": profile.id,
            "runtimeMode": session.mode.as_str(),
            "actions": actions,
        }));
    }

    if actions.is_empty() {
        println!("Profile '{}' declares no actions.", profile.id);
        return Ok(());
    }
    print_table(
        &["ACTION", "STATE", "REASON", "CONFIDENCE", "NOTE"],
        rows(&actions),
    );
    Ok(())
}

pub(crate) fn rows(actions: &[ActionReliabilityInfo]) -> Vec<Vec<String>> {
    actions
        .iter()
        .map(|a| {
            vec![
                a.action_id.clone(),
                a.state.to_string(),
                a.reason_code.clone(),
                format!("{:.2}", a.confidence),
                a.note.clone().unwrap_or_default(),
            ]
        })
        .collect()
}
