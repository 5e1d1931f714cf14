use crate::output::{print_json, print_table};
use trainer_core::sdk::catalog::SdkOperationCatalog;
use trainer_core::sdk::extender::ExtenderBackend;

pub fn run(json: bool) -> anyhow::Result<()> {
    let catalog = SdkOperationCatalog::v1();
    let extender = ExtenderBackend::default();
    let probe = extender.probe();

    if json {
        let ops: Vec<serde_json::Value> = catalog
            .operations()
            .iter()
            .map(|op| {
                serde_json::json!({
                    "id": op.id,
                    "isMutation": op.is_mutation,
                    "allowedModes": op.allowed_mode_names(),
                    "extenderAvailable": probe.is_available(op.id),
                })
            })
            .collect();
        return print_json(&ops);
    }

    let rows = catalog
        .operations()
        .iter()
        .map(|op| {
            let modes = if op.allowed_modes.is_empty() {
                "any".to_string()
            } else {
                op.allowed_mode_names().join(",")
            };
            vec![
                op.id.to_string(),
                if op.is_mutation { "mutation" } else { "read" }.to_string(),
                modes,
                if probe.is_available(op.id) { "yes" } else { "-" }.to_string(),
            ]
        })
        .collect();
    print_table(&["OPERATION", "KIND", "MODES", "EXTENDER"], rows);
    Ok(())
}
