use super::{json_pretty, lab_err, store_err, Context, EXIT_SUCCESS};
use labmachine_core::{open_store, InitOutcome, InitParams, LabController};
use labmachine_store::LabPointers;

pub fn run(ctx: &Context, params: &InitParams, locator: &str) -> Result<u8, String> {
    let mut pointers = LabPointers::load(&ctx.config).map_err(store_err)?;
    if let Some(existing) = pointers.labs.get(&params.project) {
        if existing != locator {
            return Err(format!(
                "state error: lab '{}' is already registered at {existing}",
                params.project
            ));
        }
    }

    let store = open_store(locator).map_err(lab_err)?;
    match LabController::init(&ctx.registry, params, &store).map_err(lab_err)? {
        InitOutcome::Created(state) => {
            if !pointers.labs.contains_key(&state.project) {
                pointers
                    .register(&state.project, locator)
                    .map_err(store_err)?;
            }
            pointers.current = Some(state.project.clone());
            pointers.save(&ctx.config).map_err(store_err)?;
            if ctx.json {
                println!("{}", json_pretty(&state)?);
            } else {
                println!(
                    "initialized lab '{}' at {locator} (compute: {}, dns: {}, zone: {})",
                    state.project, state.compute_provider, state.dns_provider, state.dns_id
                );
            }
        }
        InitOutcome::AlreadyExists { locator: existing } => {
            if ctx.json {
                let payload = serde_json::json!({
                    "created": false,
                    "locator": existing,
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                println!("lab state already exists at {existing}");
                println!("run 'labctl fetch --state {locator}' to inspect it");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
