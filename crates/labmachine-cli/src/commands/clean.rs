use super::{
    confirm, json_pretty, lab_err, resolve_locator, store_err, Context, StateArgs, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use labmachine_core::open_store;
use labmachine_store::LabPointers;
use tracing::warn;

pub fn run(ctx: &Context, args: &StateArgs, yes: bool) -> Result<u8, String> {
    let locator = resolve_locator(ctx, args)?;
    let store = open_store(&locator).map_err(lab_err)?;
    if let Ok(state) = store.pull() {
        if state.has_instance() {
            warn!(
                "lab '{}' still records an instance; it will no longer be tracked",
                state.project
            );
        }
    }
    if !confirm(&format!("remove lab state at {locator}?"), yes)? {
        println!("aborted");
        return Ok(EXIT_FAILURE);
    }

    let removed = store.clean().map_err(store_err)?;

    let mut pointers = LabPointers::load(&ctx.config).map_err(store_err)?;
    let lab = pointers.lab_for_locator(&locator).map(str::to_owned);
    if let Some(lab) = &lab {
        pointers.remove(lab);
        if pointers.labs.is_empty() {
            match std::fs::remove_file(&ctx.config) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(format!("failed to remove {}: {e}", ctx.config.display())),
            }
        } else {
            pointers.save(&ctx.config).map_err(store_err)?;
        }
    }

    if ctx.json {
        let payload = serde_json::json!({
            "locator": locator,
            "removed": removed,
            "lab": lab,
        });
        println!("{}", json_pretty(&payload)?);
    } else if removed {
        println!("removed lab state at {locator}");
    } else {
        println!("no lab state at {locator}");
    }
    Ok(EXIT_SUCCESS)
}
