use super::{
    json_pretty, lab_err, open_controller, push_partial, spin_fail, spin_ok, spinner, Context,
    StateArgs, EXIT_SUCCESS,
};

pub fn run(ctx: &Context, args: &StateArgs) -> Result<u8, String> {
    let mut ctl = open_controller(ctx, args)?;
    let Some(instance) = ctl.state().instance.as_ref().map(|i| i.name.clone()) else {
        if ctx.json {
            println!("{}", json_pretty(&serde_json::json!({ "destroyed": null }))?);
        } else {
            println!("lab '{}' has no instance", ctl.state().project);
        }
        return Ok(EXIT_SUCCESS);
    };

    let before = ctl.state().clone();
    let pb = (!ctx.json).then(|| spinner(&format!("destroying {instance}...")));
    if let Err(e) = ctl.destroy_lab() {
        if let Some(pb) = &pb {
            spin_fail(pb, &format!("failed to destroy {instance}"));
        }
        push_partial(&mut ctl, &before);
        return Err(lab_err(e));
    }
    let version = ctl.push().map_err(lab_err)?;
    if let Some(pb) = &pb {
        spin_ok(pb, &format!("destroyed {instance}"));
    }

    if ctx.json {
        let payload = serde_json::json!({
            "destroyed": instance,
            "version": version,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}
