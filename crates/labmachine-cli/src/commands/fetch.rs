use super::{colorize_status, json_pretty, lab_err, open_controller, Context, StateArgs, EXIT_SUCCESS};
use tracing::debug;

pub fn run(ctx: &Context, args: &StateArgs) -> Result<u8, String> {
    let mut ctl = open_controller(ctx, args)?;
    let report = ctl.fetch().map_err(lab_err)?;
    let version = ctl.push().map_err(lab_err)?;
    debug!("pushed lab state version {version}");

    if ctx.json {
        println!("{}", json_pretty(&report)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("lab: {}", report.lab);
    match &report.instance {
        Some(instance) => {
            println!(
                "instance: {} ({})",
                instance.name,
                colorize_status(&instance.status.to_string())
            );
            if let Some(address) = &instance.address {
                println!("address:  {address}");
            }
            if let Some(url) = &instance.url {
                println!("url:      https://{url}");
            }
        }
        None => println!("instance: none"),
    }
    for volume in &report.volumes {
        println!(
            "volume:   {} {} GB ({})",
            volume.name,
            volume.size,
            colorize_status(&volume.status.to_string())
        );
    }
    if report.has_drift {
        println!("drift:");
        for entry in &report.drift {
            println!("  {} {}: {}", entry.resource, entry.name, entry.change);
        }
    } else {
        println!("no drift");
    }
    Ok(EXIT_SUCCESS)
}
