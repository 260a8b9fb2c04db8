use super::{
    colorize_status, confirm, json_pretty, lab_err, open_controller, Context, StateArgs,
    EXIT_FAILURE, EXIT_SUCCESS,
};
use labmachine_schema::VolumeRecord;
use tracing::debug;

fn print_volume_table(volumes: &[VolumeRecord]) {
    println!(
        "{:<20} {:>8} {:<16} {:<12} {:<10} ATTACHED_TO",
        "NAME", "SIZE_GB", "LOCATION", "TYPE", "STATUS"
    );
    for v in volumes {
        println!(
            "{:<20} {:>8} {:<16} {:<12} {:<10} {}",
            v.name,
            v.size,
            v.location,
            v.storage_type,
            colorize_status(&v.status.to_string()),
            v.attached_to.as_deref().unwrap_or("")
        );
    }
}

pub fn create(
    ctx: &Context,
    args: &StateArgs,
    name: &str,
    size: u64,
    storage_type: &str,
) -> Result<u8, String> {
    let mut ctl = open_controller(ctx, args)?;
    let record = ctl
        .create_volume(name, size, storage_type)
        .map_err(lab_err)?;
    let version = ctl.push().map_err(lab_err)?;
    debug!("pushed lab state version {version}");
    if ctx.json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!("created volume {} ({} GB, {})", record.name, record.size, record.storage_type);
    }
    Ok(EXIT_SUCCESS)
}

pub fn list(ctx: &Context, args: &StateArgs, all: bool) -> Result<u8, String> {
    let ctl = open_controller(ctx, args)?;
    let volumes = ctl.list_volumes(all).map_err(lab_err)?;
    if ctx.json {
        println!("{}", json_pretty(&volumes)?);
    } else if volumes.is_empty() {
        println!("no volumes found");
    } else {
        print_volume_table(&volumes);
    }
    Ok(EXIT_SUCCESS)
}

pub fn import(ctx: &Context, args: &StateArgs, name: &str) -> Result<u8, String> {
    let mut ctl = open_controller(ctx, args)?;
    let record = ctl.import_volume(name).map_err(lab_err)?;
    ctl.push().map_err(lab_err)?;
    if ctx.json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!("imported volume {} ({} GB, {})", record.name, record.size, record.status);
    }
    Ok(EXIT_SUCCESS)
}

pub fn resize(ctx: &Context, args: &StateArgs, name: &str, size: u64) -> Result<u8, String> {
    let mut ctl = open_controller(ctx, args)?;
    let resized = ctl.resize_volume(name, size).map_err(lab_err)?;
    if resized {
        ctl.push().map_err(lab_err)?;
    }
    if ctx.json {
        let payload = serde_json::json!({
            "volume": name,
            "size": size,
            "resized": resized,
        });
        println!("{}", json_pretty(&payload)?);
    } else if resized {
        println!("resized volume {name} to {size} GB");
    } else {
        eprintln!("volume {name} was not resized (volumes can only grow)");
    }
    Ok(if resized { EXIT_SUCCESS } else { EXIT_FAILURE })
}

pub fn destroy(ctx: &Context, args: &StateArgs, name: &str, yes: bool) -> Result<u8, String> {
    let mut ctl = open_controller(ctx, args)?;
    if !confirm(&format!("delete volume {name} and its data?"), yes)? {
        println!("aborted");
        return Ok(EXIT_FAILURE);
    }
    let deleted = ctl.destroy_volume(name).map_err(lab_err)?;
    if deleted {
        ctl.push().map_err(lab_err)?;
    }
    if ctx.json {
        let payload = serde_json::json!({
            "volume": name,
            "deleted": deleted,
        });
        println!("{}", json_pretty(&payload)?);
    } else if deleted {
        println!("deleted volume {name}");
    } else {
        eprintln!("volume {name} was not deleted; it may still be attached");
    }
    Ok(if deleted { EXIT_SUCCESS } else { EXIT_FAILURE })
}
