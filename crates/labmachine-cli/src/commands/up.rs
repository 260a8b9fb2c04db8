use super::{
    json_pretty, lab_err, open_controller, push_partial, spin_fail, spin_ok, spinner, Context,
    EXIT_FAILURE, EXIT_SUCCESS,
};
use crate::UpArgs;
use labmachine_core::{shutdown_requested, ControllerOptions, LabHandle, LabOptions};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const SERVICE_POLL: Duration = Duration::from_secs(10);

fn lab_options(args: &UpArgs) -> LabOptions {
    LabOptions {
        container: args.container.clone(),
        boot_image: args.boot_image.clone(),
        instance_type: args.instance_type.clone(),
        volume: args.volume.clone(),
        network: args.network.clone(),
        tags: split_tags(&args.tags),
        timeout_minutes: args.timeout,
        debug: args.debug,
    }
}

fn split_tags(tags: &str) -> Vec<String> {
    tags.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

pub fn run(ctx: &Context, args: &UpArgs) -> Result<u8, String> {
    let mut ctl = open_controller(ctx, &args.state)?.with_options(ControllerOptions {
        poll_interval: Duration::from_secs(args.poll_interval),
    });
    if let Some(volume) = &args.volume {
        if !ctl.check_volume(volume) {
            return Err(format!(
                "volume '{volume}' is not tracked by this lab; create it with 'labctl volumes create' or 'labctl volumes import'"
            ));
        }
    }

    let before = ctl.state().clone();
    let pb = (!ctx.json).then(|| spinner("creating lab instance..."));
    let handle = match ctl.create_lab(&lab_options(args)) {
        Ok(handle) => handle,
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "lab creation failed");
            }
            push_partial(&mut ctl, &before);
            return Err(lab_err(e));
        }
    };
    let version = ctl.push().map_err(lab_err)?;
    if let Some(pb) = &pb {
        spin_ok(pb, &format!("lab instance {} running", handle.instance));
    }
    debug!("pushed lab state version {version}");

    let mut code = EXIT_SUCCESS;
    if args.wait && !wait_for_service(&handle, args.timeout, ctx.json) {
        code = EXIT_FAILURE;
    }

    if ctx.json {
        println!("{}", json_pretty(&handle)?);
    } else {
        println!("url:   https://{}", handle.url);
        println!("token: {}", handle.token);
    }
    Ok(code)
}

/// `None` when `timeout_minutes` is past what `Instant` can represent.
fn service_deadline(timeout_minutes: u64) -> Option<Instant> {
    Instant::now().checked_add(Duration::from_secs(timeout_minutes.saturating_mul(60)))
}

/// Poll `https://<url>` until it answers 200 or `timeout_minutes` pass.
fn wait_for_service(handle: &LabHandle, timeout_minutes: u64, quiet: bool) -> bool {
    let url = format!("https://{}", handle.url);
    let config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(SERVICE_POLL))
        .build();
    let agent = ureq::Agent::new_with_config(config);
    let deadline = service_deadline(timeout_minutes);
    let pb = (!quiet).then(|| spinner(&format!("waiting for {url}...")));

    loop {
        match agent.get(&url).call() {
            Ok(resp) if resp.status().as_u16() == 200 => {
                info!("{url} is serving");
                if let Some(pb) = &pb {
                    spin_ok(pb, &format!("{url} is serving"));
                }
                return true;
            }
            Ok(resp) => debug!("{url} answered {}", resp.status().as_u16()),
            Err(e) => debug!("{url} not reachable yet: {e}"),
        }
        if shutdown_requested() || deadline.is_some_and(|d| Instant::now() >= d) {
            if let Some(pb) = &pb {
                spin_fail(pb, &format!("{url} did not answer within {timeout_minutes} minutes"));
            }
            return false;
        }
        std::thread::sleep(SERVICE_POLL);
    }
}
