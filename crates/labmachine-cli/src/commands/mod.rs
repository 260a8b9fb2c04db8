pub mod clean;
pub mod completions;
pub mod destroy;
pub mod fetch;
pub mod init;
pub mod list;
pub mod up;
pub mod volumes;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use labmachine_core::{open_store, LabController, LabError};
use labmachine_providers::{ProviderRegistry, ProviderSettings};
use labmachine_schema::LabState;
use labmachine_store::{LabPointers, StoreError};
use std::io::{stderr, stdin, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_STATE_ERROR: u8 = 2;
pub const EXIT_PROVIDER_ERROR: u8 = 3;

/// Everything a command needs besides its own arguments.
pub struct Context {
    pub config: PathBuf,
    pub json: bool,
    pub registry: ProviderRegistry,
    pub settings: ProviderSettings,
}

/// Which lab state a command operates on.
#[derive(Debug, Clone, Default, Args)]
pub struct StateArgs {
    /// State locator; defaults to the current lab in the pointer file.
    #[arg(short, long)]
    pub state: Option<String>,
    /// Lab name from the pointer file.
    #[arg(long, conflicts_with = "state")]
    pub lab: Option<String>,
}

/// Prefix an error so `main` can pick the exit code.
pub fn lab_err(err: LabError) -> String {
    if err.is_state_error() {
        format!("state error: {err}")
    } else if err.is_provider_error() {
        format!("provider error: {err}")
    } else {
        err.to_string()
    }
}

pub fn store_err(err: StoreError) -> String {
    format!("state error: {err}")
}

pub fn resolve_locator(ctx: &Context, args: &StateArgs) -> Result<String, String> {
    if let Some(locator) = &args.state {
        return Ok(locator.clone());
    }
    let pointers = LabPointers::load(&ctx.config).map_err(store_err)?;
    pointers
        .resolve(args.lab.as_deref())
        .map(str::to_owned)
        .map_err(store_err)
}

pub fn open_controller(ctx: &Context, args: &StateArgs) -> Result<LabController, String> {
    let locator = resolve_locator(ctx, args)?;
    let store = open_store(&locator).map_err(lab_err)?;
    LabController::from_state(&ctx.registry, &ctx.settings, store).map_err(lab_err)
}

/// After a failed operation, persist whatever the controller recorded so a
/// later `fetch` or `destroy` can find resources that were left behind.
pub fn push_partial(ctl: &mut LabController, before: &LabState) {
    if ctl.state() == before {
        return;
    }
    match ctl.push() {
        Ok(version) => eprintln!(
            "saved partial lab state (version {version}); run 'labctl fetch' or 'labctl destroy'"
        ),
        Err(e) => eprintln!("warning: could not save partial lab state: {e}"),
    }
}

pub fn confirm(prompt: &str, yes: bool) -> Result<bool, String> {
    if yes {
        return Ok(true);
    }
    if !(stdin().is_terminal() && stderr().is_terminal()) {
        return Err(format!("{prompt} requires confirmation (pass --yes)"));
    }
    dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| format!("prompt failed: {e}"))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "running" | "available" => Style::new().green().apply_to(status).to_string(),
        "attached" => Style::new().cyan().bold().apply_to(status).to_string(),
        "pending" | "partial" | "creating" => Style::new().yellow().apply_to(status).to_string(),
        "detached" => Style::new().blue().apply_to(status).to_string(),
        "deleting" => Style::new().red().apply_to(status).to_string(),
        "stopped" => Style::new().dim().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(config: PathBuf) -> Context {
        Context {
            config,
            json: false,
            registry: ProviderRegistry::builtin(),
            settings: ProviderSettings::default(),
        }
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_STATE_ERROR);
        assert_ne!(EXIT_STATE_ERROR, EXIT_PROVIDER_ERROR);
    }

    #[test]
    fn lab_err_prefixes_by_category() {
        let state = lab_err(LabError::StateNotFound("state.json".to_owned()));
        assert!(state.starts_with("state error:"));
        let provider = lab_err(LabError::ProvisionTimeout {
            lab: "demo".to_owned(),
            instance: "demo-lab-1".to_owned(),
            minutes: 20,
        });
        assert!(provider.starts_with("provider error:"));
        let other = lab_err(LabError::InvalidTransition {
            from: labmachine_schema::VolumeStatus::Deleting,
            to: labmachine_schema::VolumeStatus::Attached,
        });
        assert!(other.starts_with("invalid volume transition"));
    }

    #[test]
    fn explicit_state_wins_over_pointer_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().join("labmachine.toml"));
        let args = StateArgs {
            state: Some("other.json".to_owned()),
            lab: None,
        };
        assert_eq!(resolve_locator(&ctx, &args).unwrap(), "other.json");
    }

    #[test]
    fn locator_comes_from_current_lab() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("labmachine.toml");
        let mut pointers = LabPointers::default();
        pointers.register("demo", "state.json").unwrap();
        pointers.save(&config).unwrap();

        let ctx = ctx(config);
        assert_eq!(
            resolve_locator(&ctx, &StateArgs::default()).unwrap(),
            "state.json"
        );
        let missing = StateArgs {
            state: None,
            lab: Some("other".to_owned()),
        };
        assert!(resolve_locator(&ctx, &missing)
            .unwrap_err()
            .starts_with("state error:"));
    }

    #[test]
    fn no_pointer_file_is_a_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path().join("labmachine.toml"));
        let err = resolve_locator(&ctx, &StateArgs::default()).unwrap_err();
        assert!(err.starts_with("state error:"));
        assert!(err.contains("labctl init"));
    }

    #[test]
    fn confirm_with_yes_skips_prompt() {
        assert!(confirm("remove?", true).unwrap());
    }

    #[test]
    fn colorize_status_keeps_text() {
        for status in ["running", "pending", "attached", "deleting", "stopped"] {
            assert!(colorize_status(status).contains(status));
        }
        assert_eq!(colorize_status("unknown"), "unknown");
    }

    #[test]
    fn spinner_creates_progress_bar() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
