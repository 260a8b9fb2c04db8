mod commands;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use commands::{Context, StateArgs, EXIT_FAILURE, EXIT_PROVIDER_ERROR, EXIT_STATE_ERROR};
use labmachine_core::install_signal_handler;
use labmachine_providers::{ProviderRegistry, ProviderSettings};
use labmachine_store::POINTER_FILE;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "labctl",
    version,
    about = "Ephemeral notebook labs on interchangeable cloud providers"
)]
struct Cli {
    /// Pointer file mapping lab names to state locators.
    #[arg(long, default_value = POINTER_FILE, global = true)]
    config: PathBuf,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderFilter {
    Dns,
    Compute,
    All,
}

#[derive(Debug, Args)]
pub struct UpArgs {
    /// Tracked volume to attach to the instance.
    #[arg(long)]
    pub volume: Option<String>,
    /// Container image running the notebook service.
    #[arg(short, long, default_value = "jupyter/minimal-notebook:python-3.10.6")]
    pub container: String,
    /// Boot image of the instance.
    #[arg(short, long, default_value = "debian-11-bullseye-v20220822")]
    pub boot_image: String,
    /// Machine type; empty selects the provider default.
    #[arg(short = 'T', long, default_value = "")]
    pub instance_type: String,
    #[arg(short, long, default_value = "default")]
    pub network: String,
    /// Comma separated network tags.
    #[arg(short, long, default_value = "http-server,https-server")]
    pub tags: String,
    /// Minutes to wait for the instance (and, with --wait, the service).
    #[arg(long, default_value_t = 20)]
    pub timeout: u64,
    /// Seconds between instance status polls.
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,
    /// Enable the serial console on the instance.
    #[arg(short, long, default_value_t = false)]
    pub debug: bool,
    /// Wait until the notebook answers over HTTPS.
    #[arg(short, long, default_value_t = false)]
    pub wait: bool,
    #[command(flatten)]
    pub state: StateArgs,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Initialize a lab state descriptor and register it in the pointer file.
    Init {
        #[arg(short, long, default_value = "default")]
        project: String,
        /// Provider used for instances and volumes.
        #[arg(short = 'C', long, default_value = "gce")]
        compute_provider: String,
        /// Provider used for DNS records.
        #[arg(short = 'D', long, default_value = "gce")]
        dns_provider: String,
        #[arg(short, long)]
        location: Option<String>,
        /// DNS zone the lab registers its record under.
        #[arg(short, long)]
        dns_id: String,
        /// Where the state is stored: a path, file://, http(s):// or gs:// URL.
        #[arg(short, long, default_value = "state.json")]
        state: String,
    },
    /// List locations of a compute provider.
    ListLocations {
        #[arg(short = 'C', long, default_value = "gce")]
        compute_provider: String,
        #[arg(short = 'c', long)]
        filter_country: Option<String>,
    },
    /// List machine types of a compute provider.
    ListVmTypes {
        #[arg(short = 'C', long, default_value = "gce")]
        compute_provider: String,
        #[arg(short, long)]
        location: Option<String>,
    },
    /// List boot images of a compute provider.
    ListImages {
        #[arg(short = 'C', long, default_value = "gce")]
        compute_provider: String,
    },
    /// List DNS zones of a DNS provider.
    ListDns {
        #[arg(short = 'D', long, default_value = "gce")]
        dns_provider: String,
    },
    /// List registered compute and DNS providers.
    ListProviders {
        #[arg(value_enum, default_value_t = ProviderFilter::All)]
        kind: ProviderFilter,
    },
    /// Create the lab's instance and DNS record.
    Up(UpArgs),
    /// Reconcile the lab state with what the providers report.
    Fetch {
        #[command(flatten)]
        state: StateArgs,
    },
    /// Delete the lab's DNS record and instance.
    Destroy {
        #[command(flatten)]
        state: StateArgs,
    },
    /// Remove the lab state and its pointer entry.
    Clean {
        /// Skip the confirmation prompt.
        #[arg(short, long, default_value_t = false)]
        yes: bool,
        #[command(flatten)]
        state: StateArgs,
    },
    /// Volume operations.
    #[command(subcommand)]
    Volumes(VolumeCommands),
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum VolumeCommands {
    /// Create a volume and track it in the lab.
    Create {
        #[arg(short, long)]
        name: String,
        /// Size in GB.
        #[arg(short = 'S', long, default_value_t = 10)]
        size: u64,
        /// Storage type.
        #[arg(short, long, default_value = "pd-standard")]
        kind: String,
        #[command(flatten)]
        state: StateArgs,
    },
    /// List tracked volumes, or every provider volume with --all.
    List {
        #[arg(short, long, default_value_t = false)]
        all: bool,
        #[command(flatten)]
        state: StateArgs,
    },
    /// Track a volume that already exists at the provider.
    Import {
        #[arg(short, long)]
        name: String,
        #[command(flatten)]
        state: StateArgs,
    },
    /// Grow a tracked volume.
    Resize {
        #[arg(short, long)]
        name: String,
        /// New size in GB.
        #[arg(short = 'S', long)]
        size: u64,
        #[command(flatten)]
        state: StateArgs,
    },
    /// Delete a tracked volume.
    Destroy {
        #[arg(short, long)]
        name: String,
        /// Skip the confirmation prompt.
        #[arg(short, long, default_value_t = false)]
        yes: bool,
        #[command(flatten)]
        state: StateArgs,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LABCTL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let ctx = Context {
        config: cli.config,
        json: cli.json,
        registry: ProviderRegistry::builtin(),
        settings: ProviderSettings::from_env(),
    };

    let result = match cli.command {
        Commands::Init {
            project,
            compute_provider,
            dns_provider,
            location,
            dns_id,
            state,
        } => commands::init::run(
            &ctx,
            &labmachine_core::InitParams {
                project,
                compute_provider,
                dns_provider,
                location,
                dns_id,
            },
            &state,
        ),
        Commands::ListLocations {
            compute_provider,
            filter_country,
        } => commands::list::locations(&ctx, &compute_provider, filter_country.as_deref()),
        Commands::ListVmTypes {
            compute_provider,
            location,
        } => commands::list::vm_types(&ctx, &compute_provider, location.as_deref()),
        Commands::ListImages { compute_provider } => {
            commands::list::images(&ctx, &compute_provider)
        }
        Commands::ListDns { dns_provider } => commands::list::dns(&ctx, &dns_provider),
        Commands::ListProviders { kind } => commands::list::providers(&ctx, kind),
        Commands::Up(args) => commands::up::run(&ctx, &args),
        Commands::Fetch { state } => commands::fetch::run(&ctx, &state),
        Commands::Destroy { state } => commands::destroy::run(&ctx, &state),
        Commands::Clean { yes, state } => commands::clean::run(&ctx, &state, yes),
        Commands::Volumes(cmd) => match cmd {
            VolumeCommands::Create {
                name,
                size,
                kind,
                state,
            } => commands::volumes::create(&ctx, &state, &name, size, &kind),
            VolumeCommands::List { all, state } => commands::volumes::list(&ctx, &state, all),
            VolumeCommands::Import { name, state } => {
                commands::volumes::import(&ctx, &state, &name)
            }
            VolumeCommands::Resize { name, size, state } => {
                commands::volumes::resize(&ctx, &state, &name, size)
            }
            VolumeCommands::Destroy { name, yes, state } => {
                commands::volumes::destroy(&ctx, &state, &name, yes)
            }
        },
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("state error:") {
                EXIT_STATE_ERROR
            } else if msg.starts_with("provider error:") {
                EXIT_PROVIDER_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
