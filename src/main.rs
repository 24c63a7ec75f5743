use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use storage_prep::backend::HelperBackend;
use storage_prep::bdev::{BdevPrepareResponse, BdevScanResponse, NvmeOptions, ScanOptions};
use storage_prep::config::{ScmSocketResolver, ServerConfig, DEFAULT_HELPER_PATH};
use storage_prep::platform::SysfsPlatform;
use storage_prep::scm::{PmemOptions, PmemOutcome, ScmScanResponse, StdinConsent};
use storage_prep::storage_orchestrator::{StorageOptions, StoragePrepareReport, StorageScope};
use storage_prep::*;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "storage-prep")]
#[command(about = "Prepare local PMem and NVMe devices for use by a storage engine")]
#[command(version = "1.0.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Print results as JSON on stdout
    #[arg(short, long, global = true)]
    json: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    json_logging: bool,

    /// Host storage configuration file
    #[arg(short = 'o', long, global = true, env = "STORAGE_PREP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// NVMe SSD operations
    Nvme {
        #[command(subcommand)]
        action: NvmeAction,
    },

    /// Persistent memory (PMem) operations
    Scm {
        #[command(subcommand)]
        action: ScmAction,
    },

    /// Operations across all local storage
    Storage {
        #[command(subcommand)]
        action: StorageAction,
    },
}

#[derive(Subcommand)]
enum NvmeAction {
    /// Bind NVMe devices for user-space access
    Prepare {
        #[command(flatten)]
        devices: NvmeDeviceArgs,

        /// Number of hugepages to allocate
        #[arg(short = 'p', long)]
        hugepages: Option<u32>,

        /// Comma separated NUMA nodes to allocate hugepages on
        #[arg(long, default_value = "")]
        hugenodes: String,
    },

    /// Return NVMe devices to their kernel drivers
    Reset {
        #[command(flatten)]
        devices: NvmeDeviceArgs,
    },

    /// Scan NVMe devices
    Scan {
        /// Do not use VMD devices
        #[arg(long)]
        disable_vmd: bool,

        /// Devices are already prepared, skip the prepare and reset around the scan
        #[arg(long)]
        skip_prep: bool,
    },
}

#[derive(Args)]
struct NvmeDeviceArgs {
    /// PCI addresses to include, comma or space separated
    #[arg(default_value = "")]
    pci_allow_list: String,

    /// PCI addresses to exclude, comma or space separated
    #[arg(short = 'b', long, default_value = "")]
    pci_block_list: String,

    /// User that will access the devices (default: current user)
    #[arg(short = 'u', long)]
    target_user: Option<String>,

    /// Use UIO instead of VFIO (root only)
    #[arg(long)]
    disable_vfio: bool,

    /// Do not use VMD devices
    #[arg(long)]
    disable_vmd: bool,
}

#[derive(Subcommand)]
enum ScmAction {
    /// Create PMem regions and namespaces
    Prepare {
        #[command(flatten)]
        pmem: PmemArgs,

        /// Number of namespaces to create on each socket
        #[arg(short = 'S', long, default_value = "1")]
        scm_ns_per_socket: u32,
    },

    /// Remove PMem namespaces and regions
    Reset {
        #[command(flatten)]
        pmem: PmemArgs,
    },

    /// Scan PMem modules and namespaces
    Scan {
        /// Only scan this socket
        #[arg(long)]
        socket: Option<u32>,
    },
}

#[derive(Args)]
struct PmemArgs {
    /// Do not ask for confirmation
    #[arg(short, long)]
    force: bool,

    /// Only operate on this socket
    #[arg(long)]
    socket: Option<u32>,
}

#[derive(Subcommand)]
enum StorageAction {
    /// Prepare PMem and NVMe devices
    Prepare {
        /// Only prepare NVMe devices
        #[arg(short, long, conflicts_with = "scm_only")]
        nvme_only: bool,

        /// Only prepare PMem devices
        #[arg(short, long)]
        scm_only: bool,

        #[command(flatten)]
        pmem: PmemArgs,

        #[arg(short = 'S', long, default_value = "1")]
        scm_ns_per_socket: u32,

        #[command(flatten)]
        devices: NvmeDeviceArgs,

        #[arg(short = 'p', long)]
        hugepages: Option<u32>,

        #[arg(long, default_value = "")]
        hugenodes: String,
    },
}

/// Shared state for one invocation
struct Context {
    cfg: Option<ServerConfig>,
    platform: SysfsPlatform,
    json: bool,
}

impl Context {
    fn helper(&self) -> HelperBackend {
        match &self.cfg {
            Some(cfg) => HelperBackend::new(&cfg.helper_path),
            None => HelperBackend::new(DEFAULT_HELPER_PATH),
        }
    }

    /// Socket from the command line, otherwise from engine affinity
    fn socket(&self, requested: Option<u32>) -> Option<u32> {
        requested.or_else(|| ScmSocketResolver::new(self.cfg.as_ref(), &self.platform).resolve())
    }

    fn pmem_options(&self, args: &PmemArgs, ns_per_socket: u32) -> PmemOptions {
        PmemOptions {
            socket_id: self.socket(args.socket),
            ns_per_socket,
            force: args.force,
            json_output: self.json,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug, cli.json_logging);

    if let Err(e) = run(&cli) {
        // A consent refusal is reported but is not a fault
        if e.kind().is_fault() {
            tracing::error!(kind = %e.kind(), error = %e, "Command failed");
        }
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_logging(debug: bool, json: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs stay on stderr so JSON results on stdout are parseable
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .init();
    }
}

fn run(cli: &Cli) -> ProvisionResult<()> {
    let ctx = Context {
        cfg: ServerConfig::discover(cli.config.as_deref())?,
        platform: SysfsPlatform::new(),
        json: cli.json,
    };

    match &cli.command {
        Commands::Nvme { action } => run_nvme(&ctx, action),
        Commands::Scm { action } => run_scm(&ctx, action),
        Commands::Storage { action } => run_storage(&ctx, action),
    }
}

// ==================== NVME COMMANDS ====================

fn nvme_options(devices: &NvmeDeviceArgs) -> NvmeOptions {
    NvmeOptions {
        pci_allow_list: devices.pci_allow_list.clone(),
        pci_block_list: devices.pci_block_list.clone(),
        target_user: devices.target_user.clone(),
        disable_vfio: devices.disable_vfio,
        disable_vmd: devices.disable_vmd,
        ..Default::default()
    }
}

fn run_nvme(ctx: &Context, action: &NvmeAction) -> ProvisionResult<()> {
    match action {
        NvmeAction::Prepare {
            devices,
            hugepages,
            hugenodes,
        } => {
            let opts = NvmeOptions {
                hugepages: *hugepages,
                huge_nodes: hugenodes.clone(),
                ..nvme_options(devices)
            };
            let resp = NvmeProvisioner::new(ctx.helper(), ctx.cfg.as_ref(), &ctx.platform)
                .prepare(&opts)?;
            emit(ctx, &resp, print_nvme_prepare)
        }
        NvmeAction::Reset { devices } => {
            let resp = NvmeProvisioner::new(ctx.helper(), ctx.cfg.as_ref(), &ctx.platform)
                .reset(&nvme_options(devices))?;
            emit(ctx, &resp, |_| println!("NVMe devices returned to kernel drivers"))
        }
        NvmeAction::Scan {
            disable_vmd,
            skip_prep,
        } => {
            let opts = ScanOptions {
                disable_vmd: *disable_vmd,
                skip_prep: *skip_prep,
            };
            let resp = NvmeScanCoordinator::new(ctx.helper(), ctx.cfg.as_ref(), &ctx.platform)
                .scan(&opts)?;
            emit(ctx, &resp, print_nvme_scan)
        }
    }
}

// ==================== SCM COMMANDS ====================

fn run_scm(ctx: &Context, action: &ScmAction) -> ProvisionResult<()> {
    let consent = StdinConsent::stdio();
    let provisioner = PmemProvisioner::new(ctx.helper(), &consent);

    match action {
        ScmAction::Prepare {
            pmem,
            scm_ns_per_socket,
        } => {
            let outcome = provisioner.prepare(&ctx.pmem_options(pmem, *scm_ns_per_socket))?;
            emit(ctx, &outcome, print_pmem_outcome)
        }
        ScmAction::Reset { pmem } => {
            let outcome = provisioner.reset(&ctx.pmem_options(pmem, 0))?;
            emit(ctx, &outcome, print_pmem_outcome)
        }
        ScmAction::Scan { socket } => {
            let resp = provisioner.scan(ctx.socket(*socket))?;
            emit(ctx, &resp, print_scm_scan)
        }
    }
}

// ==================== STORAGE COMMANDS ====================

fn run_storage(ctx: &Context, action: &StorageAction) -> ProvisionResult<()> {
    match action {
        StorageAction::Prepare {
            nvme_only,
            scm_only,
            pmem,
            scm_ns_per_socket,
            devices,
            hugepages,
            hugenodes,
        } => {
            let opts = StorageOptions {
                scope: StorageScope::from_flags(*nvme_only, *scm_only),
                pmem: ctx.pmem_options(pmem, *scm_ns_per_socket),
                nvme: NvmeOptions {
                    hugepages: *hugepages,
                    huge_nodes: hugenodes.clone(),
                    ..nvme_options(devices)
                },
            };

            let consent = StdinConsent::stdio();
            let report = StorageOrchestrator::new(
                ctx.helper(),
                &consent,
                ctx.helper(),
                ctx.cfg.as_ref(),
                &ctx.platform,
            )
            .prepare(&opts)?;
            emit(ctx, &report, print_storage_report)
        }
    }
}

// ==================== OUTPUT ====================

/// Print `value` as JSON in JSON mode, otherwise through `human`
fn emit<T: Serialize>(ctx: &Context, value: &T, human: impl Fn(&T)) -> ProvisionResult<()> {
    if ctx.json {
        let out = serde_json::to_string_pretty(value).map_err(io::Error::from)?;
        println!("{}", out);
    } else {
        human(value);
    }
    Ok(())
}

fn print_nvme_prepare(resp: &BdevPrepareResponse) {
    println!("NVMe devices prepared for user-space access");
    if resp.nr_hugepages_removed > 0 || !resp.lockfiles_removed.is_empty() {
        println!(
            "Removed {} stale hugepage files and {} lockfiles",
            resp.nr_hugepages_removed,
            resp.lockfiles_removed.len()
        );
    }
}

fn print_nvme_scan(resp: &BdevScanResponse) {
    if resp.controllers.is_empty() {
        println!("No NVMe controllers found");
        return;
    }

    println!(
        "{:<14} {:<24} {:<20} {:<10} {:>6} {:>10}",
        "PCI Address", "Model", "Serial", "FW", "Socket", "Capacity"
    );
    println!("{}", "-".repeat(89));
    for ctrlr in &resp.controllers {
        let socket = ctrlr
            .socket_id
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<14} {:<24} {:<20} {:<10} {:>6} {:>10}",
            ctrlr.pci_addr,
            ctrlr.model,
            ctrlr.serial,
            ctrlr.fw_rev,
            socket,
            format_bytes(ctrlr.capacity())
        );
    }
}

fn print_pmem_outcome(outcome: &PmemOutcome) {
    match outcome {
        PmemOutcome::ConsentDeclined => println!("Operation cancelled, no changes made"),
        PmemOutcome::RebootRequired { message, .. } => {
            println!("{}", message);
            println!("A reboot is required to complete the operation");
        }
        PmemOutcome::Prepared { namespaces } => {
            println!("PMem namespaces ready:");
            for ns in namespaces {
                println!(
                    "  /dev/{:<12} socket {} {:>10}  {}",
                    ns.blockdev,
                    ns.numa_node,
                    format_bytes(ns.size),
                    ns.uuid
                );
            }
        }
        PmemOutcome::ResetComplete => println!("PMem reset successful"),
    }
}

fn print_scm_scan(resp: &ScmScanResponse) {
    if resp.modules.is_empty() {
        println!("No PMem modules found");
    }
    for module in &resp.modules {
        println!(
            "Module {} socket {} controller {} channel {}.{} {:>10} fw {} health {}",
            module.uid,
            module.socket_id,
            module.controller_id,
            module.channel_id,
            module.channel_position,
            format_bytes(module.capacity),
            module.firmware_revision,
            module.health_state
        );
    }
    for ns in &resp.namespaces {
        println!(
            "Namespace /dev/{} socket {} {:>10}",
            ns.blockdev,
            ns.numa_node,
            format_bytes(ns.size)
        );
    }
}

fn print_storage_report(report: &StoragePrepareReport) {
    if let Some(outcome) = &report.scm {
        print_pmem_outcome(outcome);
    }
    if let Some(resp) = &report.nvme {
        print_nvme_prepare(resp);
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}
