use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, warn};

use board_plugins as bp;
use board_plugins::capability::{
    BoardInfo, BootInfo, EventLog, FmeVerboseInfo, ImageInfo, MacInfo, PhyInfo, SecurityInfo,
};
use board_plugins::{BoardPlugins, Capability, IdentityReader, SysfsDevice};

#[derive(Parser, Debug)]
#[command(
    name = "boardinfo",
    version,
    about = "Print accelerator board diagnostics via board plugin modules",
    disable_help_subcommand = true
)]
struct Cli {
    /// Board table YAML replacing the built-in table
    #[arg(long, global = true)]
    table: Option<PathBuf>,

    /// PCI device directory root
    #[arg(long, global = true, default_value = bp::DEFAULT_PCI_ROOT)]
    sysfs_root: PathBuf,

    /// Only query this PCI address (e.g. 0000:b1:00.0)
    #[arg(long, global = true)]
    bdf: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print board information
    Board,
    /// Print MAC information
    Mac,
    /// Print PHY information
    Phy,
    /// Print security information
    Security,
    /// Print verbose FME information
    Fme,
    /// Print FPGA boot page information
    Boot,
    /// Print FPGA image information
    Image,
    /// Print the board event log
    Events {
        /// First record of the range
        #[arg(long, default_value_t = 0)]
        first: u32,
        /// Last record of the range
        #[arg(long, default_value_t = 0)]
        last: u32,
        /// List records
        #[arg(long, action = ArgAction::SetTrue)]
        list: bool,
        /// Include sensor readings
        #[arg(long, action = ArgAction::SetTrue)]
        sensors: bool,
        /// Include raw register bits
        #[arg(long, action = ArgAction::SetTrue)]
        bits: bool,
    },
    /// Show which board module serves each device
    Modules {
        /// Print as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Append loader metrics in Prometheus text format
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let registry = match &cli.table {
        Some(path) => bp::PlatformRegistry::from_yaml_file(path)?,
        None => bp::PlatformRegistry::builtin(),
    };
    let loader = bp::PluginLoader::new(bp::LoaderConfig::from_env());
    let metrics = bp::MetricsHub::new().map_err(anyhow::Error::msg)?;
    let plugins = BoardPlugins::new(registry, loader).with_metrics(metrics);

    let devices = discover(&cli)?;
    let outcome = match cli.command {
        Commands::Board => {
            for dev in &devices {
                board_info(&plugins, dev);
            }
            Ok(())
        }
        Commands::Mac => run_capability::<MacInfo>(&plugins, &devices, "MAC", ()),
        Commands::Phy => run_capability::<PhyInfo>(&plugins, &devices, "PHY", ()),
        Commands::Security => run_capability::<SecurityInfo>(&plugins, &devices, "SEC", ()),
        Commands::Fme => run_capability::<FmeVerboseInfo>(&plugins, &devices, "FME", ()),
        Commands::Boot => run_capability::<BootInfo>(&plugins, &devices, "BOOT", ()),
        Commands::Image => run_capability::<ImageInfo>(&plugins, &devices, "IMAGE", ()),
        Commands::Events {
            first,
            last,
            list,
            sensors,
            bits,
        } => {
            let args = bp::EventLogArgs {
                first,
                last,
                print_list: list,
                print_sensors: sensors,
                print_bits: bits,
            };
            run_capability::<EventLog>(&plugins, &devices, "EVENTS", args)
        }
        Commands::Modules { json, metrics } => modules(&plugins, &devices, json, metrics),
    };

    if let Err(e) = plugins.unload_all() {
        warn!("{e}");
        for failure in e.failures() {
            warn!(module = %failure.module, "unload failed: {}", failure.diagnostic);
        }
    }
    outcome
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn discover(cli: &Cli) -> Result<Vec<SysfsDevice>> {
    let devices = match &cli.bdf {
        Some(bdf) => vec![SysfsDevice::open(cli.sysfs_root.join(bdf))?],
        None => SysfsDevice::enumerate(&cli.sysfs_root)
            .with_context(|| format!("listing devices in {}", cli.sysfs_root.display()))?,
    };
    if devices.is_empty() {
        eprintln!("no FPGA devices found under {}", cli.sysfs_root.display());
    }
    Ok(devices)
}

fn board_info(plugins: &BoardPlugins, dev: &SysfsDevice) {
    match plugins.product_name(dev) {
        Ok(name) => println!("{name}"),
        Err(e) => debug!(device = %dev.address(), "no product name: {e}"),
    }
    report::<BoardInfo>(plugins.invoke::<BoardInfo>(dev, ()));
}

fn print_common(header: &str, dev: &SysfsDevice) {
    println!("//****** {header} ******//");
    println!("{:<32}: {}", "PCIe s:b:d.f", dev.address());
    if let Ok(id) = dev.identity() {
        println!("{:<32}: 0x{:04X}", "Vendor Id", id.vendor_id);
        println!("{:<32}: 0x{:04X}", "Device Id", id.device_id);
        println!("{:<32}: 0x{:04X}", "SubVendor Id", id.subvendor_id);
        println!("{:<32}: 0x{:04X}", "SubDevice Id", id.subdevice_id);
    }
}

fn run_capability<C>(
    plugins: &BoardPlugins,
    devices: &[SysfsDevice],
    header: &str,
    args: C::Args,
) -> Result<()>
where
    C: Capability,
    C::Args: Copy,
{
    for dev in devices {
        board_info(plugins, dev);
        print_common(header, dev);
        report::<C>(plugins.invoke::<C>(dev, args));
    }
    Ok(())
}

// A failed diagnostic never stops the command; the next device still runs.
fn report<C: Capability>(result: bp::Result<bp::Status>) {
    match result {
        Ok(status) if status.is_ok() => {}
        Ok(status) => {
            debug!(capability = C::NAME, %status, "board module returned an error");
            println!("{} is not supported", C::NAME);
        }
        Err(e) => {
            debug!(capability = C::NAME, "{e}");
            println!("{} is not supported", C::NAME);
        }
    }
}

#[derive(Debug, Serialize)]
struct ModuleReport {
    address: String,
    identity: Option<bp::DeviceIdentity>,
    product_name: Option<String>,
    module: Option<String>,
    capabilities: Vec<&'static str>,
    error: Option<String>,
}

fn module_report(plugins: &BoardPlugins, dev: &SysfsDevice) -> ModuleReport {
    let mut report = ModuleReport {
        address: dev.address(),
        identity: dev.identity().ok(),
        product_name: plugins.product_name(dev).ok().map(str::to_string),
        module: None,
        capabilities: Vec::new(),
        error: None,
    };
    match plugins.module_for(dev) {
        Ok((board, module)) => {
            report.module = Some(board.module.clone());
            report.capabilities = module.capabilities().supported();
        }
        Err(e) => report.error = Some(e.to_string()),
    }
    report
}

fn modules(plugins: &BoardPlugins, devices: &[SysfsDevice], json: bool, metrics: bool) -> Result<()> {
    let reports: Vec<ModuleReport> = devices.iter().map(|d| module_report(plugins, d)).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for r in &reports {
            let module = r.module.as_deref().unwrap_or("-");
            let name = r.product_name.as_deref().unwrap_or("-");
            match &r.error {
                Some(err) => println!("{}\t{module}\t{name}\terror: {err}", r.address),
                None => println!("{}\t{module}\t{name}\t{}", r.address, r.capabilities.join(",")),
            }
        }
    }
    if metrics {
        if let Some(hub) = plugins.metrics() {
            print!("{}", hub.encode_text());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_events_flags() {
        let parsed = Cli::try_parse_from([
            "boardinfo", "--bdf", "0000:b1:00.0", "events", "--first", "3", "--last", "9", "--bits",
        ]);
        assert!(matches!(
            parsed.map(|c| (c.bdf, c.command)),
            Ok((
                Some(bdf),
                Commands::Events {
                    first: 3,
                    last: 9,
                    list: false,
                    sensors: false,
                    bits: true,
                },
            )) if bdf == "0000:b1:00.0"
        ));
    }

    #[test]
    fn test_table_is_global() {
        let parsed = Cli::try_parse_from(["boardinfo", "mac", "--table", "boards.yaml"]);
        assert!(matches!(parsed.map(|c| c.table), Ok(Some(p)) if p == PathBuf::from("boards.yaml")));
    }
}
