use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use base::prelude::*;
use mscp::drive::DriveType;
use mscp::{Controller, ControllerConfig, ControllerInfo, HostPort};

mod report;

/// Host memory given to the simulated bus.
const MEMORY_BYTES: usize = 1 << 20;

#[derive(Parser, Debug)]
#[command(author, version, about = "Exercise an emulated MSCP/TMSCP port", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring the port up, find its units, put each loaded unit
    /// online and print the controller's state.
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Disk image to load (repeat for units 1, 2, ...)
    #[arg(long = "disk", value_name = "IMAGE")]
    disks: Vec<PathBuf>,

    /// Tape image to load (repeat for units 1, 2, ...)
    #[arg(long = "tape", value_name = "IMAGE")]
    tapes: Vec<PathBuf>,

    /// Drive model for every unit, for example RA60 or TU81
    #[arg(long)]
    drive: Option<String>,

    /// Number of units on each controller
    #[arg(long, default_value_t = 4)]
    units: usize,

    /// Load the images read-only
    #[arg(long)]
    read_only: bool,

    /// Print the snapshot as JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn config_for(protocol: Protocol, args: &ProbeArgs) -> Result<ControllerConfig, String> {
    let config = match protocol {
        Protocol::Mscp => ControllerConfig::disk(),
        Protocol::Tmscp => ControllerConfig::tape(),
    };
    let Some(name) = args.drive.as_deref() else {
        let drive = config.drives[0];
        return Ok(config.with_drives(vec![drive; args.units]));
    };
    let drive = DriveType::by_name(name).ok_or_else(|| format!("unknown drive model '{name}'"))?;
    let right_class = matches!(
        (protocol, drive),
        (Protocol::Mscp, DriveType::Disk(_)) | (Protocol::Tmscp, DriveType::Tape(_))
    );
    if !right_class {
        return Err(format!("{name} can't be used on an {protocol} controller"));
    }
    Ok(config.with_drives(vec![drive; args.units]))
}

/// Bring a port up and put every loaded unit online, the way a host
/// operating system would at boot time.
fn probe(
    protocol: Protocol,
    images: &[PathBuf],
    args: &ProbeArgs,
) -> Result<ControllerInfo, Box<dyn std::error::Error>> {
    let mut controller = Controller::new(config_for(protocol, args)?);
    for (unit, path) in images.iter().enumerate() {
        controller.attach_file(unit, path, args.read_only)?;
    }
    let mut port = HostPort::new(controller, MEMORY_BYTES);
    port.initialise(3, 3, false)?;
    event!(Level::INFO, "{protocol} port is up");

    let rsp = port.command(port.packet(Opcode::SetControllerCharacteristics, 0, 0))?;
    if !rsp.status().is_success() {
        event!(Level::WARN, "Set Controller Characteristics failed: {}", rsp.status());
    }

    let mut next = 0;
    let mut found = Vec::new();
    loop {
        let rsp = port.command(port.packet(Opcode::GetUnitStatus, next, md::NXU))?;
        let unit = rsp.unit();
        if found.contains(&unit) || rsp.status() == Status::OFFLINE {
            break;
        }
        event!(Level::DEBUG, "unit {unit}: {}", rsp.status());
        found.push(unit);
        if rsp.status() != Status::NO_VOLUME {
            let rsp = port.command(port.packet(Opcode::Online, unit, 0))?;
            if rsp.status().is_success() {
                event!(Level::INFO, "unit {unit} is online");
            } else {
                event!(Level::WARN, "unit {unit} did not come online: {}", rsp.status());
            }
        }
        next = unit + 1;
    }
    Ok(port.controller.info())
}

fn run_probe(args: &ProbeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut snapshots = Vec::new();
    if !args.disks.is_empty() || args.tapes.is_empty() {
        snapshots.push(probe(Protocol::Mscp, &args.disks, args)?);
    }
    if !args.tapes.is_empty() {
        snapshots.push(probe(Protocol::Tmscp, &args.tapes, args)?);
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    } else {
        let mut out = report::ReportWriter::new();
        let written = snapshots.iter().try_for_each(|info| out.write(info));
        out.disconnect();
        written?;
    }
    Ok(())
}

fn run_cli() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // See
    // https://docs.rs/tracing-subscriber/0.2.19/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Box::new(e));
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    match &cli.command {
        Command::Probe(args) => run_probe(args),
    }
}

fn main() {
    match run_cli() {
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(drive: Option<&str>) -> ProbeArgs {
        ProbeArgs {
            disks: Vec::new(),
            tapes: Vec::new(),
            drive: drive.map(str::to_string),
            units: 2,
            read_only: false,
            json: false,
        }
    }

    #[test]
    fn test_drive_model_must_match_protocol() {
        assert!(config_for(Protocol::Mscp, &args(Some("ra60"))).is_ok());
        assert!(config_for(Protocol::Mscp, &args(Some("TK50"))).is_err());
        assert!(config_for(Protocol::Tmscp, &args(Some("nonesuch"))).is_err());
        let config = config_for(Protocol::Tmscp, &args(None)).expect("default tape config");
        assert_eq!(config.drives.len(), 2);
    }

    #[test]
    fn test_probe_onlines_loaded_units() {
        let dir = tempfile::tempdir().expect("temporary directory");
        let image = dir.path().join("disk0.dsk");
        let info = probe(Protocol::Mscp, &[image], &args(None)).expect("probe");
        assert!(info.units[0].online);
        assert!(!info.units[1].attached);
        assert_eq!(info.units.len(), 2);
    }

    #[test]
    fn test_cli_parses_probe() {
        let cli = Cli::try_parse_from(["mscp", "probe", "--tape", "t.tap", "--json"])
            .expect("arguments should parse");
        let Command::Probe(args) = cli.command;
        assert_eq!(args.tapes, vec![PathBuf::from("t.tap")]);
        assert!(args.json);
    }
}
