//! IPAM engine CLI
//!
//! Operator front-end for the allocation engine. State lives in a JSON
//! file loaded at startup and written back after every mutating command,
//! so the CLI behaves like a single-writer service invocation.
//!
//! Usage:
//!   ipam --state <file> <subcommand> [options]
//!
//! Exit codes mirror the engine's error taxonomy: 2 capacity exhausted,
//! 3 address in use, 4 resolution exhausted, 5 invalid request, 6 not
//! found, 7 subnet not empty, 1 everything else.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ipnet::Ipv4Net;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use ipam_engine::{
    AddressManager, AdvisorConfig, CapacityAdvisor, Error, ForecastPoint, ManagerConfig,
    ResolutionPolicy,
};

#[derive(Parser)]
#[command(name = "ipam", version, about = "Address space allocation and conflict resolution")]
struct Cli {
    /// Path to the JSON state file
    #[arg(long, default_value = "ipam-state.json")]
    state: PathBuf,

    /// Conflict repair tie-break policy
    #[arg(long, value_enum, default_value = "earliest-wins")]
    policy: PolicyArg,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    EarliestWins,
    LatestWins,
}

impl From<PolicyArg> for ResolutionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::EarliestWins => ResolutionPolicy::EarliestAssignedWins,
            PolicyArg::LatestWins => ResolutionPolicy::LatestAssignedWins,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a new top-level address space
    SpaceCreate {
        /// Human-readable name
        name: String,
        /// CIDR block, e.g. 10.0.0.0/16
        cidr: Ipv4Net,
    },
    /// Carve the smallest subnet that fits a host count
    SubnetAllocate {
        space_id: Uuid,
        /// Requested usable host count
        hosts: u32,
        /// Purpose tag
        #[arg(default_value = "default")]
        tag: String,
    },
    /// Return an empty subnet's block to the free pool
    SubnetRelease { subnet_id: Uuid },
    /// Assign an address in a subnet to a device
    HostAllocate {
        subnet_id: Uuid,
        /// Device identifier
        device: String,
        /// Specific address to request
        #[arg(long)]
        ip: Option<Ipv4Addr>,
    },
    /// Deregister a device assignment
    HostRelease { allocation_id: Uuid },
    /// Record an externally observed assignment
    Observe {
        subnet_id: Uuid,
        ip: Ipv4Addr,
        device: String,
    },
    /// Sweep a space for duplicate addresses
    Scan { space_id: Uuid },
    /// List allocations holding an address outside their subnet
    ScanUnauthorized { space_id: Uuid },
    /// Move unauthorized allocations back into their subnet
    Remediate { space_id: Uuid },
    /// Repair pending conflicts (one record, or all when omitted)
    Resolve {
        space_id: Uuid,
        #[arg(long)]
        record_id: Option<Uuid>,
    },
    /// Dismiss a pending conflict record
    Ignore { space_id: Uuid, record_id: Uuid },
    /// Run the capacity advisor against a forecast file
    CapacityCheck {
        /// JSON file holding an array of forecast points
        forecasts: PathBuf,
        /// Predicted utilization that triggers action
        #[arg(long, default_value_t = 0.85)]
        threshold: f64,
        /// Forecasts below this confidence are ignored
        #[arg(long, default_value_t = 0.5)]
        confidence_floor: f64,
        /// Forecasts beyond this horizon are ignored
        #[arg(long, default_value_t = 7)]
        horizon_days: u16,
    },
    /// Print a full report for one space, or list all spaces
    Report {
        space_id: Option<Uuid>,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(err.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    let config = ManagerConfig {
        resolution_policy: cli.policy.into(),
        ..ManagerConfig::default()
    };
    let manager = AddressManager::load_from_file(config, &cli.state)?;

    let mutated = dispatch(&manager, cli.command)?;
    if mutated {
        manager.save_to_file(&cli.state)?;
    }
    Ok(())
}

fn dispatch(manager: &AddressManager, command: Commands) -> Result<bool, Error> {
    match command {
        Commands::SpaceCreate { name, cidr } => {
            let space = manager.create_address_space(name, cidr)?;
            print_json(&space)?;
            Ok(true)
        }
        Commands::SubnetAllocate {
            space_id,
            hosts,
            tag,
        } => {
            let subnet = manager.allocate_subnet(space_id, hosts, tag)?;
            print_json(&subnet)?;
            Ok(true)
        }
        Commands::SubnetRelease { subnet_id } => {
            manager.release_subnet(subnet_id)?;
            println!("released {subnet_id}");
            Ok(true)
        }
        Commands::HostAllocate {
            subnet_id,
            device,
            ip,
        } => {
            let allocation = manager.allocate_host(subnet_id, ip, device)?;
            print_json(&allocation)?;
            Ok(true)
        }
        Commands::HostRelease { allocation_id } => {
            manager.release_allocation(allocation_id)?;
            println!("released {allocation_id}");
            Ok(true)
        }
        Commands::Observe {
            subnet_id,
            ip,
            device,
        } => {
            let allocation = manager.register_observed(subnet_id, ip, device)?;
            print_json(&allocation)?;
            Ok(true)
        }
        Commands::Scan { space_id } => {
            let records = manager.scan(space_id)?;
            print_json(&records)?;
            Ok(!records.is_empty())
        }
        Commands::ScanUnauthorized { space_id } => {
            let found = manager.scan_unauthorized(space_id)?;
            print_json(&found)?;
            Ok(false)
        }
        Commands::Remediate { space_id } => {
            let moves = manager.remediate_unauthorized(space_id)?;
            print_json(&moves)?;
            Ok(!moves.is_empty())
        }
        Commands::Resolve {
            space_id,
            record_id,
        } => {
            match record_id {
                Some(record_id) => {
                    let outcome = manager.resolve(space_id, record_id)?;
                    print_json(&outcome)?;
                }
                None => {
                    let outcomes = manager.resolve_all(space_id)?;
                    print_json(&outcomes)?;
                }
            }
            Ok(true)
        }
        Commands::Ignore {
            space_id,
            record_id,
        } => {
            manager.ignore_conflict(space_id, record_id)?;
            println!("ignored {record_id}");
            Ok(true)
        }
        Commands::CapacityCheck {
            forecasts,
            threshold,
            confidence_floor,
            horizon_days,
        } => {
            let json = std::fs::read_to_string(&forecasts)?;
            let points: Vec<ForecastPoint> = serde_json::from_str(&json)?;
            let advisor = CapacityAdvisor::new(AdvisorConfig {
                utilization_threshold: threshold,
                confidence_floor,
                horizon_days,
            });
            let events = advisor.check(manager, &points);
            print_json(&events)?;
            Ok(!events.is_empty())
        }
        Commands::Report { space_id } => {
            match space_id {
                Some(space_id) => print_json(&manager.report(space_id)?)?,
                None => print_json(&manager.list_spaces())?,
            }
            Ok(false)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
