//! Command-line argument surface shared by `ifup`, `ifdown` and `ifquery`.

use std::path::PathBuf;

use clap::Parser;

/// The default interfaces file.
pub const DEFAULT_INTERFACES: &str = "/etc/network/interfaces";

#[derive(Debug, Parser)]
#[command(version, about = "network interface configuration", max_term_width = 100)]
pub struct Cli {
    /// process all interfaces marked "auto"
    #[arg(short = 'a', long)]
    pub all: bool,

    /// ignore non-"allow-CLASS" interfaces
    #[arg(long, value_name = "CLASS")]
    pub allow: Option<String>,

    /// use FILE for interface definitions
    #[arg(
        short = 'i',
        long,
        value_name = "FILE",
        default_value = DEFAULT_INTERFACES
    )]
    pub interfaces: PathBuf,

    /// exclude interfaces matching PATTERN from the list of interfaces to
    /// operate on
    #[arg(short = 'X', long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// print out what would happen, but don't do it (this does not disable
    /// mappings)
    #[arg(short = 'n', long)]
    pub no_act: bool,

    /// print out what would happen before doing it
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// set OPTION to VALUE as though it were in the interfaces file
    #[arg(short = 'o', value_name = "OPTION=VALUE")]
    pub option: Vec<String>,

    /// don't run any mappings
    #[arg(long)]
    pub no_mappings: bool,

    /// don't run any hook scripts
    #[arg(long)]
    pub no_scripts: bool,

    /// don't act specially on the loopback device
    #[arg(long)]
    pub no_loopback: bool,

    /// force de/configuration
    #[arg(long)]
    pub force: bool,

    /// ignore errors
    #[arg(long)]
    pub ignore_errors: bool,

    /// list all matching known interfaces (ifquery only)
    #[arg(long)]
    pub list: bool,

    /// show the state of the specified interfaces (ifquery only)
    #[arg(long)]
    pub state: bool,

    /// honor VERBOSE, CONFIGURE_INTERFACES and EXCLUDE_INTERFACES from the
    /// calling environment
    #[arg(long)]
    pub read_environment: bool,

    /// interfaces to act on, as IFACE or IFACE=LOGICAL
    #[arg(value_name = "IFACE")]
    pub ifaces: Vec<String>,
}
