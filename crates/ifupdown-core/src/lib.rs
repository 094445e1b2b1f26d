//! Interface configuration engine.
//!
//! This crate implements the core of an ifupdown-style tool: it parses a
//! declarative network-interface configuration file, resolves interface
//! definitions (inheritance, per-address-family methods), and drives the
//! lifecycle of bringing interfaces up or down through variable
//! substitution, external command execution, and persistent state
//! tracking.
//!
//! - [`parser`]: reads the interfaces file (with `source`/`source-dir`
//!   recursion) into an in-memory model
//! - [`types`]: the interface model the rest of the engine consumes
//! - [`vars`]: per-interface option tables
//! - [`family`]: the address-family/method registry; methods are trait
//!   objects so further methods can be plugged in
//! - [`convert`]: option value pre-processing transforms
//! - [`template`]: the `%var%` / `[[ ... ]]` command template engine
//! - [`exec`]: executors, command environments, hook plumbing
//! - [`state`]: the locked `physical=logical` state store
//! - [`lifecycle`]: the per-interface state machine tying it together
//!
//! The engine is synchronous and single-threaded; concurrent invocations
//! coordinate only through the state store's advisory file locks.

pub mod convert;
pub mod error;
pub mod exec;
pub mod family;
pub mod lifecycle;
pub mod parser;
pub mod state;
pub mod template;
pub mod types;
pub mod vars;

pub use error::{Error, Result};
pub use exec::{CaptureRunner, CheckRunner, Environment, Executor, ShellRunner};
pub use family::{AddressFamily, Method};
pub use lifecycle::{CommandKind, Controller, Options, PhaseOutcome};
pub use parser::read_interfaces;
pub use state::{StateStore, RUN_DIR};
pub use types::{AllowupGroup, InterfaceDefn, InterfacesFile, MappingDefn};
pub use vars::{Variable, VariableTable};
