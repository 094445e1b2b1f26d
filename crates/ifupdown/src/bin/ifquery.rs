//! Query network interface configuration and state.

use std::process::ExitCode;

use ifupdown_core::CommandKind;

fn main() -> ExitCode {
    ifupdown::run(CommandKind::Query)
}
