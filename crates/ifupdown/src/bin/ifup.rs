//! Bring network interfaces up.

use std::process::ExitCode;

use ifupdown_core::CommandKind;

fn main() -> ExitCode {
    ifupdown::run(CommandKind::Up)
}
