//! Command execution: executors, environment construction, option and
//! hook-script command plumbing.
//!
//! Method command sets and option commands run through an [`Executor`].
//! [`ShellRunner`] is the real thing (`/bin/sh -c` with a freshly built
//! environment); [`CheckRunner`] validates without running (the pre-phase
//! required-variable pass); [`CaptureRunner`] records commands for tests.

use std::process::Command;

use tracing::{debug, warn};

use crate::state::sanitize_name;
use crate::template;
use crate::types::InterfaceDefn;
use crate::vars::is_hook_option;

/// `PATH` handed to every executed command.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Directory holding the `if-<phase>.d` hook-script directories.
pub const HOOK_SCRIPTS_DIR: &str = "/etc/network";

/// Runs expanded commands on behalf of the lifecycle controller.
pub trait Executor {
    /// Installs the environment for the current phase.
    fn set_environment(&mut self, env: Environment);

    /// Runs one shell command; returns true on success.
    fn run(&mut self, command: &str) -> bool;
}

/// The environment handed to executed commands. Freshly constructed per
/// phase; nothing of the caller's environment is inherited except
/// `IFUPDOWN_*` recursion markers.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    /// Builds the environment for one phase of one interface.
    pub fn for_phase(iface: &InterfaceDefn, mode: &str, phase: &str, verbose: bool) -> Self {
        let mut env = Environment::default();

        for var in iface.options.iter() {
            if is_hook_option(&var.name) {
                continue;
            }
            env.set(format!("IF_{}", mangle_env_name(&var.name)), var.value.as_str());
        }

        for (key, value) in std::env::vars() {
            if key.starts_with("IFUPDOWN_") {
                env.set(key, value);
            }
        }

        let real = iface.real_iface();

        if let Some((parent, _)) = real.split_once('.') {
            env.set(format!("IFUPDOWN_{}", sanitize_name(parent)), "parent-lock");
        }

        env.set(format!("IFUPDOWN_{}", sanitize_name(real)), phase);
        env.set("IFACE", real);
        env.set("LOGICAL", iface.logical_iface.as_str());
        env.set("ADDRFAM", iface.family.name);
        env.set("METHOD", iface.method.name());
        env.set("MODE", mode);
        env.set("PHASE", phase);
        env.set("VERBOSITY", if verbose { "1" } else { "0" });
        env.set("PATH", DEFAULT_PATH);

        env
    }

    /// Sets a variable, replacing any earlier entry of the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        if let Some(entry) = self.vars.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.vars.push((name, value));
        }
    }

    /// Looks up a variable.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterates `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }
}

/// Mangles an option name into an environment-variable suffix:
/// hyphens become underscores, letters are upper-cased, anything else
/// non-alphanumeric is dropped.
pub fn mangle_env_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Real command execution through the system shell.
#[derive(Debug, Default)]
pub struct ShellRunner {
    verbose: bool,
    no_act: bool,
    ignore_failures: bool,
    env: Environment,
}

impl ShellRunner {
    pub fn new(verbose: bool, no_act: bool, ignore_failures: bool) -> Self {
        Self {
            verbose,
            no_act,
            ignore_failures,
            env: Environment::default(),
        }
    }
}

impl Executor for ShellRunner {
    fn set_environment(&mut self, env: Environment) {
        self.env = env;
    }

    fn run(&mut self, command: &str) -> bool {
        let (command, ignore_status) = match command.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (command, false),
        };

        if self.verbose || self.no_act {
            eprintln!("{command}");
        }

        if self.no_act {
            return true;
        }

        // Become our own process-group leader so that a later SIGTERM to
        // -pid (from the pid file) reaches the whole command's subprocess
        // tree.
        unsafe {
            libc::setpgid(0, 0);
        }

        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .env_clear()
            .envs(self.env.iter())
            .status();

        match status {
            Ok(status) => {
                if !status.success() {
                    debug!(command, code = status.code(), "command failed");
                }
                ignore_status || self.ignore_failures || status.success()
            }
            Err(err) => {
                warn!(command, %err, "failed to spawn shell");
                false
            }
        }
    }
}

/// Validation-only executor: expansion already happened by the time
/// `run` is reached, so every command "succeeds".
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckRunner;

impl Executor for CheckRunner {
    fn set_environment(&mut self, _env: Environment) {}

    fn run(&mut self, _command: &str) -> bool {
        true
    }
}

/// Records commands instead of running them. Test executor.
#[derive(Debug, Default)]
pub struct CaptureRunner {
    commands: Vec<String>,
    environments: Vec<Environment>,
    fail_contains: Option<String>,
}

impl CaptureRunner {
    /// Makes every command containing `needle` report failure.
    pub fn failing_on(needle: impl Into<String>) -> Self {
        Self {
            fail_contains: Some(needle.into()),
            ..Self::default()
        }
    }

    /// Commands seen so far, in execution order.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Environments installed so far, one per phase.
    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }
}

impl Executor for CaptureRunner {
    fn set_environment(&mut self, env: Environment) {
        self.environments.push(env);
    }

    fn run(&mut self, command: &str) -> bool {
        self.commands.push(command.to_string());
        match &self.fail_contains {
            Some(needle) => !command.contains(needle.as_str()),
            None => true,
        }
    }
}

/// Expands `command` against `ifd` and hands it to the executor.
///
/// Expansion failure is command failure; the missing-variable diagnostic
/// is emitted during expansion.
pub fn execute(command: &str, ifd: &InterfaceDefn, exec: &mut dyn Executor) -> bool {
    match template::expand(command, ifd) {
        Ok(expanded) => exec.run(&expanded),
        Err(err) => {
            debug!(command, %err, "command expansion failed");
            false
        }
    }
}

/// Runs every value of option `name` (the lifecycle-hook commands), in
/// order. Option command values run verbatim, not template-expanded.
pub fn execute_options(
    ifd: &InterfaceDefn,
    exec: &mut dyn Executor,
    name: &str,
    ignore_failures: bool,
) -> bool {
    for var in ifd.options.iter().filter(|v| v.name == name) {
        if !exec.run(&var.value) && !ignore_failures {
            return false;
        }
    }

    true
}

/// Builds the directory-runner invocation for one phase's hook scripts.
pub fn hook_scripts_command(phase: &str, verbose: bool, ignore_failures: bool) -> String {
    format!(
        "/bin/run-parts {}{}{}/if-{}.d",
        if ignore_failures { "" } else { "--exit-on-error " },
        if verbose { "--verbose " } else { "" },
        HOOK_SCRIPTS_DIR,
        phase,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family;
    use serial_test::serial;

    fn iface_with(options: &[(&str, &str)]) -> InterfaceDefn {
        let fam = family::get_address_family("inet").unwrap();
        let mut ifd = InterfaceDefn::new("eth0", fam, fam.method("static").unwrap());
        ifd.real_iface = Some("eth0".to_string());
        for (name, value) in options {
            ifd.options.set(name, value);
        }
        ifd
    }

    #[test]
    fn env_name_mangling() {
        assert_eq!(mangle_env_name("wpa-ssid"), "WPA_SSID");
        assert_eq!(mangle_env_name("mtu"), "MTU");
        assert_eq!(mangle_env_name("dns.search"), "DNSSEARCH");
    }

    #[test]
    #[serial]
    fn environment_contents() {
        let ifd = iface_with(&[("address", "10.0.0.1"), ("wpa-ssid", "home"), ("up", "cmd")]);
        let env = Environment::for_phase(&ifd, "start", "pre-up", true);

        assert_eq!(env.get("IF_ADDRESS"), Some("10.0.0.1"));
        assert_eq!(env.get("IF_WPA_SSID"), Some("home"));
        // hook options never become IF_ variables
        assert_eq!(env.get("IF_UP"), None);
        assert_eq!(env.get("IFACE"), Some("eth0"));
        assert_eq!(env.get("LOGICAL"), Some("eth0"));
        assert_eq!(env.get("ADDRFAM"), Some("inet"));
        assert_eq!(env.get("METHOD"), Some("static"));
        assert_eq!(env.get("MODE"), Some("start"));
        assert_eq!(env.get("PHASE"), Some("pre-up"));
        assert_eq!(env.get("VERBOSITY"), Some("1"));
        assert_eq!(env.get("PATH"), Some(DEFAULT_PATH));
        assert_eq!(env.get("IFUPDOWN_eth0"), Some("pre-up"));
    }

    #[test]
    #[serial]
    fn environment_vlan_parent_marker() {
        let mut ifd = iface_with(&[]);
        ifd.real_iface = Some("eth0.10".to_string());
        let env = Environment::for_phase(&ifd, "start", "post-up", false);

        assert_eq!(env.get("IFUPDOWN_eth0"), Some("parent-lock"));
        assert_eq!(env.get("IFUPDOWN_eth0.10"), Some("post-up"));
    }

    #[test]
    #[serial]
    fn environment_inherits_recursion_markers() {
        std::env::set_var("IFUPDOWN_eth9", "post-up");
        let ifd = iface_with(&[]);
        let env = Environment::for_phase(&ifd, "start", "pre-up", false);
        std::env::remove_var("IFUPDOWN_eth9");

        assert_eq!(env.get("IFUPDOWN_eth9"), Some("post-up"));
    }

    #[test]
    fn shell_runner_reports_exit_status() {
        let mut runner = ShellRunner::new(false, false, false);
        let mut env = Environment::default();
        env.set("PATH", DEFAULT_PATH);
        runner.set_environment(env);

        assert!(runner.run("true"));
        assert!(!runner.run("exit 42"));
        // leading '-' suppresses the failure
        assert!(runner.run("-exit 42"));
    }

    #[test]
    fn shell_runner_ignore_failures_mode() {
        let mut runner = ShellRunner::new(false, false, true);
        assert!(runner.run("exit 1"));
    }

    #[test]
    fn shell_runner_no_act_runs_nothing() {
        let mut runner = ShellRunner::new(false, true, false);
        assert!(runner.run("exit 1"));
    }

    #[test]
    fn execute_expands_before_running() {
        let ifd = iface_with(&[("address", "10.0.0.1")]);
        let mut runner = CaptureRunner::default();
        assert!(execute("ip addr add %address% dev %iface%", &ifd, &mut runner));
        assert_eq!(runner.commands(), ["ip addr add 10.0.0.1 dev eth0"]);
    }

    #[test]
    fn execute_fails_on_missing_variable() {
        let ifd = iface_with(&[]);
        let mut runner = CaptureRunner::default();
        assert!(!execute("ip addr add %address%", &ifd, &mut runner));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn option_commands_run_in_order() {
        let ifd = iface_with(&[("up", "cmd1"), ("up", "cmd2"), ("down", "other")]);
        let mut runner = CaptureRunner::default();
        assert!(execute_options(&ifd, &mut runner, "up", false));
        // both accumulated commands run as one newline-joined invocation
        assert_eq!(runner.commands(), ["cmd1\ncmd2"]);
    }

    #[test]
    fn option_command_failure_propagates_unless_ignored() {
        let ifd = iface_with(&[("up", "breaks")]);

        let mut runner = CaptureRunner::failing_on("breaks");
        assert!(!execute_options(&ifd, &mut runner, "up", false));

        let mut runner = CaptureRunner::failing_on("breaks");
        assert!(execute_options(&ifd, &mut runner, "up", true));
    }

    #[test]
    fn hook_script_invocations() {
        assert_eq!(
            hook_scripts_command("pre-up", false, false),
            "/bin/run-parts --exit-on-error /etc/network/if-pre-up.d"
        );
        assert_eq!(
            hook_scripts_command("post-down", true, true),
            "/bin/run-parts --verbose /etc/network/if-post-down.d"
        );
    }
}
