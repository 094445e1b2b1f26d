//! Interface lifecycle controller.
//!
//! Drives one target interface through selection filters, existence and
//! recursion checks, the no-op short-circuit, mapping resolution, the
//! per-address-family activation loop (with one-time physical link
//! bring-up/teardown), and state recording. Concurrency control is
//! entirely via the state store's per-interface locks; everything here is
//! synchronous.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::convert::convert_variables;
use crate::error::Result;
use crate::exec::{self, CheckRunner, Environment, Executor};
use crate::family::{link_family, meta_family};
use crate::state::{sanitize_name, StateStore};
use crate::types::{match_patterns, InterfaceDefn, InterfacesFile, MappingDefn};
use crate::vars::{is_hook_option, VariableTable};

/// Which operation this invocation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Up,
    Down,
    Query,
    List,
}

impl CommandKind {
    /// The command name used for pid files and diagnostics.
    pub fn command_name(self) -> &'static str {
        match self {
            CommandKind::Up => "ifup",
            CommandKind::Down => "ifdown",
            CommandKind::Query | CommandKind::List => "ifquery",
        }
    }
}

/// Result of one per-family method invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Everything ran.
    Success,
    /// A command failed; remaining phases for this interface are skipped.
    Failure,
    /// The method's required variables are missing; the interface cannot
    /// even be attempted.
    MissingVariables,
}

/// Resolved invocation options, threaded through the controller instead of
/// living in globals.
#[derive(Debug, Clone)]
pub struct Options {
    pub kind: CommandKind,
    pub do_all: bool,
    pub force: bool,
    pub verbose: bool,
    pub no_act: bool,
    pub run_mappings: bool,
    pub run_scripts: bool,
    pub ignore_failures: bool,
    pub allow_class: Option<String>,
    /// Glob patterns from `--exclude` / `EXCLUDE_INTERFACES`.
    pub excludes: Vec<String>,
    /// `-o OPTION=VALUE` overrides, applied at activation time.
    pub overrides: VariableTable,
}

impl Options {
    /// Defaults for one command. `ifdown` ignores command failures by
    /// default; `ifquery` implies dry-run.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            do_all: false,
            force: false,
            verbose: false,
            no_act: matches!(kind, CommandKind::Query | CommandKind::List),
            run_mappings: true,
            run_scripts: true,
            ignore_failures: matches!(kind, CommandKind::Down),
            allow_class: None,
            excludes: Vec::new(),
            overrides: VariableTable::new(),
        }
    }
}

/// The lifecycle controller: one per invocation.
pub struct Controller<E: Executor> {
    opts: Options,
    defn: InterfacesFile,
    state: StateStore,
    runner: E,
}

impl<E: Executor> Controller<E> {
    pub fn new(opts: Options, defn: InterfacesFile, state: StateStore, runner: E) -> Self {
        Self {
            opts,
            defn,
            state,
            runner,
        }
    }

    /// The parsed interface model.
    pub fn defn(&self) -> &InterfacesFile {
        &self.defn
    }

    /// The executor, for inspection in tests.
    pub fn runner(&self) -> &E {
        &self.runner
    }

    /// Runs the meta-interface pre-phase for `--all` operations.
    pub fn pre_all(&mut self) -> bool {
        if !self.opts.do_all {
            return true;
        }

        let meta = self.meta_iface();
        let outcome = match self.opts.kind {
            CommandKind::Up => self.iface_preup(&meta),
            CommandKind::Down => self.iface_predown(&meta),
            _ => PhaseOutcome::Success,
        };

        !matches!(outcome, PhaseOutcome::Failure)
    }

    /// Runs the meta-interface post-phase for `--all` operations.
    pub fn post_all(&mut self) -> bool {
        if !self.opts.do_all {
            return true;
        }

        let meta = self.meta_iface();
        let outcome = match self.opts.kind {
            CommandKind::Up => self.iface_postup(&meta),
            CommandKind::Down => self.iface_postdown(&meta),
            _ => PhaseOutcome::Success,
        };

        !matches!(outcome, PhaseOutcome::Failure)
    }

    fn meta_iface(&self) -> InterfaceDefn {
        let meta = meta_family();
        let logical = self.opts.allow_class.clone().unwrap_or_else(|| "auto".to_string());
        let mut ifd = InterfaceDefn::new(logical, meta, meta.methods[0].as_ref());
        ifd.real_iface = Some("--all".to_string());
        ifd
    }

    /// Processes one target token (`physical` or `physical=logical`).
    ///
    /// `Ok(true)` means the target was handled (including filtered-out and
    /// no-op cases); `Ok(false)` a per-interface failure; `Err` a fatal
    /// resource problem.
    pub fn process(&mut self, target: &str) -> Result<bool> {
        let (iface, mut liface) = match target.split_once('=') {
            Some((phys, log)) => (phys.to_string(), log.to_string()),
            None => (target.to_string(), target.to_string()),
        };

        if self.ignore_interface(&iface) {
            return Ok(true);
        }

        // The logical name must be defined, mappable, or (for non-up
        // operations) have been seen before.
        let mut found = self.defn.has_iface(&liface) || self.defn.has_mapping_for(&liface);

        if self.opts.kind != CommandKind::Up && self.state.iface_lock_exists(&iface) {
            found = true;
        }

        if !found {
            eprintln!("Unknown interface {liface}");
            return Ok(false);
        }

        let command_name = self.opts.kind.command_name();

        // Bail out if we are a recursive invocation on the same interface.
        let env_name = format!("IFUPDOWN_{}", sanitize_name(&iface));
        if let Ok(phase) = std::env::var(&env_name) {
            if self.state.is_locked(&iface) {
                eprintln!(
                    "{command_name}: recursion detected for interface {iface} in {phase} phase"
                );
                return Ok(false);
            }
        }

        // A VLAN-style name locks its parent device alongside itself.
        let mut _parent_lock = None;
        if let Some((parent, _)) = iface.split_once('.') {
            let parent_env = format!("IFUPDOWN_{}", sanitize_name(parent));
            if let Ok(phase) = std::env::var(&parent_env) {
                if self.state.is_locked(parent) {
                    eprintln!(
                        "{command_name}: recursion detected for parent interface {parent} \
                         in {phase} phase"
                    );
                    return Ok(false);
                }
            }

            _parent_lock = Some(self.state.lock_interface(parent)?);
        }

        let mut lock = self.state.lock_interface(&iface)?;
        let current_state = lock.state.clone();
        let mut run_maps = self.opts.run_mappings;

        // No-op short-circuit, and the recorded-name override for
        // teardown and queries.
        if !self.opts.force {
            match self.opts.kind {
                CommandKind::Up => {
                    if current_state.is_some() {
                        if !self.opts.do_all {
                            eprintln!("{command_name}: interface {iface} already configured");
                        }
                        return Ok(true);
                    }
                }
                CommandKind::Down => match &current_state {
                    None => {
                        if !self.opts.do_all {
                            eprintln!("{command_name}: interface {iface} not configured");
                        }
                        return Ok(true);
                    }
                    // the recorded logical name wins over the command line,
                    // so a previously mapped interface tears down correctly
                    Some(recorded) => liface = recorded.clone(),
                },
                CommandKind::Query => {
                    if let Some(recorded) = &current_state {
                        liface = recorded.clone();
                        run_maps = false;
                    }
                }
                CommandKind::List => {}
            }
        }

        // Mapping resolution.
        let mut have_mapping = false;
        if (self.opts.kind == CommandKind::Up && run_maps) || self.opts.kind == CommandKind::Query
        {
            let mappings = self.defn.mappings.clone();
            for map in &mappings {
                if !map.matches_iface(&liface) {
                    continue;
                }

                if self.opts.kind == CommandKind::Query && !run_maps {
                    debug!("Not running mapping scripts for {liface}");
                    have_mapping = true;
                    continue;
                }

                debug!(
                    "Running mapping script {} on {}",
                    map.script.as_deref().unwrap_or("(none)"),
                    liface
                );

                match self.run_mapping(&iface, map) {
                    Some(mapped) => liface = mapped,
                    None => return Ok(false),
                }
            }
        }

        // Record the tentative association before running anything, so a
        // crash mid-configuration leaves a recoverable trail.
        match self.opts.kind {
            CommandKind::Up => self.state.update(&iface, Some(&liface), Some(&mut lock))?,
            CommandKind::Down => self.state.update(&iface, None, Some(&mut lock))?,
            CommandKind::Query | CommandKind::List => {}
        }

        if self.opts.kind == CommandKind::List {
            if self.defn.has_iface(&liface) || self.defn.has_mapping_for(&liface) {
                println!("{iface}");
                return Ok(true);
            }
            return Ok(false);
        }

        // Per-address-family activation, in declaration order.
        let mut okay = false;
        let mut failed = false;

        for idx in 0..self.defn.ifaces.len() {
            if self.defn.ifaces[idx].logical_iface != liface {
                continue;
            }

            // Bring the physical link up once per device.
            if !okay && self.opts.kind == CommandKind::Up && !self.link_change(&iface, &liface, true)
            {
                break;
            }

            okay = true;

            {
                let ifd = &mut self.defn.ifaces[idx];
                let method = ifd.method;

                for default in method.defaults() {
                    if !ifd.options.contains(default.option) {
                        ifd.options.set(default.option, default.value);
                    }
                }

                for var in self.opts.overrides.clone().iter() {
                    if var.value.is_empty() {
                        if !is_hook_option(&var.name) {
                            ifd.options.remove(&var.name);
                        }
                    } else {
                        ifd.options.set(&var.name, &var.value);
                    }
                }

                ifd.real_iface = Some(iface.clone());
                convert_variables(method.conversions(), ifd);
            }

            if self.opts.verbose {
                let action = if self.opts.kind == CommandKind::Query {
                    "Querying"
                } else {
                    "Configuring"
                };
                eprintln!(
                    "{action} interface {iface}={liface} ({})",
                    self.defn.ifaces[idx].family.name
                );
            }

            self.state.write_pidfile(command_name, &iface);

            let snapshot = self.defn.ifaces[idx].clone();
            let outcome = match self.opts.kind {
                CommandKind::Up => self.iface_up(&snapshot),
                CommandKind::Down => self.iface_down(&snapshot),
                CommandKind::Query => self.iface_query(&snapshot),
                CommandKind::List => PhaseOutcome::Success,
            };

            self.state.remove_pidfile(command_name, &iface);
            self.defn.ifaces[idx].real_iface = None;

            match outcome {
                PhaseOutcome::MissingVariables => {
                    eprintln!(
                        "Missing required configuration variables for interface {}/{}.",
                        liface, snapshot.family.name
                    );
                    failed = true;
                }
                PhaseOutcome::Failure => failed = true,
                PhaseOutcome::Success => failed = false,
            }

            if failed {
                break;
            }

            // keep going: other address families may match this name
        }

        // Tear the physical link down once, after all families.
        if okay
            && self.opts.kind == CommandKind::Down
            && !self.link_change(&iface, &liface, false)
        {
            return Ok(false);
        }

        if !okay && self.opts.kind == CommandKind::Query {
            if !run_maps && have_mapping {
                okay = true;
            }

            if !okay {
                eprintln!("Unknown interface {iface}");
                return Ok(false);
            }
        }

        // Final state write reflecting the outcome.
        if !okay && !self.opts.force {
            eprintln!("Ignoring unknown interface {iface}={liface}.");
            self.state.update(&iface, None, Some(&mut lock))?;
        } else {
            match self.opts.kind {
                CommandKind::Up => {
                    if (current_state.is_none() || self.opts.no_act) && failed {
                        println!("Failed to bring up {liface}.");
                        self.state.update(&iface, None, Some(&mut lock))?;
                        return Ok(false);
                    }
                    self.state.update(&iface, Some(&liface), Some(&mut lock))?;
                }
                CommandKind::Down => {
                    self.state.update(&iface, None, Some(&mut lock))?;
                }
                CommandKind::Query | CommandKind::List => {}
            }
        }

        Ok(true)
    }

    /// Applies selection filters: `--allow` class membership, `--exclude`
    /// patterns, and the `no-auto-down` list during bulk teardown.
    fn ignore_interface(&self, iface: &str) -> bool {
        if let Some(class) = &self.opts.allow_class {
            match self.defn.find_allowup(class) {
                None => return true,
                Some(group) => {
                    if !group.contains(iface) {
                        return true;
                    }
                }
            }
        }

        if match_patterns(iface, &self.opts.excludes) {
            return true;
        }

        if self.opts.do_all
            && self.opts.kind == CommandKind::Down
            && match_patterns(iface, &self.defn.no_auto_down)
        {
            return true;
        }

        false
    }

    /// Brings the physical link up or down through the link family's
    /// method, bound to a synthetic definition.
    fn link_change(&mut self, iface: &str, liface: &str, up: bool) -> bool {
        let link = link_family();
        let mut link_if = InterfaceDefn::new(liface.to_string(), link, link.methods[0].as_ref());
        link_if.real_iface = Some(iface.to_string());
        let method = link_if.method;
        convert_variables(method.conversions(), &mut link_if);

        if up {
            method.up(&link_if, &mut self.runner)
        } else {
            method.down(&link_if, &mut self.runner)
        }
    }

    /// Feeds the configured mapping lines to the mapping script and reads
    /// the resulting logical name.
    fn run_mapping(&self, physical: &str, map: &MappingDefn) -> Option<String> {
        let Some(script) = map.script.as_deref() else {
            warn!("mapping for {physical} has no script");
            return None;
        };

        let mut child = match Command::new(script)
            .arg(physical)
            .current_dir("/")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                eprintln!("Could not execute mapping script {script} on {physical}: {err}");
                return None;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            for line in &map.mappings {
                let _ = writeln!(stdin, "{line}");
            }
        }

        match child.wait_with_output() {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let logical = stdout.lines().next().map(str::trim).unwrap_or("");

                if logical.is_empty() {
                    eprintln!("No output from mapping script {script} on {physical}");
                    None
                } else {
                    Some(logical.to_string())
                }
            }
            _ => {
                eprintln!("Error running mapping script {script} on {physical}");
                None
            }
        }
    }

    fn execute_scripts(&mut self, ifd: &InterfaceDefn, phase: &str) -> bool {
        if !self.opts.run_scripts {
            return true;
        }

        if match_patterns(&ifd.logical_iface, &self.defn.no_scripts) {
            return true;
        }

        let command =
            exec::hook_scripts_command(phase, self.opts.verbose, self.opts.ignore_failures);
        let result = self.runner.run(&command);

        self.opts.ignore_failures || result
    }

    fn iface_preup(&mut self, ifd: &InterfaceDefn) -> PhaseOutcome {
        self.runner
            .set_environment(Environment::for_phase(ifd, "start", "pre-up", self.opts.verbose));

        if !ifd.method.up(ifd, &mut CheckRunner) {
            return PhaseOutcome::MissingVariables;
        }

        if !exec::execute_options(ifd, &mut self.runner, "pre-up", self.opts.ignore_failures) {
            return PhaseOutcome::Failure;
        }

        if !self.execute_scripts(ifd, "pre-up") {
            return PhaseOutcome::Failure;
        }

        PhaseOutcome::Success
    }

    fn iface_postup(&mut self, ifd: &InterfaceDefn) -> PhaseOutcome {
        self.runner
            .set_environment(Environment::for_phase(ifd, "start", "post-up", self.opts.verbose));

        if !ifd.method.up(ifd, &mut self.runner) {
            return PhaseOutcome::Failure;
        }

        if !exec::execute_options(ifd, &mut self.runner, "up", self.opts.ignore_failures) {
            return PhaseOutcome::Failure;
        }

        if !self.execute_scripts(ifd, "up") {
            return PhaseOutcome::Failure;
        }

        PhaseOutcome::Success
    }

    fn iface_up(&mut self, ifd: &InterfaceDefn) -> PhaseOutcome {
        match self.iface_preup(ifd) {
            PhaseOutcome::Success => self.iface_postup(ifd),
            other => other,
        }
    }

    fn iface_predown(&mut self, ifd: &InterfaceDefn) -> PhaseOutcome {
        if !self.opts.no_act {
            // interrupt a still-running bring-up of this interface
            self.state.terminate_recorded("ifup", ifd.real_iface());
        }

        self.runner
            .set_environment(Environment::for_phase(ifd, "stop", "pre-down", self.opts.verbose));

        if !ifd.method.down(ifd, &mut CheckRunner) {
            return PhaseOutcome::MissingVariables;
        }

        if !self.execute_scripts(ifd, "down") {
            return PhaseOutcome::Failure;
        }

        if !exec::execute_options(ifd, &mut self.runner, "down", self.opts.ignore_failures) {
            return PhaseOutcome::Failure;
        }

        PhaseOutcome::Success
    }

    fn iface_postdown(&mut self, ifd: &InterfaceDefn) -> PhaseOutcome {
        // the method's teardown commands still run under the pre-down
        // environment
        if !ifd.method.down(ifd, &mut self.runner) {
            return PhaseOutcome::Failure;
        }

        self.runner
            .set_environment(Environment::for_phase(ifd, "stop", "post-down", self.opts.verbose));

        if !self.execute_scripts(ifd, "post-down") {
            return PhaseOutcome::Failure;
        }

        if !exec::execute_options(ifd, &mut self.runner, "post-down", self.opts.ignore_failures) {
            return PhaseOutcome::Failure;
        }

        PhaseOutcome::Success
    }

    fn iface_down(&mut self, ifd: &InterfaceDefn) -> PhaseOutcome {
        match self.iface_predown(ifd) {
            PhaseOutcome::Success => self.iface_postdown(ifd),
            other => other,
        }
    }

    fn iface_query(&mut self, ifd: &InterfaceDefn) -> PhaseOutcome {
        for var in ifd.options.iter() {
            println!("{}: {}", var.name, var.value);
        }

        // one definition per query, like a failed activation stops the
        // family loop
        PhaseOutcome::Failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CaptureRunner;
    use crate::parser::read_interfaces;
    use crate::state::StateStore;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _dir: TempDir,
        run_dir: std::path::PathBuf,
        defn_path: std::path::PathBuf,
    }

    fn fixture(config: &str) -> Fixture {
        let dir = tempdir().unwrap();
        let run_dir = dir.path().join("run");
        fs::create_dir(&run_dir).unwrap();
        let defn_path = dir.path().join("interfaces");
        fs::write(&defn_path, config).unwrap();
        Fixture {
            run_dir,
            defn_path,
            _dir: dir,
        }
    }

    fn controller(fx: &Fixture, opts: Options) -> Controller<CaptureRunner> {
        let defn = read_interfaces(&fx.defn_path, false).unwrap();
        let state = StateStore::new(&fx.run_dir, opts.no_act);
        Controller::new(opts, defn, state, CaptureRunner::default())
    }

    fn state_entries(run_dir: &Path) -> Vec<String> {
        StateStore::new(run_dir, true).read_all().unwrap()
    }

    const MANUAL_ETH0: &str = "iface eth0 inet manual\n";

    #[test]
    fn up_records_state() {
        let fx = fixture(MANUAL_ETH0);
        let mut ctl = controller(&fx, Options::new(CommandKind::Up));

        assert!(ctl.process("eth0").unwrap());
        assert_eq!(state_entries(&fx.run_dir), ["eth0=eth0"]);

        // the physical link came up exactly once
        let link_cmds: Vec<_> = ctl
            .runner()
            .commands()
            .iter()
            .filter(|c| c.contains("ip link set dev eth0"))
            .collect();
        assert_eq!(link_cmds, ["ip link set dev eth0 up"]);
    }

    #[test]
    fn up_twice_is_a_noop() {
        let fx = fixture(MANUAL_ETH0);

        let mut ctl = controller(&fx, Options::new(CommandKind::Up));
        assert!(ctl.process("eth0").unwrap());
        let after_first = state_entries(&fx.run_dir);

        let mut ctl = controller(&fx, Options::new(CommandKind::Up));
        assert!(ctl.process("eth0").unwrap());

        // second invocation ran nothing and left the state unchanged
        assert!(ctl.runner().commands().is_empty());
        assert_eq!(state_entries(&fx.run_dir), after_first);
    }

    #[test]
    fn down_clears_state() {
        let fx = fixture(MANUAL_ETH0);

        let mut ctl = controller(&fx, Options::new(CommandKind::Up));
        assert!(ctl.process("eth0").unwrap());

        let mut ctl = controller(&fx, Options::new(CommandKind::Down));
        assert!(ctl.process("eth0").unwrap());
        assert_eq!(state_entries(&fx.run_dir), Vec::<String>::new());
        assert!(ctl
            .runner()
            .commands()
            .contains(&"ip link set dev eth0 down".to_string()));
    }

    #[test]
    fn down_of_unconfigured_interface_is_a_noop() {
        let fx = fixture(MANUAL_ETH0);
        let mut ctl = controller(&fx, Options::new(CommandKind::Down));

        assert!(ctl.process("eth0").unwrap());
        assert!(ctl.runner().commands().is_empty());
    }

    #[test]
    fn down_uses_recorded_logical_name() {
        let fx = fixture(
            "iface eth0 inet manual\n\
             iface work inet manual\n\
             \tdown echo leaving-work\n",
        );

        // bring it up bound to the "work" logical interface
        let mut ctl = controller(&fx, Options::new(CommandKind::Up));
        assert!(ctl.process("eth0=work").unwrap());
        assert_eq!(state_entries(&fx.run_dir), ["eth0=work"]);

        // plain `ifdown eth0` must tear down "work", not "eth0"
        let mut ctl = controller(&fx, Options::new(CommandKind::Down));
        assert!(ctl.process("eth0").unwrap());
        assert!(ctl
            .runner()
            .commands()
            .contains(&"echo leaving-work".to_string()));
        assert_eq!(state_entries(&fx.run_dir), Vec::<String>::new());
    }

    #[test]
    fn hook_commands_run_in_phase_order() {
        let fx = fixture(
            "iface eth0 inet manual\n\
             \tpre-up echo pre1\n\
             \tpre-up echo pre2\n\
             \tup echo up1\n",
        );
        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;
        let mut ctl = controller(&fx, opts);

        assert!(ctl.process("eth0").unwrap());
        // the physical link comes up before the interface's own phases
        assert_eq!(
            ctl.runner().commands(),
            [
                "ip link set dev eth0 up",
                "echo pre1\necho pre2",
                "echo up1",
            ]
        );
    }

    #[test]
    fn failed_up_clears_state_and_reports_failure() {
        let fx = fixture(
            "iface eth0 inet manual\n\
             \tup breaks-here\n",
        );
        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;

        let defn = read_interfaces(&fx.defn_path, false).unwrap();
        let state = StateStore::new(&fx.run_dir, false);
        let mut ctl = Controller::new(opts, defn, state, CaptureRunner::failing_on("breaks-here"));

        assert!(!ctl.process("eth0").unwrap());
        assert_eq!(state_entries(&fx.run_dir), Vec::<String>::new());
    }

    #[test]
    fn missing_required_variables_fail_before_running_anything() {
        let fx = fixture("iface eth0 inet static\n");
        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;
        let mut ctl = controller(&fx, opts);

        assert!(!ctl.process("eth0").unwrap());
        // the link came up, then validation stopped the method commands
        assert_eq!(ctl.runner().commands(), ["ip link set dev eth0 up"]);
        assert_eq!(state_entries(&fx.run_dir), Vec::<String>::new());
    }

    #[test]
    fn exclusion_pattern_skips_interface() {
        let fx = fixture(MANUAL_ETH0);
        let mut opts = Options::new(CommandKind::Up);
        opts.excludes = vec!["eth*".to_string()];
        let mut ctl = controller(&fx, opts);

        assert!(ctl.process("eth0").unwrap());
        assert!(ctl.runner().commands().is_empty());
        assert_eq!(state_entries(&fx.run_dir), Vec::<String>::new());
    }

    #[test]
    fn allow_class_membership_filters() {
        let fx = fixture(
            "allow-hotplug usb0\n\
             iface usb0 inet manual\n\
             iface eth0 inet manual\n",
        );

        let mut opts = Options::new(CommandKind::Up);
        opts.allow_class = Some("hotplug".to_string());
        let mut ctl = controller(&fx, opts);

        // eth0 is not in the hotplug class: skipped, reported success
        assert!(ctl.process("eth0").unwrap());
        assert!(ctl.runner().commands().is_empty());

        assert!(ctl.process("usb0").unwrap());
        assert!(!ctl.runner().commands().is_empty());
    }

    #[test]
    fn unknown_interface_fails() {
        let fx = fixture(MANUAL_ETH0);
        let mut ctl = controller(&fx, Options::new(CommandKind::Up));

        assert!(!ctl.process("wlan0").unwrap());
    }

    #[test]
    fn option_overrides_apply_and_remove() {
        let fx = fixture(
            "iface eth0 inet manual\n\
             \tmtu 1500\n\
             \twireless-power on\n",
        );

        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;
        opts.overrides.set("mtu", "9000");
        opts.overrides.set("wireless-power", "");
        let mut ctl = controller(&fx, opts);

        assert!(ctl.process("eth0").unwrap());

        let eth0 = ctl.defn().get_interface("eth0", None).unwrap();
        assert_eq!(eth0.options.get("mtu"), Some("9000"));
        assert_eq!(eth0.options.get("wireless-power"), None);
    }

    #[test]
    fn multiple_families_activate_in_order() {
        let fx = fixture(
            "iface eth0 inet manual\n\
             \tup echo four\n\
             iface eth0 inet6 manual\n\
             \tup echo six\n",
        );
        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;
        let mut ctl = controller(&fx, opts);

        assert!(ctl.process("eth0").unwrap());
        let cmds = ctl.runner().commands();
        let four = cmds.iter().position(|c| c == "echo four").unwrap();
        let six = cmds.iter().position(|c| c == "echo six").unwrap();
        assert!(four < six);

        // exactly one link bring-up
        let ups = cmds.iter().filter(|c| c.contains("link set dev eth0 up")).count();
        assert_eq!(ups, 1);
    }

    #[test]
    fn mapping_script_rewrites_logical_name() {
        let fx = fixture(
            "mapping eth*\n\
             \tscript /bin/sh\n\
             \tmap ignored\n\
             iface office inet manual\n\
             \tup echo at-office\n",
        );

        // mapping scripts consume the map lines on stdin and print the
        // chosen logical name
        let script = fx.run_dir.join("pick.sh");
        fs::write(&script, "#!/bin/sh\ncat >/dev/null\necho office\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let config = format!(
            "mapping eth*\n\tscript {}\n\tmap ignored\n\
             iface office inet manual\n\tup echo at-office\n",
            script.display()
        );
        fs::write(&fx.defn_path, config).unwrap();

        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;
        let mut ctl = controller(&fx, opts);

        assert!(ctl.process("eth0").unwrap());
        assert_eq!(state_entries(&fx.run_dir), ["eth0=office"]);
        assert!(ctl
            .runner()
            .commands()
            .contains(&"echo at-office".to_string()));
    }

    #[test]
    fn no_mappings_flag_skips_mapping() {
        let fx = fixture(
            "mapping eth*\n\
             \tscript /nonexistent/script\n\
             iface eth0 inet manual\n",
        );
        let mut opts = Options::new(CommandKind::Up);
        opts.run_mappings = false;
        opts.run_scripts = false;
        let mut ctl = controller(&fx, opts);

        assert!(ctl.process("eth0").unwrap());
        assert_eq!(state_entries(&fx.run_dir), ["eth0=eth0"]);
    }

    #[test]
    fn no_auto_down_respected_for_bulk_teardown() {
        let fx = fixture(
            "no-auto-down eth0\n\
             iface eth0 inet manual\n",
        );

        let mut ctl = controller(&fx, Options::new(CommandKind::Up));
        assert!(ctl.process("eth0").unwrap());

        let mut opts = Options::new(CommandKind::Down);
        opts.do_all = true;
        let mut ctl = controller(&fx, opts);
        assert!(ctl.process("eth0").unwrap());

        // skipped: still recorded as up
        assert_eq!(state_entries(&fx.run_dir), ["eth0=eth0"]);
    }

    #[test]
    fn force_reruns_configured_interface() {
        let fx = fixture(MANUAL_ETH0);

        let mut ctl = controller(&fx, Options::new(CommandKind::Up));
        assert!(ctl.process("eth0").unwrap());

        let mut opts = Options::new(CommandKind::Up);
        opts.force = true;
        opts.run_scripts = false;
        let mut ctl = controller(&fx, opts);
        assert!(ctl.process("eth0").unwrap());
        assert!(!ctl.runner().commands().is_empty());
    }

    #[test]
    #[serial_test::serial]
    fn recursion_marker_without_held_lock_proceeds() {
        let fx = fixture(MANUAL_ETH0);
        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;

        std::env::set_var("IFUPDOWN_eth0", "pre-up");
        let mut ctl = controller(&fx, opts);
        let result = ctl.process("eth0");
        std::env::remove_var("IFUPDOWN_eth0");

        // the marker alone is not enough: the lock must actually be held
        assert!(result.unwrap());
    }

    #[test]
    #[serial_test::serial]
    fn recursion_detected_for_interface_mid_activation() {
        let fx = fixture(MANUAL_ETH0);
        let lock_path = StateStore::new(&fx.run_dir, false).iface_lock_path("eth0");

        // another process holds eth0's lock, as a parent invocation would
        let exe = std::env::current_exe().unwrap();
        let mut child = std::process::Command::new(exe)
            .args(["state::tests::lock_holder_helper", "--exact", "--include-ignored"])
            .env("IFUPDOWN_TEST_LOCK_PATH", &lock_path)
            .stdout(std::process::Stdio::null())
            .spawn()
            .unwrap();

        let probe = StateStore::new(&fx.run_dir, false);
        let mut held = false;
        for _ in 0..40 {
            if probe.is_locked("eth0") {
                held = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(held, "helper process never acquired the lock");

        std::env::set_var("IFUPDOWN_eth0", "post-up");
        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;
        let mut ctl = controller(&fx, opts);
        let result = ctl.process("eth0");
        std::env::remove_var("IFUPDOWN_eth0");

        let _ = child.wait();

        // fails fast with a recursion error instead of deadlocking on the
        // held lock
        assert!(!result.unwrap());
        assert!(ctl.runner().commands().is_empty());
    }

    #[test]
    #[serial_test::serial]
    fn recursion_detected_for_vlan_parent_mid_activation() {
        let fx = fixture(
            "iface eth0 inet manual\n\
             iface eth0.10 inet manual\n",
        );
        let lock_path = StateStore::new(&fx.run_dir, false).iface_lock_path("eth0");

        // the parent device is mid-activation in another process
        let exe = std::env::current_exe().unwrap();
        let mut child = std::process::Command::new(exe)
            .args(["state::tests::lock_holder_helper", "--exact", "--include-ignored"])
            .env("IFUPDOWN_TEST_LOCK_PATH", &lock_path)
            .stdout(std::process::Stdio::null())
            .spawn()
            .unwrap();

        let probe = StateStore::new(&fx.run_dir, false);
        let mut held = false;
        for _ in 0..40 {
            if probe.is_locked("eth0") {
                held = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert!(held, "helper process never acquired the lock");

        std::env::set_var("IFUPDOWN_eth0", "post-up");
        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;
        let mut ctl = controller(&fx, opts);
        let result = ctl.process("eth0.10");
        std::env::remove_var("IFUPDOWN_eth0");

        let _ = child.wait();

        // fails before touching the parent lock instead of blocking on it
        assert!(!result.unwrap());
        assert!(ctl.runner().commands().is_empty());
    }

    #[test]
    fn phase_environments_follow_the_state_machine() {
        let fx = fixture(
            "iface eth0 inet manual\n\
             \tup echo up1\n",
        );
        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;
        let mut ctl = controller(&fx, opts);

        assert!(ctl.process("eth0").unwrap());

        let phases: Vec<_> = ctl
            .runner()
            .environments()
            .iter()
            .filter_map(|env| env.get("PHASE"))
            .collect();
        assert_eq!(phases, ["pre-up", "post-up"]);

        let modes: Vec<_> = ctl
            .runner()
            .environments()
            .iter()
            .filter_map(|env| env.get("MODE"))
            .collect();
        assert_eq!(modes, ["start", "start"]);
    }
}
