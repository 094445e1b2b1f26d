//! Application plumbing for the `ifup` / `ifdown` / `ifquery` binaries.
//!
//! Each binary is a thin wrapper around [`run`] with its command kind.
//! This module owns argument validation, logging setup, target selection,
//! the `--state` query, and the `--all` meta-interface hooks; the per-
//! interface work lives in `ifupdown_core`.

pub mod cli;

use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ifupdown_core::{
    read_interfaces, CommandKind, Controller, Options, ShellRunner, StateStore, RUN_DIR,
};

use crate::cli::Cli;

/// The program name for diagnostics, as invoked.
fn program_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .map(|arg0| {
            arg0.rsplit('/')
                .next()
                .unwrap_or(arg0)
                .to_string()
        })
        .unwrap_or_else(|| "ifupdown".to_string())
}

fn usage(program: &str) -> ExitCode {
    eprintln!("{program}: Use --help for help");
    ExitCode::FAILURE
}

/// Makes sure fds 0-2 are open before anything else runs, so spawned
/// commands and lock files never land on the standard descriptors.
fn check_stdio(program: &str) {
    for fd in 0..=2 {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags != -1 {
            continue;
        }

        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EBADF) {
            let devnull = b"/dev/null\0";
            let opened =
                unsafe { libc::open(devnull.as_ptr() as *const libc::c_char, libc::O_RDONLY) };
            if opened != fd {
                eprintln!("{program}: fd {fd} not available; aborting");
                std::process::exit(2);
            }
        } else {
            eprintln!("{program}: {err}");
            std::process::exit(2);
        }
    }
}

/// Initializes the tracing subscriber writing to stderr.
fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("failed to set tracing subscriber");
}

/// Reports the recorded state of the requested interfaces.
///
/// With no targets, prints every entry (newest first). Exits nonzero if
/// any requested interface is not configured.
fn do_state(state: &StateStore, targets: &[String], program: &str) -> ExitCode {
    let entries = match state.read_all() {
        Ok(entries) => entries,
        Err(err) => {
            eprintln!("{program}: {err}");
            return ExitCode::FAILURE;
        }
    };

    if targets.is_empty() {
        for entry in &entries {
            println!("{entry}");
        }
        return ExitCode::SUCCESS;
    }

    let mut all_found = true;

    for target in targets {
        let found = entries.iter().find(|entry| {
            entry
                .strip_prefix(target.as_str())
                .is_some_and(|rest| rest.starts_with('='))
        });

        match found {
            Some(entry) => println!("{entry}"),
            None => all_found = false,
        }
    }

    if all_found {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Entry point shared by the three binaries.
pub fn run(base_kind: CommandKind) -> ExitCode {
    let program = program_name();
    check_stdio(&program);

    let cli = Cli::parse();

    let is_query = matches!(base_kind, CommandKind::Query);

    // --no-act and --force make no sense for queries; --list and --state
    // belong to ifquery alone.
    if is_query && (cli.no_act || cli.force) {
        return usage(&program);
    }
    if (cli.list || cli.state) && !is_query {
        return usage(&program);
    }
    if cli.list && cli.state {
        return usage(&program);
    }

    let kind = if cli.list { CommandKind::List } else { base_kind };

    let mut opts = Options::new(kind);
    opts.do_all = cli.all;
    opts.force = cli.force;
    opts.verbose = cli.verbose;
    opts.no_act = opts.no_act || cli.no_act;
    opts.run_mappings = !cli.no_mappings;
    opts.run_scripts = !cli.no_scripts;
    opts.ignore_failures = opts.ignore_failures || cli.ignore_errors;
    opts.allow_class = cli.allow.clone();
    opts.excludes = cli.exclude.clone();

    if cli.read_environment {
        if std::env::var("VERBOSE").as_deref() == Ok("yes") {
            opts.verbose = true;
        }
        if std::env::var("CONFIGURE_INTERFACES").as_deref() == Ok("no") {
            opts.no_act = true;
        }
        if let Ok(excludes) = std::env::var("EXCLUDE_INTERFACES") {
            opts.excludes
                .extend(excludes.split_whitespace().map(str::to_string));
        }
    }

    init_logging(opts.verbose);

    for option in &cli.option {
        let Some((name, value)) = option.split_once('=') else {
            eprintln!("Error in --option \"{option}\" -- no \"=\" character");
            return ExitCode::FAILURE;
        };

        let name = match name {
            "post-up" => "up",
            "pre-down" => "down",
            other => other,
        };

        opts.overrides.set(name, value);
    }

    let state = StateStore::new(RUN_DIR, opts.no_act);
    state.ensure_run_dir();

    if cli.state {
        return do_state(&state, &cli.ifaces, &program);
    }

    // Select the targets.
    if !cli.ifaces.is_empty() && (cli.all || cli.list) {
        eprintln!(
            "{program}: either use the --all/--list options, or specify interface(s), \
             but not both"
        );
        return usage(&program);
    }

    if cli.ifaces.is_empty() && !cli.all && !cli.list {
        eprintln!("{program}: no interface(s) specified");
        return usage(&program);
    }

    if cli.all && matches!(kind, CommandKind::Query) {
        return usage(&program);
    }

    let defn = match read_interfaces(&cli.interfaces, cli.no_loopback) {
        Ok(defn) => defn,
        Err(err) => {
            eprintln!("{program}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let targets: Vec<String> = if cli.all || cli.list {
        match kind {
            CommandKind::Up | CommandKind::List => {
                let class = opts.allow_class.as_deref().unwrap_or("auto");
                defn.find_allowup(class)
                    .map(|group| group.interfaces.clone())
                    .unwrap_or_default()
            }
            CommandKind::Down => match state.read_all() {
                Ok(entries) => entries,
                Err(err) => {
                    eprintln!("{program}: {err}");
                    return ExitCode::FAILURE;
                }
            },
            CommandKind::Query => return usage(&program),
        }
    } else {
        cli.ifaces.clone()
    };

    debug!(?targets, "selected interfaces");

    let runner = ShellRunner::new(opts.verbose, opts.no_act, opts.ignore_failures);
    let do_all = opts.do_all;
    let up = matches!(kind, CommandKind::Up);
    let mut controller = Controller::new(opts, defn, state, runner);

    if do_all && !controller.pre_all() {
        eprintln!(
            "{program}: pre-{} script failed.",
            if up { "up" } else { "down" }
        );
        return ExitCode::FAILURE;
    }

    let mut success = true;

    for target in &targets {
        match controller.process(target) {
            Ok(ok) => success &= ok,
            Err(err) => {
                eprintln!("{program}: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    if do_all && !controller.post_all() {
        eprintln!(
            "{program}: post-{} script failed.",
            if up { "up" } else { "down" }
        );
        return ExitCode::FAILURE;
    }

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
