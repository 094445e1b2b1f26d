//! End-to-end engine behavior through the public API: the state file
//! always reflects the net set of interfaces brought up and not yet
//! brought down.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{tempdir, TempDir};

use ifupdown_core::{
    read_interfaces, CaptureRunner, CommandKind, Controller, Options, StateStore,
};

struct Fixture {
    _dir: TempDir,
    run_dir: PathBuf,
    defn_path: PathBuf,
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

fn apply(fx: &Fixture, kind: CommandKind, target: &str) -> bool {
    let mut opts = Options::new(kind);
    opts.run_scripts = false;
    let defn = read_interfaces(&fx.defn_path, false).unwrap();
    let state = StateStore::new(&fx.run_dir, false);
    let mut controller = Controller::new(opts, defn, state, CaptureRunner::default());
    controller.process(target).unwrap()
}

fn recorded(run_dir: &Path) -> Vec<String> {
    StateStore::new(run_dir, true).read_all().unwrap()
}

#[test]
fn state_tracks_the_net_effect_of_up_and_down() {
    let fx = fixture(
        "iface eth0 inet manual\n\
         iface wlan0 inet manual\n\
         iface home inet manual\n",
    );

    assert!(apply(&fx, CommandKind::Up, "eth0"));
    assert_eq!(recorded(&fx.run_dir), ["eth0=eth0"]);

    assert!(apply(&fx, CommandKind::Up, "wlan0=home"));
    assert_eq!(recorded(&fx.run_dir), ["wlan0=home", "eth0=eth0"]);

    assert!(apply(&fx, CommandKind::Down, "eth0"));
    assert_eq!(recorded(&fx.run_dir), ["wlan0=home"]);

    assert!(apply(&fx, CommandKind::Up, "eth0"));
    assert_eq!(recorded(&fx.run_dir), ["eth0=eth0", "wlan0=home"]);

    assert!(apply(&fx, CommandKind::Down, "wlan0"));
    assert!(apply(&fx, CommandKind::Down, "eth0"));
    assert_eq!(recorded(&fx.run_dir), Vec::<String>::new());
}

#[test]
fn repeated_operations_are_idempotent() {
    let fx = fixture("iface eth0 inet manual\n");

    assert!(apply(&fx, CommandKind::Up, "eth0"));
    assert!(apply(&fx, CommandKind::Up, "eth0"));
    assert_eq!(recorded(&fx.run_dir), ["eth0=eth0"]);

    assert!(apply(&fx, CommandKind::Down, "eth0"));
    assert!(apply(&fx, CommandKind::Down, "eth0"));
    assert_eq!(recorded(&fx.run_dir), Vec::<String>::new());
}

#[test]
fn inherited_definitions_flatten_into_working_interfaces() {
    let fx = fixture(
        "iface uplink inet static\n\
         \taddress 192.0.2.10/24\n\
         \tmtu 1500\n\
         \tup echo primary-up\n\
         iface standby inherits uplink\n\
         \taddress 192.0.2.11/24\n",
    );

    let defn = read_interfaces(&fx.defn_path, false).unwrap();
    let standby = defn.get_interface("standby", None).unwrap();
    assert_eq!(standby.options.get("mtu"), Some("1500"));
    assert_eq!(standby.options.get("up"), Some("echo primary-up"));
    assert_eq!(standby.options.get("address"), Some("192.0.2.11/24"));

    let mut opts = Options::new(CommandKind::Up);
    opts.run_scripts = false;
    let state = StateStore::new(&fx.run_dir, false);
    let mut controller = Controller::new(opts, defn, state, CaptureRunner::default());

    assert!(controller.process("eth1=standby").unwrap());
    assert_eq!(recorded(&fx.run_dir), ["eth1=standby"]);

    let cmds = controller.runner().commands();
    assert!(cmds
        .iter()
        .any(|c| c.contains("ip addr add 192.0.2.11/255.255.255.0")));
    assert!(cmds.iter().any(|c| c == "echo primary-up"));
}

#[test]
fn excluded_interfaces_pass_through_untouched() {
    let fx = fixture(
        "iface eth0 inet manual\n\
         iface wlan0 inet manual\n",
    );

    let run = |target: &str| -> bool {
        let mut opts = Options::new(CommandKind::Up);
        opts.run_scripts = false;
        opts.excludes = vec!["eth*".to_string()];
        let defn = read_interfaces(&fx.defn_path, false).unwrap();
        let state = StateStore::new(&fx.run_dir, false);
        Controller::new(opts, defn, state, CaptureRunner::default())
            .process(target)
            .unwrap()
    };

    assert!(run("eth0"));
    assert!(run("wlan0"));
    assert_eq!(recorded(&fx.run_dir), ["wlan0=wlan0"]);
}
