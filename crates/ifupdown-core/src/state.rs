//! Persistent interface state: which logical interface each physical
//! interface is currently configured as.
//!
//! Layout under the run directory (default `/run/network`):
//!
//! - `ifstate`: one `physical=logical` line per configured interface
//! - `.ifstate.lock`: global lock guarding whole-file reads and rewrites
//! - `.ifstate.tmp`: rewrite staging file, renamed over `ifstate`
//! - `ifstate.<iface>`: per-interface lock file; its content is the
//!   recorded logical name (empty when deconfigured), its advisory lock
//!   provides mutual exclusion and recursion detection
//! - `<command>-<iface>.pid`: pid of an in-progress invocation
//!
//! All locks are advisory `fcntl` record locks. Under dry-run (`no_act`)
//! every open/lock failure degrades to best-effort read-only behavior.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::mem;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default run directory.
pub const RUN_DIR: &str = "/run/network";

/// Replaces `/` so interface names are usable as file name components.
pub fn sanitize_name(name: &str) -> String {
    name.replace('/', ".")
}

fn set_lock(file: &File, blocking: bool) -> io::Result<()> {
    let mut fl: libc::flock = unsafe { mem::zeroed() };
    fl.l_type = libc::F_WRLCK as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;

    let cmd = if blocking {
        libc::F_SETLKW
    } else {
        libc::F_SETLK
    };

    if unsafe { libc::fcntl(file.as_raw_fd(), cmd, &fl) } < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

fn lock_would_block(file: &File) -> bool {
    let mut fl: libc::flock = unsafe { mem::zeroed() };
    fl.l_type = libc::F_WRLCK as libc::c_short;
    fl.l_whence = libc::SEEK_SET as libc::c_short;

    if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETLK, &mut fl) } < 0 {
        return false;
    }

    i32::from(fl.l_type) != libc::F_UNLCK
}

/// A held per-interface lock, released on drop.
///
/// `state` is the lock file's content at acquisition time: the logical
/// name the interface is currently recorded as, or `None`.
#[derive(Debug)]
pub struct InterfaceLock {
    file: Option<File>,
    path: PathBuf,
    pub state: Option<String>,
}

impl InterfaceLock {
    /// Rewrites the lock file content with the new recorded state.
    fn write_state(&mut self, state: Option<&str>) {
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let written = (|| -> io::Result<()> {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            writeln!(file, "{}", state.unwrap_or(""))?;
            file.flush()
        })();

        if let Err(err) = written {
            debug!(path = %self.path.display(), %err, "could not record state in lock file");
        }
    }
}

/// The locked state store.
#[derive(Debug, Clone)]
pub struct StateStore {
    run_dir: PathBuf,
    state_file: PathBuf,
    lock_file: PathBuf,
    tmp_file: PathBuf,
    no_act: bool,
}

impl StateStore {
    /// Creates a store rooted at `run_dir`.
    pub fn new(run_dir: impl Into<PathBuf>, no_act: bool) -> Self {
        let run_dir = run_dir.into();
        Self {
            state_file: run_dir.join("ifstate"),
            lock_file: run_dir.join(".ifstate.lock"),
            tmp_file: run_dir.join(".ifstate.tmp"),
            run_dir,
            no_act,
        }
    }

    /// Creates the run directory, best-effort.
    pub fn ensure_run_dir(&self) {
        if let Err(err) = fs::create_dir_all(&self.run_dir) {
            debug!(dir = %self.run_dir.display(), %err, "could not create run directory");
        }
    }

    fn open_lockable(&self, path: &Path) -> io::Result<File> {
        if self.no_act {
            OpenOptions::new().read(true).open(path)
        } else {
            OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(path)
        }
    }

    /// Acquires the global state lock; `None` only under dry-run when the
    /// lock file cannot be opened.
    fn lock_state(&self) -> Result<Option<File>> {
        let file = match self.open_lockable(&self.lock_file) {
            Ok(file) => file,
            Err(err) if self.no_act => {
                debug!(path = %self.lock_file.display(), %err, "no state lock in dry-run");
                return Ok(None);
            }
            Err(err) => {
                return Err(Error::Open {
                    what: "lockfile",
                    path: self.lock_file.clone(),
                    source: err,
                })
            }
        };

        if let Err(err) = set_lock(&file, true) {
            if !self.no_act {
                return Err(Error::Lock {
                    what: "lockfile",
                    path: self.lock_file.clone(),
                    source: err,
                });
            }
        }

        Ok(Some(file))
    }

    /// Path of the per-interface lock file for `iface`.
    pub fn iface_lock_path(&self, iface: &str) -> PathBuf {
        let mut name = self.state_file.clone().into_os_string();
        name.push(".");
        name.push(sanitize_name(iface));
        PathBuf::from(name)
    }

    /// Returns true if the interface has a lock file at all (it has been
    /// operated on before); used by the existence check for non-up
    /// operations.
    pub fn iface_lock_exists(&self, iface: &str) -> bool {
        self.iface_lock_path(iface).exists()
    }

    /// Returns true if some other process currently holds the interface's
    /// lock.
    pub fn is_locked(&self, iface: &str) -> bool {
        let Ok(file) = File::open(self.iface_lock_path(iface)) else {
            return false;
        };

        lock_would_block(&file)
    }

    /// Acquires the per-interface lock and reads the recorded state from
    /// its content.
    ///
    /// Blocks if another invocation holds the lock (after logging that it
    /// is waiting). Under dry-run, open and lock failures degrade to an
    /// unlocked placeholder.
    pub fn lock_interface(&self, iface: &str) -> Result<InterfaceLock> {
        let path = self.iface_lock_path(iface);

        let mut file = match self.open_lockable(&path) {
            Ok(file) => file,
            Err(err) if self.no_act => {
                debug!(path = %path.display(), %err, "no interface lock in dry-run");
                return Ok(InterfaceLock {
                    file: None,
                    path,
                    state: None,
                });
            }
            Err(err) => {
                return Err(Error::Open {
                    what: "lockfile",
                    path,
                    source: err,
                })
            }
        };

        match set_lock(&file, false) {
            Ok(()) => {}
            Err(err)
                if err.raw_os_error() == Some(libc::EACCES)
                    || err.raw_os_error() == Some(libc::EAGAIN) =>
            {
                warn!(path = %path.display(), "waiting for lock");
                if let Err(err) = set_lock(&file, true) {
                    if !self.no_act {
                        return Err(Error::Lock {
                            what: "lockfile",
                            path,
                            source: err,
                        });
                    }
                }
            }
            Err(err) => {
                if !self.no_act {
                    return Err(Error::Lock {
                        what: "lockfile",
                        path,
                        source: err,
                    });
                }
            }
        }

        let mut content = String::new();
        let state = match file.read_to_string(&mut content) {
            Ok(_) => {
                let first = content.lines().next().unwrap_or("").trim();
                (!first.is_empty()).then(|| first.to_string())
            }
            Err(_) => None,
        };

        Ok(InterfaceLock {
            file: Some(file),
            path,
            state,
        })
    }

    /// Reads every `physical=logical` line, newest first.
    pub fn read_all(&self) -> Result<Vec<String>> {
        let _guard = self.lock_state()?;

        let file = match self.open_lockable(&self.state_file) {
            Ok(file) => file,
            Err(err) if self.no_act => {
                debug!(path = %self.state_file.display(), %err, "no statefile in dry-run");
                return Ok(Vec::new());
            }
            Err(err) => {
                return Err(Error::Open {
                    what: "statefile",
                    path: self.state_file.clone(),
                    source: err,
                })
            }
        };

        let mut entries: Vec<String> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|err| Error::Open {
                what: "statefile",
                path: self.state_file.clone(),
                source: err,
            })?;

            let line = line.trim();
            if !line.is_empty() {
                entries.push(line.to_string());
            }
        }

        entries.reverse();
        Ok(entries)
    }

    /// Records `iface`'s new state: `Some(logical)` adds or replaces the
    /// entry, `None` removes it. The held interface lock (if any) gets the
    /// same state written into its content first.
    ///
    /// The state file itself is rewritten through the temp file and
    /// renamed into place under the global lock. Dry-run changes nothing.
    pub fn update(
        &self,
        iface: &str,
        state: Option<&str>,
        lock: Option<&mut InterfaceLock>,
    ) -> Result<()> {
        if let Some(lock) = lock {
            if !self.no_act {
                lock.write_state(state);
            }
        }

        let _guard = self.lock_state()?;

        let state_fp = match self.open_lockable(&self.state_file) {
            Ok(file) => file,
            Err(err) if self.no_act => {
                debug!(path = %self.state_file.display(), %err, "no statefile in dry-run");
                return Ok(());
            }
            Err(err) => {
                return Err(Error::Open {
                    what: "statefile",
                    path: self.state_file.clone(),
                    source: err,
                })
            }
        };

        if self.no_act {
            return Ok(());
        }

        set_lock(&state_fp, true).map_err(|err| Error::Lock {
            what: "statefile",
            path: self.state_file.clone(),
            source: err,
        })?;

        let mut tmp = File::create(&self.tmp_file).map_err(|err| Error::Open {
            what: "temporary statefile",
            path: self.tmp_file.clone(),
            source: err,
        })?;

        let mut pending = state;
        let write_err = |err| Error::StateRewrite {
            path: self.state_file.clone(),
            source: err,
        };

        for line in BufReader::new(&state_fp).lines() {
            let line = line.map_err(write_err)?;
            let line = line.trim();

            if let Some(rest) = line.strip_prefix(iface) {
                if rest.starts_with('=') {
                    if let Some(new_state) = pending.take() {
                        writeln!(tmp, "{iface}={new_state}").map_err(write_err)?;
                    }
                    continue;
                }
            }

            if !line.is_empty() {
                writeln!(tmp, "{line}").map_err(write_err)?;
            }
        }

        if let Some(new_state) = pending {
            writeln!(tmp, "{iface}={new_state}").map_err(write_err)?;
        }

        tmp.flush().map_err(write_err)?;
        drop(tmp);

        fs::rename(&self.tmp_file, &self.state_file).map_err(|err| Error::StateRewrite {
            path: self.state_file.clone(),
            source: err,
        })?;

        Ok(())
    }

    /// Path of the pid file for `command` acting on `iface`.
    pub fn pidfile_path(&self, command: &str, iface: &str) -> PathBuf {
        self.run_dir
            .join(format!("{command}-{}.pid", sanitize_name(iface)))
    }

    /// Records this process's pid for `command` on `iface`.
    pub fn write_pidfile(&self, command: &str, iface: &str) {
        if self.no_act {
            return;
        }

        let path = self.pidfile_path(command, iface);
        if let Err(err) = fs::write(&path, std::process::id().to_string()) {
            warn!(path = %path.display(), %err, "failed to open pid file");
        }
    }

    /// Removes the pid file for `command` on `iface`.
    pub fn remove_pidfile(&self, command: &str, iface: &str) {
        if self.no_act {
            return;
        }

        let _ = fs::remove_file(self.pidfile_path(command, iface));
    }

    /// If a prior `command` invocation left a pid file for `iface`, sends
    /// `SIGTERM` to its process group and removes the file. Best-effort
    /// interruption of an in-progress bring-up.
    pub fn terminate_recorded(&self, command: &str, iface: &str) {
        let path = self.pidfile_path(command, iface);

        let Ok(content) = fs::read_to_string(&path) else {
            return;
        };

        if let Ok(pid) = content.trim().parse::<i32>() {
            debug!(pid, "terminating {command}");
            unsafe {
                libc::kill(-pid, libc::SIGTERM);
            }
        }

        let _ = fs::remove_file(&path);
    }
}
