//! Interfaces-file parser.
//!
//! Reads one or more configuration files (following `source` and
//! `source-dir` directives) into an [`InterfacesFile`]. Logical lines are
//! physical lines merged across backslash-newline continuations, with
//! leading whitespace stripped and `#` comment lines skipped. The first
//! word of a line selects the directive; anything unrecognized is an
//! option line belonging to the most recently opened `iface` or `mapping`
//! block.
//!
//! Parsing state (the visited-file set guarding `source` cycles, the
//! loopback-suppression flag) is scoped to one [`read_interfaces`] call.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::family::{get_address_family, AddressFamily, Method};
use crate::types::{InterfaceDefn, InterfacesFile, MappingDefn, LO_IFACE};
use crate::vars::is_hook_option;

/// Reads the interfaces file rooted at `filename`.
///
/// Unless `no_loopback` (or an explicit inet/inet6 loopback definition in
/// the configuration), a synthetic loopback definition is prepended and
/// `lo` joins the `auto` group.
pub fn read_interfaces(filename: &Path, no_loopback: bool) -> Result<InterfacesFile> {
    let mut parser = Parser {
        visited: HashSet::new(),
        no_loopback,
    };

    let mut defn = InterfacesFile::default();

    if !parser.no_loopback {
        defn.allowup_mut("auto").add(LO_IFACE);
    }

    parser.parse_file(&mut defn, filename)?;

    if !parser.no_loopback {
        let inet = get_address_family("inet").ok_or_else(|| {
            Error::parse(filename, 0, "inet address family is not registered")
        })?;
        let loopback = inet.method("loopback").ok_or_else(|| {
            Error::parse(filename, 0, "inet loopback method is not registered")
        })?;

        defn.ifaces
            .insert(0, InterfaceDefn::new(LO_IFACE, inet, loopback));
    }

    Ok(defn)
}

/// What the current option lines attach to.
enum Block {
    None,
    Iface,
    Mapping,
}

struct Parser {
    visited: HashSet<PathBuf>,
    no_loopback: bool,
}

impl Parser {
    fn parse_file(&mut self, defn: &mut InterfacesFile, filename: &Path) -> Result<()> {
        let canonical = filename
            .canonicalize()
            .unwrap_or_else(|_| filename.to_path_buf());

        if !self.visited.insert(canonical) {
            return Ok(());
        }

        let file = match File::open(filename) {
            Ok(file) => file,
            Err(_) => {
                warn!("couldn't open interfaces file \"{}\"", filename.display());
                return Ok(());
            }
        };

        let mut reader = LogicalLines::new(BufReader::new(file));
        let mut block = Block::None;

        while let Some((line, text)) = reader
            .next_logical()
            .map_err(|err| Error::parse(filename, reader.line_no, format!("read error: {err}")))?
        {
            let (first, rest) = split_first_word(&text);
            if first.is_empty() {
                continue;
            }

            match first {
                "mapping" => {
                    defn.mappings.push(MappingDefn {
                        matches: rest.split_whitespace().map(str::to_string).collect(),
                        script: None,
                        mappings: Vec::new(),
                    });
                    block = Block::Mapping;
                }

                "source" => {
                    self.source_files(defn, filename, rest)?;
                    block = Block::None;
                }

                "source-dir" => {
                    self.source_dirs(defn, filename, rest)?;
                    block = Block::None;
                }

                "iface" => {
                    self.parse_iface(defn, filename, line, rest)?;
                    block = Block::Iface;
                }

                "auto" => {
                    let group = defn.allowup_mut("auto");
                    for word in rest.split_whitespace() {
                        group.add(word);
                    }
                    block = Block::None;
                }

                _ if first.starts_with("allow-") && first.len() > 6 => {
                    let class = first["allow-".len()..].to_string();
                    let group = defn.allowup_mut(&class);
                    for word in rest.split_whitespace() {
                        group.add(word);
                    }
                    block = Block::None;
                }

                "no-auto-down" => {
                    defn.no_auto_down
                        .extend(rest.split_whitespace().map(str::to_string));
                    block = Block::None;
                }

                "no-scripts" => {
                    defn.no_scripts
                        .extend(rest.split_whitespace().map(str::to_string));
                    block = Block::None;
                }

                option => match block {
                    Block::Iface => {
                        let name = match option {
                            "post-up" => "up",
                            "pre-down" => "down",
                            other => other,
                        };

                        if rest.is_empty() {
                            return Err(Error::parse(filename, line, "option with empty value"));
                        }

                        let iface = defn
                            .ifaces
                            .last_mut()
                            .ok_or_else(|| Error::parse(filename, line, "misplaced option"))?;

                        if !is_hook_option(name)
                            && !name.ends_with('?')
                            && iface.options.contains(name)
                        {
                            iface.options.append(name, rest);
                        } else {
                            iface.options.set(name, rest);
                        }
                    }

                    Block::Mapping => {
                        let mapping = defn
                            .mappings
                            .last_mut()
                            .ok_or_else(|| Error::parse(filename, line, "misplaced option"))?;

                        match option {
                            "script" => {
                                if mapping.script.is_some() {
                                    return Err(Error::parse(
                                        filename,
                                        line,
                                        "duplicate script in mapping",
                                    ));
                                }
                                mapping.script = Some(rest.to_string());
                            }
                            "map" => {
                                mapping.mappings.push(rest.to_string());
                            }
                            _ => {
                                return Err(Error::parse(filename, line, "misplaced option"));
                            }
                        }
                    }

                    Block::None => {
                        return Err(Error::parse(filename, line, "misplaced option"));
                    }
                },
            }
        }

        Ok(())
    }

    fn parse_iface(
        &mut self,
        defn: &mut InterfacesFile,
        filename: &Path,
        line: u32,
        rest: &str,
    ) -> Result<()> {
        let mut words = rest.split_whitespace();

        let iface_name = words
            .next()
            .ok_or_else(|| Error::parse(filename, line, "too few parameters for iface line"))?;

        let mut family: Option<&'static AddressFamily> = None;
        let mut method: Option<&'static dyn Method> = None;
        let mut inherits = false;

        if let Some(second) = words.next() {
            family = get_address_family(second);
            match family {
                None => inherits = second == "inherits",
                Some(fam) => {
                    if let Some(third) = words.next() {
                        method = fam.method(third);
                        if method.is_none() {
                            inherits = third == "inherits";
                        }
                    }
                }
            }
        }

        if family.is_none() && !inherits {
            return Err(Error::parse(
                filename,
                line,
                "unknown or no address type and no inherits keyword specified",
            ));
        }

        if method.is_none() && !inherits {
            return Err(Error::parse(
                filename,
                line,
                "unknown or no method and no inherits keyword specified",
            ));
        }

        if !inherits {
            if let Some(extra) = words.next() {
                if extra == "inherits" {
                    inherits = true;
                } else {
                    warn!(
                        "{}:{}: extra parameter for the iface line not understood \
                         and ignored: {}",
                        filename.display(),
                        line,
                        extra
                    );
                }
            }
        }

        let mut options = crate::vars::VariableTable::new();

        if inherits {
            let target = words.next().ok_or_else(|| {
                Error::parse(filename, line, "'inherits' keyword is missing a parameter")
            })?;

            let constraint = family.map(|f| f.name);
            let other = defn.get_interface(target, constraint).ok_or_else(|| {
                Error::parse(
                    filename,
                    line,
                    format!(
                        "unknown iface to inherit from: {} ({})",
                        target,
                        constraint.unwrap_or("*")
                    ),
                )
            })?;

            options = other.options.clone();
            family = family.or(Some(other.family));
            method = method.or(Some(other.method));
        }

        let (Some(family), Some(method)) = (family, method) else {
            return Err(Error::parse(
                filename,
                line,
                "unknown or no method and no inherits keyword specified",
            ));
        };

        if (family.name == "inet" || family.name == "inet6") && method.name() == "loopback" {
            self.no_loopback = true;
        }

        defn.ifaces.push(InterfaceDefn {
            logical_iface: iface_name.to_string(),
            real_iface: None,
            family,
            method,
            options,
        });

        Ok(())
    }

    /// Handles `source <glob>`: expands relative to the including file's
    /// directory and recursively parses every match.
    fn source_files(
        &mut self,
        defn: &mut InterfacesFile,
        filename: &Path,
        rest: &str,
    ) -> Result<()> {
        for path in expand_pattern(filename, rest) {
            if path.is_dir() {
                continue;
            }
            debug!("Parsing file {}", path.display());
            self.parse_file(defn, &path)?;
        }

        Ok(())
    }

    /// Handles `source-dir <glob>`: for every matching directory, parses
    /// each plainly named file in sorted order.
    fn source_dirs(
        &mut self,
        defn: &mut InterfacesFile,
        filename: &Path,
        rest: &str,
    ) -> Result<()> {
        for dir in expand_pattern(filename, rest) {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };

            debug!("Reading directory {}", dir.display());

            let mut names: Vec<String> = entries
                .flatten()
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|n| plain_file_name(n))
                .collect();
            names.sort();

            for name in names {
                let path = dir.join(name);
                debug!("Parsing file {}", path.display());
                self.parse_file(defn, &path)?;
            }
        }

        Ok(())
    }
}

/// Expands a `source`/`source-dir` pattern relative to the including
/// file's directory (absolute patterns pass through). Unmatchable or
/// malformed patterns expand to nothing.
fn expand_pattern(filename: &Path, pattern: &str) -> Vec<PathBuf> {
    let full = if pattern.starts_with('/') {
        pattern.to_string()
    } else {
        let dir = filename.parent().unwrap_or_else(|| Path::new("."));
        format!("{}/{}", dir.display(), pattern)
    };

    match glob::glob(&full) {
        Ok(paths) => paths.flatten().collect(),
        Err(_) => Vec::new(),
    }
}

/// The file-name filter for `source-dir`: ASCII letters, digits,
/// underscore and hyphen only (excludes editor backups and the like).
fn plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn split_first_word(line: &str) -> (&str, &str) {
    let line = line.trim_start();
    match line.find(char::is_whitespace) {
        Some(idx) => (&line[..idx], line[idx..].trim_start()),
        None => (line, ""),
    }
}

/// Produces logical lines: continuations merged, comments skipped,
/// surrounding whitespace stripped.
struct LogicalLines<R: BufRead> {
    lines: std::io::Lines<R>,
    line_no: u32,
}

impl<R: BufRead> LogicalLines<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    fn next_logical(&mut self) -> std::io::Result<Option<(u32, String)>> {
        loop {
            let Some(first) = self.lines.next() else {
                return Ok(None);
            };

            self.line_no += 1;
            let mut logical = first?.trim_start().to_string();

            // only the opening physical line can be a comment
            if logical.starts_with('#') {
                continue;
            }

            while logical.ends_with('\\') {
                logical.pop();
                match self.lines.next() {
                    Some(next) => {
                        self.line_no += 1;
                        logical.push_str(&next?);
                    }
                    None => break,
                }
            }

            logical.truncate(logical.trim_end().len());
            return Ok(Some((self.line_no, logical)));
        }
    }
}
