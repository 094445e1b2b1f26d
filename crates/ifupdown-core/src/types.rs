//! Interface model: the parsed, resolved form of the interfaces file.
//!
//! The config parser produces an [`InterfacesFile`]; the lifecycle
//! controller consumes it. Definition order is preserved everywhere:
//! per-family activation walks definitions in declaration order, and
//! allow-up groups keep first-mention order.

use std::fmt;

use crate::family::{AddressFamily, Method};
use crate::vars::VariableTable;

/// The interface name synthesized when none is configured.
pub const LO_IFACE: &str = "lo";

/// One `iface` block, with inheritance already flattened.
#[derive(Clone)]
pub struct InterfaceDefn {
    /// Name as written in the configuration file.
    pub logical_iface: String,
    /// OS-level device name, bound at activation time.
    pub real_iface: Option<String>,
    pub family: &'static AddressFamily,
    pub method: &'static dyn Method,
    pub options: VariableTable,
}

impl InterfaceDefn {
    /// Creates a definition with an empty option table.
    pub fn new(
        logical_iface: impl Into<String>,
        family: &'static AddressFamily,
        method: &'static dyn Method,
    ) -> Self {
        Self {
            logical_iface: logical_iface.into(),
            real_iface: None,
            family,
            method,
            options: VariableTable::new(),
        }
    }

    /// The bound physical device name; falls back to the logical name
    /// when no binding has happened yet.
    pub fn real_iface(&self) -> &str {
        self.real_iface.as_deref().unwrap_or(&self.logical_iface)
    }
}

impl fmt::Debug for InterfaceDefn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceDefn")
            .field("logical_iface", &self.logical_iface)
            .field("real_iface", &self.real_iface)
            .field("family", &self.family.name)
            .field("method", &self.method.name())
            .field("options", &self.options)
            .finish()
    }
}

/// An `auto` / `allow-<class>` group.
#[derive(Debug, Clone, Default)]
pub struct AllowupGroup {
    /// Group name: `auto` or the `<class>` part of `allow-<class>`.
    pub when: String,
    /// Member interface names, first-mention order, duplicates suppressed.
    pub interfaces: Vec<String>,
}

impl AllowupGroup {
    /// Adds an interface unless already present.
    pub fn add(&mut self, iface: &str) {
        if !self.interfaces.iter().any(|i| i == iface) {
            self.interfaces.push(iface.to_string());
        }
    }

    /// Membership test.
    pub fn contains(&self, iface: &str) -> bool {
        self.interfaces.iter().any(|i| i == iface)
    }
}

/// One `mapping` block.
#[derive(Debug, Clone, Default)]
pub struct MappingDefn {
    /// Glob patterns from the `mapping` line.
    pub matches: Vec<String>,
    /// Script path from the block's `script` line.
    pub script: Option<String>,
    /// Lines fed to the script's stdin, from `map` lines.
    pub mappings: Vec<String>,
}

impl MappingDefn {
    /// Returns true if any match pattern covers `iface`.
    pub fn matches_iface(&self, iface: &str) -> bool {
        match_patterns(iface, &self.matches)
    }
}

/// Root aggregate: everything the parser produced.
#[derive(Debug, Clone, Default)]
pub struct InterfacesFile {
    pub allowups: Vec<AllowupGroup>,
    pub ifaces: Vec<InterfaceDefn>,
    pub mappings: Vec<MappingDefn>,
    /// Interfaces exempt from bulk `ifdown --all` (`no-auto-down` lines).
    pub no_auto_down: Vec<String>,
    /// Interfaces exempt from hook-script directories (`no-scripts` lines).
    pub no_scripts: Vec<String>,
}

impl InterfacesFile {
    /// Finds an allow-up group by name.
    pub fn find_allowup(&self, name: &str) -> Option<&AllowupGroup> {
        self.allowups.iter().find(|g| g.when == name)
    }

    /// Finds or creates the allow-up group `name`.
    pub fn allowup_mut(&mut self, name: &str) -> &mut AllowupGroup {
        if let Some(pos) = self.allowups.iter().position(|g| g.when == name) {
            return &mut self.allowups[pos];
        }

        self.allowups.push(AllowupGroup {
            when: name.to_string(),
            interfaces: Vec::new(),
        });

        self.allowups.last_mut().expect("group was just pushed")
    }

    /// Finds the first definition for `iface`, optionally constrained to
    /// one address family (used to resolve `inherits` targets).
    pub fn get_interface(&self, iface: &str, family: Option<&str>) -> Option<&InterfaceDefn> {
        self.ifaces.iter().find(|i| {
            i.logical_iface == iface && family.map(|f| f == i.family.name).unwrap_or(true)
        })
    }

    /// Returns true if any definition carries this logical name.
    pub fn has_iface(&self, iface: &str) -> bool {
        self.ifaces.iter().any(|i| i.logical_iface == iface)
    }

    /// Returns true if any mapping block's patterns cover `iface`.
    pub fn has_mapping_for(&self, iface: &str) -> bool {
        self.mappings.iter().any(|m| m.matches_iface(iface))
    }
}

/// Shell-style pattern match of `string` against each of `patterns`.
///
/// Unparseable patterns never match.
pub fn match_patterns(string: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| {
        glob::Pattern::new(p)
            .map(|pat| pat.matches(string))
            .unwrap_or(false)
    })
}
