//! Per-interface option variable table.
//!
//! Every interface definition owns one [`VariableTable`]: an ordered mapping
//! of option name to value. Insertion order is preserved because it is
//! visible downstream (environment construction, `ifquery` output, hook
//! command ordering).

/// Option names whose values accumulate instead of being overwritten.
///
/// `post-up` and `pre-down` are normalized to `up` and `down` before they
/// reach the table, so only these four occur.
pub const HOOK_OPTIONS: [&str; 4] = ["pre-up", "up", "down", "post-down"];

/// Returns true if `name` is one of the lifecycle-hook option names.
pub fn is_hook_option(name: &str) -> bool {
    HOOK_OPTIONS.contains(&name)
}

/// One option name/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub value: String,
}

/// Ordered option table for one interface definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableTable {
    vars: Vec<Variable>,
}

impl VariableTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets option `name` to `value`.
    ///
    /// A trailing `?` on the name marks the assignment update-guarded: it
    /// only takes effect if the option is absent (the marker itself is never
    /// stored). Hook options are never overwritten; a repeated assignment
    /// appends a newline-joined entry to the existing value. All other
    /// repeated names overwrite.
    pub fn set(&mut self, name: &str, value: &str) {
        let (name, dont_update) = match name.strip_suffix('?') {
            Some(stripped) => (stripped, true),
            None => (name, false),
        };

        if let Some(var) = self.vars.iter_mut().find(|v| v.name == name) {
            if dont_update {
                return;
            }

            if is_hook_option(name) {
                var.value.push('\n');
                var.value.push_str(value);
            } else {
                var.value = value.to_string();
            }

            return;
        }

        self.vars.push(Variable {
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    /// Appends `value` newline-joined to an existing option, or inserts it.
    ///
    /// This is the repeated-option-line rule of the config parser: unlike
    /// [`set`](Self::set), it accumulates for non-hook names too.
    pub fn append(&mut self, name: &str, value: &str) {
        if let Some(var) = self.vars.iter_mut().find(|v| v.name == name) {
            var.value.push('\n');
            var.value.push_str(value);
        } else {
            self.vars.push(Variable {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
    }

    /// Removes option `name` if present, preserving the order of the rest.
    pub fn remove(&mut self, name: &str) {
        self.vars.retain(|v| v.name != name);
    }

    /// Looks up an option's value, empty or not.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.as_str())
    }

    /// Looks up an option's value, treating an empty value as unset.
    ///
    /// Command template expansion uses this: a variable that is present but
    /// empty still makes `%name%` undefined.
    pub fn get_nonempty(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.is_empty())
    }

    /// Returns true if the option is set to a truthy value
    /// (nonzero number, `on`, `true` or `yes`, case-insensitive).
    pub fn var_true(&self, name: &str) -> bool {
        match self.get_nonempty(name) {
            Some(v) => {
                v.parse::<i64>().map(|n| n != 0).unwrap_or(false)
                    || v.eq_ignore_ascii_case("on")
                    || v.eq_ignore_ascii_case("true")
                    || v.eq_ignore_ascii_case("yes")
            }
            None => false,
        }
    }

    /// Returns true if the option is present (even with an empty value).
    pub fn contains(&self, name: &str) -> bool {
        self.vars.iter().any(|v| v.name == name)
    }

    /// Iterates variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    /// Mutable iteration, for conversion transforms.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Variable> {
        self.vars.iter_mut()
    }

    /// Number of variables in the table.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if the table holds no variables.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
