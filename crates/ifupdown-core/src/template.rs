//! Command template expansion.
//!
//! Method command sets are templates: plain text plus `\x` escapes,
//! `%name%` / `%name/p/r%` variable references, and `[[ ... ]]` optional
//! segments nesting up to [`MAX_OPT_DEPTH`]. A reference to the special
//! name `iface` resolves to the bound physical device name; anything else
//! looks up the interface's option table, where an empty value counts as
//! unset.
//!
//! An undefined variable inside an optional segment drops that segment and
//! expansion continues; an undefined variable at nesting depth 0 fails the
//! whole command (after the scan completes, so every missing name gets
//! reported).

use thiserror::Error;

use crate::types::InterfaceDefn;

/// Maximum nesting depth of `[[ ... ]]` segments.
pub const MAX_OPT_DEPTH: usize = 10;

/// Expansion failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// A `%` was opened and never closed.
    #[error("unbalanced '%' in command")]
    UnbalancedPercent,

    /// More `[[` than `]]`.
    #[error("unbalanced '[[' in command")]
    UnbalancedBracket,

    /// A variable required at depth 0 was missing or empty.
    #[error("missing required variable: {name}")]
    UndefinedVariable {
        /// The referenced variable name.
        name: String,
    },
}

/// Resolves a variable reference against one interface definition.
fn get_var(name: &str, ifd: &InterfaceDefn) -> Option<String> {
    if name == "iface" {
        return ifd.real_iface.clone();
    }

    ifd.options.get_nonempty(name).map(str::to_string)
}

/// Expands `command` against `ifd`'s variable table into a shell-ready
/// string.
pub fn expand(command: &str, ifd: &InterfaceDefn) -> Result<String, TemplateError> {
    let mut result = String::new();
    let mut old_pos = [0usize; MAX_OPT_DEPTH];
    let mut okay = [true; MAX_OPT_DEPTH];
    let mut opt_depth = 1usize;
    let mut first_missing: Option<String> = None;

    let bytes = command.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                // escaped character, or a trailing backslash kept literally
                match command[i + 1..].chars().next() {
                    Some(ch) => {
                        result.push(ch);
                        i += 1 + ch.len_utf8();
                    }
                    None => {
                        result.push('\\');
                        i += 1;
                    }
                }
            }

            b'[' if bytes.get(i + 1) == Some(&b'[') && opt_depth < MAX_OPT_DEPTH => {
                old_pos[opt_depth] = result.len();
                okay[opt_depth] = true;
                opt_depth += 1;
                i += 2;
            }

            b']' if bytes.get(i + 1) == Some(&b']') && opt_depth > 1 => {
                opt_depth -= 1;
                if !okay[opt_depth] {
                    result.truncate(old_pos[opt_depth]);
                }
                i += 2;
            }

            b'%' => {
                let rest = &command[i + 1..];
                let len = match rest.find('%') {
                    Some(len) => len,
                    None => return Err(TemplateError::UnbalancedPercent),
                };

                let reference = &rest[..len];
                let (name, replace) = split_replacement(reference);

                match get_var(name, ifd) {
                    Some(mut value) => {
                        if let Some((pat, rep)) = replace {
                            value = value.replace(pat, &rep.to_string());
                        }
                        result.push_str(&value);
                    }
                    None => {
                        if opt_depth == 1 {
                            eprintln!("Missing required variable: {name}");
                            first_missing.get_or_insert_with(|| name.to_string());
                        }
                        okay[opt_depth - 1] = false;
                    }
                }

                i += 1 + len + 1;
            }

            _ => {
                let ch = command[i..].chars().next().unwrap_or('\0');
                result.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    if opt_depth > 1 {
        return Err(TemplateError::UnbalancedBracket);
    }

    if !okay[0] {
        return Err(TemplateError::UndefinedVariable {
            name: first_missing.unwrap_or_default(),
        });
    }

    Ok(result)
}

/// Splits a `name/p/r` reference into the bare name and the single-character
/// replacement pair, if present.
fn split_replacement(reference: &str) -> (&str, Option<(char, char)>) {
    let b = reference.as_bytes();
    let len = b.len();

    if len > 4 && b[len - 4] == b'/' && b[len - 2] == b'/' {
        let pat = b[len - 3] as char;
        let rep = b[len - 1] as char;
        return (&reference[..len - 4], Some((pat, rep)));
    }

    (reference, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family;
    use crate::types::InterfaceDefn;

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
    fn plain_text_passthrough() {
        let ifd = iface_with(&[]);
        assert_eq!(expand("ip link show", &ifd).unwrap(), "ip link show");
    }

    #[test]
    fn variable_substitution() {
        let ifd = iface_with(&[("address", "10.0.0.1"), ("netmask", "24")]);
        assert_eq!(
            expand("ip addr add %address%/%netmask% dev %iface%", &ifd).unwrap(),
            "ip addr add 10.0.0.1/24 dev eth0"
        );
    }

    #[test]
    fn optional_segment_dropped_when_var_missing() {
        let ifd = iface_with(&[("address", "10.0.0.1"), ("netmask", "24")]);
        assert_eq!(
            expand("ip addr add %address%/%netmask% [[mtu %mtu%]]", &ifd).unwrap(),
            "ip addr add 10.0.0.1/24 "
        );
    }

    #[test]
    fn optional_segment_kept_when_var_present() {
        let ifd = iface_with(&[("mtu", "9000")]);
        assert_eq!(
            expand("ip link set dev %iface%[[ mtu %mtu%]] up", &ifd).unwrap(),
            "ip link set dev eth0 mtu 9000 up"
        );
    }

    #[test]
    fn missing_toplevel_variable_fails() {
        let ifd = iface_with(&[("netmask", "24")]);
        let err = expand("ip addr add %address%/%netmask%", &ifd).unwrap_err();
        assert_eq!(
            err,
            TemplateError::UndefinedVariable {
                name: "address".to_string()
            }
        );
    }

    #[test]
    fn empty_value_counts_as_missing() {
        let ifd = iface_with(&[("gateway", "")]);
        assert!(expand("via %gateway%", &ifd).is_err());
        assert_eq!(expand("x[[ via %gateway%]]", &ifd).unwrap(), "x");
    }

    #[test]
    fn nested_optional_segments() {
        let ifd = iface_with(&[("gateway", "10.0.0.254")]);
        assert_eq!(
            expand("[[via %gateway%[[ metric %metric%]]]]", &ifd).unwrap(),
            "via 10.0.0.254"
        );

        // inner failure alone must not drop the outer segment
        let ifd = iface_with(&[]);
        assert_eq!(expand("a[[ %gateway%[[ %metric%]]]]b", &ifd).unwrap(), "ab");
    }

    #[test]
    fn replacement_syntax() {
        let mut ifd = iface_with(&[]);
        ifd.real_iface = Some("eth0/1".to_string());
        assert_eq!(
            expand("/run/dhclient.%iface///.%.pid", &ifd).unwrap(),
            "/run/dhclient.eth0.1.pid"
        );
    }

    #[test]
    fn escapes() {
        let ifd = iface_with(&[]);
        assert_eq!(expand(r"a\%b", &ifd).unwrap(), "a%b");
        assert_eq!(expand(r"a\[[b", &ifd).unwrap(), "a[[b");
        assert_eq!(expand("tail\\", &ifd).unwrap(), "tail\\");
    }

    #[test]
    fn single_brackets_are_literal() {
        let ifd = iface_with(&[]);
        assert_eq!(expand("a[b]c", &ifd).unwrap(), "a[b]c");
    }

    #[test]
    fn unbalanced_errors() {
        let ifd = iface_with(&[]);
        assert_eq!(
            expand("%address", &ifd).unwrap_err(),
            TemplateError::UnbalancedPercent
        );
        assert_eq!(
            expand("[[never closed", &ifd).unwrap_err(),
            TemplateError::UnbalancedBracket
        );
    }

    #[test]
    fn iface_resolves_to_real_name() {
        let mut ifd = iface_with(&[]);
        ifd.real_iface = Some("eth2".to_string());
        assert_eq!(expand("%iface%", &ifd).unwrap(), "eth2");
    }
}
