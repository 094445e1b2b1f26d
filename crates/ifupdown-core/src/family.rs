//! Address families and configuration methods.
//!
//! Each address family carries a set of named methods; a method knows how
//! to bring an interface up or down given an executor. Dispatch is through
//! trait objects so additional methods can be plugged in; the built-in
//! methods are [`TemplateMethod`] instances whose command sets are template
//! strings expanded by [`crate::template`].
//!
//! The registry is read-only after initialization. The `link` and `meta`
//! families are internal (physical link handling and the synthetic `--all`
//! interface) and are not visible to `iface` lines.

use once_cell::sync::Lazy;

use crate::convert::{Conversion, Transform};
use crate::exec::{execute, Executor};
use crate::types::InterfaceDefn;

/// An option value injected when the interface doesn't set it.
#[derive(Debug, Clone, Copy)]
pub struct OptionDefault {
    pub option: &'static str,
    pub value: &'static str,
}

/// A configuration method: the up/down capability for one (family, method)
/// pair.
///
/// `up` and `down` return false when any of their commands failed. Passing
/// a validating executor (one that runs nothing) turns them into a
/// required-variable check.
pub trait Method: Send + Sync {
    fn name(&self) -> &str;
    fn up(&self, iface: &InterfaceDefn, exec: &mut dyn Executor) -> bool;
    fn down(&self, iface: &InterfaceDefn, exec: &mut dyn Executor) -> bool;

    /// Conversion rules applied to raw option values before invocation.
    fn conversions(&self) -> &[Conversion] {
        &[]
    }

    /// Option values applied when absent.
    fn defaults(&self) -> &[OptionDefault] {
        &[]
    }
}

/// A named family plus its supported methods.
pub struct AddressFamily {
    pub name: &'static str,
    pub methods: Vec<Box<dyn Method>>,
}

impl AddressFamily {
    /// Looks up a method by name.
    pub fn method(&self, name: &str) -> Option<&dyn Method> {
        self.methods
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }
}

/// A method whose command sets are template strings.
pub struct TemplateMethod {
    name: &'static str,
    up_templates: &'static [&'static str],
    down_templates: &'static [&'static str],
    conversions: &'static [Conversion],
    defaults: &'static [OptionDefault],
}

impl TemplateMethod {
    fn run(&self, templates: &[&str], iface: &InterfaceDefn, exec: &mut dyn Executor) -> bool {
        templates.iter().all(|t| execute(t, iface, exec))
    }
}

impl Method for TemplateMethod {
    fn name(&self) -> &str {
        self.name
    }

    fn up(&self, iface: &InterfaceDefn, exec: &mut dyn Executor) -> bool {
        self.run(self.up_templates, iface, exec)
    }

    fn down(&self, iface: &InterfaceDefn, exec: &mut dyn Executor) -> bool {
        self.run(self.down_templates, iface, exec)
    }

    fn conversions(&self) -> &[Conversion] {
        self.conversions
    }

    fn defaults(&self) -> &[OptionDefault] {
        self.defaults
    }
}

const CLEANUP_HWADDRESS: Conversion = Conversion {
    option: "hwaddress",
    new_option: None,
    transform: Transform::CleanupHwaddress,
    args: &[],
};

const INET_STATIC_CONVERSIONS: &[Conversion] = &[
    // derive the netmask from the address prefix unless one is configured
    Conversion {
        option: "address",
        new_option: Some("netmask?"),
        transform: Transform::ComputeV4Mask,
        args: &[],
    },
    Conversion {
        option: "address",
        new_option: None,
        transform: Transform::ComputeV4Addr,
        args: &[],
    },
    Conversion {
        option: "broadcast",
        new_option: None,
        transform: Transform::ComputeV4Broadcast,
        args: &[],
    },
    CLEANUP_HWADDRESS,
    METRIC_TO_DECIMAL,
];

const METRIC_TO_DECIMAL: Conversion = Conversion {
    option: "metric",
    new_option: None,
    transform: Transform::ToDecimal,
    args: &[],
};

const INET_STATIC_DEFAULTS: &[OptionDefault] = &[OptionDefault {
    option: "broadcast",
    value: "+",
}];

const INET6_STATIC_CONVERSIONS: &[Conversion] = &[CLEANUP_HWADDRESS, METRIC_TO_DECIMAL];

const INET6_STATIC_DEFAULTS: &[OptionDefault] = &[OptionDefault {
    option: "netmask",
    value: "64",
}];

fn template_method(
    name: &'static str,
    up_templates: &'static [&'static str],
    down_templates: &'static [&'static str],
    conversions: &'static [Conversion],
    defaults: &'static [OptionDefault],
) -> Box<dyn Method> {
    Box::new(TemplateMethod {
        name,
        up_templates,
        down_templates,
        conversions,
        defaults,
    })
}

fn inet_family() -> AddressFamily {
    AddressFamily {
        name: "inet",
        methods: vec![
            template_method(
                "loopback",
                &["ip link set dev %iface% up"],
                &["ip link set dev %iface% down"],
                &[],
                &[],
            ),
            template_method(
                "static",
                &[
                    "ip addr add %address%/%netmask%[[ broadcast %broadcast%]]\
                     [[ peer %pointopoint%]][[ scope %scope%]] dev %iface%",
                    "[[ip route add default via %gateway%[[ metric %metric%]] \
                     dev %iface% onlink]]",
                ],
                &[
                    "[[ip route del default via %gateway%[[ metric %metric%]] \
                     dev %iface% 2>&1 1>/dev/null || true]]",
                    "ip addr del %address%/%netmask% dev %iface%",
                ],
                INET_STATIC_CONVERSIONS,
                INET_STATIC_DEFAULTS,
            ),
            template_method("manual", &[], &[], &[], &[]),
            template_method(
                "dhcp",
                &["dhclient -4 -v -i -pf /run/dhclient.%iface///.%.pid \
                   -lf /var/lib/dhcp/dhclient.%iface///.%.leases %iface%"],
                &["dhclient -4 -v -r -pf /run/dhclient.%iface///.%.pid \
                   -lf /var/lib/dhcp/dhclient.%iface///.%.leases %iface%"],
                &[CLEANUP_HWADDRESS],
                &[],
            ),
        ],
    }
}

fn inet6_family() -> AddressFamily {
    AddressFamily {
        name: "inet6",
        methods: vec![
            template_method(
                "loopback",
                &["ip link set dev %iface% up"],
                &["ip link set dev %iface% down"],
                &[],
                &[],
            ),
            template_method(
                "static",
                &[
                    "ip -6 addr add %address%/%netmask% dev %iface%\
                     [[ preferred_lft %preferred-lifetime%]]",
                    "[[ip -6 route add default via %gateway%[[ metric %metric%]] \
                     dev %iface% onlink]]",
                ],
                &[
                    "[[ip -6 route del default via %gateway%[[ metric %metric%]] \
                     dev %iface% 2>&1 1>/dev/null || true]]",
                    "ip -6 addr del %address%/%netmask% dev %iface%",
                ],
                INET6_STATIC_CONVERSIONS,
                INET6_STATIC_DEFAULTS,
            ),
            template_method("manual", &[], &[], &[], &[]),
        ],
    }
}

/// Families selectable from `iface` lines.
static ADDR_FAMS: Lazy<Vec<AddressFamily>> = Lazy::new(|| vec![inet_family(), inet6_family()]);

/// Internal family handling the physical link, applied once per device.
static ADDR_LINK: Lazy<AddressFamily> = Lazy::new(|| AddressFamily {
    name: "link",
    methods: vec![template_method(
        "link",
        &["ip link set dev %iface%[[ mtu %mtu%]][[ address %hwaddress%]] up"],
        &["ip link set dev %iface% down"],
        &[CLEANUP_HWADDRESS],
        &[],
    )],
});

/// Internal family backing the synthetic `--all` interface.
static ADDR_META: Lazy<AddressFamily> = Lazy::new(|| AddressFamily {
    name: "meta",
    methods: vec![template_method("none", &[], &[], &[], &[])],
});

/// All config-visible address families.
pub fn addr_fams() -> &'static [AddressFamily] {
    Lazy::force(&ADDR_FAMS).as_slice()
}

/// Looks up a config-visible address family by name.
pub fn get_address_family(name: &str) -> Option<&'static AddressFamily> {
    addr_fams().iter().find(|f| f.name == name)
}

/// The physical-link family.
pub fn link_family() -> &'static AddressFamily {
    Lazy::force(&ADDR_LINK)
}

/// The meta family used by `--all` hook phases.
pub fn meta_family() -> &'static AddressFamily {
    Lazy::force(&ADDR_META)
}
