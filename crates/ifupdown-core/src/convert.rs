//! Option value conversions.
//!
//! Methods declare conversions: pre-processing transformations applied to
//! raw option values before the method's command set runs. A conversion
//! either rewrites an option in place or derives a new option from it
//! (`new_option`, which may carry the update-guard `?` marker so an
//! explicitly configured value wins).

use std::fs::File;
use std::io::Read;
use std::net::Ipv4Addr;

use crate::types::InterfaceDefn;

/// One conversion rule attached to a method.
#[derive(Debug, Clone, Copy)]
pub struct Conversion {
    /// Option the rule applies to; the special name `iface` reads the
    /// bound physical device name instead of the option table.
    pub option: &'static str,
    /// Target option to set; `None` rewrites `option` in place.
    pub new_option: Option<&'static str>,
    pub transform: Transform,
    /// Extra arguments for the transform.
    pub args: &'static [&'static str],
}

/// The closed set of named transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Strip deprecated link-class prefixes from `hwaddress`, or generate
    /// a locally administered unicast address for the value `random`.
    CleanupHwaddress,
    /// Reduce `a.b.c.d/prefix` to the bare address.
    ComputeV4Addr,
    /// Derive a dotted-quad netmask from `a.b.c.d[/prefix]`, falling back
    /// to the classful width.
    ComputeV4Mask,
    /// Resolve the `+` / `-` shorthands against `address` and `netmask`.
    ComputeV4Broadcast,
    /// Normalize an integer (optionally in another base) to decimal.
    ToDecimal,
}

impl Transform {
    /// Applies the transform to `value`. `ifd` supplies lookup context for
    /// transforms that read sibling options.
    fn apply(&self, ifd: &InterfaceDefn, value: &mut String, args: &[&str]) {
        match self {
            Transform::CleanupHwaddress => cleanup_hwaddress(value),
            Transform::ComputeV4Addr => compute_v4_addr(value),
            Transform::ComputeV4Mask => compute_v4_mask(value),
            Transform::ComputeV4Broadcast => compute_v4_broadcast(ifd, value),
            Transform::ToDecimal => to_decimal(value, args),
        }
    }
}

/// Runs a method's conversion rules against an interface definition.
pub fn convert_variables(conversions: &[Conversion], ifd: &mut InterfaceDefn) {
    for c in conversions {
        let source = if c.option == "iface" {
            if c.new_option.is_none() {
                continue;
            }
            Some(ifd.real_iface().to_string())
        } else {
            c.option_value(ifd)
        };

        let Some(mut value) = source else { continue };

        let context = ifd.clone();
        c.transform.apply(&context, &mut value, c.args);
        ifd.options.set(c.new_option.unwrap_or(c.option), &value);
    }
}

impl Conversion {
    fn option_value(&self, ifd: &InterfaceDefn) -> Option<String> {
        ifd.options.get(self.option).map(str::to_string)
    }
}

fn cleanup_hwaddress(value: &mut String) {
    if value == "random" {
        let mut mac = [0u8; 6];
        let read = File::open("/dev/urandom").and_then(|mut f| f.read_exact(&mut mac));
        if read.is_err() {
            return;
        }
        mac[0] |= 0x02; // locally administered
        mac[0] &= !0x01; // unicast
        *value = format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        );
        return;
    }

    let Some((class, rest)) = value.split_once(' ') else {
        return;
    };

    if ["ether", "ax25", "ARCnet", "netrom"]
        .iter()
        .any(|c| class.eq_ignore_ascii_case(c))
    {
        *value = rest.to_string();
    }
}

fn compute_v4_addr(value: &mut String) {
    if let Some((addr, _)) = value.split_once('/') {
        *value = addr.to_string();
    }
}

fn compute_v4_mask(value: &mut String) {
    let (addr_part, mask_part) = match value.split_once('/') {
        Some((a, m)) => (a, Some(m)),
        None => (value.as_str(), None),
    };

    let Ok(addr) = addr_part.parse::<Ipv4Addr>() else {
        return;
    };

    let mask = match mask_part {
        None => mask_from_width(classful_width(addr)),
        Some(m) => match m.parse::<Ipv4Addr>() {
            Ok(mask) => mask,
            Err(_) => match m.parse::<u32>() {
                Ok(width) if width <= 32 => mask_from_width(width),
                _ => return,
            },
        },
    };

    *value = mask.to_string();
}

fn classful_width(addr: Ipv4Addr) -> u32 {
    match addr.octets()[0] {
        0..=127 => 8,
        128..=191 => 16,
        192..=223 => 24,
        _ => 32,
    }
}

fn mask_from_width(width: u32) -> Ipv4Addr {
    let bits = if width == 0 {
        0
    } else {
        u32::MAX << (32 - width)
    };
    Ipv4Addr::from(bits)
}

fn compute_v4_broadcast(ifd: &InterfaceDefn, value: &mut String) {
    if value != "+" && value != "-" {
        return;
    }

    let Some(addr) = ifd
        .options
        .get_nonempty("address")
        .and_then(|a| a.split('/').next())
        .and_then(|a| a.parse::<Ipv4Addr>().ok())
    else {
        return;
    };

    let Some(mask) = ifd
        .options
        .get_nonempty("netmask")
        .and_then(|m| m.parse::<Ipv4Addr>().ok())
    else {
        return;
    };

    let addr = u32::from(addr);
    let mask = u32::from(mask);

    // a /31 has no broadcast address
    let result = if mask != 0xffff_fffe {
        match value.as_str() {
            "+" => addr | !mask,
            _ => addr & mask,
        }
    } else {
        match value.as_str() {
            "+" => 0xffff_ffff,
            _ => 0,
        }
    };

    *value = Ipv4Addr::from(result).to_string();
}

fn to_decimal(value: &mut String, args: &[&str]) {
    let base = args
        .first()
        .and_then(|a| a.parse::<u32>().ok())
        .filter(|b| (2..=36).contains(b))
        .unwrap_or(10);

    if let Ok(parsed) = i64::from_str_radix(value.trim(), base) {
        *value = parsed.to_string();
    }
}
