use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// An IP network in CIDR notation. The network address is stored with host
/// bits masked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subnet {
    pub network: IpAddr,
    pub length: u8,
}

impl Subnet {
    pub fn new(network: IpAddr, length: u8) -> Self {
        let length = match network {
            IpAddr::V4(_) => length.min(32),
            IpAddr::V6(_) => length.min(128),
        };
        let network = match network {
            IpAddr::V4(v4) => {
                let bits = u32::from(v4);
                let mask = if length == 0 { 0 } else { u32::MAX << (32 - length) };
                IpAddr::V4(Ipv4Addr::from(bits & mask))
            }
            IpAddr::V6(v6) => {
                let bits = u128::from(v6);
                let mask = if length == 0 {
                    0
                } else {
                    u128::MAX << (128 - length)
                };
                IpAddr::V6(Ipv6Addr::from(bits & mask))
            }
        };
        Subnet { network, length }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = if self.length == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.length)
                };
                u32::from(*addr) & mask == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = if self.length == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.length)
                };
                u128::from(*addr) & mask == u128::from(net)
            }
            _ => false,
        }
    }

    /// Whether `other` is a sub-network of `self`.
    pub fn contains_subnet(&self, other: &Subnet) -> bool {
        other.length >= self.length && self.contains(&other.network)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.length)
    }
}

/// A tagged value inhabiting some type. `Null` is a first-class inhabitant of
/// every type. Durations are nanosecond counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Count(u64),
    Real(f64),
    Time(DateTime<Utc>),
    Duration(i64),
    String(String),
    Pattern(String),
    Address(IpAddr),
    Subnet(Subnet),
    Enum(String),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Integer(x) => Some(*x as i128),
            Value::Count(x) => Some(*x as i128),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(x) => Some(*x as f64),
            Value::Count(x) => Some(*x as f64),
            Value::Real(x) => Some(*x),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Enum(s) => Some(s),
            _ => None,
        }
    }
}

/// Compares two values by mathematical value where both sides are numeric,
/// and structurally otherwise. Returns `None` for incomparable pairs.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    // Exact integral comparison first; mixing in a real falls back to f64.
    if let (Some(x), Some(y)) = (a.as_i128(), b.as_i128()) {
        return Some(x.cmp(&y));
    }
    if matches!(a, Value::Real(_)) || matches!(b, Value::Real(_)) {
        if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
            return x.partial_cmp(&y);
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Time(x), Value::Time(y)) => Some(x.cmp(y)),
        (Value::Duration(x), Value::Duration(y)) => Some(x.cmp(y)),
        (Value::Address(x), Value::Address(y)) => Some(x.cmp(y)),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

/// Parses a duration literal such as `90s`, `1.5h`, or `-200ms` into
/// nanoseconds.
pub fn parse_duration_ns(s: &str) -> Option<i64> {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let split = s.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (num, unit) = s.split_at(split);
    let value: f64 = num.parse().ok()?;
    let scale: f64 = match unit {
        "ns" => 1.0,
        "us" => 1e3,
        "ms" => 1e6,
        "s" | "sec" | "secs" => 1e9,
        "m" | "min" | "mins" => 60.0 * 1e9,
        "h" | "hour" | "hours" => 3600.0 * 1e9,
        "d" | "day" | "days" => 86400.0 * 1e9,
        _ => return None,
    };
    let ns = value * scale;
    if !ns.is_finite() || ns.abs() > i64::MAX as f64 {
        return None;
    }
    Some(if negative { -(ns as i64) } else { ns as i64 })
}

fn fmt_duration(f: &mut fmt::Formatter, ns: i64) -> fmt::Result {
    if ns < 0 {
        write!(f, "-")?;
    }
    let ns = ns.unsigned_abs();
    if ns == 0 {
        return write!(f, "0s");
    }
    const UNITS: [(u64, &str); 7] = [
        (86_400_000_000_000, "d"),
        (3_600_000_000_000, "h"),
        (60_000_000_000, "min"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "us"),
        (1, "ns"),
    ];
    for (scale, unit) in UNITS {
        if ns % scale == 0 {
            return write!(f, "{}{}", ns / scale, unit);
        }
    }
    unreachable!()
}

fn fmt_string(f: &mut fmt::Formatter, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for c in s.chars() {
        match c {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            _ => write!(f, "{}", c)?,
        }
    }
    write!(f, "\"")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "nil"),
            Value::Bool(x) => write!(f, "{}", x),
            // The sign distinguishes integers from counts when re-parsed.
            Value::Integer(x) => write!(f, "{:+}", x),
            Value::Count(x) => write!(f, "{}", x),
            Value::Real(x) => write!(f, "{:?}", x),
            Value::Time(x) => write!(f, "{}", x.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Duration(ns) => fmt_duration(f, *ns),
            Value::String(s) => fmt_string(f, s),
            Value::Pattern(p) => write!(f, "/{}/", p),
            Value::Address(a) => write!(f, "{}", a),
            Value::Subnet(s) => write!(f, "{}", s),
            Value::Enum(s) => fmt_string(f, s),
            Value::List(xs) => {
                write!(f, "[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_masks_host_bits() {
        let net = Subnet::new("10.0.0.55".parse().unwrap(), 8);
        assert_eq!(net.to_string(), "10.0.0.0/8");
        assert!(net.contains(&"10.255.1.2".parse().unwrap()));
        assert!(!net.contains(&"11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn subnet_contains_subnet() {
        let outer = Subnet::new("192.168.0.0".parse().unwrap(), 16);
        let inner = Subnet::new("192.168.1.0".parse().unwrap(), 24);
        assert!(outer.contains_subnet(&inner));
        assert!(!inner.contains_subnet(&outer));
    }

    #[test]
    fn numeric_comparison_crosses_types() {
        assert_eq!(
            compare(&Value::Integer(-1), &Value::Count(0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            compare(&Value::Count(3), &Value::Real(3.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare(&Value::Real(2.5), &Value::Integer(2)),
            Some(Ordering::Greater)
        );
        assert_eq!(compare(&Value::Count(1), &Value::String("x".into())), None);
    }

    #[test]
    fn duration_literals_round_trip() {
        for text in ["90s", "1h", "500ms", "-3min", "0s", "250ns"] {
            let ns = parse_duration_ns(text).unwrap();
            assert_eq!(Value::Duration(ns).to_string(), text);
        }
        assert_eq!(parse_duration_ns("1.5h"), Some(5_400_000_000_000));
    }

    #[test]
    fn display_distinguishes_integer_and_count() {
        assert_eq!(Value::Integer(42).to_string(), "+42");
        assert_eq!(Value::Count(42).to_string(), "42");
        assert_eq!(Value::Real(1.0).to_string(), "1.0");
    }

    #[test]
    fn strings_escape_quotes() {
        assert_eq!(
            Value::String("say \"hi\"".into()).to_string(),
            r#""say \"hi\"""#
        );
    }
}
