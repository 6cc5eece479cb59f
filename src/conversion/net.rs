//! `inet` and `cidr` codecs.
//!
//! Binary layout: family octet (2 = IPv4, 3 = IPv6), prefix bits, is-cidr
//! flag, address byte count, then 4 or 16 address bytes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{Error, Result};
use crate::value::{Inet, Value};

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

pub fn from_binary(bytes: &[u8], expect_cidr: bool) -> Result<Inet> {
    if bytes.len() < 4 {
        return Err(Error::Decode(format!(
            "invalid inet length: {}",
            bytes.len()
        )));
    }
    let family = bytes[0];
    let prefix = bytes[1];
    let is_cidr = bytes[2] != 0;
    let nbytes = bytes[3] as usize;
    let addr_bytes = &bytes[4..];
    if addr_bytes.len() != nbytes {
        return Err(Error::Decode(format!(
            "inet address length mismatch: {} != {}",
            addr_bytes.len(),
            nbytes
        )));
    }

    let addr = match (family, nbytes) {
        (PGSQL_AF_INET, 4) => {
            let arr: [u8; 4] = addr_bytes
                .try_into()
                .map_err(|_| Error::Decode("inet v4 address truncated".into()))?;
            IpAddr::V4(Ipv4Addr::from(arr))
        }
        (PGSQL_AF_INET6, 16) => {
            let arr: [u8; 16] = addr_bytes
                .try_into()
                .map_err(|_| Error::Decode("inet v6 address truncated".into()))?;
            IpAddr::V6(Ipv6Addr::from(arr))
        }
        _ => {
            return Err(Error::Decode(format!(
                "invalid inet family/length: {}/{}",
                family, nbytes
            )));
        }
    };

    let max_prefix = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max_prefix {
        return Err(Error::Decode(format!("invalid inet prefix: {}", prefix)));
    }

    Ok(Inet {
        addr,
        prefix,
        is_cidr: is_cidr || expect_cidr,
    })
}

pub fn to_binary(value: &Value, as_cidr: bool, out: &mut Vec<u8>) -> Result<()> {
    let inet = match value {
        Value::Inet(i) => *i,
        Value::Text(s) => from_text(s, as_cidr)?,
        other => {
            return Err(Error::Decode(format!(
                "cannot encode {} as inet",
                other.type_name()
            )));
        }
    };

    match inet.addr {
        IpAddr::V4(v4) => {
            out.push(PGSQL_AF_INET);
            out.push(inet.prefix);
            out.push(if as_cidr || inet.is_cidr { 1 } else { 0 });
            out.push(4);
            out.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            out.push(PGSQL_AF_INET6);
            out.push(inet.prefix);
            out.push(if as_cidr || inet.is_cidr { 1 } else { 0 });
            out.push(16);
            out.extend_from_slice(&v6.octets());
        }
    }
    Ok(())
}

pub fn from_text(s: &str, is_cidr: bool) -> Result<Inet> {
    let (addr_part, prefix_part) = match s.split_once('/') {
        Some((a, p)) => (a, Some(p)),
        None => (s, None),
    };

    let addr: IpAddr = addr_part
        .parse()
        .map_err(|e| Error::Decode(format!("invalid inet {:?}: {}", s, e)))?;
    let max_prefix = if addr.is_ipv4() { 32 } else { 128 };

    let prefix = match prefix_part {
        Some(p) => {
            let p: u8 = p
                .parse()
                .map_err(|_| Error::Decode(format!("invalid inet prefix in {:?}", s)))?;
            if p > max_prefix {
                return Err(Error::Decode(format!("invalid inet prefix in {:?}", s)));
            }
            p
        }
        None => max_prefix,
    };

    Ok(Inet {
        addr,
        prefix,
        is_cidr,
    })
}

pub fn render_text(inet: &Inet) -> String {
    let max_prefix = if inet.addr.is_ipv4() { 32 } else { 128 };
    if inet.prefix == max_prefix && !inet.is_cidr {
        inet.addr.to_string()
    } else {
        format!("{}/{}", inet.addr, inet.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_binary_round_trip() {
        let inet = from_text("192.168.0.1", false).unwrap();
        assert_eq!(inet.prefix, 32);

        let mut buf = Vec::new();
        to_binary(&Value::Inet(inet), false, &mut buf).unwrap();
        assert_eq!(buf[0], PGSQL_AF_INET);
        assert_eq!(from_binary(&buf, false).unwrap(), inet);
    }

    #[test]
    fn v6_binary_round_trip() {
        let inet = from_text("::1/64", false).unwrap();
        let mut buf = Vec::new();
        to_binary(&Value::Inet(inet), false, &mut buf).unwrap();
        assert_eq!(buf.len(), 4 + 16);
        assert_eq!(from_binary(&buf, false).unwrap(), inet);
    }

    #[test]
    fn cidr_text() {
        let net = from_text("10.0.0.0/8", true).unwrap();
        assert!(net.is_cidr);
        assert_eq!(render_text(&net), "10.0.0.0/8");
    }

    #[test]
    fn rejects_bad_prefix() {
        assert!(from_text("10.0.0.0/40", false).is_err());
        assert!(from_text("nonsense", false).is_err());
    }
}
