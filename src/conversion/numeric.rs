//! NUMERIC codec.
//!
//! Binary format, after PostgreSQL's `numeric.c`:
//! - 2 bytes: ndigits (number of base-10000 digit groups)
//! - 2 bytes: weight (position of the first group relative to the decimal
//!   point, in units of four decimal digits)
//! - 2 bytes: sign (0x0000 positive, 0x4000 negative, 0xC000 NaN,
//!   0xD000 +Inf, 0xF000 -Inf)
//! - 2 bytes: dscale (display scale)
//! - ndigits * 2 bytes: groups, each 0..=9999, most significant first

use crate::error::{Error, Result};
use crate::value::{Numeric, NumericSign, Value};

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Unpack the binary representation.
pub fn from_binary(bytes: &[u8]) -> Result<Numeric> {
    if bytes.len() < 8 {
        return Err(Error::Decode(format!(
            "invalid NUMERIC length: {}",
            bytes.len()
        )));
    }

    let ndigits = i16::from_be_bytes([bytes[0], bytes[1]]);
    let weight = i16::from_be_bytes([bytes[2], bytes[3]]);
    let sign_raw = u16::from_be_bytes([bytes[4], bytes[5]]);
    let dscale = u16::from_be_bytes([bytes[6], bytes[7]]);

    let sign = match sign_raw {
        NUMERIC_POS => NumericSign::Positive,
        NUMERIC_NEG => NumericSign::Negative,
        NUMERIC_NAN => NumericSign::NaN,
        NUMERIC_PINF => NumericSign::PositiveInfinity,
        NUMERIC_NINF => NumericSign::NegativeInfinity,
        other => {
            return Err(Error::Decode(format!(
                "invalid NUMERIC sign: {:#06x}",
                other
            )));
        }
    };

    if ndigits < 0 {
        return Err(Error::Decode(format!("negative NUMERIC ndigits: {ndigits}")));
    }
    let ndigits = ndigits as usize;
    let expected = 8 + ndigits * 2;
    if bytes.len() < expected {
        return Err(Error::Decode(format!(
            "invalid NUMERIC length: {} (expected {})",
            bytes.len(),
            expected
        )));
    }

    let mut digits = Vec::with_capacity(ndigits);
    for i in 0..ndigits {
        let offset = 8 + i * 2;
        digits.push(i16::from_be_bytes([bytes[offset], bytes[offset + 1]]));
    }

    Ok(Numeric {
        sign,
        weight,
        dscale,
        digits,
    })
}

/// Pack a value as NUMERIC. Accepts [`Value::Numeric`] directly; integers
/// and floats convert through their decimal text form.
pub fn to_binary(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    let owned;
    let numeric = match value {
        Value::Numeric(n) => n,
        Value::Int2(v) => {
            owned = parse_text(&v.to_string())?;
            &owned
        }
        Value::Int4(v) => {
            owned = parse_text(&v.to_string())?;
            &owned
        }
        Value::Int8(v) => {
            owned = parse_text(&v.to_string())?;
            &owned
        }
        Value::Float4(v) => {
            owned = parse_text(&super::primitives::render_float(*v as f64))?;
            &owned
        }
        Value::Float8(v) => {
            owned = parse_text(&super::primitives::render_float(*v))?;
            &owned
        }
        Value::Text(s) => {
            owned = parse_text(s)?;
            &owned
        }
        other => {
            return Err(Error::Decode(format!(
                "cannot encode {} as numeric",
                other.type_name()
            )));
        }
    };

    write_binary(numeric, out);
    Ok(())
}

fn write_binary(n: &Numeric, out: &mut Vec<u8>) {
    let sign = match n.sign {
        NumericSign::Positive => NUMERIC_POS,
        NumericSign::Negative => NUMERIC_NEG,
        NumericSign::NaN => NUMERIC_NAN,
        NumericSign::PositiveInfinity => NUMERIC_PINF,
        NumericSign::NegativeInfinity => NUMERIC_NINF,
    };
    out.extend_from_slice(&(n.digits.len() as i16).to_be_bytes());
    out.extend_from_slice(&n.weight.to_be_bytes());
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&n.dscale.to_be_bytes());
    for &d in &n.digits {
        out.extend_from_slice(&d.to_be_bytes());
    }
}

/// Parse the decimal text form into the base-10000 representation.
pub fn parse_text(s: &str) -> Result<Numeric> {
    match s {
        "NaN" => return Ok(Numeric::nan()),
        "Infinity" => {
            return Ok(Numeric {
                sign: NumericSign::PositiveInfinity,
                ..Numeric::zero()
            });
        }
        "-Infinity" => {
            return Ok(Numeric {
                sign: NumericSign::NegativeInfinity,
                ..Numeric::zero()
            });
        }
        _ => {}
    }

    // Scientific notation goes through a plain-decimal rewrite.
    if s.contains(['e', 'E']) {
        return parse_text(&expand_scientific(s)?);
    }

    let (negative, rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, f),
        None => (rest, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::Decode(format!("invalid numeric: {:?}", s)));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(Error::Decode(format!("invalid numeric: {:?}", s)));
    }

    let dscale = frac_part.len() as u16;

    // Assemble base-10000 groups: the integer part is left-padded and the
    // fractional part right-padded to whole groups of four decimal digits.
    let int_digits: Vec<u8> = int_part.bytes().map(|b| b - b'0').collect();
    let frac_digits: Vec<u8> = frac_part.bytes().map(|b| b - b'0').collect();

    let int_groups = int_digits.len().div_ceil(4);
    let frac_groups = frac_digits.len().div_ceil(4);

    let mut padded = Vec::with_capacity((int_groups + frac_groups) * 4);
    padded.resize(int_groups * 4 - int_digits.len(), 0);
    padded.extend_from_slice(&int_digits);
    padded.extend_from_slice(&frac_digits);
    padded.resize(padded.len() + (frac_groups * 4 - frac_digits.len()), 0);

    let mut digits: Vec<i16> = padded
        .chunks(4)
        .map(|c| c.iter().fold(0i16, |acc, &d| acc * 10 + d as i16))
        .collect();

    let mut weight = int_groups as i32 - 1;

    // Normalize: no leading or trailing zero groups.
    while let Some(&0) = digits.first() {
        digits.remove(0);
        weight -= 1;
    }
    while let Some(&0) = digits.last() {
        digits.pop();
    }

    if digits.is_empty() {
        return Ok(Numeric {
            sign: NumericSign::Positive,
            weight: 0,
            dscale,
            digits,
        });
    }

    Ok(Numeric {
        sign: if negative {
            NumericSign::Negative
        } else {
            NumericSign::Positive
        },
        weight: weight as i16,
        dscale,
        digits,
    })
}

fn expand_scientific(s: &str) -> Result<String> {
    let (mantissa, exp) = s
        .split_once(['e', 'E'])
        .ok_or_else(|| Error::Decode(format!("invalid numeric: {:?}", s)))?;
    let exp: i32 = exp
        .parse()
        .map_err(|_| Error::Decode(format!("invalid numeric exponent: {:?}", s)))?;

    let (negative, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };
    let digits: String = format!("{}{}", int_part, frac_part);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Decode(format!("invalid numeric: {:?}", s)));
    }

    let point = int_part.len() as i32 + exp;
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if point <= 0 {
        out.push_str("0.");
        for _ in 0..(-point) {
            out.push('0');
        }
        out.push_str(&digits);
    } else if (point as usize) >= digits.len() {
        out.push_str(&digits);
        for _ in 0..(point as usize - digits.len()) {
            out.push('0');
        }
    } else {
        out.push_str(&digits[..point as usize]);
        out.push('.');
        out.push_str(&digits[point as usize..]);
    }
    Ok(out)
}

/// Render the decimal text form, after `get_str_from_var()`.
pub fn render_text(n: &Numeric) -> String {
    match n.sign {
        NumericSign::NaN => return "NaN".to_string(),
        NumericSign::PositiveInfinity => return "Infinity".to_string(),
        NumericSign::NegativeInfinity => return "-Infinity".to_string(),
        _ => {}
    }

    let dscale = n.dscale as i32;

    if n.digits.is_empty() {
        return if dscale > 0 {
            let mut s = "0.".to_string();
            for _ in 0..dscale {
                s.push('0');
            }
            s
        } else {
            "0".to_string()
        };
    }

    let mut result = String::new();
    if n.sign == NumericSign::Negative {
        result.push('-');
    }

    let weight = n.weight as i32;
    let ndigits = n.digits.len();

    if weight < 0 {
        // All groups are after the decimal point.
        result.push_str("0.");
        let leading_zeros = (-(weight + 1)) * 4;
        for _ in 0..leading_zeros {
            result.push('0');
        }
        let mut written = leading_zeros;
        for &d in &n.digits {
            let s = format!("{:04}", d);
            for c in s.chars() {
                if written < dscale {
                    result.push(c);
                    written += 1;
                }
            }
        }
        while written < dscale {
            result.push('0');
            written += 1;
        }
    } else {
        // First group prints without leading zeros.
        let mut d_idx = 0;
        if d_idx < ndigits {
            result.push_str(&n.digits[d_idx].to_string());
            d_idx += 1;
        }

        let full_int_groups = weight as usize;
        while d_idx <= full_int_groups && d_idx < ndigits {
            result.push_str(&format!("{:04}", n.digits[d_idx]));
            d_idx += 1;
        }
        while d_idx <= full_int_groups {
            result.push_str("0000");
            d_idx += 1;
        }

        if dscale > 0 {
            result.push('.');
            let mut written = 0;
            while d_idx < ndigits && written < dscale {
                let s = format!("{:04}", n.digits[d_idx]);
                for c in s.chars() {
                    if written < dscale {
                        result.push(c);
                        written += 1;
                    }
                }
                d_idx += 1;
            }
            while written < dscale {
                result.push('0');
                written += 1;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_binary(ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ndigits.to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&sign.to_be_bytes());
        buf.extend_from_slice(&dscale.to_be_bytes());
        for &d in digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
        buf
    }

    #[test]
    fn binary_decode_simple() {
        // 12345 = 1 * 10000 + 2345, weight=1
        let bytes = make_binary(2, 1, 0x0000, 0, &[1, 2345]);
        let n = from_binary(&bytes).unwrap();
        assert_eq!(render_text(&n), "12345");
    }

    #[test]
    fn binary_decode_decimal() {
        let bytes = make_binary(2, 0, 0x0000, 2, &[123, 4500]);
        assert_eq!(render_text(&from_binary(&bytes).unwrap()), "123.45");
    }

    #[test]
    fn binary_decode_negative() {
        let bytes = make_binary(2, 0, 0x4000, 2, &[123, 4500]);
        assert_eq!(render_text(&from_binary(&bytes).unwrap()), "-123.45");
    }

    #[test]
    fn binary_decode_small_fraction() {
        // 0.0001: weight=-1, digits=[1]
        let bytes = make_binary(1, -1, 0x0000, 4, &[1]);
        assert_eq!(render_text(&from_binary(&bytes).unwrap()), "0.0001");
    }

    #[test]
    fn binary_decode_specials() {
        assert_eq!(
            from_binary(&make_binary(0, 0, 0xC000, 0, &[])).unwrap().sign,
            NumericSign::NaN
        );
        assert_eq!(
            from_binary(&make_binary(0, 0, 0xD000, 0, &[])).unwrap().sign,
            NumericSign::PositiveInfinity
        );
        assert_eq!(
            from_binary(&make_binary(0, 0, 0xF000, 0, &[])).unwrap().sign,
            NumericSign::NegativeInfinity
        );
    }

    #[test]
    fn binary_decode_zero_with_scale() {
        let bytes = make_binary(0, 0, 0x0000, 2, &[]);
        assert_eq!(render_text(&from_binary(&bytes).unwrap()), "0.00");
    }

    #[test]
    fn text_parse_matches_binary_layout() {
        let n = parse_text("12345.6789").unwrap();
        assert_eq!(n.weight, 1);
        assert_eq!(n.dscale, 4);
        assert_eq!(n.digits, vec![1, 2345, 6789]);
        assert_eq!(render_text(&n), "12345.6789");
    }

    #[test]
    fn text_parse_small_fraction() {
        let n = parse_text("0.0001").unwrap();
        assert_eq!(n.weight, -1);
        assert_eq!(n.digits, vec![1]);
        assert_eq!(render_text(&n), "0.0001");
    }

    #[test]
    fn text_parse_zero() {
        let n = parse_text("0.00").unwrap();
        assert!(n.digits.is_empty());
        assert_eq!(render_text(&n), "0.00");
    }

    #[test]
    fn text_parse_negative() {
        let n = parse_text("-42").unwrap();
        assert_eq!(n.sign, NumericSign::Negative);
        assert_eq!(render_text(&n), "-42");
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(render_text(&parse_text("1.5e3").unwrap()), "1500");
        assert_eq!(render_text(&parse_text("2.5e-4").unwrap()), "0.00025");
    }

    #[test]
    fn value_round_trip_through_binary() {
        for text in ["0", "1", "-1", "9999", "10000", "123.45", "0.0001", "98765432109876.54321"] {
            let n = parse_text(text).unwrap();
            let mut buf = Vec::new();
            to_binary(&Value::Numeric(n.clone()), &mut buf).unwrap();
            let back = from_binary(&buf).unwrap();
            assert_eq!(back, n, "{}", text);
            assert_eq!(render_text(&back), text);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_text("12a").is_err());
        assert!(parse_text("").is_err());
        assert!(parse_text(".").is_err());
    }
}
