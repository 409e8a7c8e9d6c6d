// util.rs — Numeric string conversions shared by the value model and the
// snapshot codec.
//
// The integer parser is strict on purpose: a string is "an integer" only if
// formatting the parsed value reproduces the original bytes. That property is
// what lets string objects be stored as machine integers and lets the
// snapshot writer use integer encodings without changing what a later read
// returns.

/// Parses a signed 64-bit integer from raw bytes.
///
/// Rejects empty input, leading `+`, leading zeros (except `"0"` itself),
/// lone `-`, interior garbage, and overflow. Accepts exactly the strings
/// that [`format_i64`] produces.
pub fn parse_i64(buf: &[u8]) -> Option<i64> {
    if buf.is_empty() || buf.len() > 20 {
        return None;
    }
    let (neg, digits) = if buf[0] == b'-' {
        (true, &buf[1..])
    } else {
        (false, buf)
    };
    if digits.is_empty() {
        return None;
    }
    if digits[0] == b'0' {
        // "0" is fine, "00"/"0123" are not, and "-0" does not round-trip.
        return if digits.len() == 1 && !neg { Some(0) } else { None };
    }
    let mut v: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?.checked_add((b - b'0') as u64)?;
    }
    if neg {
        if v > i64::MIN.unsigned_abs() {
            return None;
        }
        Some((v as i64).wrapping_neg())
    } else {
        if v > i64::MAX as u64 {
            return None;
        }
        Some(v as i64)
    }
}

/// Formats a signed integer as decimal ASCII.
pub fn format_i64(v: i64) -> Vec<u8> {
    let mut buf = [0u8; 21];
    let mut pos = 21;
    let neg = v < 0;
    let mut u = v.unsigned_abs();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (u % 10) as u8;
        u /= 10;
        if u == 0 {
            break;
        }
    }
    if neg {
        pos -= 1;
        buf[pos] = b'-';
    }
    buf[pos..].to_vec()
}

/// Parses a double, rejecting empty input, surrounding whitespace, and
/// trailing garbage. `inf`/`-inf` and `nan` spellings are accepted the way
/// the float grammar of `str::parse` defines them.
pub fn parse_f64(buf: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(buf).ok()?;
    if s.is_empty() || s.trim() != s {
        return None;
    }
    s.parse::<f64>().ok()
}

/// Formats a double the way score replies expect: integral values without a
/// fractional part, everything else in the shortest form that parses back
/// to the same value.
pub fn format_f64(v: f64) -> Vec<u8> {
    if v.is_infinite() {
        return if v > 0.0 { b"inf".to_vec() } else { b"-inf".to_vec() };
    }
    if v == v.trunc() && v.abs() < 1e17 {
        return format_i64(v as i64);
    }
    format!("{}", v).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_i64_accepts_canonical_forms() {
        assert_eq!(parse_i64(b"0"), Some(0));
        assert_eq!(parse_i64(b"42"), Some(42));
        assert_eq!(parse_i64(b"-7"), Some(-7));
        assert_eq!(parse_i64(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_i64(b"-9223372036854775808"), Some(i64::MIN));
    }

    #[test]
    fn parse_i64_rejects_non_round_trip_forms() {
        assert_eq!(parse_i64(b""), None);
        assert_eq!(parse_i64(b"+1"), None);
        assert_eq!(parse_i64(b"01"), None);
        assert_eq!(parse_i64(b"00"), None);
        assert_eq!(parse_i64(b"-0"), None);
        assert_eq!(parse_i64(b"-"), None);
        assert_eq!(parse_i64(b"1 "), None);
        assert_eq!(parse_i64(b"12a"), None);
        assert_eq!(parse_i64(b"9223372036854775808"), None);
        assert_eq!(parse_i64(b"-9223372036854775809"), None);
    }

    #[test]
    fn round_trip_format_parse() {
        for v in [0i64, 1, -1, 12, 99, -4096, i64::MAX, i64::MIN] {
            assert_eq!(parse_i64(&format_i64(v)), Some(v));
        }
    }

    #[test]
    fn parse_f64_strictness() {
        assert_eq!(parse_f64(b"3.25"), Some(3.25));
        assert_eq!(parse_f64(b"-0.5"), Some(-0.5));
        assert_eq!(parse_f64(b" 1"), None);
        assert_eq!(parse_f64(b"1x"), None);
        assert_eq!(parse_f64(b""), None);
        assert!(parse_f64(b"inf").unwrap().is_infinite());
    }

    #[test]
    fn format_f64_trims() {
        assert_eq!(format_f64(3.0), b"3".to_vec());
        assert_eq!(format_f64(-12.0), b"-12".to_vec());
        assert_eq!(format_f64(3.5), b"3.5".to_vec());
        assert_eq!(format_f64(0.1), b"0.1".to_vec());
        assert_eq!(format_f64(f64::INFINITY), b"inf".to_vec());
        assert_eq!(format_f64(f64::NEG_INFINITY), b"-inf".to_vec());
    }

    #[test]
    fn format_f64_round_trips() {
        for v in [0.1, -2.5, 1.0 / 3.0, 6.02e23, f64::MIN_POSITIVE] {
            assert_eq!(parse_f64(&format_f64(v)), Some(v));
        }
    }
}
