//! Numeric parsing and formatting shared by the scalar accessors.
//!
//! Strings numify by their longest numeric prefix (`"50sec"` is 50), while
//! [`grok_number`] only accepts strings that are numeric in full. Floats
//! stringify with fifteen significant digits, trailing zeros trimmed.

/// A numeric reading of a scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeric {
    /// Fits a signed machine integer.
    Int(i64),
    /// Positive and above `i64::MAX` but within `u64`.
    UInt(u64),
    /// Fractional, exponent form, or outside the integer ranges.
    Float(f64),
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

impl Numeric {
    /// Signed reading. Floats truncate toward zero; values above the signed
    /// range keep the unsigned bit pattern, values beyond both saturate.
    pub fn to_iv(self) -> i64 {
        match self {
            Numeric::Int(value) => value,
            Numeric::UInt(value) => value as i64,
            Numeric::Float(value) => nv_to_iv(value),
        }
    }

    /// Unsigned reading. Negative values keep their two's complement pattern.
    pub fn to_uv(self) -> u64 {
        match self {
            Numeric::Int(value) => value as u64,
            Numeric::UInt(value) => value,
            Numeric::Float(value) => nv_to_uv(value),
        }
    }

    /// Floating reading.
    pub fn to_nv(self) -> f64 {
        match self {
            Numeric::Int(value) => value as f64,
            Numeric::UInt(value) => value as f64,
            Numeric::Float(value) => value,
        }
    }
}

/// Convert a float to a signed integer the way the runtime's `IV` cast does.
pub fn nv_to_iv(value: f64) -> i64 {
    if value.is_nan() {
        0
    } else if value < TWO_POW_63 {
        // `as` saturates at i64::MIN for very negative values
        value as i64
    } else if value < TWO_POW_64 {
        (value as u64) as i64
    } else {
        u64::MAX as i64
    }
}

/// Convert a float to an unsigned integer the way the runtime's `UV` cast does.
pub fn nv_to_uv(value: f64) -> u64 {
    if value.is_nan() {
        0
    } else if value < 0.0 {
        (value as i64) as u64
    } else {
        value as u64
    }
}

/// Numify the longest numeric prefix of `bytes`. Non-numeric input is 0.
pub fn parse_prefix(bytes: &[u8]) -> Numeric {
    scan(bytes).map(|(value, _)| value).unwrap_or(Numeric::Int(0))
}

/// Parse `bytes` only if the whole string (modulo surrounding whitespace)
/// is a number.
pub fn grok_number(bytes: &[u8]) -> Option<Numeric> {
    let (value, consumed) = scan(bytes)?;
    if bytes[consumed..].iter().all(u8::is_ascii_whitespace) {
        Some(value)
    } else {
        None
    }
}

fn scan(bytes: &[u8]) -> Option<(Numeric, usize)> {
    let digit_at = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_digit);

    let mut i = 0;
    while bytes.get(i).is_some_and(u8::is_ascii_whitespace) {
        i += 1;
    }
    let start = i;
    let negative = match bytes.get(i) {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };

    if let Some((value, len)) = special(&bytes[i..]) {
        let value = if negative { -value } else { value };
        return Some((Numeric::Float(value), i + len));
    }

    let int_start = i;
    while digit_at(i) {
        i += 1;
    }
    let int_digits = i - int_start;

    let mut is_float = false;
    let mut frac_digits = 0;
    if bytes.get(i) == Some(&b'.') {
        let mut j = i + 1;
        while digit_at(j) {
            j += 1;
        }
        frac_digits = j - (i + 1);
        if int_digits > 0 || frac_digits > 0 {
            is_float = true;
            i = j;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_start = j;
        while digit_at(j) {
            j += 1;
        }
        if j > exp_start {
            is_float = true;
            i = j;
        }
    }

    let text = std::str::from_utf8(&bytes[start..i]).ok()?;
    let value = if is_float {
        Numeric::Float(text.parse::<f64>().ok()?)
    } else {
        integer(text, negative)?
    };
    Some((value, i))
}

fn integer(text: &str, negative: bool) -> Option<Numeric> {
    let digits = text.trim_start_matches(['+', '-']);
    match digits.parse::<u64>() {
        Ok(magnitude) if negative => {
            if magnitude <= TWO_POW_63 as u64 {
                Some(Numeric::Int((-(magnitude as i128)) as i64))
            } else {
                Some(Numeric::Float(-(magnitude as f64)))
            }
        }
        Ok(magnitude) if magnitude <= i64::MAX as u64 => Some(Numeric::Int(magnitude as i64)),
        Ok(magnitude) => Some(Numeric::UInt(magnitude)),
        Err(_) => text.parse::<f64>().ok().map(Numeric::Float),
    }
}

fn special(bytes: &[u8]) -> Option<(f64, usize)> {
    let lower: Vec<u8> = bytes.iter().take(8).map(u8::to_ascii_lowercase).collect();
    if lower.starts_with(b"infinity") {
        Some((f64::INFINITY, 8))
    } else if lower.starts_with(b"inf") {
        Some((f64::INFINITY, 3))
    } else if lower.starts_with(b"nan") {
        Some((f64::NAN, 3))
    } else {
        None
    }
}

/// Format a float with fifteen significant digits, `%g` style.
pub fn format_nv(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Inf" } else { "-Inf" }.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let scientific = format!("{:.14e}", value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return value.to_string();
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if !(-4..15).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = (14 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_numification() {
        assert_eq!(parse_prefix(b"50sec"), Numeric::Int(50));
        assert_eq!(parse_prefix(b"ololo"), Numeric::Int(0));
        assert_eq!(parse_prefix(b"  -10"), Numeric::Int(-10));
        assert_eq!(parse_prefix(b"50.3sec"), Numeric::Float(50.3));
        assert_eq!(parse_prefix(b"1e"), Numeric::Int(1));
        assert_eq!(
            parse_prefix(b"10000000000000000000"),
            Numeric::UInt(10_000_000_000_000_000_000)
        );
        assert_eq!(
            parse_prefix(b"20000000000000000000"),
            Numeric::Float(2e19)
        );
    }

    #[test]
    fn test_whole_string_numbers() {
        assert_eq!(grok_number(b"42"), Some(Numeric::Int(42)));
        assert_eq!(grok_number(b" 42.5\n"), Some(Numeric::Float(42.5)));
        assert_eq!(grok_number(b"50sec"), None);
        assert_eq!(grok_number(b""), None);
        assert_eq!(grok_number(b"-"), None);
        assert_eq!(grok_number(b".5"), Some(Numeric::Float(0.5)));
    }

    #[test]
    fn test_integer_casts_saturate() {
        assert_eq!(Numeric::Float(2e19).to_iv(), -1);
        assert_eq!(Numeric::Float(-2e19).to_iv(), i64::MIN);
        assert_eq!(Numeric::Float(-2e19).to_uv(), i64::MIN as u64);
        assert_eq!(Numeric::Float(2e19).to_uv(), u64::MAX);
        assert_eq!(Numeric::Int(-10).to_uv(), (-10i64) as u64);
        assert_eq!(Numeric::Float(42.9).to_iv(), 42);
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_nv(42.3), "42.3");
        assert_eq!(format_nv(42.0), "42");
        assert_eq!(format_nv(0.1 + 0.2), "0.3");
        assert_eq!(format_nv(1e19), "1e+19");
        assert_eq!(format_nv(1e15), "1e+15");
        assert_eq!(format_nv(0.0001), "0.0001");
        assert_eq!(format_nv(0.00001), "1e-05");
        assert_eq!(format_nv(-2.5), "-2.5");
        assert_eq!(format_nv(f64::INFINITY), "Inf");
    }
}
