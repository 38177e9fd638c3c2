//! Primitive conversions that never run script.
//!
//! Conversions that may call `valueOf`/`toString` live on the interpreter
//! (see `operation.rs`); these are the pure building blocks underneath.

/// ES ToInt32 abstract operation.
pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32 as i32
}

/// ES ToUint32 abstract operation.
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() || n == 0.0 {
        return 0;
    }
    n.trunc().rem_euclid(4_294_967_296.0) as u32
}

/// ES ToInteger, used for indices and lengths.
pub fn to_integer(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else if n.is_infinite() {
        n
    } else {
        n.trunc()
    }
}

fn is_js_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{FEFF}'
}

/// ES StringToNumber (ToNumber applied to a string).
pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return 0.0;
    }

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return f64::NAN;
        }
        return hex
            .bytes()
            .fold(0.0, |acc, b| acc * 16.0 + (b as char).to_digit(16).unwrap_or(0) as f64);
    }

    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned == "Infinity" {
        return if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
    }

    // Rust accepts "inf" and "nan"; ECMAScript does not.
    if !unsigned
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

/// ES Number::toString(10).
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return itoa::Buffer::new().format(n as i64).to_string();
    }

    let mut out = String::new();
    if n < 0.0 {
        out.push('-');
    }
    let (digits, exponent) = shortest_digits(n.abs());
    let k = digits.len() as i32;
    let e = exponent;

    if k <= e && e <= 21 {
        out.push_str(&digits);
        out.extend(std::iter::repeat_n('0', (e - k) as usize));
    } else if 0 < e && e <= 21 {
        out.push_str(&digits[..e as usize]);
        out.push('.');
        out.push_str(&digits[e as usize..]);
    } else if -6 < e && e <= 0 {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', (-e) as usize));
        out.push_str(&digits);
    } else {
        out.push_str(&digits[..1]);
        if k > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push('e');
        out.push(if e - 1 >= 0 { '+' } else { '-' });
        out.push_str(itoa::Buffer::new().format((e - 1).abs()));
    }
    out
}

/// Shortest round-trip digits of a positive finite number, with exponent `n`
/// such that the value is `0.d1d2... * 10^n`.
fn shortest_digits(n: f64) -> (String, i32) {
    let mut buffer = ryu::Buffer::new();
    let formatted = buffer.format_finite(n);

    let (mantissa, exp) = match formatted.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (formatted, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));

    let mut point = int_part.len() as i32 + exp;
    let all: String = int_part.chars().chain(frac_part.chars()).collect();
    let trimmed_start = all.trim_start_matches('0');
    point -= (all.len() - trimmed_start.len()) as i32;
    let digits = trimmed_start.trim_end_matches('0');

    if digits.is_empty() {
        ("0".to_string(), 1)
    } else {
        (digits.to_string(), point)
    }
}
