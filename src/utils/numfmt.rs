//! Exact-decimal printing of floating point values into generated C source.
//!
//! Generated headers embed constants like `SCALAR_MAX` and `DT`; these must
//! round-trip exactly when the generated source is compiled, so values are
//! printed with the shortest representation that parses back to the same
//! bits, and float-width literals carry an `f` suffix.

use std::fmt::Write;

/// Print an `f64` so that parsing the output recovers the same bits.
pub fn precise_f64(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        let mut s = String::new();
        write!(s, "{:e}", value).unwrap();
        normalize_exponent(s)
    }
}

/// Print an `f32` so that parsing the output recovers the same bits.
pub fn precise_f32(value: f32) -> String {
    if value == value.trunc() && value.abs() < 1e7 {
        format!("{:.1}", value)
    } else {
        let mut s = String::new();
        write!(s, "{:e}", value).unwrap();
        normalize_exponent(s)
    }
}

/// A C floating literal of the given value; `f`-suffixed when `float_width`.
pub fn c_float_literal(value: f64, float_width: bool) -> String {
    let mut s = if float_width {
        precise_f32(value as f32)
    } else {
        precise_f64(value)
    };
    if float_width {
        s.push('f');
    }
    s
}

// Rust renders exponents as `1e-38`; C requires a mantissa with a decimal
// point or an explicit digit sequence either side, which `1.0e-38` satisfies.
fn normalize_exponent(s: String) -> String {
    match s.find('e') {
        Some(pos) if !s[..pos].contains('.') => {
            let (mantissa, exponent) = s.split_at(pos);
            format!("{}.0{}", mantissa, exponent)
        }
        _ => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_f32() {
        for v in [f32::MIN_POSITIVE, f32::MAX, 0.1f32, 3.14159f32] {
            let s = precise_f32(v);
            assert_eq!(s.parse::<f32>().unwrap(), v, "{}", s);
        }
    }

    #[test]
    fn test_round_trip_f64() {
        for v in [f64::MIN_POSITIVE, f64::MAX, 0.1f64, 2.718281828459045] {
            let s = precise_f64(v);
            assert_eq!(s.parse::<f64>().unwrap(), v, "{}", s);
        }
    }

    #[test]
    fn test_integral_values_keep_decimal_point() {
        assert_eq!(precise_f64(1.0), "1.0");
        assert_eq!(precise_f32(0.0), "0.0");
    }

    #[test]
    fn test_c_float_literal_suffix() {
        assert_eq!(c_float_literal(0.5, true), "0.5f");
        assert_eq!(c_float_literal(0.5, false), "0.5");
    }

    #[test]
    fn test_exponent_has_mantissa_point() {
        let s = precise_f64(1e-300);
        assert!(s.contains('.'), "{}", s);
        assert_eq!(s.parse::<f64>().unwrap(), 1e-300);
    }
}
