/// Formats a floating-point value with a fixed number of significant figures.
///
/// Mirrors the behaviour of the C `%g` conversion: fixed-point notation is used
/// when the decimal exponent lies in `[-4, digits)`, scientific notation otherwise.
/// Trailing zeros (and a trailing decimal point) are removed in both cases.
///
/// # Arguments
///
/// * `value` - The value to format.
/// * `digits` - The number of significant figures to keep (at least 1).
///
/// # Return
///
/// The formatted string. Non-finite values are formatted as Rust displays them.
pub fn significant_figures(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let digits = digits.max(1);

    let scientific = format!("{:.*e}", digits - 1, value);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return scientific,
    };

    if exponent < -4 || exponent >= digits as i32 {
        let mantissa = trim_fraction(mantissa);
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, value)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
