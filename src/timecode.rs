use crate::error::{Error, Result};

/// Parses `ss`, `mm:ss` or `hh:mm:ss`, each with optional fractional seconds.
/// Negative totals clamp to zero.
pub fn parse_timestamp(text: &str) -> Result<f64> {
    let text = text.trim();
    let invalid = || Error::InvalidParameter(format!("malformed timestamp {text:?}"));

    if text.is_empty() {
        return Err(invalid());
    }

    let fields: Vec<&str> = text.split(':').collect();
    if fields.len() > 3 {
        return Err(invalid());
    }

    let mut total = 0.0;
    for field in &fields {
        let value: f64 = field.trim().parse().map_err(|_| invalid())?;
        if !value.is_finite() {
            return Err(invalid());
        }
        total = total * 60.0 + value;
    }

    Ok(total.max(0.0))
}

/// `mm:ss.ss`; minutes keep counting past the hour.
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = if seconds.is_finite() {
        seconds.max(0.0)
    } else {
        0.0
    };
    let minutes = (seconds / 60.0).floor();
    let remainder = seconds - minutes * 60.0;
    format!("{:02}:{:05.2}", minutes as u64, remainder)
}
