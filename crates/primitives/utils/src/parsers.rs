use anyhow::{anyhow, bail};
use std::time::Duration;

/// Parses a string duration & return it as [Duration].
///
/// Accepted suffixes are `ns`, `ms`, `s`, `min` and `h`, with optional whitespace between the
/// value and the suffix (`"30s"`, `"20 min"`).
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let split_index = s.find(|c: char| !c.is_ascii_digit()).ok_or_else(|| anyhow!("Invalid duration format: {}", s))?;

    let (value_str, suffix) = s.split_at(split_index);
    let value: u64 = value_str.parse().map_err(|_| anyhow!("Invalid duration value: {}", value_str))?;

    let secs_per_unit = match suffix.trim() {
        "ns" => return Ok(Duration::from_nanos(value)),
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "min" => 60,
        "h" => 60 * 60,
        _ => bail!("Invalid duration suffix: {}. Expected 'ns', 'ms', 's', 'min' or 'h'.", suffix),
    };

    value.checked_mul(secs_per_unit).map(Duration::from_secs).ok_or_else(|| anyhow!("Duration out of range: {}", s))
}
