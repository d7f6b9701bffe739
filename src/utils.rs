//! Small shared helpers: duration parsing, name validation, and the
//! random-hex suffixes used for generated container names, job ids, and
//! profile digests.

use crate::errors::{ContainerError, ContainerResult};
use std::time::Duration;

/// Parse a duration string (e.g., "30s", "5m", "1h").
pub fn parse_duration(s: &str) -> ContainerResult<Duration> {
    if s.is_empty() {
        return Err(ContainerError::invalid_name(s, "duration cannot be empty"));
    }

    let (num_str, unit) = if let Some(pos) = s.rfind(|c: char| c.is_ascii_digit()) {
        s.split_at(pos + 1)
    } else {
        return Err(ContainerError::invalid_name(s, "invalid duration format"));
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| ContainerError::invalid_name(s, "invalid number in duration"))?;

    let duration = match unit {
        "s" | "" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        "ms" => Duration::from_millis(num),
        _ => {
            return Err(ContainerError::invalid_name(
                s,
                format!("unknown duration unit: {unit}"),
            ));
        }
    };

    Ok(duration)
}

/// Format a duration as a human-readable string.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{secs}h", secs = secs / 3600)
    } else if secs >= 60 {
        format!("{mins}m", mins = secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Validate a container name against the subset of Docker/Podman naming
/// rules this tool relies on (`[a-zA-Z0-9][a-zA-Z0-9_.-]*`, <= 63 chars).
pub fn validate_container_name(name: &str) -> ContainerResult<()> {
    if name.is_empty() {
        return Err(ContainerError::invalid_name(name, "name cannot be empty"));
    }
    if name.len() > 63 {
        return Err(ContainerError::invalid_name(
            name,
            "name cannot exceed 63 characters",
        ));
    }

    let first_char = name.chars().next().unwrap();
    if !first_char.is_ascii_alphanumeric() {
        return Err(ContainerError::invalid_name(
            name,
            "name must start with an alphanumeric character",
        ));
    }

    for c in name.chars().skip(1) {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '.' && c != '-' {
            return Err(ContainerError::invalid_name(
                name,
                "name may only contain alphanumeric characters, underscore, period, and hyphen",
            ));
        }
    }

    Ok(())
}

/// Generate a random lowercase hex string of the given length, used for
/// container name suffixes, background job ids, and profile digests.
pub fn random_hex(len: usize) -> String {
    let mut s = String::with_capacity(len);
    for _ in 0..len {
        s.push(std::char::from_digit(fastrand::u32(0..16), 16).unwrap());
    }
    s
}

/// Build an auto-generated container name `amp-<slug>-<6 hex>`.
pub fn generate_container_name(slug: &str) -> String {
    let slug = if slug.is_empty() { "container" } else { slug };
    format!("amp-{slug}-{}", random_hex(6))
}
