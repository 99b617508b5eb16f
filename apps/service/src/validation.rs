use std::net::IpAddr;

/// Validation results with specific error messages
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { is_valid: true, error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { is_valid: false, error: Some(msg.into()) }
    }
}

/// Validate a probe target (IP address or hostname)
pub fn validate_target_name(target: &str) -> ValidationResult {
    if target.trim().is_empty() {
        return ValidationResult::err("Target cannot be empty");
    }

    if target.parse::<IpAddr>().is_ok() {
        return ValidationResult::ok();
    }

    if target.contains(char::is_whitespace) {
        return ValidationResult::err("Target cannot contain spaces");
    }

    let hostname = target.strip_suffix('.').unwrap_or(target);
    if hostname.len() > 253 {
        return ValidationResult::err("Hostname too long (max 253 characters)");
    }

    for label in hostname.split('.') {
        if label.is_empty() {
            return ValidationResult::err("Hostname cannot contain empty labels");
        }
        if label.len() > 63 {
            return ValidationResult::err(format!("Label '{label}' too long (max 63 characters)"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return ValidationResult::err("Hostname labels cannot start or end with hyphen");
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return ValidationResult::err("Invalid hostname. Use IP address or valid hostname");
        }
    }

    ValidationResult::ok()
}

/// Validate an interval in seconds
pub fn validate_interval(interval: u64) -> ValidationResult {
    if interval == 0 {
        return ValidationResult::err("Interval must be at least 1 second");
    }

    if interval > 86400 {
        return ValidationResult::err("Interval too long (max 24 hours)");
    }

    ValidationResult::ok()
}

/// Validate a probe timeout against the interval it must fit in
pub fn validate_timeout(timeout: u64, interval: u64) -> ValidationResult {
    if timeout == 0 {
        return ValidationResult::err("Timeout must be at least 1 second");
    }

    if timeout > interval {
        return ValidationResult::err("Timeout cannot exceed interval");
    }

    ValidationResult::ok()
}

/// Validate an SQL table or column name
pub fn validate_identifier(name: &str) -> ValidationResult {
    if name.is_empty() {
        return ValidationResult::err("Identifier cannot be empty");
    }

    if name.len() > 63 {
        return ValidationResult::err("Identifier too long (max 63 characters)");
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return ValidationResult::err("Identifier cannot start with a digit");
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return ValidationResult::err(format!("Invalid identifier '{name}'. Use letters, digits and '_'"));
    }

    ValidationResult::ok()
}

/// Validate the position of the tracked hop
pub fn validate_hop_number(hop: u8) -> ValidationResult {
    if hop == 0 {
        return ValidationResult::err("Hop number must be at least 1");
    }

    if hop > 64 {
        return ValidationResult::err("Hop number too large (max 64)");
    }

    ValidationResult::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_validation() {
        assert!(validate_target_name("192.168.1.1").is_valid);
        assert!(validate_target_name("2001:db8::1").is_valid);
        assert!(validate_target_name("example.com").is_valid);
        assert!(validate_target_name("sub.example.com.").is_valid);
        assert!(validate_target_name("localhost").is_valid);

        assert!(!validate_target_name("").is_valid);
        assert!(!validate_target_name("invalid hostname").is_valid);
        assert!(!validate_target_name("-bad.example").is_valid);
        assert!(!validate_target_name("double..dot").is_valid);
        assert!(!validate_target_name("http://example.com").is_valid);
        assert!(!validate_target_name(&"a".repeat(64)).is_valid);
    }

    #[test]
    fn test_interval_validation() {
        assert!(validate_interval(1).is_valid);
        assert!(validate_interval(86400).is_valid);
        assert!(!validate_interval(0).is_valid);
        assert!(!validate_interval(86401).is_valid);
    }

    #[test]
    fn test_timeout_validation() {
        assert!(validate_timeout(2, 60).is_valid);
        assert!(validate_timeout(10, 10).is_valid);
        assert!(validate_timeout(1, 1).is_valid);
        assert!(!validate_timeout(15, 10).is_valid);
        assert!(!validate_timeout(0, 10).is_valid);
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("pings").is_valid);
        assert!(validate_identifier("packet_rtt").is_valid);
        assert!(validate_identifier("_v2").is_valid);

        assert!(!validate_identifier("").is_valid);
        assert!(!validate_identifier("2fast").is_valid);
        assert!(!validate_identifier("pings; DROP TABLE pings").is_valid);
        assert!(!validate_identifier("ip-address").is_valid);
    }

    #[test]
    fn test_hop_number_validation() {
        assert!(validate_hop_number(1).is_valid);
        assert!(!validate_hop_number(0).is_valid);
        assert!(!validate_hop_number(65).is_valid);
    }
}
