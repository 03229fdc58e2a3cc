//! Key namespace shared with every other gateway instance.

/// Dynamic blocked-IP list (JSON string array).
pub const BLOCKED_IPS: &str = "security:blocked_ips";

/// Dynamic allowed-IP list (JSON string array).
pub const ALLOWED_IPS: &str = "security:allowed_ips";

/// Expiry marker for one entry of a dynamic list. The entry is live while
/// this key exists.
pub fn list_entry(list: &str, entry: &str) -> String {
    format!("{}:{}", list, entry)
}

/// Fixed-window request counter for `ip` in window `window_index`.
pub fn rate_limit(ip: &str, window_index: u64) -> String {
    format!("rate_limit:{}:{}", ip, window_index)
}

/// Escalated penalty level for `ip`.
pub fn penalty(ip: &str) -> String {
    format!("security:penalty:{}", ip)
}

/// Threat-triggered temporary block record for `ip`.
pub fn temp_block(ip: &str) -> String {
    format!("security:temp_block:{}", ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(rate_limit("10.0.0.1", 42), "rate_limit:10.0.0.1:42");
        assert_eq!(penalty("::1"), "security:penalty:::1");
        assert_eq!(temp_block("1.2.3.4"), "security:temp_block:1.2.3.4");
        assert_eq!(list_entry(BLOCKED_IPS, "10.0.0.0/8"), "security:blocked_ips:10.0.0.0/8");
    }
}
