//! Agent naming rules.
//!
//! Fleet agents are named after the private DNS name of their instance.
//! When several agents share one instance the build server appends a
//! counter, e.g. `ip-172-31-66-67.ec2.internal (2)`. Stripping that suffix
//! gives the join-key used to match agents to instances.

use regex::Regex;

use crate::types::JoinKey;

/// Default pattern for names of agents launched by the fleet. Every
/// supported region names instances `ip-<addr>.<zone>.internal`.
pub const DEFAULT_AGENT_NAME_PATTERN: &str = r"^ip-.*\.internal$";

/// Strip a trailing parenthetical suffix from an agent name.
pub fn join_key(name: &str) -> JoinKey {
    let trimmed = name.trim();
    if let Some(open) = trimmed.strip_suffix(')')
        && let Some((base, _counter)) = open.rsplit_once('(')
    {
        return base.trim_end().to_string();
    }
    trimmed.to_string()
}

/// Decides whether a worker belongs to the fleet.
///
/// Workers whose join-key does not match are foreign and are never removed.
#[derive(Debug, Clone)]
pub struct FleetOwnership {
    pattern: Regex,
}

impl FleetOwnership {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Check a normalized join-key against the ownership pattern.
    pub fn owns(&self, join_key: &str) -> bool {
        self.pattern.is_match(join_key)
    }

    /// Normalize an agent name and check it.
    pub fn owns_agent(&self, agent_name: &str) -> bool {
        self.owns(&join_key(agent_name))
    }
}

impl PartialEq for FleetOwnership {
    fn eq(&self, other: &Self) -> bool {
        self.pattern.as_str() == other.pattern.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> FleetOwnership {
        FleetOwnership::new(DEFAULT_AGENT_NAME_PATTERN).unwrap()
    }

    #[test]
    fn strips_counter_suffix() {
        assert_eq!(
            join_key("ip-172-31-66-67.ec2.internal (2)"),
            "ip-172-31-66-67.ec2.internal"
        );
        assert_eq!(
            join_key("ip-172-31-66-67.ec2.internal"),
            "ip-172-31-66-67.ec2.internal"
        );
        assert_eq!(join_key("remoteagent"), "remoteagent");
        assert_eq!(join_key("build box (linux) (3)"), "build box (linux)");
    }

    #[test]
    fn matches_regional_dns_names() {
        let ownership = standard();
        assert!(ownership.owns_agent("ip-12-345-67-890.ec2.internal"));
        assert!(ownership.owns_agent("ip-172-31-30-164.eu-central-1.compute.internal"));
        assert!(ownership.owns_agent("ip-172-31-30-164.eu-central-1.compute.internal (4)"));
    }

    #[test]
    fn rejects_foreign_names() {
        let ownership = standard();
        assert!(!ownership.owns_agent("remoteagent"));
        assert!(!ownership.owns_agent("ip-10-0-0-1.example.com"));
        assert!(!ownership.owns_agent("build-ip-10-0-0-1.ec2.internal"));
    }

    #[test]
    fn custom_pattern() {
        let ownership = FleetOwnership::new(r"^fleet-\d+$").unwrap();
        assert!(ownership.owns_agent("fleet-12 (2)"));
        assert!(!ownership.owns_agent("ip-10-0-0-1.ec2.internal"));
        assert_eq!(ownership.pattern(), r"^fleet-\d+$");
    }
}
