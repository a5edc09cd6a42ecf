use std::{fmt, str::FromStr};

use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::PeerpodError;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The role of the key broker service.
pub const ROLE_KBS: &str = "KBS";

/// The role of the in-guest agent.
pub const ROLE_AGENT: &str = "KATAAGENT";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The phase of a sandbox's life a forwarding rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// While the guest attests and retrieves its secrets.
    Creation,

    /// While the workload runs.
    Runtime,

    /// In both phases.
    Both,
}

/// A secure-comms forwarding rule of the form `PHASE:ROLE:destination`.
///
/// ## Examples
///
/// ```
/// use peerpod::securecomms::{ForwardingRule, Phase};
///
/// let rule = "KUBERNETES_PHASE:KATAAGENT:127.0.0.1:7111".parse::<ForwardingRule>().unwrap();
/// assert_eq!(*rule.get_phase(), Phase::Runtime);
/// assert_eq!(rule.get_role(), "KATAAGENT");
/// assert_eq!(rule.get_destination(), "127.0.0.1:7111");
/// assert_eq!(rule.port(), Some(7111));
/// assert_eq!(rule.to_string(), "RUNTIME_PHASE:KATAAGENT:127.0.0.1:7111");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ForwardingRule {
    /// When the rule is active.
    phase: Phase,

    /// The service the rule forwards to.
    role: String,

    /// Where traffic goes, usually `host:port`.
    destination: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Phase {
    /// Returns the canonical name of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creation => "CREATION_PHASE",
            Self::Runtime => "RUNTIME_PHASE",
            Self::Both => "BOTH_PHASES",
        }
    }

    /// Returns whether a rule in this phase is active during `other`.
    pub fn includes(&self, other: Phase) -> bool {
        *self == Self::Both || *self == other
    }
}

impl ForwardingRule {
    /// Creates a new rule.
    pub fn new(phase: Phase, role: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            phase,
            role: role.into(),
            destination: destination.into(),
        }
    }

    /// Returns whether the rule is active during `phase`.
    pub fn includes(&self, phase: Phase) -> bool {
        self.phase.includes(phase)
    }

    /// Returns the port of the destination, if it ends with one.
    pub fn port(&self) -> Option<u16> {
        self.destination
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Phase {
    type Err = PeerpodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATION_PHASE" | "ATTESTATION_PHASE" => Ok(Self::Creation),
            "RUNTIME_PHASE" | "KUBERNETES_PHASE" => Ok(Self::Runtime),
            "BOTH_PHASES" => Ok(Self::Both),
            _ => Err(PeerpodError::InvalidForwardingRule(format!(
                "unknown phase {s:?}"
            ))),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForwardingRule {
    type Err = PeerpodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(phase), Some(role), Some(destination)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(PeerpodError::InvalidForwardingRule(s.to_string()));
        };

        if role.is_empty() || destination.is_empty() {
            return Err(PeerpodError::InvalidForwardingRule(s.to_string()));
        }

        Ok(Self {
            phase: phase.parse()?,
            role: role.to_string(),
            destination: destination.to_string(),
        })
    }
}

impl fmt::Display for ForwardingRule {
    /// Formats the rule as `PHASE:ROLE:destination` with the canonical phase name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.phase, self.role, self.destination)
    }
}

impl Serialize for ForwardingRule {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ForwardingRule {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarding_rule_from_str() -> anyhow::Result<()> {
        let rule: ForwardingRule = "ATTESTATION_PHASE:KBS:10.0.0.5:8080".parse()?;
        assert_eq!(rule, ForwardingRule::new(Phase::Creation, ROLE_KBS, "10.0.0.5:8080"));

        let rule: ForwardingRule = "BOTH_PHASES:KATAAGENT:[::1]:7111".parse()?;
        assert_eq!(*rule.get_phase(), Phase::Both);
        assert_eq!(rule.get_destination(), "[::1]:7111");
        assert_eq!(rule.port(), Some(7111));

        assert!("".parse::<ForwardingRule>().is_err());
        assert!("RUNTIME_PHASE:KBS".parse::<ForwardingRule>().is_err());
        assert!("RUNTIME_PHASE::127.0.0.1:80".parse::<ForwardingRule>().is_err());
        assert!("RUNTIME_PHASE:KBS:".parse::<ForwardingRule>().is_err());
        assert!("LATER:KBS:127.0.0.1:80".parse::<ForwardingRule>().is_err());

        Ok(())
    }

    #[test]
    fn test_forwarding_rule_display_uses_canonical_phase() -> anyhow::Result<()> {
        let rule: ForwardingRule = "KUBERNETES_PHASE:KATAAGENT:127.0.0.1:7111".parse()?;
        assert_eq!(rule.to_string(), "RUNTIME_PHASE:KATAAGENT:127.0.0.1:7111");
        Ok(())
    }

    #[test]
    fn test_phase_includes() {
        assert!(Phase::Both.includes(Phase::Creation));
        assert!(Phase::Both.includes(Phase::Runtime));
        assert!(Phase::Runtime.includes(Phase::Runtime));
        assert!(!Phase::Runtime.includes(Phase::Creation));
        assert!(!Phase::Creation.includes(Phase::Runtime));
    }

    #[test]
    fn test_forwarding_rule_serde() -> anyhow::Result<()> {
        let rules: Vec<ForwardingRule> =
            serde_json::from_str(r#"["CREATION_PHASE:KBS:127.0.0.1:8080"]"#)?;
        assert_eq!(rules[0].port(), Some(8080));
        assert_eq!(
            serde_json::to_string(&rules)?,
            r#"["CREATION_PHASE:KBS:127.0.0.1:8080"]"#
        );

        assert!(serde_json::from_str::<ForwardingRule>(r#""nonsense""#).is_err());

        Ok(())
    }
}
