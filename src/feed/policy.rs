use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

/// One candidate extraction strategy. Each strategy owns exactly one bit of
/// [`DiscoveryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// `rel="alternate"` / `rel="feed"` references.
    Autodiscovery,
    /// Same-origin anchors with a feed file extension.
    LocalExtension,
    /// Same-origin anchors whose text or target mentions a feed keyword.
    LocalBody,
    /// Cross-origin anchors with a feed file extension.
    RemoteExtension,
    /// Cross-origin anchors whose text or target mentions a feed keyword.
    RemoteBody,
}

impl Strategy {
    /// Fixed execution order.
    pub const ORDER: [Strategy; 5] = [
        Strategy::Autodiscovery,
        Strategy::LocalExtension,
        Strategy::LocalBody,
        Strategy::RemoteExtension,
        Strategy::RemoteBody,
    ];

    pub fn bit(self) -> DiscoveryPolicy {
        match self {
            Strategy::Autodiscovery => DiscoveryPolicy::AUTODISCOVERY,
            Strategy::LocalExtension => DiscoveryPolicy::LOCAL_EXTENSION,
            Strategy::LocalBody => DiscoveryPolicy::LOCAL_BODY,
            Strategy::RemoteExtension => DiscoveryPolicy::REMOTE_EXTENSION,
            Strategy::RemoteBody => DiscoveryPolicy::REMOTE_BODY,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Autodiscovery => "autodiscovery",
            Strategy::LocalExtension => "local-extension",
            Strategy::LocalBody => "local-body",
            Strategy::RemoteExtension => "remote-extension",
            Strategy::RemoteBody => "remote-body",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bit-set selecting which extraction strategies run.
///
/// The numeric values are public and stable. Bits outside [`DiscoveryPolicy::ALL`]
/// are accepted and ignored.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "PolicyRepr")]
pub struct DiscoveryPolicy(u32);

impl DiscoveryPolicy {
    pub const NONE: Self = Self(0);
    pub const AUTODISCOVERY: Self = Self(1);
    pub const LOCAL_EXTENSION: Self = Self(2);
    pub const LOCAL_BODY: Self = Self(4);
    pub const REMOTE_EXTENSION: Self = Self(8);
    pub const REMOTE_BODY: Self = Self(16);
    pub const ALL: Self = Self(31);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// True when no recognized strategy bit is set.
    pub const fn is_none(self) -> bool {
        self.0 & Self::ALL.0 == 0
    }

    /// Enabled strategies, in execution order.
    pub fn strategies(self) -> impl Iterator<Item = Strategy> {
        Strategy::ORDER
            .into_iter()
            .filter(move |s| self.contains(s.bit()))
    }
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for DiscoveryPolicy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for DiscoveryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.strategies().map(Strategy::name).collect();
        write!(f, "DiscoveryPolicy({:#07b} [{}])", self.0, names.join("|"))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown discovery strategy: {0}")]
pub struct UnknownStrategy(String);

impl FromStr for DiscoveryPolicy {
    type Err = UnknownStrategy;

    /// Parses a comma-separated list of strategy names, or a decimal bitmask.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(bits) = s.trim().parse::<u32>() {
            return Ok(Self(bits));
        }

        let mut policy = Self::NONE;
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            policy = policy | parse_name(name)?;
        }
        Ok(policy)
    }
}

fn parse_name(name: &str) -> Result<DiscoveryPolicy, UnknownStrategy> {
    let normalized = name.to_ascii_lowercase().replace('_', "-");
    match normalized.as_str() {
        "none" => Ok(DiscoveryPolicy::NONE),
        "all" => Ok(DiscoveryPolicy::ALL),
        other => Strategy::ORDER
            .into_iter()
            .find(|s| s.name() == other)
            .map(Strategy::bit)
            .ok_or_else(|| UnknownStrategy(name.to_owned())),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyRepr {
    Bits(u32),
    Names(Vec<String>),
}

impl TryFrom<PolicyRepr> for DiscoveryPolicy {
    type Error = UnknownStrategy;

    fn try_from(repr: PolicyRepr) -> Result<Self, Self::Error> {
        match repr {
            PolicyRepr::Bits(bits) => Ok(Self(bits)),
            PolicyRepr::Names(names) => names
                .iter()
                .try_fold(Self::NONE, |acc, name| Ok(acc | parse_name(name)?)),
        }
    }
}
