//! Affect level and the keyword rule that moves it.
//!
//! Each persona carries one integer on a 1-10 scale. What it means depends on
//! the persona (skepticism for Sarah, frustration for Dan, ...). After every
//! assistant turn the reply text is scanned for two keyword sets and the level
//! moves by at most one step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounded affect scalar. Always within `[MIN, MAX]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct AffectLevel(u8);

impl AffectLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: u8) -> Self {
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn increment(self) -> Self {
        Self::new(self.0.saturating_add(1))
    }

    pub fn decrement(self) -> Self {
        Self::new(self.0.saturating_sub(1))
    }

    pub fn apply(self, shift: AffectShift) -> Self {
        match shift {
            AffectShift::Decrease => self.decrement(),
            AffectShift::Increase => self.increment(),
            AffectShift::Hold => self,
        }
    }
}

impl Default for AffectLevel {
    fn default() -> Self {
        Self(5)
    }
}

impl From<u8> for AffectLevel {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl From<AffectLevel> for u8 {
    fn from(level: AffectLevel) -> Self {
        level.0
    }
}

impl fmt::Display for AffectLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of scanning one reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffectShift {
    Decrease,
    Increase,
    Hold,
}

/// Keyword rule for one persona.
///
/// Matching is a case-sensitive substring test. The de-escalate set is checked
/// first, so a reply that hits both sets only ever decreases the level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffectRule {
    pub de_escalate: Vec<String>,
    pub escalate: Vec<String>,
}

impl AffectRule {
    pub fn new<I, J, S>(de_escalate: I, escalate: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            de_escalate: de_escalate.into_iter().map(Into::into).collect(),
            escalate: escalate.into_iter().map(Into::into).collect(),
        }
    }

    pub fn classify(&self, reply: &str) -> AffectShift {
        if self.de_escalate.iter().any(|k| reply.contains(k.as_str())) {
            AffectShift::Decrease
        } else if self.escalate.iter().any(|k| reply.contains(k.as_str())) {
            AffectShift::Increase
        } else {
            AffectShift::Hold
        }
    }

    pub fn apply(&self, level: AffectLevel, reply: &str) -> AffectLevel {
        level.apply(self.classify(reply))
    }
}
