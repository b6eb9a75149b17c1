//! Callable-reference tokens.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport-safe stand-in for a callable exposed by the sending side.
///
/// `id` names an entry in the sender's handler registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallableRef {
    id: String,
}

impl CallableRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for CallableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref:{}", self.id)
    }
}

/// Token kinds that may appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Names a live handler in the sender's registry.
    Ref,
    /// Carries serialized code. Recognized, never executed.
    Inline,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ref => "ref",
            Self::Inline => "inline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ref" => Some(Self::Ref),
            "inline" => Some(Self::Inline),
            _ => None,
        }
    }
}
