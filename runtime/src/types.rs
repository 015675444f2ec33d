//! Shared value types used across the dispatch core.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_newtype!(RequestId);
uuid_newtype!(TurnId);
uuid_newtype!(MemoryId);

/// Which lane a call is admitted through. Chat and memory lanes are rate-limited
/// and accounted for independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LaneKind {
    Chat,
    Memory,
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKind::Chat => write!(f, "chat"),
            LaneKind::Memory => write!(f, "memory"),
        }
    }
}

/// Which upstream credential a call was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
    Main,
    Backup,
    Memory,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::Main => write!(f, "MAIN"),
            CredentialKind::Backup => write!(f, "BACKUP"),
            CredentialKind::Memory => write!(f, "MEMORY"),
        }
    }
}

/// Which mode a turn was produced under. Long-term memory retrieval and the
/// memory-trigger cadence are only evaluated for `Chat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Chat,
    Eval,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Chat => write!(f, "chat"),
            Mode::Eval => write!(f, "eval"),
        }
    }
}

/// The role attached to a single conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Which summarization instruction a memory-extraction call should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExtractionKind {
    RoundSummary,
    ConversationChunk,
    Generic,
}

/// Why a queued entry resolved without being released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    Timeout,
    Shutdown,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Timeout => write!(f, "timeout"),
            TerminalReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// The outcome of waiting on a queued request's completion signal.
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    Released { waited: std::time::Duration },
    Expired(TerminalReason),
}
