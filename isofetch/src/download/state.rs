//! Download lifecycle states.
//!
//! ```text
//! pending ──► downloading ──► verifying ──► completed
//!    │          │    ▲            │
//!    │          ▼    │            └────────► failed
//!    │        paused ┘
//!    │          │
//!    └──────────┴──► cancelled
//! ```
//!
//! States are persisted as lowercase text. Conversion from text is strict:
//! unknown strings are rejected instead of mapped to a default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// State of a single download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    /// Record created, no worker has picked the task up yet.
    Pending,
    /// Bytes are being transferred.
    Downloading,
    /// Transfer stopped by the user; the partial file is kept.
    Paused,
    /// Transfer finished, checksum being computed.
    Verifying,
    /// File is on disk and verified (or verification was skipped).
    Completed,
    /// All sources failed, local I/O failed, or verification failed.
    Failed,
    /// Stopped deliberately by the user.
    Cancelled,
}

impl DownloadState {
    /// Every state, in lifecycle order.
    pub const ALL: [DownloadState; 7] = [
        DownloadState::Pending,
        DownloadState::Downloading,
        DownloadState::Paused,
        DownloadState::Verifying,
        DownloadState::Completed,
        DownloadState::Failed,
        DownloadState::Cancelled,
    ];

    /// States that end a run.
    pub const TERMINAL: [DownloadState; 3] = [
        DownloadState::Completed,
        DownloadState::Failed,
        DownloadState::Cancelled,
    ];

    /// The persisted text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions may happen from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, Self::Downloading)
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Pending | Self::Downloading | Self::Paused)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when text does not name a known state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown download state: {0:?}")]
pub struct ParseStateError(pub String);

impl FromStr for DownloadState {
    type Err = ParseStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ParseStateError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_state_round_trips_through_text() {
        for state in DownloadState::ALL {
            assert_eq!(state.as_str().parse::<DownloadState>(), Ok(state));
        }
    }

    #[test]
    fn test_unknown_state_rejected() {
        assert_eq!(
            "Downloading".parse::<DownloadState>(),
            Err(ParseStateError("Downloading".to_string()))
        );
        assert!("".parse::<DownloadState>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = DownloadState::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, DownloadState::TERMINAL.to_vec());
    }

    #[test]
    fn test_legal_control_transitions() {
        assert!(DownloadState::Downloading.can_pause());
        assert!(!DownloadState::Paused.can_pause());
        assert!(DownloadState::Paused.can_resume());
        assert!(!DownloadState::Downloading.can_resume());
        assert!(DownloadState::Pending.can_cancel());
        assert!(!DownloadState::Verifying.can_cancel());
        assert!(!DownloadState::Completed.can_cancel());
    }

    #[test]
    fn test_serde_uses_lowercase_text() {
        let json = serde_json::to_string(&DownloadState::Verifying).unwrap();
        assert_eq!(json, "\"verifying\"");
        assert!(serde_json::from_str::<DownloadState>("\"done\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_parse_accepts_only_known_names(s in "[a-z]{0,12}") {
            let known = DownloadState::ALL.iter().any(|st| st.as_str() == s);
            prop_assert_eq!(s.parse::<DownloadState>().is_ok(), known);
        }
    }
}
