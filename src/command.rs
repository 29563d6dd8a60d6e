//! Control-command vocabulary and front-end affinity.
//!
//! Commands arrive as lines on the control FIFO. Recognized tokens are
//! case-insensitive; anything else non-empty is a content-selector key.

use serde::Deserialize;

/// Which external front-end this daemon is currently cooperating with.
///
/// Determines the default content key and whether master arbitration must
/// defer to a peer process that takes DRM master itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrontendAffinity {
    /// A standalone emulator is driving the main screen.
    Standalone,
    /// A peer front-end (e.g. RetroArch) periodically takes DRM master.
    PeerControlled,
    /// No front-end specified.
    #[default]
    Unset,
}

impl FrontendAffinity {
    /// Whether a peer process is expected to contend for display control.
    pub fn peer_expected(self) -> bool {
        matches!(self, FrontendAffinity::PeerControlled)
    }

    /// Parse the `-f` startup flag (`SA`, `RA`, `NA`).
    pub fn from_flag(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SA" => Some(FrontendAffinity::Standalone),
            "RA" => Some(FrontendAffinity::PeerControlled),
            "NA" => Some(FrontendAffinity::Unset),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FrontendAffinity::Standalone => "SA",
            FrontendAffinity::PeerControlled => "RA",
            FrontendAffinity::Unset => "NA",
        }
    }
}

/// A parsed control-channel command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Terminate the daemon.
    Exit,
    /// Show the default content for the current affinity.
    Clear,
    /// Force a commit retry now, bypassing any holdoff.
    Reset,
    /// Switch affinity and show its default.
    SetAffinity(FrontendAffinity),
    /// Show the marquee for a content key.
    Show(String),
}

impl Command {
    /// Parse one line of control input. Empty or whitespace-only input
    /// yields `None`.
    pub fn parse(line: &str) -> Option<Command> {
        let token = line.trim();
        if token.is_empty() {
            return None;
        }
        let cmd = match token.to_ascii_uppercase().as_str() {
            "EXIT" => Command::Exit,
            "CLEAR" => Command::Clear,
            "RESET" => Command::Reset,
            "RA" => Command::SetAffinity(FrontendAffinity::PeerControlled),
            "SA" => Command::SetAffinity(FrontendAffinity::Standalone),
            "NA" => Command::SetAffinity(FrontendAffinity::Unset),
            _ => Command::Show(token.to_string()),
        };
        Some(cmd)
    }
}
