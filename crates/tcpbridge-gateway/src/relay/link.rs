use tokio::io::WriteHalf;

use super::pump::ReadPump;
use crate::remote::{RemoteStream, Target};

/// Writer and pump of one transport generation. Both halves come from the
/// same `split`, so neither can outlive or point past its generation.
pub(crate) struct Live {
    pub(crate) generation: u64,
    pub(crate) target: Target,
    pub(crate) writer: WriteHalf<RemoteStream>,
    pub(crate) pump: ReadPump,
}

pub(crate) enum Link {
    Idle,
    Plaintext { live: Live, upgrade_expected: bool },
    /// Between pump cancellation and the new TLS generation going live.
    Upgrading,
    Tls { live: Live },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Plaintext,
    Upgrading,
    Tls,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::Plaintext => "plaintext",
            LinkState::Upgrading => "upgrading",
            LinkState::Tls => "tls",
        }
    }
}

/// Observable view of a session's link, for tests and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub state: LinkState,
    pub generation: Option<u64>,
    pub target: Option<Target>,
    pub has_writer: bool,
    pub has_reader: bool,
}

impl Link {
    pub(crate) fn state(&self) -> LinkState {
        match self {
            Link::Idle => LinkState::Idle,
            Link::Plaintext { .. } => LinkState::Plaintext,
            Link::Upgrading => LinkState::Upgrading,
            Link::Tls { .. } => LinkState::Tls,
        }
    }

    pub(crate) fn live(&self) -> Option<&Live> {
        match self {
            Link::Plaintext { live, .. } | Link::Tls { live } => Some(live),
            Link::Idle | Link::Upgrading => None,
        }
    }

    pub(crate) fn live_mut(&mut self) -> Option<&mut Live> {
        match self {
            Link::Plaintext { live, .. } | Link::Tls { live } => Some(live),
            Link::Idle | Link::Upgrading => None,
        }
    }

    pub(crate) fn take(&mut self) -> Link {
        std::mem::replace(self, Link::Idle)
    }

    pub(crate) fn snapshot(&self) -> LinkSnapshot {
        let live = self.live();
        LinkSnapshot {
            state: self.state(),
            generation: live.map(|l| l.generation),
            target: live.map(|l| l.target.clone()),
            has_writer: live.is_some(),
            has_reader: live.is_some(),
        }
    }
}
