//! Connection registry and roster barrier.

use parking_lot::Mutex;
use tracing::{info, warn};

use secret_common::{GlobalId, PeerInfo, Roster};

/// Rosters released to the Data Providers when the barrier opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRelease {
    pub providers: Roster,
    pub computes: Roster,
}

impl RosterRelease {
    /// Every Data Provider receives both rosters.
    pub fn recipients(&self) -> &[PeerInfo] {
        self.providers.peers()
    }
}

/// Result of a Compute Node registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeAdmission {
    /// `None` for a late node that registered after all ids were assigned.
    pub id: Option<GlobalId>,
    pub release: Option<RosterRelease>,
}

#[derive(Debug, Default)]
struct RegistryState {
    computes: Vec<PeerInfo>,
    providers: Vec<PeerInfo>,
    released: bool,
}

/// Records every registration and opens the roster barrier exactly once.
///
/// All mutations happen under one mutex, so the registration that completes
/// both counts is the only one that observes the release.
#[derive(Debug)]
pub struct Registry {
    expected_computes: usize,
    expected_providers: usize,
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new(expected_computes: usize, expected_providers: usize) -> Self {
        Self {
            expected_computes,
            expected_providers,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn expected_computes(&self) -> usize {
        self.expected_computes
    }

    pub fn register_compute(&self, peer: PeerInfo) -> ComputeAdmission {
        let mut state = self.state.lock();
        let index = state.computes.len();
        state.computes.push(peer.clone());

        let id = if index < self.expected_computes {
            info!("Compute node {} registered as {}", peer.addr(), index);
            Some(GlobalId(index))
        } else {
            warn!(
                "Late compute node {} registered after {} expected nodes; no id assigned",
                peer.addr(),
                self.expected_computes
            );
            None
        };

        ComputeAdmission {
            id,
            release: self.try_release(&mut state),
        }
    }

    pub fn register_provider(&self, peer: PeerInfo) -> Option<RosterRelease> {
        let mut state = self.state.lock();
        if state.released {
            warn!(
                "Late data provider {} registered after the rosters were released",
                peer.addr()
            );
        } else {
            info!("Data provider {} registered", peer.addr());
        }
        state.providers.push(peer);
        self.try_release(&mut state)
    }

    fn try_release(&self, state: &mut RegistryState) -> Option<RosterRelease> {
        if state.released
            || state.computes.len() < self.expected_computes
            || state.providers.len() < self.expected_providers
        {
            return None;
        }
        state.released = true;

        info!(
            "All {} compute nodes and {} data providers registered, releasing rosters",
            self.expected_computes, self.expected_providers
        );
        Some(RosterRelease {
            providers: Roster::new(state.providers[..self.expected_providers].to_vec()),
            computes: Roster::new(state.computes[..self.expected_computes].to_vec()),
        })
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    /// Every registered peer, late ones included.
    pub fn all_peers(&self) -> (Vec<PeerInfo>, Vec<PeerInfo>) {
        let state = self.state.lock();
        (state.providers.clone(), state.computes.clone())
    }
}
