//! Freshness and change tracking for externally sourced inputs.
//!
//! Each tracked input (credentials, proxy settings) is a small level-triggered
//! state machine:
//!
//! - `Freshness` goes `Stale -> Fresh` on a successful refresh and back to
//!   `Stale` on any invalidation (config edit, upgrade, periodic check).
//! - `ChangeFlag` is raised when a refresh observed a value different from the
//!   cache. It is cleared only by acknowledging the `ChangeTicket` of the pass
//!   that consumed it, and only if no newer change arrived in between.

use tracing::debug;

use crate::credentials::{CredentialSet, ProxySettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Stale,
    Fresh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFlag {
    Unset,
    /// Raised by the change with the given generation.
    Set(u64),
}

/// Proof that a reconciliation pass observed a raised change flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct ChangeTicket {
    generation: u64,
}

/// Cached external value with freshness and change-edge tracking.
#[derive(Debug)]
pub struct TrackedInput<T> {
    label: &'static str,
    cached: Option<T>,
    freshness: Freshness,
    change: ChangeFlag,
    generation: u64,
}

impl<T: PartialEq> TrackedInput<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            cached: None,
            freshness: Freshness::Stale,
            change: ChangeFlag::Unset,
            generation: 0,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    pub fn cached(&self) -> Option<&T> {
        self.cached.as_ref()
    }

    /// Force the next pass to refetch.
    pub fn invalidate(&mut self) {
        if self.freshness == Freshness::Fresh {
            debug!(input = self.label, "Invalidated");
        }
        self.freshness = Freshness::Stale;
    }

    /// Replace the cache with a freshly fetched value.
    ///
    /// Returns whether the value differs from the previous cache (a first
    /// observation counts as a change). The fetch itself happens in the
    /// caller; on fetch failure this is never called and the input stays stale.
    pub fn refresh(&mut self, value: T) -> bool {
        let changed = self.cached.as_ref() != Some(&value);
        self.cached = Some(value);
        self.freshness = Freshness::Fresh;
        if changed {
            self.raise();
        }
        changed
    }

    /// Raise the change flag without touching the cache.
    pub fn mark_changed(&mut self) {
        self.raise();
    }

    pub fn changed(&self) -> bool {
        matches!(self.change, ChangeFlag::Set(_))
    }

    pub fn change_flag(&self) -> ChangeFlag {
        self.change
    }

    /// Ticket for the currently raised change, if any.
    pub fn ticket(&self) -> Option<ChangeTicket> {
        match self.change {
            ChangeFlag::Set(generation) => Some(ChangeTicket { generation }),
            ChangeFlag::Unset => None,
        }
    }

    /// Clear the change flag if `ticket` still describes the latest change.
    ///
    /// Returns false when a newer change was raised after the ticket was
    /// taken; that change stays visible to the next pass.
    pub fn acknowledge(&mut self, ticket: ChangeTicket) -> bool {
        match self.change {
            ChangeFlag::Set(generation) if generation == ticket.generation => {
                debug!(input = self.label, generation, "Change acknowledged");
                self.change = ChangeFlag::Unset;
                true
            }
            _ => false,
        }
    }

    fn raise(&mut self) {
        self.generation += 1;
        self.change = ChangeFlag::Set(self.generation);
        debug!(input = self.label, generation = self.generation, "Change raised");
    }
}

pub type CredentialState = TrackedInput<CredentialSet>;
pub type ProxyState = TrackedInput<ProxySettings>;

pub fn credential_state() -> CredentialState {
    TrackedInput::new("credentials")
}

pub fn proxy_state() -> ProxyState {
    TrackedInput::new("proxy")
}
