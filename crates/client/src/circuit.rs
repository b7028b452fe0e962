//! Circuit lifecycle.
//!
//! A circuit moves Idle → Discovered → Selected → InUse; a hop failure
//! degrades it to Partial, which forces a fresh selection (and feeds the
//! failing relay's health record, possibly blacklisting it).

use zentalk_core::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Idle,
    Discovered,
    Selected,
    InUse,
    Partial,
}

/// An ordered relay path with its lifecycle state
#[derive(Debug, Clone)]
pub struct Circuit {
    hops: Vec<Address>,
    state: CircuitState,
}

impl Circuit {
    pub fn new() -> Self {
        Self {
            hops: Vec::new(),
            state: CircuitState::Idle,
        }
    }

    /// Candidate hops found in the directory
    pub fn discovered(hops: Vec<Address>) -> Self {
        Self {
            hops,
            state: CircuitState::Discovered,
        }
    }

    pub fn hops(&self) -> &[Address] {
        &self.hops
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Commit to this hop list
    pub fn select(&mut self) {
        if self.state == CircuitState::Discovered {
            self.state = CircuitState::Selected;
        }
    }

    /// First traffic has been written through the circuit
    pub fn activate(&mut self) {
        if self.state == CircuitState::Selected {
            self.state = CircuitState::InUse;
        }
    }

    /// A hop failed; the circuit degrades and must be reselected
    pub fn fail(&mut self) {
        self.state = CircuitState::Partial;
    }

    /// Usable for traffic (selected or already in use)
    pub fn is_usable(&self) -> bool {
        matches!(self.state, CircuitState::Selected | CircuitState::InUse)
            && !self.hops.is_empty()
    }

    /// The guard position
    pub fn entry(&self) -> Option<&Address> {
        self.hops.first()
    }
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}
