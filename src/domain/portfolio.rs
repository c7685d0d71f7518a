//! Portfolio state and the transaction log.

use std::collections::BTreeMap;
use std::fmt;

use super::position::{PositionInstance, ResolvedInstrument};

/// Bookkeeping for a batch of lots opened together for one definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeMetadata {
    pub group_id: u64,
    pub definition_name: String,
    pub buy_date: usize,
    pub initial_quantity: f64,
    pub legs: Vec<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

/// An executed fill. Append-only.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub day: usize,
    pub ticker: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub notional: f64,
    pub commission: f64,
    pub slippage: f64,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: f64,
    pub positions: Vec<PositionInstance>,
    pub composite_registry: BTreeMap<u64, CompositeMetadata>,
    next_id: u64,
}

impl Portfolio {
    pub fn new(cash: f64) -> Self {
        Portfolio {
            cash,
            positions: Vec::new(),
            composite_registry: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Fresh id for a lot or a batch group.
    pub fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn position(&self, id: u64) -> Option<&PositionInstance> {
        self.positions.iter().find(|p| p.id == id)
    }

    pub fn lots_of<'a>(
        &'a self,
        instrument: &'a ResolvedInstrument,
    ) -> impl Iterator<Item = &'a PositionInstance> + 'a {
        self.positions
            .iter()
            .filter(move |p| &p.instrument == instrument)
    }

    /// Net signed quantity held in `instrument`.
    pub fn holding(&self, instrument: &ResolvedInstrument) -> f64 {
        self.lots_of(instrument).map(|p| p.quantity).sum()
    }

    /// Top-level lots (no parent) opened for `definition_name`, oldest first.
    pub fn definition_roots(&self, definition_name: &str) -> Vec<PositionInstance> {
        self.positions
            .iter()
            .filter(|p| p.definition_name == definition_name && p.parent_id.is_none())
            .cloned()
            .collect()
    }

    /// Drop lots that have been fully closed and registry entries with no
    /// remaining legs.
    pub fn prune(&mut self) {
        self.positions.retain(|p| p.quantity.abs() > QUANTITY_EPSILON);
        let live_groups: Vec<u64> = self.positions.iter().filter_map(|p| p.group_id).collect();
        self.composite_registry
            .retain(|group_id, _| live_groups.contains(group_id));
    }

    /// Total ruin: no cash, no positions.
    pub fn liquidated(mut self) -> Self {
        self.cash = 0.0;
        self.positions.clear();
        self.composite_registry.clear();
        self
    }
}

/// Quantities below this are treated as closed.
pub const QUANTITY_EPSILON: f64 = 1e-9;
