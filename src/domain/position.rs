//! Lots and the instruments they hold.

use std::fmt;

use super::ast::AssetReference;

/// Shares per option contract.
pub const OPTION_MULTIPLIER: f64 = 100.0;

/// An option leg with its strike and expiry fixed at trade time.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcreteOption {
    pub underlying: AssetReference,
    pub strike: f64,
    pub expiry_day: usize,
    pub is_call: bool,
}

impl ConcreteOption {
    pub fn intrinsic(&self, spot: f64) -> f64 {
        if self.is_call {
            (spot - self.strike).max(0.0)
        } else {
            (self.strike - spot).max(0.0)
        }
    }

    /// Calendar days left; zero on and after expiry.
    pub fn days_to_expiry(&self, day: usize) -> usize {
        self.expiry_day.saturating_sub(day)
    }

    pub fn is_expired(&self, day: usize) -> bool {
        self.expiry_day <= day
    }
}

impl fmt::Display for ConcreteOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{:.2}{}_d{}",
            self.underlying,
            self.strike,
            if self.is_call { "C" } else { "P" },
            self.expiry_day
        )
    }
}

/// An instrument as it is actually held.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedInstrument {
    Asset(AssetReference),
    Option(ConcreteOption),
    /// Opaque composite placeholder. It has no ticker and marks at zero.
    Compound,
}

impl ResolvedInstrument {
    /// Base ticker; also the risk group for stress testing.
    pub fn ticker(&self) -> &str {
        match self {
            ResolvedInstrument::Asset(asset) => asset.ticker(),
            ResolvedInstrument::Option(option) => option.underlying.ticker(),
            ResolvedInstrument::Compound => "",
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            ResolvedInstrument::Asset(_) | ResolvedInstrument::Compound => 1.0,
            ResolvedInstrument::Option(_) => OPTION_MULTIPLIER,
        }
    }

    pub fn as_option(&self) -> Option<&ConcreteOption> {
        match self {
            ResolvedInstrument::Option(option) => Some(option),
            ResolvedInstrument::Asset(_) | ResolvedInstrument::Compound => None,
        }
    }

    /// Expiry used to order liquidation; assets never expire.
    pub fn expiry_day(&self) -> usize {
        match self {
            ResolvedInstrument::Option(option) => option.expiry_day,
            ResolvedInstrument::Asset(_) | ResolvedInstrument::Compound => usize::MAX,
        }
    }
}

impl fmt::Display for ResolvedInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedInstrument::Asset(asset) => write!(f, "{}", asset),
            ResolvedInstrument::Option(option) => write!(f, "{}", option),
            ResolvedInstrument::Compound => f.write_str("compound"),
        }
    }
}

/// One lot. Quantity is signed: negative is short. Lots are never merged,
/// so FIFO by `buy_date` survives partial closes.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionInstance {
    pub id: u64,
    pub group_id: Option<u64>,
    pub definition_name: String,
    pub component_name: Option<String>,
    pub parent_id: Option<u64>,
    pub buy_price: f64,
    pub buy_date: usize,
    pub quantity: f64,
    pub instrument: ResolvedInstrument,
}

impl PositionInstance {
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    /// Signed quantity times the contract multiplier.
    pub fn exposure(&self) -> f64 {
        self.quantity * self.instrument.multiplier()
    }
}
