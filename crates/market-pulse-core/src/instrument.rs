use std::fmt;

use serde::{Deserialize, Serialize};

/// Internal instrument identifier, used as the foreign key on bars, indicators and
/// retry ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub i32);

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tradable instrument. Administered externally; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Instrument {
    pub fn new(id: i32, symbol: impl Into<String>) -> Self {
        Self {
            id: InstrumentId(id),
            symbol: symbol.into(),
            name: None,
            active: true,
        }
    }
}

/// Find an instrument by symbol, ignoring ASCII case.
pub fn find_by_symbol<'a>(instruments: &'a [Instrument], symbol: &str) -> Option<&'a Instrument> {
    instruments
        .iter()
        .find(|i| i.symbol.eq_ignore_ascii_case(symbol))
}
