use serde::{Deserialize, Serialize};

/// Lifecycle of one job step as recorded in the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Started,
    Committed,
    RolledBack,
}

impl State {
    pub fn as_str(&self) -> &str {
        match self {
            State::Started => "Started",
            State::Committed => "Committed",
            State::RolledBack => "RolledBack",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "started" => Some(State::Started),
            "committed" => Some(State::Committed),
            "rolledback" | "rolled_back" => Some(State::RolledBack),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for s in [State::Started, State::Committed, State::RolledBack] {
            assert_eq!(State::from_str(s.as_str()), Some(s));
        }
        assert_eq!(State::from_str(" rolled_back "), Some(State::RolledBack));
        assert_eq!(State::from_str("done"), None);
    }
}
