use serde::{Deserialize, Serialize};
use std::fmt;

/// Trading decision emitted by classifiers and the ensemble.
///
/// The discriminants double as class indices in probability vectors and
/// confusion matrices: Hold=0, Long=1, Short=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Hold = 0,
    Long = 1,
    Short = 2,
}

impl Signal {
    pub const COUNT: usize = 3;

    pub fn index(self) -> usize {
        self as usize
    }

    /// Class index back to a signal. Out-of-range indices map to Hold.
    pub fn from_index(index: usize) -> Signal {
        match index {
            1 => Signal::Long,
            2 => Signal::Short,
            _ => Signal::Hold,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Hold => write!(f, "HOLD"),
            Signal::Long => write!(f, "LONG"),
            Signal::Short => write!(f, "SHORT"),
        }
    }
}

/// Weighted vote tally over the three signal classes.
///
/// A fixed array indexed by `Signal` rather than a map: every class is
/// always present and the hot prediction path stays allocation-free.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalVotes {
    tally: [f64; Signal::COUNT],
}

impl SignalVotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vote(&mut self, signal: Signal, votes: f64) {
        self.tally[signal.index()] += votes;
    }

    pub fn get(&self, signal: Signal) -> f64 {
        self.tally[signal.index()]
    }

    pub fn total(&self) -> f64 {
        self.tally.iter().sum()
    }

    /// Resolve the tally into a decision. Long or Short wins only when its
    /// vote share exceeds `min_trade_probability` while the opposing
    /// directional class stays below it; anything else is Hold.
    pub fn decide(&self, min_trade_probability: f64) -> Signal {
        let total = self.total();
        let threshold = total * min_trade_probability;

        if self.get(Signal::Long) > threshold && self.get(Signal::Short) < threshold {
            Signal::Long
        } else if self.get(Signal::Short) > threshold && self.get(Signal::Long) < threshold {
            Signal::Short
        } else {
            Signal::Hold
        }
    }
}

impl fmt::Display for SignalVotes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total();
        if total == 0.0 {
            return write!(f, "[no votes]");
        }
        write!(
            f,
            "[Hold: {:.2}%, Long: {:.2}%, Short: {:.2}%]",
            self.get(Signal::Hold) / total * 100.0,
            self.get(Signal::Long) / total * 100.0,
            self.get(Signal::Short) / total * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_long_when_share_exceeds_threshold() {
        let mut votes = SignalVotes::new();
        votes.vote(Signal::Long, 6.0);
        votes.vote(Signal::Hold, 3.0);
        votes.vote(Signal::Short, 1.0);
        assert_eq!(votes.decide(0.5), Signal::Long);
    }

    #[test]
    fn test_decide_hold_when_both_directions_pass() {
        let mut votes = SignalVotes::new();
        votes.vote(Signal::Long, 5.0);
        votes.vote(Signal::Short, 5.0);
        assert_eq!(votes.decide(0.3), Signal::Hold);
    }

    #[test]
    fn test_decide_hold_when_nothing_passes() {
        let mut votes = SignalVotes::new();
        votes.vote(Signal::Hold, 8.0);
        votes.vote(Signal::Long, 1.0);
        votes.vote(Signal::Short, 1.0);
        assert_eq!(votes.decide(0.5), Signal::Hold);
    }

    #[test]
    fn test_empty_votes_hold() {
        let votes = SignalVotes::new();
        assert_eq!(votes.decide(0.5), Signal::Hold);
        assert_eq!(votes.to_string(), "[no votes]");
    }

    #[test]
    fn test_from_index_round_trip() {
        for signal in [Signal::Hold, Signal::Long, Signal::Short] {
            assert_eq!(Signal::from_index(signal.index()), signal);
        }
        assert_eq!(Signal::from_index(99), Signal::Hold);
    }
}
