use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::{Gems, PlayerId, RoundNumber, TxnId};
use crate::wheel::{color_of, WheelColor, WheelIndex, WHEEL_SIZE};

/// Bet identifier, unique within its round. Doubles as the sequence number
/// the debit transaction id is derived from.
pub type BetId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityPick {
    Even,
    Odd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePick {
    /// 1–18.
    Low,
    /// 19–36.
    High,
}

/// Closed kind × selection space. Invalid combinations such as a straight-up
/// bet on a color are unrepresentable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "selection", rename_all = "snake_case")]
pub enum BetKind {
    SingleNumber(WheelIndex),
    Color(WheelColor),
    Parity(ParityPick),
    Range(RangePick),
}

impl BetKind {
    /// Parse the wire representation: a `kind` discriminator plus a
    /// kind-specific `selection` value.
    pub fn from_wire(kind: &str, selection: &serde_json::Value) -> Option<BetKind> {
        match kind {
            "single_number" => {
                let index = selection.as_u64()?;
                if index >= WHEEL_SIZE as u64 {
                    return None;
                }
                Some(BetKind::SingleNumber(index as WheelIndex))
            }
            "color" => match selection.as_str()? {
                "red" => Some(BetKind::Color(WheelColor::Red)),
                "black" => Some(BetKind::Color(WheelColor::Black)),
                "green" => Some(BetKind::Color(WheelColor::Green)),
                _ => None,
            },
            "parity" => match selection.as_str()? {
                "even" => Some(BetKind::Parity(ParityPick::Even)),
                "odd" => Some(BetKind::Parity(ParityPick::Odd)),
                _ => None,
            },
            "range" => match selection.as_str()? {
                "low" => Some(BetKind::Range(RangePick::Low)),
                "high" => Some(BetKind::Range(RangePick::High)),
                _ => None,
            },
            _ => None,
        }
    }

    /// True when the selection space admits this value. Guards selections
    /// constructed outside [`BetKind::from_wire`].
    pub fn is_valid(&self) -> bool {
        match self {
            BetKind::SingleNumber(index) => *index < WHEEL_SIZE,
            _ => true,
        }
    }

    /// Total-return multiplier. A winner is paid stake × multiplier, i.e.
    /// net profit stake × (multiplier − 1). These values are contract.
    pub fn multiplier(&self) -> u64 {
        match self {
            BetKind::SingleNumber(_) => 35,
            BetKind::Color(WheelColor::Green) => 14,
            BetKind::Color(_) => 2,
            BetKind::Parity(_) => 2,
            BetKind::Range(_) => 2,
        }
    }

    /// Whether this bet wins on the given outcome. Zero is green, neither
    /// even nor odd, and outside both ranges.
    pub fn wins(&self, outcome: WheelIndex) -> bool {
        match self {
            BetKind::SingleNumber(index) => *index == outcome,
            BetKind::Color(color) => color_of(outcome) == *color,
            BetKind::Parity(pick) => {
                if outcome == 0 {
                    return false;
                }
                match pick {
                    ParityPick::Even => outcome % 2 == 0,
                    ParityPick::Odd => outcome % 2 == 1,
                }
            }
            BetKind::Range(pick) => match pick {
                RangePick::Low => (1..=18).contains(&outcome),
                RangePick::High => (19..=36).contains(&outcome),
            },
        }
    }
}

/// An accepted bet. Lives for the lifetime of its round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub round: RoundNumber,
    pub player: PlayerId,
    #[serde(flatten)]
    pub kind: BetKind,
    pub stake: Gems,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Settlement {
    Pending,
    Won { payout: Gems },
    Lost,
}

/// One bet's settlement, produced by [`crate::book::BetBook::settle`]. The
/// credit transaction id is a pure function of (round, bet id), which is
/// what makes re-submitting settlement credits safe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SettledBet {
    pub bet: Bet,
    pub settlement: Settlement,
    pub credit_txn: TxnId,
}

impl SettledBet {
    pub fn payout(&self) -> Gems {
        match self.settlement {
            Settlement::Won { payout } => payout,
            _ => 0,
        }
    }

    /// Net balance change for the bettor over the whole round.
    pub fn net(&self) -> i64 {
        self.payout() as i64 - self.bet.stake as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_parsing_accepts_the_four_kinds() {
        use serde_json::json;
        assert_eq!(
            BetKind::from_wire("single_number", &json!(7)),
            Some(BetKind::SingleNumber(7))
        );
        assert_eq!(
            BetKind::from_wire("color", &json!("green")),
            Some(BetKind::Color(WheelColor::Green))
        );
        assert_eq!(
            BetKind::from_wire("parity", &json!("odd")),
            Some(BetKind::Parity(ParityPick::Odd))
        );
        assert_eq!(
            BetKind::from_wire("range", &json!("high")),
            Some(BetKind::Range(RangePick::High))
        );
    }

    #[test]
    fn wire_parsing_rejects_malformed_selections() {
        use serde_json::json;
        assert_eq!(BetKind::from_wire("single_number", &json!(37)), None);
        assert_eq!(BetKind::from_wire("single_number", &json!("7")), None);
        assert_eq!(BetKind::from_wire("color", &json!("blue")), None);
        assert_eq!(BetKind::from_wire("parity", &json!(2)), None);
        assert_eq!(BetKind::from_wire("dozen", &json!("first")), None);
    }

    #[test]
    fn multipliers_match_the_table() {
        assert_eq!(BetKind::SingleNumber(7).multiplier(), 35);
        assert_eq!(BetKind::Color(WheelColor::Red).multiplier(), 2);
        assert_eq!(BetKind::Color(WheelColor::Black).multiplier(), 2);
        assert_eq!(BetKind::Color(WheelColor::Green).multiplier(), 14);
        assert_eq!(BetKind::Parity(ParityPick::Even).multiplier(), 2);
        assert_eq!(BetKind::Range(RangePick::Low).multiplier(), 2);
    }

    #[test]
    fn zero_wins_only_green() {
        assert!(BetKind::Color(WheelColor::Green).wins(0));
        assert!(!BetKind::Color(WheelColor::Red).wins(0));
        assert!(!BetKind::Color(WheelColor::Black).wins(0));
        assert!(!BetKind::Parity(ParityPick::Even).wins(0));
        assert!(!BetKind::Parity(ParityPick::Odd).wins(0));
        assert!(!BetKind::Range(RangePick::Low).wins(0));
        assert!(!BetKind::Range(RangePick::High).wins(0));
        assert!(BetKind::SingleNumber(0).wins(0));
    }

    #[test]
    fn range_and_parity_boundaries() {
        assert!(BetKind::Range(RangePick::Low).wins(1));
        assert!(BetKind::Range(RangePick::Low).wins(18));
        assert!(!BetKind::Range(RangePick::Low).wins(19));
        assert!(BetKind::Range(RangePick::High).wins(19));
        assert!(BetKind::Range(RangePick::High).wins(36));
        assert!(BetKind::Parity(ParityPick::Even).wins(36));
        assert!(BetKind::Parity(ParityPick::Odd).wins(35));
    }

    #[test]
    fn bet_serializes_with_flattened_kind() {
        let bet = Bet {
            id: 1,
            round: 42,
            player: PlayerId::new("alice"),
            kind: BetKind::SingleNumber(7),
            stake: 100,
            accepted_at: Utc::now(),
        };
        let value = serde_json::to_value(&bet).unwrap();
        assert_eq!(value["kind"], "single_number");
        assert_eq!(value["selection"], 7);
        let parsed: Bet = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, bet);
    }
}
