use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::book::BetId;
use crate::ledger::{Gems, RoundNumber};

#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub round_number: RoundNumber,
    pub kind: String,
    pub selection: JsonValue,
    pub stake: Gems,
}

/// `bet_id`/`new_balance` are absent when the request deadline elapsed
/// after the debit: the bet stands and settlement arrives on the stream.
#[derive(Debug, Serialize)]
pub struct PlaceBetResponse {
    pub success: bool,
    pub bet_id: Option<BetId>,
    pub new_balance: Option<Gems>,
}

#[derive(Debug, Serialize)]
pub struct SpinResponse {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClientSeedRequest {
    pub seed: String,
}

#[derive(Debug, Serialize)]
pub struct ClientSeedResponse {
    pub success: bool,
    pub applies_to_round: RoundNumber,
}
