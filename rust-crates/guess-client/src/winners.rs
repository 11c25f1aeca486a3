use crate::{
    Address,
    chain::ChainClient,
};

/// Lookup bound when the round's player count is unknown.
pub const MAX_WINNER_LOOKUPS: u64 = 32;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WinnersRegistry {
    winners: Vec<Address>,
}

impl WinnersRegistry {
    pub fn winners(&self) -> &[Address] {
        &self.winners
    }

    pub fn replace(&mut self, winners: Vec<Address>) {
        self.winners = winners;
    }

    pub fn clear(&mut self) {
        self.winners.clear();
    }
}

/// There can be no more winners than players.
pub fn lookup_bound(round_players: usize) -> u64 {
    if round_players == 0 {
        MAX_WINNER_LOOKUPS
    } else {
        round_players as u64
    }
}

/// Reads `winningAddresses(0..bound)` in order. The first reverted lookup or
/// zero address marks the end of the list.
pub async fn fetch_winners<C: ChainClient>(chain: &C, bound: u64) -> Vec<Address> {
    let mut winners = Vec::new();
    for index in 0..bound {
        match chain.winning_address(index).await {
            Ok(address) if address.is_zero() => break,
            Ok(address) => winners.push(address),
            Err(err) => {
                tracing::debug!(index, %err, "winner lookup stopped");
                break;
            }
        }
    }
    tracing::info!(winners = winners.len(), "winners fetched");
    winners
}
