use crate::{
    Address,
    Error,
    Result,
    U256,
};
use std::{
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

pub const CONTRACT_ADDRESS_ENV: &str = "GUESS_GAME_CONTRACT_ADDRESS";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8545";
pub const DEFAULT_GAS_MULTIPLIER_PERCENT: u64 = 120;
pub const DEFAULT_GAS_CEILING: u64 = 5_000_000;
pub const DEFAULT_WINNERS_REFRESH_DELAY: Duration = Duration::from_secs(5);

/// One gas rule for every game transaction: ask the node, scale, cap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GasPolicy {
    pub multiplier_percent: u64,
    pub ceiling: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            multiplier_percent: DEFAULT_GAS_MULTIPLIER_PERCENT,
            ceiling: DEFAULT_GAS_CEILING,
        }
    }
}

impl GasPolicy {
    pub fn gas_limit(&self, estimate: U256) -> U256 {
        let scaled = estimate.saturating_mul(U256::from(self.multiplier_percent))
            / U256::from(100u64);
        scaled.min(U256::from(self.ceiling))
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub ws_url: String,
    pub contract_address: Address,
    pub gas: GasPolicy,
    pub winners_refresh_delay: Duration,
    pub data_dir: PathBuf,
}

impl ClientConfig {
    pub fn new(ws_url: impl Into<String>, contract_address: Address) -> Self {
        Self {
            ws_url: ws_url.into(),
            contract_address,
            gas: GasPolicy::default(),
            winners_refresh_delay: DEFAULT_WINNERS_REFRESH_DELAY,
            data_dir: PathBuf::from(session_store::DEFAULT_DATA_ROOT),
        }
    }
}

pub fn parse_address(raw: &str) -> Result<Address> {
    let trimmed = raw.trim();
    Address::from_str(trimmed).map_err(|e| {
        Error::validation(format!("Failed to parse contract address '{raw}': {e}"))
    })
}

/// Reads the deployed contract address from [`CONTRACT_ADDRESS_ENV`].
pub fn contract_address_from_env() -> Result<Address> {
    let raw = std::env::var(CONTRACT_ADDRESS_ENV).map_err(|_| {
        Error::ProviderUnavailable(format!(
            "{CONTRACT_ADDRESS_ENV} is not set; no contract to bind to"
        ))
    })?;
    parse_address(&raw)
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn gas_limit__scales_estimate_by_multiplier() {
        // given
        let policy = GasPolicy {
            multiplier_percent: 150,
            ceiling: 10_000_000,
        };

        // when
        let limit = policy.gas_limit(U256::from(100_000u64));

        // then
        assert_eq!(limit, U256::from(150_000u64));
    }

    #[test]
    fn gas_limit__never_exceeds_ceiling() {
        // given
        let policy = GasPolicy::default();

        // when
        let limit = policy.gas_limit(U256::from(9_000_000u64));

        // then
        assert_eq!(limit, U256::from(DEFAULT_GAS_CEILING));
    }

    #[test]
    fn parse_address__rejects_garbage() {
        assert!(matches!(parse_address("0xnope"), Err(Error::Validation(_))));
    }

    #[test]
    fn parse_address__accepts_padded_hex() {
        let parsed =
            parse_address(" 0x00000000000000000000000000000000000000aa ").unwrap();
        assert_eq!(parsed, Address::from_low_u64_be(0xaa));
    }
}
