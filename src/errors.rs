use ethers::types::U256;
use rust_decimal::Decimal;
use thiserror::Error;

// ==================================================
// ENGINE ERROR TAXONOMY
// ==================================================
//
// Expected network / on-chain failures are returned as typed values so the
// trading loop can branch on them without catch-all handling. Programmer
// errors (impossible states) are the only things allowed to panic.

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing endpoint / unsupported chain. Fatal, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Market key is absent from the cached market set.
    #[error("market not found: {0}")]
    MarketNotFound(String),

    /// Index token missing from the oracle snapshot.
    #[error("no oracle price for token {0}")]
    PriceUnavailable(String),

    /// ERC-20 allowance too low for the collateral deposit. We never
    /// auto-approve; the caller has to do that out of band.
    #[error("insufficient {token} approval: required {required}, current {current}")]
    InsufficientApproval {
        token: String,
        required: U256,
        current: U256,
    },

    /// Native gas balance (in USD) under the critical floor.
    #[error("insufficient gas balance: need ${required}, have ${current}")]
    InsufficientBalance { required: Decimal, current: Decimal },

    /// Single transport-level failure (timeout, connect, decode).
    #[error("transport error: {0}")]
    Transport(String),

    /// Every configured URL was exhausted, retries included.
    #[error("all endpoints failed for {endpoint}: {detail}")]
    AllEndpointsFailed { endpoint: String, detail: String },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("abi error: {0}")]
    Abi(String),

    #[error("numeric conversion error: {0}")]
    Numeric(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Whether a fresh market/oracle fetch could make the same call succeed.
    pub fn is_refreshable(&self) -> bool {
        matches!(
            self,
            EngineError::MarketNotFound(_) | EngineError::PriceUnavailable(_)
        )
    }
}
