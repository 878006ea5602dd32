//! Balance oracle
//!
//! Voting weight is the token balance of the voter's registered address,
//! read from the token contract with an `eth_call` to `balanceOf(address)`.
//! Callers never propagate oracle failures: [`weight_or_zero`] turns them
//! into a zero weight and a log line.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::types::{Address, Weight};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

/// `keccak256("balanceOf(address)")[..4]`
const BALANCE_OF_SELECTOR: &str = "70a08231";

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait BalanceOracle: Send + Sync {
    async fn balance_of(&self, address: &Address) -> Result<Weight, OracleError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("RPC response had no result")]
    MissingResult,
    #[error("Invalid balanceOf result: {0}")]
    InvalidResult(String),
    #[error("Balance does not fit in 128 bits")]
    Overflow,
    #[error("Oracle unavailable, retry in {:.1}s", .retry_in.as_secs_f64())]
    CircuitOpen { retry_in: Duration },
}

/// Balance of `address`, or zero if the oracle failed
pub async fn weight_or_zero(oracle: &dyn BalanceOracle, address: &Address) -> Weight {
    match oracle.balance_of(address).await {
        Ok(weight) => weight,
        Err(e) => {
            warn!(address = %address, error = %e, "Balance lookup failed, using zero weight");
            0
        }
    }
}

/// `balanceOf` over Ethereum JSON-RPC
pub struct JsonRpcBalanceOracle {
    client: reqwest::Client,
    rpc_url: String,
    contract: Address,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl JsonRpcBalanceOracle {
    pub fn new(rpc_url: &str, contract: Address) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;
        Ok(Self {
            client,
            rpc_url: rpc_url.to_string(),
            contract,
        })
    }

    fn call_data(address: &Address) -> String {
        format!("0x{}{:0>64}", BALANCE_OF_SELECTOR, address.digits())
    }
}

#[async_trait]
impl BalanceOracle for JsonRpcBalanceOracle {
    async fn balance_of(&self, address: &Address) -> Result<Weight, OracleError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                { "to": self.contract.as_str(), "data": Self::call_data(address) },
                "latest"
            ]
        });

        let response: RpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(OracleError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        decode_uint(&response.result.ok_or(OracleError::MissingResult)?)
    }
}

/// Decode an ABI `uint256` hex word
fn decode_uint(raw: &str) -> Result<Weight, OracleError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| OracleError::InvalidResult(raw.to_string()))?;
    // "0x" is what a call to an address without code returns
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(OracleError::InvalidResult(raw.to_string()));
    }
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Ok(0);
    }
    if significant.len() > 32 {
        return Err(OracleError::Overflow);
    }
    Weight::from_str_radix(significant, 16).map_err(|_| OracleError::InvalidResult(raw.to_string()))
}

/// Oracle behind a circuit breaker
pub struct GuardedOracle<O> {
    inner: O,
    breaker: CircuitBreaker,
}

impl<O: BalanceOracle> GuardedOracle<O> {
    pub fn new(inner: O, config: CircuitBreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new("balance-oracle", config),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<O: BalanceOracle> BalanceOracle for GuardedOracle<O> {
    async fn balance_of(&self, address: &Address) -> Result<Weight, OracleError> {
        self.breaker
            .check()
            .map_err(|retry_in| OracleError::CircuitOpen { retry_in })?;

        match self.inner.balance_of(address).await {
            Ok(weight) => {
                self.breaker.record_success();
                Ok(weight)
            }
            // A well-formed RPC answer means the node is alive
            Err(e @ OracleError::Rpc { .. }) => {
                self.breaker.record_success();
                Err(e)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }
}
