use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{
    Address, Filter, Log, TransactionReceipt, TransactionRequest, H256, U256,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::contracts::{order_list_key, DataStore, Erc20};
use crate::errors::{EngineError, EngineResult};
use crate::monitor::ChainGateway;
use crate::orders::AllowanceSource;
use crate::reconcile::ChainReader;

// ===============================
// RPC GATEWAY
// ===============================
//
// One live adapter over an HTTP provider, implementing every on-chain
// read seam the engine needs. Tests replace it with fakes, so nothing
// in here is exercised without a node.

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct RpcGateway {
    provider: Arc<Provider<Http>>,
    data_store: Address,
    receipt_timeout: Duration,
}

impl RpcGateway {
    pub fn new(provider: Arc<Provider<Http>>, data_store: Address, receipt_timeout: Duration) -> Self {
        Self {
            provider,
            data_store,
            receipt_timeout,
        }
    }

    pub fn provider(&self) -> &Arc<Provider<Http>> {
        &self.provider
    }

    pub async fn gas_price(&self) -> EngineResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))
    }
}

#[async_trait]
impl ChainGateway for RpcGateway {
    async fn native_balance(&self, account: Address) -> EngineResult<U256> {
        self.provider
            .get_balance(account, None)
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> EngineResult<U256> {
        self.provider
            .estimate_gas(&tx.clone().into(), None)
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))
    }

    /// Poll for the receipt, bounded by the configured timeout. `None`
    /// means the deadline passed with the transaction still pending.
    async fn await_receipt(&self, tx_hash: H256) -> EngineResult<Option<TransactionReceipt>> {
        let deadline = tokio::time::Instant::now() + self.receipt_timeout;
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|e| EngineError::Rpc(e.to_string()))?;
            if receipt.is_some() {
                return Ok(receipt);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ChainReader for RpcGateway {
    async fn receipt(&self, tx_hash: H256) -> EngineResult<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))
    }

    async fn latest_block(&self) -> EngineResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map(|b| b.as_u64())
            .map_err(|e| EngineError::Rpc(e.to_string()))
    }

    async fn logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> EngineResult<Vec<Log>> {
        let filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);
        self.provider
            .get_logs(&filter)
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))
    }

    async fn order_pending(&self, order_key: H256) -> EngineResult<bool> {
        let store = DataStore::new(self.data_store, self.provider.clone());
        store
            .contains_bytes_32(order_list_key().0, order_key.0)
            .call()
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))
    }
}

#[async_trait]
impl AllowanceSource for RpcGateway {
    async fn allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> EngineResult<U256> {
        let erc20 = Erc20::new(token, self.provider.clone());
        erc20
            .allowance(owner, spender)
            .call()
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))
    }
}
