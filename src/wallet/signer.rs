use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionRequest, H256};

use crate::errors::{EngineError, EngineResult};
use crate::monitor::TransactionSigner;

// ===============================
// LOCAL WALLET ADAPTER
// ===============================
//
// The engine core never sees the private key; it talks to the
// TransactionSigner trait and this adapter signs + broadcasts.

pub struct WalletSigner {
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
    address: Address,
}

impl WalletSigner {
    pub fn new(provider: Provider<Http>, private_key: &str, chain_id: u64) -> EngineResult<Self> {
        let wallet: LocalWallet = private_key
            .parse()
            .map_err(|_| EngineError::Configuration("invalid PRIVATE_KEY".to_string()))?;
        let wallet = wallet.with_chain_id(chain_id);
        let address = wallet.address();
        Ok(Self {
            client: SignerMiddleware::new(provider, wallet),
            address,
        })
    }
}

#[async_trait]
impl TransactionSigner for WalletSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn submit(&self, tx: TransactionRequest) -> EngineResult<H256> {
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| EngineError::Rpc(e.to_string()))?;
        Ok(pending.tx_hash())
    }
}
