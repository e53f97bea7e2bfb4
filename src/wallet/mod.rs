pub mod gateway;
pub mod signer;

pub use gateway::RpcGateway;
pub use signer::WalletSigner;
