pub mod builder;
pub mod liquidity;
pub mod sltp;

pub use builder::{AllowanceSource, OrderBuilder};
pub use liquidity::{DepositParams, LiquidityBuilder, LiquidityResult, WithdrawalParams};
pub use sltp::SltpBundler;
