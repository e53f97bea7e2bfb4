use ethers::abi::Token;
use ethers::contract::abigen;
use ethers::types::H256;
use ethers::utils::keccak256;

// ==================================================
// ABI BINDINGS (human-readable, same shape GMX deploys)
// ==================================================

abigen!(
    ExchangeRouter,
    r#"[
        struct CreateOrderParamsAddresses { address receiver; address cancellationReceiver; address callbackContract; address uiFeeReceiver; address market; address initialCollateralToken; address[] swapPath; }
        struct CreateOrderParamsNumbers { uint256 sizeDeltaUsd; uint256 initialCollateralDeltaAmount; uint256 triggerPrice; uint256 acceptablePrice; uint256 executionFee; uint256 callbackGasLimit; uint256 minOutputAmount; uint256 validFromTime; }
        struct CreateOrderParams { CreateOrderParamsAddresses addresses; CreateOrderParamsNumbers numbers; uint8 orderType; uint8 decreasePositionSwapType; bool isLong; bool shouldUnwrapNativeToken; bool autoCancel; bytes32 referralCode; }
        struct CreateDepositParams { address receiver; address callbackContract; address uiFeeReceiver; address market; address initialLongToken; address initialShortToken; address[] longTokenSwapPath; address[] shortTokenSwapPath; uint256 minMarketTokens; bool shouldUnwrapNativeToken; uint256 executionFee; uint256 callbackGasLimit; }
        struct CreateWithdrawalParams { address receiver; address callbackContract; address uiFeeReceiver; address market; address[] longTokenSwapPath; address[] shortTokenSwapPath; uint256 minLongTokenAmount; uint256 minShortTokenAmount; bool shouldUnwrapNativeToken; uint256 executionFee; uint256 callbackGasLimit; }
        function multicall(bytes[] data) payable returns (bytes[] results)
        function sendWnt(address receiver, uint256 amount) payable
        function sendTokens(address token, address receiver, uint256 amount) payable
        function createOrder(CreateOrderParams params) payable returns (bytes32)
        function createDeposit(CreateDepositParams params) payable returns (bytes32)
        function createWithdrawal(CreateWithdrawalParams params) payable returns (bytes32)
    ]"#
);

abigen!(
    DataStore,
    r#"[
        function getUint(bytes32 key) view returns (uint256)
        function containsBytes32(bytes32 setKey, bytes32 value) view returns (bool)
        function getBytes32Count(bytes32 setKey) view returns (uint256)
    ]"#
);

abigen!(
    Erc20,
    r#"[
        function balanceOf(address owner) view returns (uint256)
        function allowance(address owner, address spender) view returns (uint256)
        function decimals() view returns (uint8)
        function symbol() view returns (string)
    ]"#
);

// ==================================================
// DATASTORE KEYS
// ==================================================
//
// DataStore keys are keccak256 of the abi.encode'd key string, matching
// the on-chain Keys library.

pub fn datastore_key(name: &str) -> H256 {
    let encoded = ethers::abi::encode(&[Token::String(name.to_string())]);
    H256::from(keccak256(encoded))
}

/// Parse a bytes32 referral code from its hex form, right-padding short
/// codes with zeros the way the referral storage contract stores them.
pub fn parse_referral_code(code: &str) -> crate::errors::EngineResult<[u8; 32]> {
    let raw = code.strip_prefix("0x").unwrap_or(code);
    let bytes = hex::decode(raw)
        .map_err(|e| crate::errors::EngineError::Abi(format!("referral code: {e}")))?;
    if bytes.len() > 32 {
        return Err(crate::errors::EngineError::Abi(format!(
            "referral code too long: {} bytes",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out[..bytes.len()].copy_from_slice(&bytes);
    Ok(out)
}

pub fn increase_order_gas_limit_key() -> H256 {
    datastore_key("INCREASE_ORDER_GAS_LIMIT")
}

pub fn decrease_order_gas_limit_key() -> H256 {
    datastore_key("DECREASE_ORDER_GAS_LIMIT")
}

pub fn swap_order_gas_limit_key() -> H256 {
    datastore_key("SWAP_ORDER_GAS_LIMIT")
}

pub fn deposit_gas_limit_key() -> H256 {
    datastore_key("DEPOSIT_GAS_LIMIT")
}

pub fn withdrawal_gas_limit_key() -> H256 {
    datastore_key("WITHDRAWAL_GAS_LIMIT")
}

pub fn single_swap_gas_limit_key() -> H256 {
    datastore_key("SINGLE_SWAP_GAS_LIMIT")
}

pub fn estimated_gas_fee_base_key() -> H256 {
    datastore_key("ESTIMATED_GAS_FEE_BASE_AMOUNT_V2_1")
}

pub fn estimated_gas_fee_per_oracle_key() -> H256 {
    datastore_key("ESTIMATED_GAS_FEE_PER_ORACLE_PRICE")
}

/// Set of currently pending order keys; membership means the keeper has
/// not executed or cancelled the order yet.
pub fn order_list_key() -> H256 {
    datastore_key("ORDER_LIST")
}

// ==================================================
// EVENT EMITTER TOPICS
// ==================================================
//
// EventEmitter logs carry a dynamic EventLogData payload. The canonical
// tuple signature below must match the deployed contract exactly or the
// topic0 hashes are wrong.

fn event_log_data_signature() -> String {
    let section = |t: &str| format!("((string,{t})[],(string,{t}[])[])");
    format!(
        "({},{},{},{},{},{},{})",
        section("address"),
        section("uint256"),
        section("int256"),
        section("bool"),
        section("bytes32"),
        section("bytes"),
        section("string"),
    )
}

pub fn event_log1_topic0() -> H256 {
    let sig = format!(
        "EventLog1(address,string,string,bytes32,{})",
        event_log_data_signature()
    );
    H256::from(keccak256(sig.as_bytes()))
}

pub fn event_log2_topic0() -> H256 {
    let sig = format!(
        "EventLog2(address,string,string,bytes32,bytes32,{})",
        event_log_data_signature()
    );
    H256::from(keccak256(sig.as_bytes()))
}

/// `string indexed eventName` topics are the keccak of the raw string.
pub fn event_name_topic(name: &str) -> H256 {
    H256::from(keccak256(name.as_bytes()))
}

pub fn order_created_topic() -> H256 {
    event_name_topic("OrderCreated")
}

pub fn order_executed_topic() -> H256 {
    event_name_topic("OrderExecuted")
}

pub fn order_cancelled_topic() -> H256 {
    event_name_topic("OrderCancelled")
}

pub fn order_frozen_topic() -> H256 {
    event_name_topic("OrderFrozen")
}
