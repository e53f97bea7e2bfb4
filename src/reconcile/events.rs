use ethers::abi::{self, ParamType, Token};
use ethers::types::{Log, H256, U256};
use std::collections::HashMap;

use crate::contracts;
use crate::errors::{EngineError, EngineResult};

// ==================================================
// EVENT EMITTER DECODING
// ==================================================
//
// EventLog1/EventLog2 both carry (msgSender, eventName, EventLogData)
// in the data section; the event-name hash and the order key ride in
// the topics. EventLogData is seven typed sections of named items, so
// we decode the full tuple and index items by name.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleKind {
    Executed,
    Cancelled,
    Frozen,
}

/// One decoded order lifecycle event, reduced to the fields the
/// reconciler consumes.
#[derive(Debug, Clone)]
pub struct OrderEvent {
    pub kind: LifecycleKind,
    pub order_key: H256,
    pub execution_price: Option<U256>,
    pub size_delta_usd: Option<U256>,
    pub reason: Option<String>,
    pub block_number: u64,
}

fn section(inner: ParamType) -> ParamType {
    ParamType::Tuple(vec![
        ParamType::Array(Box::new(ParamType::Tuple(vec![
            ParamType::String,
            inner.clone(),
        ]))),
        ParamType::Array(Box::new(ParamType::Tuple(vec![
            ParamType::String,
            ParamType::Array(Box::new(inner)),
        ]))),
    ])
}

/// The canonical EventLogData tuple, mirroring the signature the topic0
/// hashes are computed from.
pub fn event_log_data_param() -> ParamType {
    ParamType::Tuple(vec![
        section(ParamType::Address),
        section(ParamType::Uint(256)),
        section(ParamType::Int(256)),
        section(ParamType::Bool),
        section(ParamType::FixedBytes(32)),
        section(ParamType::Bytes),
        section(ParamType::String),
    ])
}

/// Named single-value items of one section. Array items are skipped —
/// nothing the reconciler reads lives there.
fn section_items(token: &Token) -> HashMap<String, Token> {
    let mut items = HashMap::new();
    let Token::Tuple(parts) = token else {
        return items;
    };
    let Some(Token::Array(singles)) = parts.first() else {
        return items;
    };
    for entry in singles {
        if let Token::Tuple(pair) = entry {
            if let (Some(Token::String(name)), Some(value)) = (pair.first(), pair.get(1)) {
                items.insert(name.clone(), value.clone());
            }
        }
    }
    items
}

/// Decode a raw emitter log into an order lifecycle event. `None` for
/// logs that are not EventLog1/EventLog2 or not a lifecycle event we
/// track; `Err` only for a payload that fails ABI decoding.
pub fn decode_order_event(log: &Log) -> EngineResult<Option<OrderEvent>> {
    let Some(topic0) = log.topics.first() else {
        return Ok(None);
    };
    if *topic0 != contracts::event_log1_topic0() && *topic0 != contracts::event_log2_topic0() {
        return Ok(None);
    }
    let (Some(name_topic), Some(order_key)) = (log.topics.get(1), log.topics.get(2)) else {
        return Ok(None);
    };

    let kind = if *name_topic == contracts::order_executed_topic() {
        LifecycleKind::Executed
    } else if *name_topic == contracts::order_cancelled_topic() {
        LifecycleKind::Cancelled
    } else if *name_topic == contracts::order_frozen_topic() {
        LifecycleKind::Frozen
    } else {
        return Ok(None);
    };

    let tokens = abi::decode(
        &[ParamType::Address, ParamType::String, event_log_data_param()],
        &log.data,
    )
    .map_err(|e| EngineError::Abi(format!("event log decode: {e}")))?;

    let Some(Token::Tuple(sections)) = tokens.get(2) else {
        return Err(EngineError::Abi("event log missing data tuple".to_string()));
    };

    // Section order: address, uint, int, bool, bytes32, bytes, string.
    let uints = sections.get(1).map(section_items).unwrap_or_default();
    let strings = sections.get(6).map(section_items).unwrap_or_default();

    let uint_value = |name: &str| match uints.get(name) {
        Some(Token::Uint(v)) => Some(*v),
        _ => None,
    };
    let string_value = |name: &str| match strings.get(name) {
        Some(Token::String(s)) => Some(s.clone()),
        _ => None,
    };

    Ok(Some(OrderEvent {
        kind,
        order_key: *order_key,
        execution_price: uint_value("executionPrice"),
        size_delta_usd: uint_value("sizeDeltaUsd"),
        reason: string_value("reason"),
        block_number: log.block_number.map(|b| b.as_u64()).unwrap_or_default(),
    }))
}

/// Order key extracted from an OrderCreated emitter log, used to
/// bootstrap reconciliation from a bare creation receipt.
pub fn created_order_key(log: &Log) -> Option<H256> {
    let topic0 = log.topics.first()?;
    if *topic0 != contracts::event_log1_topic0() && *topic0 != contracts::event_log2_topic0() {
        return None;
    }
    if *log.topics.get(1)? != contracts::order_created_topic() {
        return None;
    }
    log.topics.get(2).copied()
}
