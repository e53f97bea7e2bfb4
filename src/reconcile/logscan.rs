use ethers::types::{Address, H256};
use log::{debug, warn};

use super::events::{self, OrderEvent};
use super::ChainReader;
use crate::errors::EngineResult;

// ==================================================
// CHUNKED LOG SCAN
// ==================================================
//
// get_logs providers cap the block span per call, so the scan range is
// partitioned into fixed-size windows. One window failing is logged and
// skipped; only the aggregate miss is reported to the caller.

/// Partition an inclusive block range into windows of at most `limit`
/// blocks.
pub fn windows(from_block: u64, to_block: u64, limit: u64) -> Vec<(u64, u64)> {
    if to_block < from_block || limit == 0 {
        return vec![];
    }
    let mut out = Vec::new();
    let mut start = from_block;
    while start <= to_block {
        let end = to_block.min(start + limit - 1);
        out.push((start, end));
        start = end + 1;
    }
    out
}

/// Scan emitter logs window by window for the first lifecycle event
/// matching `order_key`, stopping early on a hit.
pub async fn scan_for_order_event(
    reader: &dyn ChainReader,
    emitter: Address,
    order_key: H256,
    from_block: u64,
    to_block: u64,
    limit: u64,
) -> EngineResult<Option<OrderEvent>> {
    let ranges = windows(from_block, to_block, limit);
    debug!(
        "🔍 Scanning {} windows for order {:?} ({from_block}..={to_block})",
        ranges.len(),
        order_key
    );

    for (start, end) in ranges {
        let logs = match reader.logs(emitter, start, end).await {
            Ok(logs) => logs,
            Err(e) => {
                warn!("⚠️ Log window {start}..={end} failed, skipping: {e}");
                continue;
            }
        };

        for log in &logs {
            match events::decode_order_event(log) {
                Ok(Some(event)) if event.order_key == order_key => return Ok(Some(event)),
                Ok(_) => {}
                Err(e) => warn!("⚠️ Undecodable emitter log in {start}..={end}: {e}"),
            }
        }
    }

    Ok(None)
}
