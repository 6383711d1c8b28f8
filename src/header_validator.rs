//! C1: Header Validator — pure, stateless validation of a header chain
//! (spec §4.2). Grounded on the linkage checks the teacher inlines in
//! `sync/full.rs`'s header-fetch loop, pulled out here into one reusable,
//! side-effect-free function per spec's "hard core" framing.

use crate::error::HeaderValidationError;
use crate::types::Header;
use std::time::{SystemTime, UNIX_EPOCH};

/// Headers may not claim a timestamp more than this far in the future.
const MAX_FUTURE_DRIFT_SECS: u64 = 15;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `Hᵢ.ParentHash == Keccak256(RLP(Hᵢ₋₁))`. Header RLP/hashing lives outside
/// the engine's hard core (spec §1 out-of-scope); callers provide the
/// already-computed hash via `Header::hash`, which this module treats as the
/// pure function of header bytes that spec §3 requires.
fn links(parent: &Header, child: &Header) -> Result<(), HeaderValidationError> {
    if child.number != parent.number + 1 {
        return Err(HeaderValidationError::BadBlockNumber {
            expected: parent.number + 1,
            actual: child.number,
        });
    }
    if child.parent_hash != parent.hash {
        return Err(HeaderValidationError::BadParentHash {
            number: child.number,
        });
    }
    if child.time < parent.time {
        return Err(HeaderValidationError::TimestampOrder {
            number: child.number,
        });
    }
    Ok(())
}

/// Validates `[H0, H1, ..., Hn]` against an optional `prev` parent (spec
/// §4.2). `prev == None` only at the genesis boundary.
pub fn validate_header_chain(
    headers: &[Header],
    prev: Option<&Header>,
) -> Result<(), HeaderValidationError> {
    if headers.is_empty() {
        return Err(HeaderValidationError::EmptyHeaders);
    }

    let now = now_secs();
    for header in headers {
        if header.time > now + MAX_FUTURE_DRIFT_SECS {
            return Err(HeaderValidationError::FutureTimestamp {
                number: header.number,
            });
        }
    }

    if let Some(parent) = prev {
        links(parent, &headers[0])?;
    }

    for window in headers.windows(2) {
        links(&window[0], &window[1])?;
    }

    Ok(())
}
