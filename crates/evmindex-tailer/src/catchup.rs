//! Bulk re-indexing of a height range after downtime.
//!
//! The range ends are resolved against the index and the node, clamped to
//! what the node can serve, then indexed one height at a time in order.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use evmindex_core::{EvmTxIndexer, IndexerError, EMPTY_INDEX};

use crate::client::{fetch_block_with_results, ChainClient, ChainStatus};

/// Log a progress line every this many heights.
const PROGRESS_EVERY: i64 = 100;

/// Lower end of a catch-up range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartHeight {
    /// One past the highest indexed height, or the node's earliest height
    /// when the index is empty.
    LastIndexed,
    Height(i64),
}

impl FromStr for StartHeight {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last-indexed" => Ok(Self::LastIndexed),
            n => n
                .parse()
                .map(Self::Height)
                .map_err(|_| format!("invalid start height '{n}', expected a number or last-indexed")),
        }
    }
}

/// Upper end of a catch-up range (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndHeight {
    /// The node's latest height.
    Latest,
    Height(i64),
}

impl FromStr for EndHeight {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Self::Latest),
            n => n
                .parse()
                .map(Self::Height)
                .map_err(|_| format!("invalid end height '{n}', expected a number or latest")),
        }
    }
}

/// Inclusive height range; empty when `from > to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpRange {
    pub from: i64,
    pub to: i64,
}

impl CatchUpRange {
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.to - self.from + 1) as u64
        }
    }
}

impl fmt::Display for CatchUpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Resolve both ends and clamp them to `[earliest, latest]` of `status`.
pub async fn resolve_range(
    indexer: &EvmTxIndexer,
    status: &ChainStatus,
    start: StartHeight,
    end: EndHeight,
) -> Result<CatchUpRange, IndexerError> {
    let from = match start {
        StartHeight::Height(h) => h,
        StartHeight::LastIndexed => match indexer.last_indexed_block().await? {
            EMPTY_INDEX => status.earliest_height,
            last => last + 1,
        },
    };
    let to = match end {
        EndHeight::Height(h) => h,
        EndHeight::Latest => status.latest_height,
    };

    Ok(CatchUpRange {
        from: from.max(status.earliest_height),
        to: to.min(status.latest_height),
    })
}

/// Outcome of [`run_catch_up`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUpReport {
    pub range: CatchUpRange,
    pub indexed: u64,
    /// Cancellation stopped the run before the end of the range.
    pub cancelled: bool,
}

/// Index every height in `range`, in order.
///
/// The first failure stops the run with [`IndexerError::Aborted`] naming the
/// height. `on_indexed` is called after each indexed height.
pub async fn run_catch_up<C, F>(
    client: &C,
    indexer: &EvmTxIndexer,
    range: CatchUpRange,
    fetch_timeout: Duration,
    cancel: &CancellationToken,
    mut on_indexed: F,
) -> Result<CatchUpReport, IndexerError>
where
    C: ChainClient + ?Sized,
    F: FnMut(i64),
{
    let mut report = CatchUpReport {
        range,
        indexed: 0,
        cancelled: false,
    };
    if range.is_empty() {
        info!(%range, "Nothing to catch up");
        return Ok(report);
    }

    info!(%range, blocks = range.len(), "Catch-up started");
    for height in range.from..=range.to {
        if cancel.is_cancelled() {
            info!(height, indexed = report.indexed, "Catch-up cancelled");
            report.cancelled = true;
            return Ok(report);
        }

        let (block, results) = fetch_block_with_results(client, height, fetch_timeout)
            .await
            .map_err(|err| abort_at(height, err))?;
        indexer
            .index_block(&block, &results)
            .await
            .map_err(|err| abort_at(height, err))?;

        report.indexed += 1;
        on_indexed(height);
        if (height - range.from + 1) % PROGRESS_EVERY == 0 {
            info!(height, indexed = report.indexed, total = range.len(), "Catch-up progress");
        }
    }

    info!(%range, indexed = report.indexed, "Catch-up complete");
    Ok(report)
}

fn abort_at(height: i64, err: IndexerError) -> IndexerError {
    IndexerError::Aborted {
        reason: format!("catch-up failed at height {height}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bounds() {
        assert_eq!("last-indexed".parse::<StartHeight>().unwrap(), StartHeight::LastIndexed);
        assert_eq!("42".parse::<StartHeight>().unwrap(), StartHeight::Height(42));
        assert!("latest".parse::<StartHeight>().is_err());

        assert_eq!("latest".parse::<EndHeight>().unwrap(), EndHeight::Latest);
        assert_eq!("7".parse::<EndHeight>().unwrap(), EndHeight::Height(7));
        assert!("soon".parse::<EndHeight>().is_err());
    }

    #[test]
    fn range_len() {
        assert_eq!(CatchUpRange { from: 3, to: 5 }.len(), 3);
        assert_eq!(CatchUpRange { from: 5, to: 5 }.len(), 1);
        assert!(CatchUpRange { from: 6, to: 5 }.is_empty());
        assert_eq!(CatchUpRange { from: 6, to: 5 }.len(), 0);
    }

    #[test]
    fn aborted_error_names_height() {
        let err = abort_at(12, IndexerError::Rpc("connection reset".into()));
        assert!(err.to_string().contains("height 12"));
    }
}
