//! Lazy sources of entries and change transactions.
//!
//! An extractor is consumed by [`Extract::run`]; running a source again requires a new
//! instance.

mod cdc;
mod jsonl;
mod null;

use std::future::Future;

use futures::stream::BoxStream;

use crate::error::EtlResult;

pub use cdc::{CdcExtract, TxFileExtract};
pub use jsonl::JsonLinesExtract;
pub use null::NullExtract;

/// A lazy source of items.
pub trait Extract: Send {
    type Item: Send + 'static;

    /// Opens the source and returns the stream of its items.
    ///
    /// Failures to open the source are returned here, before any item is produced. A failure
    /// while reading is yielded as the last item of the stream.
    fn run(self) -> impl Future<Output = EtlResult<BoxStream<'static, EtlResult<Self::Item>>>> + Send;
}
