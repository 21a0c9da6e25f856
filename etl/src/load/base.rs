use std::future::Future;

use futures::stream::BoxStream;

use crate::error::EtlResult;
use crate::state::StateStore;

/// Counters reported by a load once its input is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Items (transactions, rows or entries) that reached the target.
    pub loaded: u64,
    /// Items that were dropped or rolled back.
    pub failed: u64,
}

/// Final step of a stream, consuming every item produced by the transform.
///
/// A load owns its connection to the target and may use the state store to resolve or record
/// identifiers. An error returned from [`Load::load`] aborts the stream; per-item failures are
/// expected to be handled by the implementation and reported through [`LoadSummary::failed`].
pub trait Load: Send {
    type Item: Send + 'static;

    fn load(
        &mut self,
        input: BoxStream<'static, EtlResult<Self::Item>>,
        state: &mut StateStore,
    ) -> impl Future<Output = EtlResult<LoadSummary>> + Send;
}
