use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::error::EtlResult;
use crate::extract::Extract;
use crate::types::Entry;

/// Yields a single empty entry, driving streams that only initialise state.
#[derive(Debug, Default)]
pub struct NullExtract;

impl Extract for NullExtract {
    type Item = Entry;

    async fn run(self) -> EtlResult<BoxStream<'static, EtlResult<Entry>>> {
        Ok(stream::once(async { Ok(Entry::new()) }).boxed())
    }
}
