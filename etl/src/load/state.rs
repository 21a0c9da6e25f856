use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::info;

use crate::error::EtlResult;
use crate::load::{Load, LoadSummary};
use crate::state::StateStore;
use crate::types::Entry;

/// Load writing entries into the state store instead of a database.
///
/// Errors from `write` are propagated, since the state is shared by every following stream.
pub struct StateLoad<F> {
    write: F,
}

impl<F> StateLoad<F>
where
    F: FnMut(Entry, &mut StateStore) -> EtlResult<()> + Send,
{
    pub fn new(write: F) -> Self {
        Self { write }
    }
}

impl<F> Load for StateLoad<F>
where
    F: FnMut(Entry, &mut StateStore) -> EtlResult<()> + Send,
{
    type Item = Entry;

    async fn load(
        &mut self,
        mut input: BoxStream<'static, EtlResult<Entry>>,
        state: &mut StateStore,
    ) -> EtlResult<LoadSummary> {
        let mut summary = LoadSummary::default();
        while let Some(entry) = input.next().await {
            (self.write)(entry?, state)?;
            summary.loaded += 1;
        }
        info!(entries = summary.loaded, "state loaded");

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::state::StateTable;
    use crate::types::row_from;

    fn global(entry: Entry, state: &mut StateStore) -> EtlResult<()> {
        state.upsert(StateTable::Global, entry)
    }

    #[tokio::test]
    async fn entries_are_written_to_state() {
        let mut load = StateLoad::new(global);
        let mut state = StateStore::new();
        let input = stream::iter(vec![
            Ok(row_from(json!({"key": "old_secret_key", "value": "a"}))),
            Ok(row_from(json!({"key": "new_secret_key", "value": "b"}))),
        ])
        .boxed();

        let summary = load.load(input, &mut state).await.unwrap();

        assert_eq!(summary.loaded, 2);
        assert_eq!(
            state.get(StateTable::Global, "new_secret_key"),
            Some(&row_from(json!({"key": "new_secret_key", "value": "b"})))
        );
    }

    #[tokio::test]
    async fn write_errors_abort_the_load() {
        let mut load = StateLoad::new(global);
        let input = stream::iter(vec![Ok(row_from(json!({"value": "a"})))]).boxed();

        let err = load.load(input, &mut StateStore::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
