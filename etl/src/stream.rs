//! Stream composition and the runner executing registered streams in order.

use async_trait::async_trait;
use config::shared::{MigratorConfig, StreamConfig};
use futures::stream::BoxStream;
use tracing::{error, info, warn};

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::extract::Extract;
use crate::load::{Load, LoadSummary};
use crate::state::StateStore;
use crate::transform::{Transform, TransformStage};
use crate::tx::{TxActions, TxTransform};
use crate::types::{Entry, Tx};

/// Middle step of a stream, turning every extracted item into load items.
pub trait StreamTransform: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn apply(
        self,
        input: BoxStream<'static, EtlResult<Self::Input>>,
    ) -> BoxStream<'static, EtlResult<Self::Output>>;
}

impl<T: Transform> StreamTransform for TransformStage<T> {
    type Input = Entry;
    type Output = Entry;

    fn apply(self, input: BoxStream<'static, EtlResult<Entry>>) -> BoxStream<'static, EtlResult<Entry>> {
        TransformStage::apply(self, input)
    }
}

impl StreamTransform for TxTransform {
    type Input = Tx;
    type Output = TxActions;

    fn apply(self, input: BoxStream<'static, EtlResult<Tx>>) -> BoxStream<'static, EtlResult<TxActions>> {
        TxTransform::apply(self, input)
    }
}

/// A stream ready to run, with its concrete components erased.
#[async_trait]
pub trait RunnableStream: Send {
    fn name(&self) -> &str;

    async fn run(self: Box<Self>, state: &mut StateStore) -> EtlResult<LoadSummary>;
}

/// An extract, transform and load triple.
pub struct EtlStream<E, T, L> {
    name: String,
    extract: E,
    transform: T,
    load: L,
}

impl<E, T, L> EtlStream<E, T, L>
where
    E: Extract + 'static,
    T: StreamTransform<Input = E::Item>,
    L: Load<Item = T::Output> + 'static,
{
    pub fn new(name: impl Into<String>, extract: E, transform: T, load: L) -> Self {
        Self {
            name: name.into(),
            extract,
            transform,
            load,
        }
    }

    pub fn boxed(self) -> Box<dyn RunnableStream> {
        Box::new(self)
    }
}

#[async_trait]
impl<E, T, L> RunnableStream for EtlStream<E, T, L>
where
    E: Extract + 'static,
    T: StreamTransform<Input = E::Item>,
    L: Load<Item = T::Output> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(self: Box<Self>, state: &mut StateStore) -> EtlResult<LoadSummary> {
        let EtlStream {
            name,
            extract,
            transform,
            mut load,
        } = *self;

        info!(stream = %name, "starting stream");
        let input = extract.run().await?;
        let summary = load.load(transform.apply(input), state).await?;
        info!(
            stream = %name,
            loaded = summary.loaded,
            failed = summary.failed,
            "stream finished"
        );

        Ok(summary)
    }
}

/// What a stream builder may read while assembling its components.
pub struct StreamContext<'a> {
    pub config: &'a MigratorConfig,
    /// State as left by the streams that already ran.
    pub state: &'a StateStore,
}

type StreamBuilder =
    Box<dyn Fn(&StreamConfig, &StreamContext<'_>) -> EtlResult<Box<dyn RunnableStream>> + Send + Sync>;

/// A named recipe for a stream.
pub struct StreamDefinition {
    name: &'static str,
    build: StreamBuilder,
}

impl StreamDefinition {
    pub fn new<F>(name: &'static str, build: F) -> Self
    where
        F: Fn(&StreamConfig, &StreamContext<'_>) -> EtlResult<Box<dyn RunnableStream>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name,
            build: Box::new(build),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn build(
        &self,
        config: &StreamConfig,
        ctx: &StreamContext<'_>,
    ) -> EtlResult<Box<dyn RunnableStream>> {
        (self.build)(config, ctx)
    }
}

/// Runs the registered streams that are configured, in registration order.
///
/// Each stream is built right before it runs, so builders see the state written by earlier
/// streams. State caches are flushed after every stream. The first failing stream stops the
/// run.
pub struct Runner {
    definitions: Vec<StreamDefinition>,
}

impl Runner {
    pub fn new(definitions: Vec<StreamDefinition>) -> Self {
        Self { definitions }
    }

    /// Returns the registered stream names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.definitions.iter().map(StreamDefinition::name).collect()
    }

    /// Returns the definitions that will run for `config`, restricted to `only` when it is not
    /// empty.
    pub fn selected(
        &self,
        config: &MigratorConfig,
        only: &[String],
    ) -> EtlResult<Vec<&StreamDefinition>> {
        for name in only {
            if !self.names().contains(&name.as_str()) {
                bail!(ErrorKind::ConfigError, "Unknown stream", name.clone());
            }
        }
        for name in config.streams.keys() {
            if !self.names().contains(&name.as_str()) {
                warn!(stream = %name, "configured stream is not registered, ignoring");
            }
        }

        Ok(self
            .definitions
            .iter()
            .filter(|definition| config.streams.contains_key(definition.name))
            .filter(|definition| only.is_empty() || only.iter().any(|name| name == definition.name))
            .collect())
    }

    /// Runs the selected streams and returns their summaries.
    pub async fn run(
        &self,
        config: &MigratorConfig,
        state: &mut StateStore,
        only: &[String],
    ) -> EtlResult<Vec<(&'static str, LoadSummary)>> {
        let mut summaries = Vec::new();
        for definition in self.selected(config, only)? {
            let Some(stream_config) = config.streams.get(definition.name) else {
                continue;
            };

            let ctx = StreamContext {
                config,
                state: &*state,
            };
            let result = match definition.build(stream_config, &ctx) {
                Ok(stream) => stream.run(state).await,
                Err(err) => Err(err),
            };
            state.flush_cache();

            match result {
                Ok(summary) => summaries.push((definition.name, summary)),
                Err(err) => {
                    error!(stream = definition.name, error = %err, "stream failed");
                    return Err(err);
                }
            }
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::load::StateLoad;
    use crate::state::StateTable;
    use crate::transform::Identity;
    use crate::types::row_from;

    struct VecExtract(Vec<Entry>);

    impl Extract for VecExtract {
        type Item = Entry;

        async fn run(self) -> EtlResult<BoxStream<'static, EtlResult<Entry>>> {
            Ok(stream::iter(self.0.into_iter().map(Ok)).boxed())
        }
    }

    fn write_global(entry: Entry, state: &mut StateStore) -> EtlResult<()> {
        state.upsert(StateTable::Global, entry)
    }

    /// A stream writing `key = <name>` into the global table.
    fn marker(name: &'static str) -> StreamDefinition {
        StreamDefinition::new(name, move |config, _ctx| {
            let entry = row_from(json!({"key": name, "value": name}));
            Ok(EtlStream::new(
                name,
                VecExtract(vec![entry]),
                TransformStage::from_config(Identity, &config.transform),
                StateLoad::new(write_global),
            )
            .boxed())
        })
    }

    /// A stream recording how many global rows existed when it was built.
    fn observer() -> StreamDefinition {
        StreamDefinition::new("observer", |_config, ctx| {
            let seen = ctx.state.len(StateTable::Global);
            let entry = row_from(json!({"key": "seen", "value": seen}));
            Ok(EtlStream::new(
                "observer",
                VecExtract(vec![entry]),
                TransformStage::new(Identity),
                StateLoad::new(write_global),
            )
            .boxed())
        })
    }

    fn config(streams: &[&str]) -> MigratorConfig {
        let streams = streams
            .iter()
            .map(|name| (name.to_string(), json!({})))
            .collect::<serde_json::Map<_, _>>();
        serde_json::from_value(json!({
            "db": {"host": "localhost", "name": "zenodo", "username": "zenodo"},
            "state": {"path": "/tmp/state.db"},
            "streams": streams
        }))
        .unwrap()
    }

    fn runner() -> Runner {
        Runner::new(vec![marker("first"), marker("second"), observer()])
    }

    #[tokio::test]
    async fn runs_configured_streams_in_registration_order() {
        let mut state = StateStore::with_defaults(true);
        let summaries = runner()
            .run(&config(&["observer", "first", "unknown"]), &mut state, &[])
            .await
            .unwrap();

        let names = summaries.iter().map(|(name, _)| *name).collect::<Vec<_>>();
        assert_eq!(names, vec!["first", "observer"]);
        // The observer was built after `first` ran and its cache was flushed.
        assert_eq!(state.get(StateTable::Global, "seen").unwrap()["value"], 1);
        assert!(!state.contains(StateTable::Global, "second"));
    }

    #[tokio::test]
    async fn only_restricts_the_selection() {
        let mut state = StateStore::new();
        let summaries = runner()
            .run(
                &config(&["first", "second"]),
                &mut state,
                &["second".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(summaries.len(), 1);
        assert!(state.contains(StateTable::Global, "second"));
        assert!(!state.contains(StateTable::Global, "first"));

        let err = runner()
            .run(&config(&["first"]), &mut state, &["third".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[tokio::test]
    async fn a_failing_stream_stops_the_run() {
        let failing = StreamDefinition::new("failing", |_config, _ctx| {
            bail!(ErrorKind::ConfigError, "Missing extract file")
        });
        let runner = Runner::new(vec![marker("first"), failing, marker("second")]);
        let mut state = StateStore::new();

        let err = runner
            .run(&config(&["first", "failing", "second"]), &mut state, &[])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigError);
        assert!(state.contains(StateTable::Global, "first"));
        assert!(!state.contains(StateTable::Global, "second"));
    }
}
