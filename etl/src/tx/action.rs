use std::fmt;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::EtlResult;
use crate::ids;
use crate::load::Session;
use crate::operation::Operation;
use crate::state::StateStore;
use crate::tx::LoadData;
use crate::types::Tx;

/// Classifies a transaction and extracts the data of the matching load action.
pub trait TransformAction: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns whether this action handles `tx`. Must only look at `tx`.
    fn matches(&self, tx: &Tx) -> bool;

    fn transform(&self, tx: &Tx) -> EtlResult<Box<dyn LoadAction>>;
}

/// What a load action may use while preparing its operations.
pub struct ActionContext<'a> {
    pub state: &'a mut StateStore,
    pub session: &'a mut dyn Session,
}

/// Turns the data of a transaction into ordered row operations.
///
/// Each action keeps its data in a typed payload. [`LoadAction::payload`] exposes it as a
/// [`LoadData`] object so that the [`PkRule`]s can address it by path.
///
/// Run through [`prepare`]: actions whose effects are already in the state prepare nothing,
/// otherwise primary keys are generated first, then references are resolved against the state,
/// then rows are generated in foreign key order.
#[async_trait]
pub trait LoadAction: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn payload(&self) -> EtlResult<LoadData>;

    fn set_payload(&mut self, data: LoadData) -> EtlResult<()>;

    /// Primary key rules applied before reference resolution.
    fn pks(&self) -> Vec<PkRule> {
        Vec::new()
    }

    /// Returns whether a previous run of this action already left its entities in the state.
    fn already_applied(&self, _state: &mut StateStore) -> EtlResult<bool> {
        Ok(false)
    }

    async fn resolve_references(&mut self, _ctx: &mut ActionContext<'_>) -> EtlResult<()> {
        Ok(())
    }

    async fn generate_rows(&mut self, ctx: &mut ActionContext<'_>) -> EtlResult<Vec<Operation>>;
}

/// Computes the value of a generated primary key.
#[derive(Clone, Copy)]
pub enum PkGenerator {
    /// A fresh v4 UUID.
    Uuid,
    /// The next integer from the PID allocator.
    PidPk,
    /// A value computed from the action data and the state.
    With(fn(&LoadData, &mut StateStore) -> EtlResult<Value>),
}

impl fmt::Debug for PkGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PkGenerator::Uuid => f.write_str("Uuid"),
            PkGenerator::PidPk => f.write_str("PidPk"),
            PkGenerator::With(_) => f.write_str("With(..)"),
        }
    }
}

/// Fills the dotted `path` of the action data with a generated key.
///
/// The rule fires only when the root segment of `path` is present, so that keys are allocated
/// only for the entities the action carries, and only when the target is absent or null, so
/// that preparing the same data twice yields the same keys.
#[derive(Debug, Clone, Copy)]
pub struct PkRule {
    pub path: &'static str,
    pub generator: PkGenerator,
}

impl PkRule {
    pub const fn uuid(path: &'static str) -> Self {
        Self {
            path,
            generator: PkGenerator::Uuid,
        }
    }

    pub const fn pid_pk(path: &'static str) -> Self {
        Self {
            path,
            generator: PkGenerator::PidPk,
        }
    }

    pub const fn with(
        path: &'static str,
        generator: fn(&LoadData, &mut StateStore) -> EtlResult<Value>,
    ) -> Self {
        Self {
            path,
            generator: PkGenerator::With(generator),
        }
    }

    pub fn apply(&self, data: &mut LoadData, state: &mut StateStore) -> EtlResult<bool> {
        let root = self.path.split('.').next().unwrap_or(self.path);
        if !data.has(root) || data.has(self.path) {
            return Ok(false);
        }

        let value = match self.generator {
            PkGenerator::Uuid => Value::String(ids::uuid()),
            PkGenerator::PidPk => Value::from(ids::pid_pk(state)?),
            PkGenerator::With(generate) => generate(data, state)?,
        };
        data.set(self.path, value)?;

        Ok(true)
    }
}

/// Runs the three preparation steps of `action` and returns its operations.
pub async fn prepare(
    action: &mut dyn LoadAction,
    ctx: &mut ActionContext<'_>,
) -> EtlResult<Vec<Operation>> {
    if action.already_applied(ctx.state)? {
        debug!(action = action.name(), "action already applied, skipping");
        return Ok(Vec::new());
    }

    let rules = action.pks();
    if !rules.is_empty() {
        let mut data = action.payload()?;
        let mut generated = false;
        for rule in rules {
            generated |= rule.apply(&mut data, ctx.state)?;
        }
        if generated {
            action.set_payload(data)?;
        }
    }

    action.resolve_references(ctx).await?;
    action.generate_rows(ctx).await
}

/// Implements [`LoadAction::payload`] and [`LoadAction::set_payload`] over a serde field of
/// the action.
#[macro_export]
macro_rules! typed_payload {
    ($field:ident) => {
        fn payload(&self) -> $crate::error::EtlResult<$crate::tx::LoadData> {
            $crate::tx::LoadData::encode(&self.$field)
        }

        fn set_payload(&mut self, data: $crate::tx::LoadData) -> $crate::error::EtlResult<()> {
            self.$field = data.decode()?;
            Ok(())
        }
    };
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::ids::PID_PK_MIN;
    use crate::test_utils::MemoryDatabase;
    use crate::operation::Operation;
    use crate::state::{GlobalState, StateTable};
    use crate::types::{Row, row_from};

    #[test]
    fn rules_fire_only_for_present_roots_and_missing_targets() {
        let mut state = StateStore::new();
        let mut data = LoadData::from(row_from(json!({
            "parent": {"json": {}},
            "record": {"id": "fixed"}
        })));

        assert!(PkRule::uuid("parent.id").apply(&mut data, &mut state).unwrap());
        assert!(!PkRule::uuid("record.id").apply(&mut data, &mut state).unwrap());
        assert!(!PkRule::uuid("draft.id").apply(&mut data, &mut state).unwrap());
        assert!(PkRule::pid_pk("parent.pid.pk").apply(&mut data, &mut state).unwrap());

        assert_eq!(data.str("record.id"), Some("fixed"));
        assert!(data.str("parent.id").is_some());
        assert_eq!(data.i64("parent.pid.pk"), Some(PID_PK_MIN));
        assert!(!data.has("draft"));

        let first = data.clone();
        for rule in [PkRule::uuid("parent.id"), PkRule::pid_pk("parent.pid.pk")] {
            rule.apply(&mut data, &mut state).unwrap();
        }
        assert_eq!(data, first);
    }

    #[test]
    fn custom_generators_see_the_data() {
        fn from_record(data: &LoadData, _: &mut StateStore) -> EtlResult<Value> {
            Ok(json!(format!("{}-bucket", data.str("record.id").unwrap_or_default())))
        }

        let mut state = StateStore::new();
        let mut data = LoadData::from(row_from(json!({"record": {"id": "r1"}})));
        PkRule::with("record.bucket_id", from_record)
            .apply(&mut data, &mut state)
            .unwrap();

        assert_eq!(data.str("record.bucket_id"), Some("r1-bucket"));
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Entity {
        id: Option<String>,
        pk: Option<i64>,
        #[serde(flatten)]
        columns: Row,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Payload {
        entity: Entity,
        extra: Option<Entity>,
    }

    #[derive(Debug)]
    struct Create {
        data: Payload,
    }

    #[async_trait]
    impl LoadAction for Create {
        fn name(&self) -> &'static str {
            "create"
        }

        typed_payload!(data);

        fn pks(&self) -> Vec<PkRule> {
            vec![
                PkRule::uuid("entity.id"),
                PkRule::pid_pk("entity.pk"),
                PkRule::pid_pk("extra.pk"),
            ]
        }

        fn already_applied(&self, state: &mut StateStore) -> EtlResult<bool> {
            Ok(self
                .data
                .entity
                .id
                .as_deref()
                .is_some_and(|id| state.contains(StateTable::Global, id)))
        }

        async fn generate_rows(
            &mut self,
            ctx: &mut ActionContext<'_>,
        ) -> EtlResult<Vec<Operation>> {
            let Some(id) = self.data.entity.id.clone() else {
                return Ok(Vec::new());
            };
            ctx.state.add_as(&GlobalState {
                key: id,
                value: json!(self.data.entity.pk),
            })?;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn typed_payloads_receive_generated_keys() {
        let mut state = StateStore::new();
        let mut db = MemoryDatabase::new();
        let mut ctx = ActionContext {
            state: &mut state,
            session: &mut db,
        };
        let mut columns = Row::new();
        columns.insert("title".to_string(), json!("a"));
        let mut action = Create {
            data: Payload {
                entity: Entity {
                    columns,
                    ..Entity::default()
                },
                extra: None,
            },
        };

        prepare(&mut action, &mut ctx).await.unwrap();

        assert!(action.data.entity.id.is_some());
        assert_eq!(action.data.entity.pk, Some(PID_PK_MIN));
        assert_eq!(action.data.entity.columns["title"], "a");
        assert!(action.data.extra.is_none());
    }

    #[tokio::test]
    async fn applied_actions_prepare_nothing() {
        let mut state = StateStore::new();
        state
            .add(StateTable::Global, row_from(json!({"key": "e1", "value": 1})))
            .unwrap();
        let mut db = MemoryDatabase::new();
        let mut ctx = ActionContext {
            state: &mut state,
            session: &mut db,
        };
        let mut action = Create {
            data: Payload {
                entity: Entity {
                    id: Some("e1".to_string()),
                    ..Entity::default()
                },
                extra: None,
            },
        };

        let operations = prepare(&mut action, &mut ctx).await.unwrap();

        assert!(operations.is_empty());
        assert_eq!(action.data.entity.pk, None);
        assert!(!ctx.state.contains(StateTable::Global, "max_pid_pk"));
    }
}
