//! Identifier allocation shared by every stream of a run.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, EtlResult};
use crate::state::{StateStore, StateTable};
use crate::types::row_from;

/// Smallest integer PK handed out, keeping clear of legacy identifiers.
pub const PID_PK_MIN: i64 = 1_000_000;

/// Largest integer PK handed out, the upper bound of a signed 32-bit column minus one.
pub const PID_PK_MAX: i64 = 2_147_483_646;

/// Key of the PID high-water mark in the `global` state table.
pub const MAX_PID_PK_KEY: &str = "max_pid_pk";

/// Returns a fresh random (v4) UUID in hyphenated form.
pub fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Allocates the next integer PK.
///
/// The high-water mark is kept in `global.max_pid_pk`, so allocation resumes above the last
/// value handed out by a previous run once its state is loaded.
pub fn pid_pk(state: &mut StateStore) -> EtlResult<i64> {
    let current = state
        .get(StateTable::Global, MAX_PID_PK_KEY)
        .and_then(|row| row.get("value"))
        .and_then(Value::as_i64);

    let next = match current {
        Some(current) => current.checked_add(1).map(|next| next.max(PID_PK_MIN)),
        None => Some(PID_PK_MIN),
    };
    let Some(next) = next.filter(|next| *next <= PID_PK_MAX) else {
        bail!(
            ErrorKind::IdSpaceExhausted,
            "PID primary key space exhausted",
            format!("high-water mark is {}", current.unwrap_or_default())
        );
    };

    state.upsert(
        StateTable::Global,
        row_from(json!({"key": MAX_PID_PK_KEY, "value": next})),
    )?;
    debug!(pk = next, "allocated pid pk");

    Ok(next)
}

/// Lifecycle status of a persistent identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PidStatus {
    #[serde(rename = "R")]
    Registered,
    #[serde(rename = "K")]
    Reserved,
    #[serde(rename = "N")]
    New,
    #[serde(rename = "D")]
    Deleted,
}

impl PidStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PidStatus::Registered => "R",
            PidStatus::Reserved => "K",
            PidStatus::New => "N",
            PidStatus::Deleted => "D",
        }
    }
}

impl fmt::Display for PidStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persistent identifier descriptor with a freshly allocated `pk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pid {
    pub pk: i64,
    pub obj_type: String,
    pub pid_type: String,
    pub status: PidStatus,
}

impl Pid {
    /// Allocates a `recid` PID registered for a record.
    pub fn recid(state: &mut StateStore) -> EtlResult<Self> {
        pid(state, "recid", PidStatus::Registered, "rec")
    }

    /// Serializes the descriptor as the `{pk, obj_type, pid_type, status}` object stored in
    /// record JSON.
    pub fn to_value(&self) -> Value {
        json!({
            "pk": self.pk,
            "obj_type": self.obj_type,
            "pid_type": self.pid_type,
            "status": self.status.as_str(),
        })
    }
}

/// Allocates a PID descriptor.
pub fn pid(
    state: &mut StateStore,
    pid_type: &str,
    status: PidStatus,
    obj_type: &str,
) -> EtlResult<Pid> {
    Ok(Pid {
        pk: pid_pk(state)?,
        obj_type: obj_type.to_string(),
        pid_type: pid_type.to_string(),
        status,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn pid_pks_are_distinct_and_tracked() {
        let mut state = StateStore::with_defaults(true);
        let pks = (0..50)
            .map(|_| pid_pk(&mut state).unwrap())
            .collect::<Vec<_>>();

        assert_eq!(pks[0], PID_PK_MIN);
        assert_eq!(pks.iter().collect::<HashSet<_>>().len(), 50);
        assert!(pks.iter().all(|pk| (PID_PK_MIN..=PID_PK_MAX).contains(pk)));
        assert_eq!(
            state.get(StateTable::Global, MAX_PID_PK_KEY).unwrap()["value"],
            json!(pks.iter().max().unwrap())
        );
    }

    #[test]
    fn allocation_resumes_above_stored_value() {
        let mut state = StateStore::with_defaults(false);
        state
            .add(
                StateTable::Global,
                row_from(json!({"key": MAX_PID_PK_KEY, "value": 1_000_041})),
            )
            .unwrap();

        assert_eq!(pid_pk(&mut state).unwrap(), 1_000_042);
    }

    #[test]
    fn never_exceeds_upper_bound() {
        let mut state = StateStore::new();
        state
            .add(
                StateTable::Global,
                row_from(json!({"key": MAX_PID_PK_KEY, "value": PID_PK_MAX - 1})),
            )
            .unwrap();

        assert_eq!(pid_pk(&mut state).unwrap(), PID_PK_MAX);
        let err = pid_pk(&mut state).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdSpaceExhausted);
        assert_eq!(
            state.get(StateTable::Global, MAX_PID_PK_KEY).unwrap()["value"],
            json!(PID_PK_MAX)
        );
    }

    #[test]
    fn saturated_high_water_mark_is_exhausted() {
        let mut state = StateStore::new();
        state
            .add(
                StateTable::Global,
                row_from(json!({"key": MAX_PID_PK_KEY, "value": i64::MAX})),
            )
            .unwrap();

        let err = pid_pk(&mut state).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IdSpaceExhausted);
    }

    #[test]
    fn pid_descriptor() {
        let mut state = StateStore::new();
        let pid = pid(&mut state, "doi", PidStatus::Registered, "rec").unwrap();

        assert_eq!(pid.pk, PID_PK_MIN);
        assert_eq!(
            pid.to_value(),
            json!({"pk": PID_PK_MIN, "obj_type": "rec", "pid_type": "doi", "status": "R"})
        );
        assert!(uuid::Uuid::parse_str(&uuid()).is_ok());
    }
}
