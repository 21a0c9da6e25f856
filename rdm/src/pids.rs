//! Persistent identifiers: allocation, tracking in the `pids` state and their `pidstore_pid`
//! rows.

use etl::error::EtlResult;
use etl::ids::{self, Pid, PidStatus};
use etl::operation::Operation;
use etl::state::{PidState, StateStore};
use etl::types::{Row, row_from};
use serde_json::{Value, json};

use crate::models::PIDSTORE_PID;

pub const RECID: &str = "recid";
pub const DOI: &str = "doi";
pub const OAI: &str = "oai";

/// Object type of record and parent PIDs.
pub const RECORD_OBJECT: &str = "rec";

const DOI_PREFIX: &str = "10.5281/zenodo";
const OAI_PREFIX: &str = "oai:zenodo.org";

pub fn default_doi(recid: &str) -> String {
    format!("{DOI_PREFIX}.{recid}")
}

pub fn oai_identifier(recid: &str) -> String {
    format!("{OAI_PREFIX}:{recid}")
}

fn provider(pid_type: &str) -> Value {
    match pid_type {
        DOI => json!("datacite"),
        OAI => json!("oai"),
        _ => Value::Null,
    }
}

/// Builds the `pidstore_pid` row of a freshly allocated PID.
pub fn pid_row(pid: &Pid, value: &str, object_uuid: Option<&str>, created: &str) -> Row {
    row_from(json!({
        "id": pid.pk,
        "pid_type": pid.pid_type,
        "pid_value": value,
        "pid_provider": provider(&pid.pid_type),
        "status": pid.status.as_str(),
        "object_type": pid.obj_type,
        "object_uuid": object_uuid,
        "created": created,
        "updated": created,
    }))
}

/// Allocates a PID and returns the insert of its row, without tracking it.
pub fn mint(
    state: &mut StateStore,
    pid_type: &str,
    value: &str,
    status: PidStatus,
    object_uuid: Option<&str>,
    created: &str,
) -> EtlResult<(Pid, Operation)> {
    let pid = ids::pid(state, pid_type, status, RECORD_OBJECT)?;
    let row = pid_row(&pid, value, object_uuid, created);
    Ok((pid, Operation::insert(&PIDSTORE_PID, row)))
}

/// Allocates a PID, tracks it in the `pids` state and returns the insert of its row.
pub fn mint_tracked(
    state: &mut StateStore,
    pid_type: &str,
    value: &str,
    status: PidStatus,
    object_uuid: Option<&str>,
    created: &str,
) -> EtlResult<(Pid, Operation)> {
    let (pid, operation) = mint(state, pid_type, value, status, object_uuid, created)?;
    state.add_as(&PidState {
        pid_value: value.to_string(),
        id: pid.pk,
        pid_type: pid.pid_type.clone(),
        status: status.as_str().to_string(),
        created: created.to_string(),
        obj_type: pid.obj_type.clone(),
        obj_uuid: object_uuid.map(str::to_string),
    })?;
    Ok((pid, operation))
}

/// Moves a tracked PID to `status` and returns the update of its row.
pub fn set_status(
    state: &mut StateStore,
    tracked: &PidState,
    status: PidStatus,
    object_uuid: Option<&str>,
    updated: &str,
) -> EtlResult<Operation> {
    let obj_uuid = object_uuid
        .map(str::to_string)
        .or_else(|| tracked.obj_uuid.clone());
    state.put_as(&PidState {
        status: status.as_str().to_string(),
        obj_uuid: obj_uuid.clone(),
        ..tracked.clone()
    })?;

    Ok(Operation::update(
        &PIDSTORE_PID,
        row_from(json!({
            "id": tracked.id,
            "status": status.as_str(),
            "object_uuid": obj_uuid,
            "updated": updated,
        })),
    ))
}

/// Returns the `{pk, obj_type, pid_type, status}` descriptor of a tracked PID.
pub fn descriptor(state: &StateStore, value: &str) -> EtlResult<Option<Value>> {
    Ok(state.get_as::<PidState>(value)?.map(|pid| {
        json!({
            "pk": pid.id,
            "obj_type": pid.obj_type,
            "pid_type": pid.pid_type,
            "status": pid.status,
        })
    }))
}

/// Returns the `pids` section of a record document.
pub fn external_pids(doi: &str, recid: &str) -> Value {
    json!({
        "doi": {"identifier": doi, "provider": "datacite", "client": "datacite"},
        "oai": {"identifier": oai_identifier(recid), "provider": "oai"},
    })
}
