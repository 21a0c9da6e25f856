use etl::error::EtlResult;
use etl::load::bulk::{TableGenerator, TableRow};
use etl::state::{ParentState, StateStore};
use etl::types::Entry;
use postgres::schema::TableModel;
use tracing::warn;

use crate::generators::{object, objects, required_object, table_rows};
use crate::models::{
    FILES_BUCKET, FILES_FILES, FILES_OBJECT, PIDSTORE_PID, RDM_PARENTS_COMMUNITY,
    RDM_PARENTS_METADATA, RDM_RECORDS_FILES, RDM_RECORDS_METADATA, RDM_VERSIONS_STATE,
};
use crate::publish::{self, RecordVersion};
use crate::rows;

/// Published records with their parents, PIDs, buckets and files.
///
/// Versions state rows are written once every record has been seen, so that each parent
/// points at its latest version.
#[derive(Debug, Default)]
pub struct RecordsGenerator {
    /// Concept recids of the parents created by this generator, in creation order.
    parents: Vec<String>,
}

impl RecordsGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Reads a record version out of a transformed records entry.
pub(crate) fn record_version(entry: &Entry) -> EtlResult<RecordVersion> {
    Ok(RecordVersion {
        record: required_object(entry, "record")?,
        bucket: object(entry, "bucket"),
        file_instances: objects(entry, "file_instances"),
        object_versions: objects(entry, "object_versions"),
        files: objects(entry, "files"),
    })
}

impl TableGenerator for RecordsGenerator {
    fn name(&self) -> &'static str {
        "records"
    }

    fn tables(&self) -> Vec<&'static TableModel> {
        vec![
            &FILES_BUCKET,
            &FILES_FILES,
            &FILES_OBJECT,
            &RDM_PARENTS_METADATA,
            &PIDSTORE_PID,
            &RDM_RECORDS_METADATA,
            &RDM_RECORDS_FILES,
            &RDM_PARENTS_COMMUNITY,
            &RDM_VERSIONS_STATE,
        ]
    }

    fn generate(&mut self, entry: &Entry, state: &mut StateStore) -> EtlResult<Vec<TableRow>> {
        let version = record_version(entry)?;
        let conceptrecid = rows::key(&version.record, "json.conceptrecid")?;

        let publication = publish::publish(state, version)?;
        if publication.new_parent {
            self.parents.push(conceptrecid);
        }

        Ok(table_rows(self.name(), publication.operations))
    }

    fn finish(&mut self, state: &mut StateStore) -> EtlResult<Vec<TableRow>> {
        let mut versions = Vec::with_capacity(self.parents.len());
        for recid in self.parents.drain(..) {
            let Some(parent) = state.get_as::<ParentState>(&recid)? else {
                warn!(recid = %recid, "parent left the state before its versions were written");
                continue;
            };
            versions.push(TableRow::new(
                &RDM_VERSIONS_STATE,
                rows::versions_state(
                    &parent.id,
                    parent.latest_id.as_deref(),
                    parent.latest_index,
                    parent.next_draft_id.as_deref(),
                ),
            ));
        }

        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use etl::error::ErrorKind;
    use etl::state::RecordState;
    use etl::types::row_from;
    use serde_json::json;

    use super::*;

    fn entry(id: &str, recid: &str, created: &str) -> Entry {
        row_from(json!({
            "record": {
                "id": id,
                "json": {"id": recid, "conceptrecid": "100", "metadata": {"title": "A"}},
                "created": created,
                "updated": created,
                "bucket_id": format!("b-{id}"),
            },
            "bucket": {"id": format!("b-{id}"), "created": created, "updated": created, "locked": true},
            "object_versions": [{
                "version_id": format!("ov-{id}"),
                "key": "data.csv",
                "bucket_id": format!("b-{id}"),
                "file_id": "f1",
                "created": created,
                "updated": created,
                "is_head": true,
            }],
            "files": [{"key": "data.csv"}],
        }))
    }

    #[test]
    fn versions_are_written_after_the_last_record() {
        let mut state = StateStore::with_defaults(true);
        let mut generator = RecordsGenerator::new();

        let first = generator
            .generate(&entry("r1", "101", "2020-01-01T00:00:00"), &mut state)
            .unwrap();
        let second = generator
            .generate(&entry("r2", "102", "2020-02-01T00:00:00"), &mut state)
            .unwrap();

        let tables = |rows: &[TableRow]| rows.iter().map(|row| row.model.name).collect::<Vec<_>>();
        assert_eq!(
            tables(&first),
            vec![
                "files_bucket",
                "files_object",
                "rdm_parents_metadata",
                "pidstore_pid",
                "pidstore_pid",
                "pidstore_pid",
                "pidstore_pid",
                "rdm_records_metadata",
                "rdm_records_files",
            ]
        );
        // The parent and its recid exist already for the second version.
        assert!(!tables(&second).contains(&"rdm_parents_metadata"));
        assert_eq!(second.iter().find(|row| row.model.name == "rdm_records_metadata").unwrap().data["index"], 2);

        let versions = generator.finish(&mut state).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].data["latest_id"], "r2");
        assert_eq!(versions[0].data["latest_index"], 2);
        assert!(generator.finish(&mut state).unwrap().is_empty());

        let file = second.iter().find(|row| row.model.name == "rdm_records_files").unwrap();
        assert_eq!(file.data["object_version_id"], "ov-r2");
        assert_eq!(state.get_as::<RecordState>("102").unwrap().unwrap().index, 2);
    }

    #[test]
    fn entries_without_a_record_are_rejected() {
        let mut state = StateStore::with_defaults(true);
        let err = RecordsGenerator::new()
            .generate(&row_from(json!({"files": []})), &mut state)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
    }
}
