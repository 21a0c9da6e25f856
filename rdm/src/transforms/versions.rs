use etl::error::EtlResult;
use etl::ids::uuid;
use etl::transform::{EntryMapper, Transform};
use etl::types::{Entry, Row, row_from};
use serde_json::{Value, json};

use crate::rows;
use crate::source::normalize_row;

/// Columns of a record or draft dump line kept on the version row.
const VERSION_COLUMNS: [&str; 10] = [
    "id",
    "json",
    "created",
    "updated",
    "version_id",
    "index",
    "bucket_id",
    "expires_at",
    "deletion_status",
    "fork_version_id",
];

/// Turns a record or draft dump line into a version entry.
///
/// A dump line is a version row with its bucket and its files inlined:
///
/// ```json
/// {"id": "...", "json": "{...}", "created": 1577836800000000, "bucket": {...},
///  "files": [{"key": "data.csv", "file_id": "...", "mimetype": "text/csv"}]}
/// ```
///
/// The entry holds the normalized version row under `record` or `draft`, its bucket (a new one
/// when the line has none), one head object version per file and the file records.
pub struct VersionEntry {
    key: &'static str,
    locked: bool,
    mapper: EntryMapper,
}

impl VersionEntry {
    fn new(key: &'static str, locked: bool) -> Self {
        Self {
            key,
            locked,
            mapper: EntryMapper::new().partial(true).copy_all(&VERSION_COLUMNS),
        }
    }

    /// Published records, whose buckets are locked.
    pub fn records() -> Self {
        Self::new("record", true)
    }

    pub fn drafts() -> Self {
        Self::new("draft", false)
    }

    fn bucket(&self, entry: &Entry, created: &str, updated: &str) -> EtlResult<Row> {
        let mut bucket = match entry.get("bucket").and_then(Value::as_object) {
            Some(bucket) => bucket.clone(),
            None => match entry.get("bucket_id").and_then(Value::as_str) {
                Some(bucket_id) => rows::bucket(bucket_id, created, updated, self.locked),
                None => rows::bucket(&uuid(), created, updated, self.locked),
            },
        };
        normalize_row(&mut bucket)?;
        bucket.entry("created").or_insert_with(|| json!(created));
        bucket.entry("updated").or_insert_with(|| json!(updated));
        bucket.insert("locked".to_string(), json!(self.locked));
        Ok(bucket)
    }
}

impl Transform for VersionEntry {
    fn transform(&self, entry: &Entry) -> EtlResult<Entry> {
        let mut version = self.mapper.apply(entry)?;
        normalize_row(&mut version)?;
        let (created, updated) = rows::timestamps(&version)?;

        let bucket = self.bucket(entry, &created, &updated)?;
        let bucket_id = rows::required_str(&bucket, "id")?.to_string();
        version.insert("bucket_id".to_string(), json!(bucket_id));

        let mut object_versions = Vec::new();
        let mut files = Vec::new();
        for file in entry.get("files").and_then(Value::as_array).into_iter().flatten() {
            let Some(file) = file.as_object() else {
                continue;
            };
            let mut file = file.clone();
            normalize_row(&mut file)?;

            let key = rows::required_str(&file, "key")?.to_string();
            let file_id = file.get("file_id").and_then(Value::as_str).map(str::to_string);
            let object_version_id = file
                .get("object_version_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(uuid);
            let file_created = file
                .get("created")
                .and_then(Value::as_str)
                .unwrap_or(created.as_str())
                .to_string();
            let file_updated = file
                .get("updated")
                .and_then(Value::as_str)
                .unwrap_or(file_created.as_str())
                .to_string();

            object_versions.push(Value::Object(rows::object_version(
                &object_version_id,
                &bucket_id,
                &key,
                file_id.as_deref(),
                file.get("mimetype").and_then(Value::as_str),
                &file_created,
            )));
            files.push(json!({
                "key": key,
                "file_id": file_id,
                "object_version_id": object_version_id,
                "json": file.get("json").cloned().unwrap_or_else(|| json!({})),
                "created": file_created,
                "updated": file_updated,
            }));
        }

        Ok(row_from(json!({
            self.key: version,
            "bucket": bucket,
            "object_versions": object_versions,
            "files": files,
        })))
    }
}

#[cfg(test)]
mod tests {
    use etl::error::ErrorKind;

    use super::*;

    fn dump_line() -> Entry {
        row_from(json!({
            "id": "r1",
            "json": "{\"id\": \"101\", \"conceptrecid\": \"100\"}",
            "created": 1_577_836_800_000_000_i64,
            "updated": 1_577_923_200_000_000_i64,
            "version_id": 2,
            "bucket": {"id": "b1", "created": 1_577_836_800_000_000_i64, "size": 5},
            "files": [
                {"key": "data.csv", "file_id": "f1", "object_version_id": "ov1", "mimetype": "text/csv"},
                {"key": "readme.md", "file_id": "f2"}
            ],
            "legacy": true
        }))
    }

    #[test]
    fn records_are_normalized_with_their_files() {
        let entry = VersionEntry::records().transform(&dump_line()).unwrap();

        let record = entry["record"].as_object().unwrap();
        assert_eq!(record["json"]["conceptrecid"], "100");
        assert_eq!(record["created"], "2020-01-01T00:00:00");
        assert_eq!(record["bucket_id"], "b1");
        assert!(!record.contains_key("legacy"));

        assert_eq!(entry["bucket"]["locked"], true);
        assert_eq!(entry["bucket"]["created"], "2020-01-01T00:00:00");
        assert_eq!(entry["bucket"]["size"], 5);

        let object_versions = entry["object_versions"].as_array().unwrap();
        assert_eq!(object_versions.len(), 2);
        assert_eq!(object_versions[0]["version_id"], "ov1");
        assert_eq!(object_versions[0]["_mimetype"], "text/csv");
        assert_eq!(object_versions[1]["bucket_id"], "b1");
        assert_eq!(entry["files"][1]["object_version_id"], object_versions[1]["version_id"]);
        assert_eq!(entry["files"][1]["created"], "2020-01-01T00:00:00");
    }

    #[test]
    fn drafts_get_an_open_bucket() {
        let mut line = dump_line();
        line.remove("bucket");
        line.remove("files");

        let entry = VersionEntry::drafts().transform(&line).unwrap();

        assert!(entry.contains_key("draft"));
        assert_eq!(entry["bucket"]["locked"], false);
        assert_eq!(entry["draft"]["bucket_id"], entry["bucket"]["id"]);
        assert!(entry["files"].as_array().unwrap().is_empty());
    }

    #[test]
    fn versions_need_a_creation_time() {
        let mut line = dump_line();
        line.remove("created");

        let err = VersionEntry::records().transform(&line).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
    }
}
