use etl::error::EtlResult;
use etl::transform::{EntryMapper, Transform, field};
use etl::types::{Entry, row_from};
use serde_json::{Value, json};

use crate::source::normalize_row;

/// Turns a community dump line into a `{community, logo}` entry.
///
/// The owner is read from `owner_id`, or from `id_user` in older dumps. The logo, when the
/// line carries one, is the file instance holding the image.
pub struct CommunityEntry {
    mapper: EntryMapper,
}

impl CommunityEntry {
    pub fn new() -> Self {
        let mapper = EntryMapper::new()
            .partial(true)
            .copy_all(&["id", "slug", "json", "created", "updated", "version_id", "bucket_id"])
            .map("owner_id", |entry| {
                field(entry, "owner_id")
                    .or_else(|_| field(entry, "id_user"))
                    .cloned()
            });
        Self { mapper }
    }
}

impl Default for CommunityEntry {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for CommunityEntry {
    fn transform(&self, entry: &Entry) -> EtlResult<Entry> {
        let mut community = self.mapper.apply(entry)?;
        normalize_row(&mut community)?;

        let logo = match entry.get("logo").and_then(Value::as_object) {
            Some(logo) => {
                let mut logo = logo.clone();
                normalize_row(&mut logo)?;
                if let Some(created) = community.get("created").cloned() {
                    logo.entry("created").or_insert(created);
                }
                let created = logo.get("created").cloned().unwrap_or(Value::Null);
                logo.entry("updated").or_insert(created);
                Value::Object(logo)
            }
            None => Value::Null,
        };

        Ok(row_from(json!({"community": community, "logo": logo})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owners_and_logos_are_carried() {
        let line = row_from(json!({
            "id": "c1",
            "slug": "astro",
            "json": "{\"metadata\": {\"title\": \"Astronomy\"}}",
            "created": 1_577_836_800_000_000_i64,
            "id_user": 7,
            "logo": {"id": "f1", "uri": "root://eos/logo", "size": 3}
        }));

        let entry = CommunityEntry::new().transform(&line).unwrap();

        assert_eq!(entry["community"]["owner_id"], 7);
        assert_eq!(entry["community"]["json"]["metadata"]["title"], "Astronomy");
        assert_eq!(entry["logo"]["created"], "2020-01-01T00:00:00");
        assert_eq!(entry["logo"]["updated"], "2020-01-01T00:00:00");
    }

    #[test]
    fn communities_without_logo() {
        let line = row_from(json!({"id": "c1", "slug": "astro", "owner_id": 3, "created": "2020-01-01T00:00:00"}));

        let entry = CommunityEntry::new().transform(&line).unwrap();

        assert_eq!(entry["community"]["owner_id"], 3);
        assert!(entry["logo"].is_null());
    }
}
