use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::info;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;
use crate::extract::Extract;

/// Yields one JSON value per line of a UTF-8 file.
///
/// Lines are read and parsed one at a time. Blank lines are skipped; a line that does not
/// parse ends the stream with an [`ErrorKind::ExtractError`].
#[derive(Debug)]
pub struct JsonLinesExtract<T> {
    path: PathBuf,
    _item: PhantomData<fn() -> T>,
}

impl<T> JsonLinesExtract<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _item: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

struct Cursor {
    lines: Lines<BufReader<File>>,
    line_number: usize,
    path: PathBuf,
}

async fn next_item<T: DeserializeOwned>(mut cursor: Cursor) -> EtlResult<Option<(T, Cursor)>> {
    loop {
        let line = cursor.lines.next_line().await.map_err(|err| {
            etl_error!(
                ErrorKind::ExtractError,
                "Extract file could not be read",
                cursor.path.display(),
                source: err
            )
        })?;
        let Some(line) = line else {
            return Ok(None);
        };
        cursor.line_number += 1;

        if line.trim().is_empty() {
            continue;
        }

        let item = serde_json::from_str(&line).map_err(|err| {
            etl_error!(
                ErrorKind::ExtractError,
                "Extract line is not valid JSON",
                format!("{}:{}", cursor.path.display(), cursor.line_number),
                source: err
            )
        })?;

        return Ok(Some((item, cursor)));
    }
}

impl<T> Extract for JsonLinesExtract<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Item = T;

    async fn run(self) -> EtlResult<BoxStream<'static, EtlResult<T>>> {
        let file = File::open(&self.path).await.map_err(|err| {
            etl_error!(
                ErrorKind::ExtractError,
                "Extract file could not be opened",
                self.path.display(),
                source: err
            )
        })?;
        info!(path = %self.path.display(), "extracting json lines");

        let cursor = Cursor {
            lines: BufReader::new(file).lines(),
            line_number: 0,
            path: self.path,
        };

        Ok(stream::try_unfold(cursor, next_item::<T>).boxed())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use serde_json::json;

    use super::*;
    use crate::test_utils::temp_dir;
    use crate::types::Entry;

    #[tokio::test]
    async fn yields_one_entry_per_line() {
        let dir = temp_dir("jsonl");
        let path = dir.join("records.jsonl");
        std::fs::write(&path, "{\"id\": 1}\n\n{\"id\": 2, \"json\": {\"title\": \"a\"}}\n").unwrap();

        let entries: Vec<Entry> = JsonLinesExtract::new(&path)
            .run()
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["json"], json!({"title": "a"}));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn missing_file_fails_eagerly() {
        let result = JsonLinesExtract::<Entry>::new("/nonexistent/records.jsonl")
            .run()
            .await;

        assert_eq!(result.err().unwrap().kind(), ErrorKind::ExtractError);
    }

    #[tokio::test]
    async fn malformed_line_terminates_the_stream() {
        let dir = temp_dir("jsonl-bad");
        let path = dir.join("records.jsonl");
        std::fs::write(&path, "{\"id\": 1}\n{not json\n{\"id\": 3}\n").unwrap();

        let items: Vec<EtlResult<Entry>> = JsonLinesExtract::new(&path)
            .run()
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractError);
        assert!(err.detail().unwrap().ends_with("records.jsonl:2"));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
