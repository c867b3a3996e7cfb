//! CSV persistence for records and embedded documents.
//!
//! Input files carry a header row. Output files start with a UTF-8 byte
//! order mark so spreadsheet tools detect the encoding of Korean text.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Writer};
use serde::Deserialize;
use tracing::{info, warn};

use crate::document::{Document, Record};
use crate::error::{RagError, Result};

const UTF8_BOM: &str = "\u{feff}";

const ID: &str = "id";
const CONTENT: &str = "content";
const COMMENTS: &str = "comments";
const N_TOKENS: &str = "n_tokens";
const CONTENT_VECTOR: &str = "content_vector";

const RAW_POST_COLUMNS: [&str; 3] = ["talkNo", "Title", "Contents"];

/// A raw scraped post, as written by the forum crawler.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPost {
    /// Post number on the forum.
    #[serde(rename = "talkNo")]
    pub talk_no: String,
    /// Post title.
    #[serde(rename = "Title")]
    pub title: String,
    /// Post body.
    #[serde(rename = "Contents")]
    pub contents: String,
    /// Comment texts as scraped (a list literal).
    #[serde(rename = "Comments", default)]
    pub comments: String,
    /// View count as displayed.
    #[serde(rename = "ViewCount", default)]
    pub view_count: String,
    /// Post date as displayed.
    #[serde(rename = "Date", default)]
    pub date: String,
}

/// Read raw posts, skipping rows without a post number, title or body.
///
/// # Errors
///
/// Returns [`RagError::RecordError`] if the file cannot be read or lacks a
/// required column.
pub fn read_raw_posts(path: impl AsRef<Path>) -> Result<Vec<RawPost>> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());
    let headers = reader.headers()?.clone();
    for name in RAW_POST_COLUMNS {
        if !headers.iter().any(|h| h.trim() == name) {
            return Err(RagError::RecordError(format!("missing required column '{name}'")));
        }
    }

    let mut posts = Vec::new();
    for (row, result) in reader.deserialize::<RawPost>().enumerate() {
        let post = match result {
            Ok(post) => post,
            Err(e) => {
                warn!(row = row + 1, error = %e, "skipping malformed raw post row");
                continue;
            }
        };
        if post.talk_no.trim().is_empty()
            || post.title.trim().is_empty()
            || post.contents.trim().is_empty()
        {
            warn!(
                row = row + 1,
                talk_no = %post.talk_no,
                "skipping raw post with empty required field"
            );
            continue;
        }
        posts.push(post);
    }

    info!(path = %path.display(), count = posts.len(), "read raw posts");
    Ok(posts)
}

/// Read records from a CSV with `id` and `content` columns.
///
/// `comments` is optional; every other column becomes record metadata. Rows
/// with an empty `id` or `content` are skipped with a warning.
///
/// # Errors
///
/// Returns [`RagError::RecordError`] if the file cannot be read or lacks the
/// `id` or `content` column.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<Record>> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());
    let columns = Columns::new(reader.headers()?.clone(), &[ID, CONTENT, COMMENTS])?;

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let row_data = result?;
        let id = columns.get(&row_data, ID);
        let content = columns.get(&row_data, CONTENT);
        if id.trim().is_empty() || content.trim().is_empty() {
            warn!(row = row + 1, "skipping record with empty id or content");
            continue;
        }
        records.push(Record {
            id: id.to_string(),
            content: content.to_string(),
            comments: columns.get(&row_data, COMMENTS).to_string(),
            metadata: columns.metadata(&row_data),
        });
    }

    info!(path = %path.display(), count = records.len(), "read records");
    Ok(records)
}

/// Write records as `id, content, comments` followed by the sorted union of
/// their metadata keys.
///
/// # Errors
///
/// Returns [`RagError::RecordError`] if the file cannot be written.
pub fn write_records(path: impl AsRef<Path>, records: &[Record]) -> Result<()> {
    let path = path.as_ref();
    let keys = metadata_keys(records.iter().map(|r| &r.metadata));
    let mut writer = create_writer(path)?;

    let mut header = vec![ID, CONTENT, COMMENTS];
    header.extend(keys.iter().map(String::as_str));
    writer.write_record(&header)?;

    for record in records {
        let mut row = vec![record.id.as_str(), record.content.as_str(), record.comments.as_str()];
        row.extend(keys.iter().map(|k| record.metadata.get(k).map_or("", String::as_str)));
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!(path = %path.display(), count = records.len(), "wrote records");
    Ok(())
}

/// Write embedded documents, including their vectors, so that an index can
/// be reloaded without re-embedding.
///
/// Columns: `id, content, comments, n_tokens, content_vector` (a JSON array),
/// then the sorted union of metadata keys.
///
/// # Errors
///
/// Returns [`RagError::RecordError`] if the file cannot be written.
pub fn write_documents(path: impl AsRef<Path>, documents: &[Document]) -> Result<()> {
    let path = path.as_ref();
    let keys = metadata_keys(documents.iter().map(|d| &d.metadata));
    let mut writer = create_writer(path)?;

    let mut header = vec![ID, CONTENT, COMMENTS, N_TOKENS, CONTENT_VECTOR];
    header.extend(keys.iter().map(String::as_str));
    writer.write_record(&header)?;

    for document in documents {
        let vector = serde_json::to_string(document.embedding())
            .map_err(|e| RagError::RecordError(format!("failed to encode embedding: {e}")))?;
        let token_count = document.token_count.to_string();
        let mut row = vec![
            document.id.as_str(),
            document.content.as_str(),
            document.comments.as_str(),
            token_count.as_str(),
            vector.as_str(),
        ];
        row.extend(keys.iter().map(|k| document.metadata.get(k).map_or("", String::as_str)));
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!(path = %path.display(), count = documents.len(), "wrote documents");
    Ok(())
}

/// Read documents written by [`write_documents`].
///
/// Rows with an empty `id`/`content` or an unreadable token count or vector
/// are skipped with a warning. Load the result with
/// [`SimilarityIndex::from_documents`](crate::SimilarityIndex::from_documents)
/// to revalidate dimensions and ids.
///
/// # Errors
///
/// Returns [`RagError::RecordError`] if the file cannot be read or lacks a
/// required column.
pub fn read_documents(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let text = read_text(path)?;
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());
    let columns = Columns::new(
        reader.headers()?.clone(),
        &[ID, CONTENT, COMMENTS, N_TOKENS, CONTENT_VECTOR],
    )?;
    columns.require(N_TOKENS)?;
    columns.require(CONTENT_VECTOR)?;

    let mut documents = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let row_data = result?;
        let id = columns.get(&row_data, ID);
        let content = columns.get(&row_data, CONTENT);
        if id.trim().is_empty() || content.trim().is_empty() {
            warn!(row = row + 1, "skipping document with empty id or content");
            continue;
        }
        let Ok(token_count) = columns.get(&row_data, N_TOKENS).trim().parse::<usize>() else {
            warn!(row = row + 1, document.id = %id, "skipping document with invalid n_tokens");
            continue;
        };
        let embedding: Vec<f32> = match serde_json::from_str(columns.get(&row_data, CONTENT_VECTOR))
        {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(
                    row = row + 1,
                    document.id = %id,
                    error = %e,
                    "skipping document with invalid content_vector"
                );
                continue;
            }
        };
        documents.push(
            Document::new(id, content, columns.get(&row_data, COMMENTS), token_count, embedding)
                .with_metadata(columns.metadata(&row_data)),
        );
    }

    info!(path = %path.display(), count = documents.len(), "read documents");
    Ok(documents)
}

/// Create a CSV writer whose file starts with a UTF-8 byte order mark.
fn create_writer(path: &Path) -> Result<Writer<File>> {
    let mut file = File::create(path)
        .map_err(|e| RagError::RecordError(format!("failed to create {}: {e}", path.display())))?;
    file.write_all(UTF8_BOM.as_bytes())?;
    Ok(Writer::from_writer(file))
}

fn read_text(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RagError::RecordError(format!("failed to read {}: {e}", path.display())))?;
    Ok(match text.strip_prefix(UTF8_BOM) {
        Some(rest) => rest.to_string(),
        None => text,
    })
}

fn metadata_keys<'a>(maps: impl Iterator<Item = &'a BTreeMap<String, String>>) -> Vec<String> {
    let keys: BTreeSet<&String> = maps.flat_map(|m| m.keys()).collect();
    keys.into_iter().cloned().collect()
}

/// Header positions: named core columns plus everything else as metadata.
struct Columns {
    headers: StringRecord,
    reserved: Vec<&'static str>,
}

impl Columns {
    fn new(headers: StringRecord, reserved: &[&'static str]) -> Result<Self> {
        let columns = Self { headers, reserved: reserved.to_vec() };
        columns.require(ID)?;
        columns.require(CONTENT)?;
        Ok(columns)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    fn require(&self, name: &str) -> Result<()> {
        self.position(name)
            .map(|_| ())
            .ok_or_else(|| RagError::RecordError(format!("missing required column '{name}'")))
    }

    fn get<'r>(&self, row: &'r StringRecord, name: &str) -> &'r str {
        self.position(name).and_then(|i| row.get(i)).unwrap_or("")
    }

    fn metadata(&self, row: &StringRecord) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .zip(row.iter())
            .filter(|(header, _)| !self.reserved.contains(&header.trim()))
            .map(|(header, value)| (header.trim().to_string(), value.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::index::SimilarityIndex;

    #[test]
    fn reads_records_with_bom_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("categorized.csv");
        fs::write(
            &path,
            "\u{feff}id,content,comments,keywords,primary_category\n\
             1,부스 판매 경험담,재미있어요,부스; 판매,경험 공유\n\
             2,,빈 내용,,\n\
             3,소득세 공제 질문,,세금,세금\n",
        )
        .unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "1");
        assert_eq!(records[0].comments, "재미있어요");
        assert_eq!(records[0].metadata["keywords"], "부스; 판매");
        assert_eq!(records[0].metadata["primary_category"], "경험 공유");
        assert_eq!(records[1].id, "3");
        assert_eq!(records[1].comments, "");
    }

    #[test]
    fn missing_content_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "id,text\n1,hello\n").unwrap();
        assert!(matches!(
            read_records(&path),
            Err(RagError::RecordError(msg)) if msg.contains("content")
        ));
    }

    #[test]
    fn written_records_keep_metadata_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refined.csv");
        let records = vec![
            Record::new("10", "알바 연락 문제", "기다려 보세요").with_metadata("views", "42"),
            Record::new("11", "소득세 공제 질문", "").with_metadata("tendency", "질문성"),
        ];
        write_records(&path, &records).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with(UTF8_BOM));
        assert!(raw.contains("id,content,comments,tendency,views"));

        let back = read_records(&path).unwrap();
        assert_eq!(back[0].metadata["views"], "42");
        assert_eq!(back[0].metadata["tendency"], "");
        assert_eq!(back[1].metadata["tendency"], "질문성");
    }

    #[test]
    fn documents_reload_with_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedded.csv");
        let mut metadata = BTreeMap::new();
        metadata.insert("keywords".to_string(), "알바; 연락".to_string());
        let documents = vec![
            Document::new("2", "알바 연락 문제", "기다려 보세요", 7, vec![0.25, -0.5, 1.0])
                .with_metadata(metadata),
        ];
        write_documents(&path, &documents).unwrap();

        let back = read_documents(&path).unwrap();
        assert_eq!(back, documents);
    }

    #[test]
    fn corrupt_vectors_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedded.csv");
        fs::write(
            &path,
            "id,content,comments,n_tokens,content_vector\n\
             1,a,,1,\"[1.0, 0.0]\"\n\
             2,b,,1,not-a-vector\n\
             3,c,,x,\"[0.0, 1.0]\"\n",
        )
        .unwrap();
        let back = read_documents(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].embedding(), &[1.0, 0.0]);
    }

    #[test]
    fn raw_posts_skip_rows_without_title() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.csv");
        fs::write(
            &path,
            "\u{feff}talkNo,Title,Contents,Date,ViewCount,Comments\n\
             100,첫 알바,부스 판매를 했어요,2024.01.02,15,\"['좋아요']\"\n\
             101,,내용만 있음,2024.01.03,3,[]\n",
        )
        .unwrap();

        let posts = read_raw_posts(&path).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].talk_no, "100");
        assert_eq!(posts[0].comments, "['좋아요']");
        assert_eq!(posts[0].view_count, "15");
    }

    #[test]
    fn raw_posts_without_contents_column_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crawl.csv");
        fs::write(
            &path,
            "talkNo,Title,Date\n\
             100,첫 알바,2024.01.02\n",
        )
        .unwrap();
        assert!(matches!(
            read_raw_posts(&path),
            Err(RagError::RecordError(msg)) if msg.contains("Contents")
        ));
    }

    #[test]
    fn reloaded_documents_over_the_token_limit_are_rejected_by_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embedded.csv");
        fs::write(
            &path,
            "id,content,comments,n_tokens,content_vector\n\
             1,a,,9000,\"[1.0, 0.0]\"\n",
        )
        .unwrap();

        let documents = read_documents(&path).unwrap();
        assert_eq!(documents[0].token_count, 9000);
        assert!(matches!(
            SimilarityIndex::from_documents(documents),
            Err(RagError::TokenBudgetExceeded { tokens: 9000, max: 8192, .. })
        ));
    }
}
