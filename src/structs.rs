use axum::body::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::aggregator::SessionData;

/// One row of the candidate/session/flag join fed to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionJoinRow {
    pub pscid: String,
    pub visit_label: Option<String>,
    pub center_id: Option<i32>,
    pub test_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRow {
    pub cand_id: i32,
    pub pscid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub center_id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language {
    pub language_id: i32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub id: i32,
    pub file_name: String,
}

/// Column values of a `media` row as written by an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRecord {
    pub session_id: i32,
    pub instrument: Option<String>,
    pub date_taken: Option<NaiveDate>,
    pub comments: Option<String>,
    pub file_name: String,
    pub file_type: String,
    pub data_dir: String,
    pub uploaded_by: String,
    pub hide_file: bool,
    pub date_uploaded: DateTime<Utc>,
    pub language_id: Option<i32>,
}

/// The only columns an edit may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEdit {
    pub date_taken: Option<NaiveDate>,
    pub comments: Option<String>,
    pub hide_file: bool,
}

/// A stored media file projected for the edit form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaData {
    pub id: i32,
    #[serde(rename = "sessionID")]
    pub session_id: i32,
    pub pscid: Option<String>,
    pub visit_label: Option<String>,
    pub instrument: Option<String>,
    pub for_site: Option<i32>,
    pub date_taken: Option<NaiveDate>,
    pub comments: Option<String>,
    pub file_name: String,
    pub hide_file: bool,
    pub language: Option<i32>,
}

/// Everything the upload/edit form needs in one payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFields {
    pub candidates: IndexMap<String, String>,
    #[serde(rename = "candIDs")]
    pub cand_ids: IndexMap<String, i32>,
    pub visits: IndexMap<String, String>,
    pub instruments: IndexMap<String, String>,
    pub sites: IndexMap<i32, String>,
    pub media_data: Option<MediaData>,
    pub media_files: IndexMap<i32, String>,
    pub session_data: SessionData,
    pub language: IndexMap<i32, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionQuery {
    pub action: Option<String>,
    pub id_media_file: Option<String>,
}

/// Media id as sent by the edit form: the number from `getData`, or the
/// same number as a string. Anything else is kept so it can be rejected as
/// an invalid id rather than an unreadable body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MediaFileId {
    Number(i64),
    Text(String),
    Other(serde_json::Value),
}

impl MediaFileId {
    /// The id as a positive `i32`, if it is one.
    pub fn resolve(&self) -> Option<i32> {
        let id = match self {
            Self::Number(n) => i32::try_from(*n).ok(),
            Self::Text(raw) => raw.trim().parse().ok(),
            Self::Other(_) => None,
        };
        id.filter(|id| *id > 0)
    }
}

impl From<i32> for MediaFileId {
    fn from(id: i32) -> Self {
        Self::Number(i64::from(id))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMediaRequest {
    pub id_media_file: Option<MediaFileId>,
    pub date_taken: Option<String>,
    pub comments: Option<String>,
    pub hide_file: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub id_media_file: i32,
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Raw multipart fields of an upload, before validation.
#[derive(Debug, Clone, Default)]
pub struct UploadForm {
    pub pscid: Option<String>,
    pub visit_label: Option<String>,
    pub instrument: Option<String>,
    pub for_site: Option<String>,
    pub date_taken: Option<String>,
    pub comments: Option<String>,
    pub language: Option<String>,
    pub file: Option<UploadedFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_request_accepts_numeric_and_string_ids() {
        let req: EditMediaRequest = serde_json::from_str(r#"{"idMediaFile": 5}"#).unwrap();
        assert_eq!(req.id_media_file.as_ref().and_then(MediaFileId::resolve), Some(5));

        let req: EditMediaRequest = serde_json::from_str(r#"{"idMediaFile": " 5 "}"#).unwrap();
        assert_eq!(req.id_media_file.as_ref().and_then(MediaFileId::resolve), Some(5));
    }

    #[test]
    fn test_edit_request_keeps_bad_ids_for_rejection() {
        for body in [
            r#"{"idMediaFile": "abc"}"#,
            r#"{"idMediaFile": 0}"#,
            r#"{"idMediaFile": -3}"#,
            r#"{"idMediaFile": 4294967296}"#,
            r#"{"idMediaFile": true}"#,
            r#"{"idMediaFile": null}"#,
            r#"{}"#,
        ] {
            let req: EditMediaRequest = serde_json::from_str(body).unwrap();
            assert_eq!(req.id_media_file.as_ref().and_then(MediaFileId::resolve), None, "{body}");
        }
    }
}
