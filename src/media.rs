//! Upload, edit and form-data endpoints for study media files.
//!
//! All three actions share one path and are selected with `?action=`.
//! The axum handlers only extract the request and resolve the actor; the
//! actual work lives in [`view_data`], [`upload_file`] and [`edit_file`],
//! which take their collaborators explicitly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use indexmap::IndexMap;

use crate::aggregator::aggregate_sessions;
use crate::auth::{actor_from_headers, Actor, MEDIA_READ, MEDIA_WRITE};
use crate::config::Config;
use crate::database::AppState;
use crate::error::{MediaError, EDIT_FAILED, UPLOAD_FAILED, VIEW_FAILED};
use crate::store::{MediaStore, StoreError};
use crate::structs::{
    ActionQuery, EditMediaRequest, MediaEdit, MediaFileId, MediaRecord, UploadFields,
    UploadForm, UploadResponse, UploadedFile,
};

pub const UPLOAD_PATH: &str = "/media/ajax/FileUpload";

const REQUIRED_FIELDS: &str = "Please fill in all required fields!";
const INVALID_EXTENSION: &str = "Please make sure your file has a valid extension!";
const INVALID_MEDIA_ID: &str = "Error! Invalid media file ID!";
const INVALID_SITE: &str = "Please select a valid site!";
const INVALID_LANGUAGE: &str = "Please select a valid language!";
const INVALID_DATE: &str = "Please enter the date taken as YYYY-MM-DD!";
const UNREADABLE_UPLOAD: &str = "Could not read the uploaded form. Please try again!";
const UNREADABLE_REQUEST: &str = "Could not read the request. Please try again!";
const DEFAULT_FILE_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    GetData,
    Upload,
    Edit,
}

impl Action {
    fn parse(action: Option<&str>) -> Result<Self, MediaError> {
        match action {
            Some("getData") => Ok(Self::GetData),
            Some("upload") => Ok(Self::Upload),
            Some("edit") => Ok(Self::Edit),
            _ => Err(MediaError::UnknownAction),
        }
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(UPLOAD_PATH, get(dispatch_get).post(dispatch_post))
}

async fn dispatch_get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ActionQuery>,
) -> Result<Json<UploadFields>, MediaError> {
    if Action::parse(query.action.as_deref())? != Action::GetData {
        return Err(MediaError::UnknownAction);
    }

    let actor = actor_from_headers(state.permissions.as_ref(), &headers).await?;
    let fields = view_data(state.store.as_ref(), &actor, query.id_media_file.as_deref()).await?;
    Ok(Json(fields))
}

async fn dispatch_post(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActionQuery>,
    request: Request,
) -> Result<Response, MediaError> {
    let action = Action::parse(query.action.as_deref())?;
    if action == Action::GetData {
        return Err(MediaError::UnknownAction);
    }

    // The body is not Sync, so keep no borrow of the request across the await.
    let headers = request.headers().clone();
    let actor = actor_from_headers(state.permissions.as_ref(), &headers).await?;
    // Refuse before buffering the body.
    actor.require(MEDIA_WRITE)?;

    match action {
        Action::Upload => {
            let multipart = Multipart::from_request(request, &state)
                .await
                .map_err(|_| MediaError::validation(UNREADABLE_UPLOAD))?;
            let form = read_upload_form(multipart).await?;
            let id = upload_file(state.store.as_ref(), &state.config, &actor, form).await?;
            Ok(Json(UploadResponse { id_media_file: id }).into_response())
        }
        Action::Edit => {
            let Json(req) = Json::<EditMediaRequest>::from_request(request, &state)
                .await
                .map_err(|rejection| {
                    tracing::debug!(error = %rejection.body_text(), "unreadable edit request");
                    MediaError::validation(UNREADABLE_REQUEST)
                })?;
            edit_file(state.store.as_ref(), &actor, req).await?;
            Ok(StatusCode::OK.into_response())
        }
        Action::GetData => Err(MediaError::UnknownAction),
    }
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, MediaError> {
    let mut form = UploadForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "failed to read multipart field");
                return Err(MediaError::validation(UNREADABLE_UPLOAD));
            }
        };
        let field_name = field.name().map(str::to_string).unwrap_or_default();

        if field_name == "file" {
            let name = field.file_name().map(str::to_string).unwrap_or_default();
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|_| MediaError::validation(UNREADABLE_UPLOAD))?;
            form.file = Some(UploadedFile {
                name,
                content_type,
                bytes,
            });
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|_| MediaError::validation(UNREADABLE_UPLOAD))?;
        let slot = match field_name.as_str() {
            "pscid" => &mut form.pscid,
            "visitLabel" => &mut form.visit_label,
            "instrument" => &mut form.instrument,
            "forSite" => &mut form.for_site,
            "dateTaken" => &mut form.date_taken,
            "comments" => &mut form.comments,
            "language" => &mut form.language,
            _ => continue,
        };
        *slot = Some(value);
    }

    Ok(form)
}

/// Collect the lookup lists for the upload form, and the record being edited
/// when `id_media_file` is given.
pub async fn view_data(
    store: &dyn MediaStore,
    actor: &Actor,
    id_media_file: Option<&str>,
) -> Result<UploadFields, MediaError> {
    actor.require(MEDIA_READ)?;

    let media_id = match present(id_media_file) {
        Some(raw) => Some(
            raw.parse::<i32>()
                .map_err(|_| MediaError::validation(INVALID_MEDIA_ID))?,
        ),
        None => None,
    };

    load_upload_fields(store, media_id)
        .await
        .map_err(|err| MediaError::persistence("view_data", VIEW_FAILED, err))
}

async fn load_upload_fields(
    store: &dyn MediaStore,
    media_id: Option<i32>,
) -> Result<UploadFields, StoreError> {
    let (instruments, candidates, sites, visits, languages, join_rows, files) = tokio::try_join!(
        store.instrument_names(),
        store.candidates(),
        store.sites(),
        store.visit_labels(),
        store.languages(),
        store.session_join_rows(),
        store.media_files(),
    )?;

    let media_data = match media_id {
        Some(id) => store.media_data(id).await?,
        None => None,
    };

    let sites: IndexMap<i32, String> = sites.into_iter().map(|s| (s.center_id, s.name)).collect();
    let session_data = aggregate_sessions(&join_rows, &sites);

    Ok(UploadFields {
        candidates: candidates
            .iter()
            .map(|c| (c.pscid.clone(), c.pscid.clone()))
            .collect(),
        cand_ids: candidates
            .into_iter()
            .map(|c| (c.pscid, c.cand_id))
            .collect(),
        visits: visits.into_iter().map(|v| (v.clone(), v)).collect(),
        instruments: instruments.into_iter().map(|i| (i.clone(), i)).collect(),
        sites,
        media_data,
        media_files: files.into_iter().map(|f| (f.id, f.file_name)).collect(),
        session_data,
        language: languages
            .into_iter()
            .map(|l| (l.language_id, l.label))
            .collect(),
    })
}

/// Store an uploaded file and record it against the matching session.
///
/// A record that already carries the same file name is overwritten in place;
/// otherwise a new record is inserted. Returns the media id.
pub async fn upload_file(
    store: &dyn MediaStore,
    config: &Config,
    actor: &Actor,
    form: UploadForm,
) -> Result<i32, MediaError> {
    actor.require(MEDIA_WRITE)?;

    let media_dir = ensure_media_dir(config).await?;

    let (Some(pscid), Some(visit_label), Some(for_site), Some(file)) = (
        present(form.pscid.as_deref()),
        present(form.visit_label.as_deref()),
        present(form.for_site.as_deref()),
        form.file.as_ref(),
    ) else {
        return Err(MediaError::validation(REQUIRED_FIELDS));
    };

    let file_name = sanitize_file_name(&file.name).ok_or_else(|| MediaError::validation(REQUIRED_FIELDS))?;
    if !has_extension(&file_name) {
        return Err(MediaError::validation(INVALID_EXTENSION));
    }

    let center_id: i32 = for_site
        .parse()
        .map_err(|_| MediaError::validation(INVALID_SITE))?;
    let language_id = match present(form.language.as_deref()) {
        Some(raw) => Some(
            raw.parse::<i32>()
                .map_err(|_| MediaError::validation(INVALID_LANGUAGE))?,
        ),
        None => None,
    };
    let date_taken = parse_date_taken(form.date_taken.as_deref())?;

    let session_id = store
        .resolve_session(pscid, visit_label, center_id)
        .await
        .map_err(|err| MediaError::persistence("resolve_session", UPLOAD_FAILED, err))?
        .ok_or_else(|| {
            MediaError::not_found(format!(
                "Error! A session does not exist for candidate '{pscid}' and visit label '{visit_label}'."
            ))
        })?;

    // Bytes land under a partial name and only replace the target once the
    // record is stored.
    let target = media_dir.join(&file_name);
    let partial = partial_path(&media_dir, &file_name);
    tokio::fs::write(&partial, &file.bytes)
        .await
        .map_err(|err| MediaError::persistence("write_media_file", UPLOAD_FAILED, err))?;

    let record = MediaRecord {
        session_id,
        instrument: present(form.instrument.as_deref()).map(str::to_string),
        date_taken,
        comments: form.comments.clone(),
        file_name,
        file_type: file
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_FILE_TYPE.to_string()),
        data_dir: media_dir.display().to_string(),
        uploaded_by: actor.user_name().to_string(),
        hide_file: false,
        date_uploaded: Utc::now(),
        language_id,
    };

    let id = match upsert_media(store, &record).await {
        Ok(id) => id,
        Err(err) => {
            discard_partial(&partial).await;
            return Err(err);
        }
    };

    if let Err(err) = tokio::fs::rename(&partial, &target).await {
        discard_partial(&partial).await;
        return Err(MediaError::persistence("move_media_file", UPLOAD_FAILED, err));
    }

    tracing::info!(media_id = id, session_id, "media file uploaded");
    sentry::add_breadcrumb(sentry::Breadcrumb {
        category: Some("media_upload".into()),
        message: Some(format!("media {id} uploaded for session {session_id}")),
        level: sentry::Level::Info,
        ..Default::default()
    });

    Ok(id)
}

async fn upsert_media(store: &dyn MediaStore, record: &MediaRecord) -> Result<i32, MediaError> {
    let existing = store
        .find_media_by_file_name(&record.file_name)
        .await
        .map_err(|err| MediaError::persistence("find_media", UPLOAD_FAILED, err))?;

    match existing {
        Some(id) => {
            tracing::warn!(media_id = id, file_name = %record.file_name, "overwriting media record with the same file name");
            store
                .overwrite_media(id, record)
                .await
                .map_err(|err| MediaError::persistence("overwrite_media", UPLOAD_FAILED, err))?;
            Ok(id)
        }
        None => store
            .insert_media(record)
            .await
            .map_err(|err| MediaError::persistence("insert_media", UPLOAD_FAILED, err)),
    }
}

fn partial_path(media_dir: &Path, file_name: &str) -> PathBuf {
    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    media_dir.join(format!(".{file_name}.{stamp}.part"))
}

async fn discard_partial(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %err, "failed to remove partial upload");
    }
}

/// Update the editable metadata of an uploaded file.
pub async fn edit_file(
    store: &dyn MediaStore,
    actor: &Actor,
    req: EditMediaRequest,
) -> Result<(), MediaError> {
    actor.require(MEDIA_WRITE)?;

    let id = req
        .id_media_file
        .as_ref()
        .and_then(MediaFileId::resolve)
        .ok_or_else(|| MediaError::validation(INVALID_MEDIA_ID))?;

    let edit = MediaEdit {
        date_taken: parse_date_taken(req.date_taken.as_deref())?,
        comments: req.comments,
        hide_file: req.hide_file.unwrap_or(false),
    };

    let touched = store
        .edit_media(id, &edit)
        .await
        .map_err(|err| MediaError::persistence("edit_media", EDIT_FAILED, err))?;
    if touched == 0 {
        return Err(MediaError::not_found(EDIT_FAILED));
    }

    tracing::info!(media_id = id, "media file edited");
    Ok(())
}

async fn ensure_media_dir(config: &Config) -> Result<PathBuf, MediaError> {
    let Some(media_dir) = &config.media_path else {
        return Err(MediaError::Configuration(
            "Error! Media path is not configured!".to_string(),
        ));
    };

    match tokio::fs::metadata(media_dir).await {
        Ok(meta) if meta.is_dir() => Ok(media_dir.clone()),
        _ => Err(MediaError::Configuration(format!(
            "Error! The upload folder '{}' does not exist!",
            media_dir.display()
        ))),
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Whitespace becomes `_` and any client-side directory part is dropped.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let name: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    match name.as_str() {
        "" | "." | ".." => None,
        _ => Some(name),
    }
}

fn has_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .is_some_and(|ext| !ext.is_empty())
}

fn parse_date_taken(raw: Option<&str>) -> Result<Option<NaiveDate>, MediaError> {
    match present(raw) {
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| MediaError::validation(INVALID_DATE)),
        None => Ok(None),
    }
}
