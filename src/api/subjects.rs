use super::error::ApiError;
use super::{deserialize_some, AppState};
use crate::schema::{exam_questions, subjects};
pub use crate::tables::{NewSubject, Subject, SubjectChangeset};
use crate::SUBJECTS_API;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateSubjectRequest {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub order_num: Option<i32>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateSubjectRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    pub order_num: Option<i32>,
    pub enabled: Option<bool>,
}

/// A subject with the number of exam questions filed under it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubjectWithCount {
    #[serde(flatten)]
    pub subject: Subject,
    pub question_count: i64,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            format!("/{SUBJECTS_API}").as_str(),
            get(list_enabled_subjects).post(create_subject),
        )
        .route(
            format!("/{SUBJECTS_API}/all").as_str(),
            get(list_all_subjects),
        )
        .route(
            format!("/{SUBJECTS_API}/code/:code").as_str(),
            get(get_subject_by_code),
        )
        .route(
            format!("/{SUBJECTS_API}/:id").as_str(),
            get(get_subject).put(update_subject).delete(delete_subject),
        )
}

fn subject_not_found(err: diesel::result::Error, what: String) -> ApiError {
    match err {
        diesel::result::Error::NotFound => {
            warn!("Subject not found: {}", what);
            ApiError::NotFound(format!("Subject not found: {what}"))
        }
        _ => ApiError::DatabaseError(err),
    }
}

async fn list_enabled_subjects(
    State(state): State<AppState>,
) -> Result<Json<Vec<SubjectWithCount>>, ApiError> {
    let mut conn = state.pool.get()?;

    let enabled: Vec<Subject> = subjects::table
        .filter(subjects::enabled.eq(true))
        .order_by((subjects::order_num.asc(), subjects::id.asc()))
        .select(Subject::as_select())
        .load(&mut conn)?;

    let counts: HashMap<i32, i64> = exam_questions::table
        .filter(exam_questions::subject_id.is_not_null())
        .group_by(exam_questions::subject_id)
        .select((exam_questions::subject_id, diesel::dsl::count_star()))
        .load::<(Option<i32>, i64)>(&mut conn)?
        .into_iter()
        .filter_map(|(subject_id, count)| subject_id.map(|id| (id, count)))
        .collect();

    let response = enabled
        .into_iter()
        .map(|subject| SubjectWithCount {
            question_count: counts.get(&subject.id).copied().unwrap_or(0),
            subject,
        })
        .collect();

    Ok(Json(response))
}

async fn list_all_subjects(State(state): State<AppState>) -> Result<Json<Vec<Subject>>, ApiError> {
    let mut conn = state.pool.get()?;
    Ok(Json(Subject::get_all(&mut conn)?))
}

async fn get_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<i32>,
) -> Result<Json<Subject>, ApiError> {
    let mut conn = state.pool.get()?;
    let subject = Subject::get_by_id(&mut conn, subject_id)
        .map_err(|err| subject_not_found(err, subject_id.to_string()))?;
    Ok(Json(subject))
}

async fn get_subject_by_code(
    State(state): State<AppState>,
    Path(subject_code): Path<String>,
) -> Result<Json<Subject>, ApiError> {
    let mut conn = state.pool.get()?;
    let subject = subjects::table
        .filter(subjects::code.eq(&subject_code))
        .select(Subject::as_select())
        .first(&mut conn)
        .map_err(|err| subject_not_found(err, subject_code.clone()))?;
    Ok(Json(subject))
}

/// Subject names and codes are globally unique.
fn ensure_unique(
    conn: &mut PgConnection,
    name: Option<&str>,
    code: Option<&str>,
    exclude_id: Option<i32>,
) -> Result<(), ApiError> {
    let exclude_id = exclude_id.unwrap_or(0);

    if let Some(name) = name {
        let taken = diesel::select(diesel::dsl::exists(
            subjects::table
                .filter(subjects::name.eq(name))
                .filter(subjects::id.ne(exclude_id)),
        ))
        .get_result::<bool>(conn)?;
        if taken {
            return Err(ApiError::Conflict(format!("Subject name already exists: {name}")));
        }
    }

    if let Some(code) = code {
        let taken = diesel::select(diesel::dsl::exists(
            subjects::table
                .filter(subjects::code.eq(code))
                .filter(subjects::id.ne(exclude_id)),
        ))
        .get_result::<bool>(conn)?;
        if taken {
            return Err(ApiError::Conflict(format!("Subject code already exists: {code}")));
        }
    }

    Ok(())
}

async fn create_subject(
    State(state): State<AppState>,
    Json(payload): Json<CreateSubjectRequest>,
) -> Result<(StatusCode, Json<Subject>), ApiError> {
    let mut conn = state.pool.get()?;

    ensure_unique(
        &mut conn,
        Some(payload.name.as_str()),
        Some(payload.code.as_str()),
        None,
    )?;

    let subject: Subject = diesel::insert_into(subjects::table)
        .values(&NewSubject {
            name: &payload.name,
            code: &payload.code,
            description: payload.description.as_deref(),
            order_num: payload.order_num.unwrap_or(0),
            enabled: payload.enabled.unwrap_or(true),
        })
        .returning(Subject::as_returning())
        .get_result(&mut conn)?;

    info!("Created subject {} ({})", subject.id, subject.code);
    Ok((StatusCode::CREATED, Json(subject)))
}

async fn update_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<i32>,
    Json(payload): Json<UpdateSubjectRequest>,
) -> Result<Json<Subject>, ApiError> {
    let mut conn = state.pool.get()?;

    let existing = Subject::get_by_id(&mut conn, subject_id)
        .map_err(|err| subject_not_found(err, subject_id.to_string()))?;

    let name = payload.name.as_deref().filter(|name| *name != existing.name);
    let code = payload.code.as_deref().filter(|code| *code != existing.code);
    ensure_unique(&mut conn, name, code, Some(subject_id))?;

    let subject: Subject = diesel::update(subjects::table.find(subject_id))
        .set(&SubjectChangeset {
            name: payload.name.as_deref(),
            code: payload.code.as_deref(),
            description: payload.description.as_ref().map(|d| d.as_deref()),
            order_num: payload.order_num,
            enabled: payload.enabled,
            modified_at: Some(chrono::Utc::now().naive_utc()),
        })
        .returning(Subject::as_returning())
        .get_result(&mut conn)?;

    info!("Updated subject {}", subject_id);
    Ok(Json(subject))
}

async fn delete_subject(
    State(state): State<AppState>,
    Path(subject_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.pool.get()?;

    let deleted = diesel::delete(subjects::table.find(subject_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("Subject not found: {subject_id}")));
    }

    info!("Deleted subject {}", subject_id);
    Ok(StatusCode::NO_CONTENT)
}
