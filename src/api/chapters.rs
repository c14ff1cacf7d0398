use super::error::ApiError;
use super::hierarchy::chapters::{self, ChapterTree};
use super::hierarchy::generics::is_circular_reference;
use super::store::CatalogStore;
use super::{deserialize_some, AppState};
use crate::schema::chapters as chapters_table;
pub use crate::tables::{Chapter, ChapterChangeset, NewChapter};
use crate::CHAPTERS_API;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateChapterRequest {
    pub subject_id: i32,
    pub parent_id: Option<i32>,
    pub name: String,
    pub order_num: Option<i32>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateChapterRequest {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub parent_id: Option<Option<i32>>,
    pub name: Option<String>,
    pub order_num: Option<i32>,
    pub enabled: Option<bool>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(format!("/{CHAPTERS_API}").as_str(), post(create_chapter))
        .route(
            format!("/{CHAPTERS_API}/subject/:subject_id/tree").as_str(),
            get(get_enabled_chapter_tree),
        )
        .route(
            format!("/{CHAPTERS_API}/subject/:subject_id/tree/all").as_str(),
            get(get_full_chapter_tree),
        )
        .route(
            format!("/{CHAPTERS_API}/:id").as_str(),
            get(get_chapter).put(update_chapter).delete(delete_chapter),
        )
}

async fn get_enabled_chapter_tree(
    State(state): State<AppState>,
    Path(subject_id): Path<i32>,
) -> Result<Json<ChapterTree>, ApiError> {
    let mut conn = state.pool.get()?;
    Ok(Json(chapters::get_tree(&mut *conn, subject_id, true)?))
}

async fn get_full_chapter_tree(
    State(state): State<AppState>,
    Path(subject_id): Path<i32>,
) -> Result<Json<ChapterTree>, ApiError> {
    let mut conn = state.pool.get()?;
    Ok(Json(chapters::get_tree(&mut *conn, subject_id, false)?))
}

async fn get_chapter(
    State(state): State<AppState>,
    Path(chapter_id): Path<i32>,
) -> Result<Json<Chapter>, ApiError> {
    let mut conn = state.pool.get()?;
    let chapter = Chapter::get_by_id(&mut conn, chapter_id)
        .map_err(|err| not_found_or(err, chapter_id))?;
    Ok(Json(chapter))
}

fn not_found_or(err: diesel::result::Error, chapter_id: i32) -> ApiError {
    match err {
        diesel::result::Error::NotFound => {
            ApiError::NotFound(format!("Chapter not found: {chapter_id}"))
        }
        _ => ApiError::DatabaseError(err),
    }
}

fn validate_parent(conn: &mut PgConnection, subject_id: i32, parent_id: i32) -> Result<(), ApiError> {
    let parent = chapters_table::table
        .find(parent_id)
        .select(Chapter::as_select())
        .first::<Chapter>(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("Parent chapter not found: {parent_id}")))?;

    if parent.subject_id != subject_id {
        return Err(ApiError::Conflict(format!(
            "Parent chapter {parent_id} belongs to another subject"
        )));
    }
    Ok(())
}

/// Sibling chapters must have distinct names.
fn ensure_unique_name(
    conn: &mut PgConnection,
    subject_id: i32,
    parent_id: Option<i32>,
    name: &str,
    exclude_id: Option<i32>,
) -> Result<(), ApiError> {
    use crate::schema::chapters::dsl;

    let mut query = dsl::chapters
        .filter(dsl::subject_id.eq(subject_id))
        .filter(dsl::name.eq(name))
        .filter(dsl::id.ne(exclude_id.unwrap_or(0)))
        .select(dsl::id)
        .into_boxed();
    query = match parent_id {
        Some(parent_id) => query.filter(dsl::parent_id.eq(parent_id)),
        None => query.filter(dsl::parent_id.is_null()),
    };

    if query.first::<i32>(conn).optional()?.is_some() {
        return Err(ApiError::Conflict(format!("Chapter name already exists: {name}")));
    }
    Ok(())
}

async fn create_chapter(
    State(state): State<AppState>,
    Json(payload): Json<CreateChapterRequest>,
) -> Result<(StatusCode, Json<Chapter>), ApiError> {
    let mut conn = state.pool.get()?;

    if !conn.subject_exists(payload.subject_id)? {
        return Err(ApiError::NotFound(format!(
            "Subject not found: {}",
            payload.subject_id
        )));
    }
    if let Some(parent_id) = payload.parent_id {
        validate_parent(&mut conn, payload.subject_id, parent_id)?;
    }
    ensure_unique_name(
        &mut conn,
        payload.subject_id,
        payload.parent_id,
        &payload.name,
        None,
    )?;

    let chapter: Chapter = diesel::insert_into(chapters_table::table)
        .values(&NewChapter {
            subject_id: payload.subject_id,
            parent_id: payload.parent_id,
            name: &payload.name,
            order_num: payload.order_num.unwrap_or(0),
            enabled: payload.enabled.unwrap_or(true),
        })
        .returning(Chapter::as_returning())
        .get_result(&mut conn)?;

    info!("Created chapter {} ({})", chapter.id, chapter.name);
    Ok((StatusCode::CREATED, Json(chapter)))
}

async fn update_chapter(
    State(state): State<AppState>,
    Path(chapter_id): Path<i32>,
    Json(payload): Json<UpdateChapterRequest>,
) -> Result<Json<Chapter>, ApiError> {
    let mut conn = state.pool.get()?;

    let existing =
        Chapter::get_by_id(&mut conn, chapter_id).map_err(|err| not_found_or(err, chapter_id))?;

    if let Some(Some(parent_id)) = payload.parent_id {
        validate_parent(&mut conn, existing.subject_id, parent_id)?;

        let circular = is_circular_reference(chapter_id, Some(parent_id), |id| {
            chapters_table::table
                .find(id)
                .select(chapters_table::parent_id)
                .first::<Option<i32>>(&mut conn)
                .optional()
                .map(Option::flatten)
        })?;
        if circular {
            warn!(
                "Rejected moving chapter {} under {}: circular hierarchy",
                chapter_id, parent_id
            );
            return Err(ApiError::Conflict(
                "A chapter cannot be moved under itself or its descendants".to_string(),
            ));
        }
    }

    let final_parent = payload.parent_id.unwrap_or(existing.parent_id);
    let final_name = payload.name.as_deref().unwrap_or(&existing.name);
    if final_parent != existing.parent_id || final_name != existing.name {
        ensure_unique_name(
            &mut conn,
            existing.subject_id,
            final_parent,
            final_name,
            Some(chapter_id),
        )?;
    }

    let chapter: Chapter = diesel::update(chapters_table::table.find(chapter_id))
        .set(&ChapterChangeset {
            parent_id: payload.parent_id,
            name: payload.name.as_deref(),
            order_num: payload.order_num,
            enabled: payload.enabled,
            modified_at: Some(chrono::Utc::now().naive_utc()),
        })
        .returning(Chapter::as_returning())
        .get_result(&mut conn)?;

    info!("Updated chapter {}", chapter_id);
    Ok(Json(chapter))
}

async fn delete_chapter(
    State(state): State<AppState>,
    Path(chapter_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    let mut pooled = state.pool.get()?;
    let conn: &mut PgConnection = &mut pooled;

    conn.transaction::<_, ApiError, _>(|conn| {
        // Child inserts wait on this lock
        let found = chapters_table::table
            .find(chapter_id)
            .select(chapters_table::id)
            .for_update()
            .first::<i32>(conn)
            .optional()?;
        if found.is_none() {
            return Err(ApiError::NotFound(format!("Chapter not found: {chapter_id}")));
        }

        let children: i64 = chapters_table::table
            .filter(chapters_table::parent_id.eq(chapter_id))
            .count()
            .get_result(conn)?;
        if children > 0 {
            warn!("Refusing to delete chapter {}: has children", chapter_id);
            return Err(ApiError::Conflict(format!(
                "Chapter {chapter_id} has child chapters"
            )));
        }

        diesel::delete(chapters_table::table.find(chapter_id)).execute(conn)?;
        Ok(())
    })?;

    info!("Deleted chapter {}", chapter_id);
    Ok(StatusCode::NO_CONTENT)
}
