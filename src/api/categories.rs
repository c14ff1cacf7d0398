use super::error::ApiError;
use super::hierarchy::categories::{self, CategoryNode, CategoryStats, CategoryTree, CategoryUsage};
use super::hierarchy::generics::is_circular_reference;
use super::store::{CatalogStore, QuestionKind};
use super::{deserialize_some, AppState};
use crate::schema::exam_categories;
pub use crate::tables::{ExamCategory, ExamCategoryChangeset, NewExamCategory};
use crate::CATEGORIES_API;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateCategoryRequest {
    pub subject_id: i32,
    pub parent_id: Option<i32>,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub order_num: Option<i32>,
    pub enabled: Option<bool>,
}

/// Absent fields are left untouched; `"parent_id": null` moves the category
/// to the top level.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateCategoryRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub parent_id: Option<Option<i32>>,
    pub order_num: Option<i32>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryListParams {
    pub enabled_only: Option<bool>,
    pub question_type: Option<QuestionKind>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AvailableParentsParams {
    pub subject_id: i32,
    pub exclude_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CategoryStatsParams {
    pub subject_id: Option<i32>,
    pub question_type: Option<QuestionKind>,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            format!("/{CATEGORIES_API}").as_str(),
            get(list_all_categories).post(create_category),
        )
        .route(
            format!("/{CATEGORIES_API}/subject/:subject_id").as_str(),
            get(list_subject_categories),
        )
        .route(
            format!("/{CATEGORIES_API}/subject/:subject_id/enabled").as_str(),
            get(list_enabled_categories),
        )
        .route(
            format!("/{CATEGORIES_API}/subject/:subject_id/tree").as_str(),
            get(get_category_tree),
        )
        .route(
            format!("/{CATEGORIES_API}/subject/:subject_id/tree/enabled").as_str(),
            get(get_enabled_category_tree),
        )
        .route(
            format!("/{CATEGORIES_API}/subject/:subject_id/tree/enabled/:question_type").as_str(),
            get(get_filtered_category_tree),
        )
        .route(
            format!("/{CATEGORIES_API}/available-parents").as_str(),
            get(get_available_parents),
        )
        .route(
            format!("/{CATEGORIES_API}/stats").as_str(),
            get(get_category_stats),
        )
        .route(
            format!("/{CATEGORIES_API}/:id").as_str(),
            get(get_category)
                .put(update_category)
                .delete(delete_category),
        )
        .route(
            format!("/{CATEGORIES_API}/:id/usage").as_str(),
            get(get_category_usage),
        )
}

// * Reads ....................................................................

async fn list_all_categories(
    State(state): State<AppState>,
    Query(params): Query<CategoryListParams>,
) -> Result<Json<Vec<CategoryNode>>, ApiError> {
    let mut conn = state.pool.get()?;
    let kind = params.question_type.unwrap_or_default();
    let nodes = categories::list_categories(
        &mut *conn,
        None,
        params.enabled_only.unwrap_or(false),
        kind,
    )?;
    Ok(Json(nodes))
}

async fn list_subject_categories(
    State(state): State<AppState>,
    Path(subject_id): Path<i32>,
    Query(params): Query<CategoryListParams>,
) -> Result<Json<Vec<CategoryNode>>, ApiError> {
    let mut conn = state.pool.get()?;
    let nodes = categories::list_categories(
        &mut *conn,
        Some(subject_id),
        params.enabled_only.unwrap_or(false),
        params.question_type.unwrap_or_default(),
    )?;
    Ok(Json(nodes))
}

async fn list_enabled_categories(
    State(state): State<AppState>,
    Path(subject_id): Path<i32>,
) -> Result<Json<Vec<ExamCategory>>, ApiError> {
    let mut conn = state.pool.get()?;
    let rows = categories::list_enabled(&mut *conn, subject_id)?;
    Ok(Json(rows))
}

async fn get_category_tree(
    State(state): State<AppState>,
    Path(subject_id): Path<i32>,
    Query(params): Query<CategoryListParams>,
) -> Result<Json<CategoryTree>, ApiError> {
    let mut conn = state.pool.get()?;
    let tree = categories::get_tree(
        &mut *conn,
        subject_id,
        params.enabled_only.unwrap_or(false),
        params.question_type.unwrap_or_default(),
    )?;
    Ok(Json(tree))
}

async fn get_enabled_category_tree(
    State(state): State<AppState>,
    Path(subject_id): Path<i32>,
    Query(params): Query<CategoryListParams>,
) -> Result<Json<CategoryTree>, ApiError> {
    let mut conn = state.pool.get()?;
    let tree = categories::get_tree(
        &mut *conn,
        subject_id,
        true,
        params.question_type.unwrap_or_default(),
    )?;
    Ok(Json(tree))
}

async fn get_filtered_category_tree(
    State(state): State<AppState>,
    Path((subject_id, question_type)): Path<(i32, QuestionKind)>,
) -> Result<Json<CategoryTree>, ApiError> {
    let mut conn = state.pool.get()?;
    let tree = categories::get_filtered_tree(&mut *conn, subject_id, question_type)?;
    Ok(Json(tree))
}

async fn get_available_parents(
    State(state): State<AppState>,
    Query(params): Query<AvailableParentsParams>,
) -> Result<Json<Vec<ExamCategory>>, ApiError> {
    let mut conn = state.pool.get()?;
    let parents = categories::available_parents(&mut *conn, params.subject_id, params.exclude_id)?;
    Ok(Json(parents))
}

async fn get_category_stats(
    State(state): State<AppState>,
    Query(params): Query<CategoryStatsParams>,
) -> Result<Json<CategoryStats>, ApiError> {
    let mut conn = state.pool.get()?;
    let stats = categories::category_stats(
        &mut *conn,
        params.subject_id,
        params.question_type.unwrap_or_default(),
    )?;
    Ok(Json(stats))
}

async fn get_category(
    State(state): State<AppState>,
    Path(category_id): Path<i32>,
) -> Result<Json<ExamCategory>, ApiError> {
    let mut conn = state.pool.get()?;
    let category = conn
        .fetch_category(category_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Category not found: {category_id}")))?;
    Ok(Json(category))
}

async fn get_category_usage(
    State(state): State<AppState>,
    Path(category_id): Path<i32>,
) -> Result<Json<CategoryUsage>, ApiError> {
    let mut conn = state.pool.get()?;
    let usage = categories::check_usage(&mut *conn, category_id)?;
    Ok(Json(usage))
}

// * Writes ...................................................................

/// The parent must exist and belong to the same subject.
fn validate_parent(conn: &mut PgConnection, subject_id: i32, parent_id: i32) -> Result<(), ApiError> {
    let parent = conn
        .fetch_category(parent_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Parent category not found: {parent_id}")))?;

    if parent.subject_id != subject_id {
        return Err(ApiError::Conflict(format!(
            "Parent category {parent_id} belongs to another subject"
        )));
    }
    Ok(())
}

/// Names and codes are unique within a subject.
fn ensure_unique(
    conn: &mut PgConnection,
    subject_id: i32,
    name: Option<&str>,
    code: Option<&str>,
    exclude_id: Option<i32>,
) -> Result<(), ApiError> {
    use crate::schema::exam_categories::dsl;

    let exclude_id = exclude_id.unwrap_or(0);

    if let Some(name) = name {
        let taken = diesel::select(diesel::dsl::exists(
            dsl::exam_categories
                .filter(dsl::subject_id.eq(subject_id))
                .filter(dsl::name.eq(name))
                .filter(dsl::id.ne(exclude_id)),
        ))
        .get_result::<bool>(conn)?;
        if taken {
            return Err(ApiError::Conflict(format!("Category name already exists: {name}")));
        }
    }

    if let Some(code) = code {
        let taken = diesel::select(diesel::dsl::exists(
            dsl::exam_categories
                .filter(dsl::subject_id.eq(subject_id))
                .filter(dsl::code.eq(code))
                .filter(dsl::id.ne(exclude_id)),
        ))
        .get_result::<bool>(conn)?;
        if taken {
            return Err(ApiError::Conflict(format!("Category code already exists: {code}")));
        }
    }

    Ok(())
}

async fn create_category(
    State(state): State<AppState>,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<ExamCategory>), ApiError> {
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
    ensure_unique(
        &mut conn,
        payload.subject_id,
        Some(payload.name.as_str()),
        Some(payload.code.as_str()),
        None,
    )?;

    let new_category = NewExamCategory {
        subject_id: payload.subject_id,
        parent_id: payload.parent_id,
        name: &payload.name,
        code: &payload.code,
        description: payload.description.as_deref(),
        order_num: payload.order_num.unwrap_or(0),
        enabled: payload.enabled.unwrap_or(true),
    };

    let category: ExamCategory = diesel::insert_into(exam_categories::table)
        .values(&new_category)
        .returning(ExamCategory::as_returning())
        .get_result(&mut conn)?;

    info!(
        "Created category {} ({}) in subject {}",
        category.id, category.name, category.subject_id
    );
    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category(
    State(state): State<AppState>,
    Path(category_id): Path<i32>,
    Json(payload): Json<UpdateCategoryRequest>,
) -> Result<Json<ExamCategory>, ApiError> {
    let mut conn = state.pool.get()?;

    let existing = conn
        .fetch_category(category_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Category not found: {category_id}")))?;

    if let Some(Some(parent_id)) = payload.parent_id {
        validate_parent(&mut conn, existing.subject_id, parent_id)?;

        let circular = is_circular_reference(category_id, Some(parent_id), |id| {
            exam_categories::table
                .find(id)
                .select(exam_categories::parent_id)
                .first::<Option<i32>>(&mut conn)
                .optional()
                .map(Option::flatten)
        })?;
        if circular {
            warn!(
                "Rejected moving category {} under {}: circular hierarchy",
                category_id, parent_id
            );
            return Err(ApiError::Conflict(
                "A category cannot be moved under itself or its descendants".to_string(),
            ));
        }
    }

    let name = payload.name.as_deref().filter(|name| *name != existing.name);
    let code = payload.code.as_deref().filter(|code| *code != existing.code);
    ensure_unique(&mut conn, existing.subject_id, name, code, Some(category_id))?;

    let changeset = ExamCategoryChangeset {
        parent_id: payload.parent_id,
        name: payload.name.as_deref(),
        code: payload.code.as_deref(),
        description: payload.description.as_ref().map(|d| d.as_deref()),
        order_num: payload.order_num,
        enabled: payload.enabled,
        modified_at: Some(chrono::Utc::now().naive_utc()),
    };

    let category: ExamCategory = diesel::update(exam_categories::table.find(category_id))
        .set(&changeset)
        .returning(ExamCategory::as_returning())
        .get_result(&mut conn)?;

    info!("Updated category {}", category_id);
    Ok(Json(category))
}

/// Row lock held until the surrounding transaction ends. A concurrent insert
/// of a child waits on it and then fails the foreign key check.
fn lock_category(conn: &mut PgConnection, category_id: i32) -> QueryResult<Option<i32>> {
    exam_categories::table
        .find(category_id)
        .select(exam_categories::id)
        .for_update()
        .first::<i32>(conn)
        .optional()
}

async fn delete_category(
    State(state): State<AppState>,
    Path(category_id): Path<i32>,
) -> Result<StatusCode, ApiError> {
    let mut pooled = state.pool.get()?;
    let conn: &mut PgConnection = &mut pooled;

    conn.transaction::<_, ApiError, _>(|conn| {
        lock_category(conn, category_id)?;
        categories::delete(conn, category_id)
    })?;
    Ok(StatusCode::NO_CONTENT)
}
