use super::error::ApiError;
use super::store::{CatalogStore, QuestionKind};
use super::tag_counts::{has_tag, is_untagged, tag_names, tag_stats, TagStat};
use super::{deserialize_some, AppState};
use crate::schema::{exam_questions, mock_questions};
pub use crate::tables::{
    ExamQuestion, ExamQuestionChangeset, MockQuestion, MockQuestionChangeset, NewExamQuestion,
    NewMockQuestion,
};
use crate::QUESTIONS_API;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use axum_extra::response::ErasedJson;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct QuestionListParams {
    pub subject_id: i32,
    /// Only questions tagged with exactly this category name
    pub category: Option<String>,
    /// Only questions without any usable tag
    pub untagged: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubjectParams {
    pub subject_id: Option<i32>,
}

/// Shared by both question kinds: `year` is required for exam questions,
/// `source` for mock questions.
#[derive(Debug, Deserialize, Serialize)]
pub struct CreateQuestionRequest {
    pub subject_id: Option<i32>,
    pub year: Option<i32>,
    pub source: Option<String>,
    pub question_number: Option<i32>,
    pub question_type: String,
    pub title: Option<String>,
    pub content: String,
    pub answer: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub difficulty: Option<String>,
}

/// Absent fields are left untouched and `null` clears a nullable column.
/// `categories` replaces the whole tag list; `[]` removes every tag.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateQuestionRequest {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub subject_id: Option<Option<i32>>,
    pub year: Option<i32>,
    pub source: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub question_number: Option<Option<i32>>,
    pub question_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub title: Option<Option<String>>,
    pub content: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub answer: Option<Option<String>>,
    pub categories: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    pub difficulty: Option<Option<String>>,
}

/// The tag list in its stored form. An empty list is stored as null.
fn tags_json(categories: &[String]) -> Result<Option<String>, ApiError> {
    if categories.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(categories)
        .map(Some)
        .map_err(|err| ApiError::BadRequest(format!("Invalid categories: {err}")))
}

impl CreateQuestionRequest {
    pub fn category_json(&self) -> Result<Option<String>, ApiError> {
        tags_json(&self.categories)
    }
}

impl UpdateQuestionRequest {
    /// `None` leaves the stored tags alone.
    pub fn category_json(&self) -> Result<Option<Option<String>>, ApiError> {
        self.categories.as_deref().map(tags_json).transpose()
    }

    /// New `(year, question_number)` of an exam question, if the update
    /// changes either.
    fn exam_key_change(&self, existing: &ExamQuestion) -> Option<(i32, Option<i32>)> {
        let year = self.year.unwrap_or(existing.year);
        let number = self.question_number.unwrap_or(existing.question_number);
        (year != existing.year || number != existing.question_number).then_some((year, number))
    }

    /// New `(source, title, question_number)` of a mock question, if the
    /// update changes any of them.
    fn mock_key_change<'a>(
        &'a self,
        existing: &'a MockQuestion,
    ) -> Option<(&'a str, Option<&'a str>, Option<i32>)> {
        let source = self.source.as_deref().unwrap_or(&existing.source);
        let title = match &self.title {
            Some(title) => title.as_deref(),
            None => existing.title.as_deref(),
        };
        let number = self.question_number.unwrap_or(existing.question_number);

        let changed = source != existing.source
            || title != existing.title.as_deref()
            || number != existing.question_number;
        changed.then_some((source, title, number))
    }
}

#[derive(Debug, Clone, Copy)]
struct TagFilter<'a> {
    category: Option<&'a str>,
    untagged: bool,
}

impl TagFilter<'_> {
    fn matches(&self, raw: Option<&str>) -> bool {
        if self.untagged {
            return is_untagged(raw);
        }
        match self.category {
            Some(name) => has_tag(raw, name),
            None => true,
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            format!("/{QUESTIONS_API}/:kind").as_str(),
            get(list_questions).post(create_question),
        )
        .route(
            format!("/{QUESTIONS_API}/:kind/category-stats").as_str(),
            get(get_category_stats),
        )
        .route(
            format!("/{QUESTIONS_API}/:kind/categories/:subject_id").as_str(),
            get(get_subject_categories),
        )
        .route(
            format!("/{QUESTIONS_API}/:kind/:id").as_str(),
            get(get_question)
                .put(update_question)
                .delete(delete_question),
        )
}

async fn list_questions(
    State(state): State<AppState>,
    Path(kind): Path<QuestionKind>,
    Query(params): Query<QuestionListParams>,
) -> Result<ErasedJson, ApiError> {
    let mut conn = state.pool.get()?;
    let filter = TagFilter {
        category: params.category.as_deref(),
        untagged: params.untagged.unwrap_or(false),
    };

    let body = match kind {
        QuestionKind::Exam => {
            let rows: Vec<ExamQuestion> = exam_questions::table
                .filter(exam_questions::subject_id.eq(params.subject_id))
                .order_by((exam_questions::year.desc(), exam_questions::id.asc()))
                .select(ExamQuestion::as_select())
                .load(&mut conn)?;
            let rows: Vec<ExamQuestion> = rows
                .into_iter()
                .filter(|q| filter.matches(q.category.as_deref()))
                .collect();
            ErasedJson::new(rows)
        }
        QuestionKind::Mock => {
            let rows: Vec<MockQuestion> = mock_questions::table
                .filter(mock_questions::subject_id.eq(params.subject_id))
                .order_by(mock_questions::id.asc())
                .select(MockQuestion::as_select())
                .load(&mut conn)?;
            let rows: Vec<MockQuestion> = rows
                .into_iter()
                .filter(|q| filter.matches(q.category.as_deref()))
                .collect();
            ErasedJson::new(rows)
        }
    };

    Ok(body)
}

fn find_exam(conn: &mut PgConnection, question_id: i32) -> Result<ExamQuestion, ApiError> {
    exam_questions::table
        .find(question_id)
        .select(ExamQuestion::as_select())
        .first::<ExamQuestion>(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("Question not found: exam/{question_id}")))
}

fn find_mock(conn: &mut PgConnection, question_id: i32) -> Result<MockQuestion, ApiError> {
    mock_questions::table
        .find(question_id)
        .select(MockQuestion::as_select())
        .first::<MockQuestion>(conn)
        .optional()?
        .ok_or_else(|| ApiError::NotFound(format!("Question not found: mock/{question_id}")))
}

/// A numbered exam question exists once per year.
fn ensure_exam_unique(
    conn: &mut PgConnection,
    year: i32,
    question_number: Option<i32>,
    exclude_id: Option<i32>,
) -> Result<(), ApiError> {
    let Some(number) = question_number else {
        return Ok(());
    };

    let taken = diesel::select(diesel::dsl::exists(
        exam_questions::table
            .filter(exam_questions::year.eq(year))
            .filter(exam_questions::question_number.eq(number))
            .filter(exam_questions::id.ne(exclude_id.unwrap_or(0))),
    ))
    .get_result::<bool>(conn)?;

    if taken {
        warn!("Duplicate exam question {} of {}", number, year);
        return Err(ApiError::Conflict(format!(
            "Question {number} of {year} already exists"
        )));
    }
    Ok(())
}

/// Mock questions are identified by source, title and number. Missing
/// titles and numbers compare equal.
fn ensure_mock_unique(
    conn: &mut PgConnection,
    source: &str,
    title: Option<&str>,
    question_number: Option<i32>,
    exclude_id: Option<i32>,
) -> Result<(), ApiError> {
    let taken = diesel::select(diesel::dsl::exists(
        mock_questions::table
            .filter(mock_questions::source.eq(source))
            .filter(mock_questions::title.is_not_distinct_from(title))
            .filter(mock_questions::question_number.is_not_distinct_from(question_number))
            .filter(mock_questions::id.ne(exclude_id.unwrap_or(0))),
    ))
    .get_result::<bool>(conn)?;

    if taken {
        warn!("Duplicate mock question from {}", source);
        return Err(ApiError::Conflict(format!(
            "A mock question with the same source, title and number already exists: {source}"
        )));
    }
    Ok(())
}

fn ensure_subject(conn: &mut PgConnection, subject_id: Option<i32>) -> Result<(), ApiError> {
    if let Some(subject_id) = subject_id {
        if !conn.subject_exists(subject_id)? {
            return Err(ApiError::NotFound(format!("Subject not found: {subject_id}")));
        }
    }
    Ok(())
}

async fn get_question(
    State(state): State<AppState>,
    Path((kind, question_id)): Path<(QuestionKind, i32)>,
) -> Result<ErasedJson, ApiError> {
    let mut conn = state.pool.get()?;

    let body = match kind {
        QuestionKind::Exam => ErasedJson::new(find_exam(&mut conn, question_id)?),
        QuestionKind::Mock => ErasedJson::new(find_mock(&mut conn, question_id)?),
    };

    Ok(body)
}

async fn create_question(
    State(state): State<AppState>,
    Path(kind): Path<QuestionKind>,
    Json(payload): Json<CreateQuestionRequest>,
) -> Result<(StatusCode, ErasedJson), ApiError> {
    let mut conn = state.pool.get()?;

    ensure_subject(&mut conn, payload.subject_id)?;
    let category = payload.category_json()?;

    let body = match kind {
        QuestionKind::Exam => {
            let year = payload
                .year
                .ok_or_else(|| ApiError::BadRequest("year is required".to_string()))?;
            ensure_exam_unique(&mut conn, year, payload.question_number, None)?;
            let question: ExamQuestion = diesel::insert_into(exam_questions::table)
                .values(&NewExamQuestion {
                    subject_id: payload.subject_id,
                    year,
                    question_number: payload.question_number,
                    question_type: &payload.question_type,
                    title: payload.title.as_deref(),
                    content: &payload.content,
                    answer: payload.answer.as_deref(),
                    category: category.as_deref(),
                    difficulty: payload.difficulty.as_deref(),
                })
                .returning(ExamQuestion::as_returning())
                .get_result(&mut conn)?;
            info!("Created exam question {}", question.id);
            ErasedJson::new(question)
        }
        QuestionKind::Mock => {
            let source = payload
                .source
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("source is required".to_string()))?;
            ensure_mock_unique(
                &mut conn,
                source,
                payload.title.as_deref(),
                payload.question_number,
                None,
            )?;
            let question: MockQuestion = diesel::insert_into(mock_questions::table)
                .values(&NewMockQuestion {
                    subject_id: payload.subject_id,
                    source,
                    question_number: payload.question_number,
                    question_type: &payload.question_type,
                    title: payload.title.as_deref(),
                    content: &payload.content,
                    answer: payload.answer.as_deref(),
                    category: category.as_deref(),
                    difficulty: payload.difficulty.as_deref(),
                })
                .returning(MockQuestion::as_returning())
                .get_result(&mut conn)?;
            info!("Created mock question {}", question.id);
            ErasedJson::new(question)
        }
    };

    Ok((StatusCode::CREATED, body))
}

async fn update_question(
    State(state): State<AppState>,
    Path((kind, question_id)): Path<(QuestionKind, i32)>,
    Json(payload): Json<UpdateQuestionRequest>,
) -> Result<ErasedJson, ApiError> {
    let mut conn = state.pool.get()?;

    ensure_subject(&mut conn, payload.subject_id.flatten())?;
    let category = payload.category_json()?;
    let modified_at = Some(chrono::Utc::now().naive_utc());

    let body = match kind {
        QuestionKind::Exam => {
            let existing = find_exam(&mut conn, question_id)?;
            if let Some((year, number)) = payload.exam_key_change(&existing) {
                ensure_exam_unique(&mut conn, year, number, Some(question_id))?;
            }

            let changeset = ExamQuestionChangeset {
                subject_id: payload.subject_id,
                year: payload.year,
                question_number: payload.question_number,
                question_type: payload.question_type.as_deref(),
                title: payload.title.as_ref().map(|t| t.as_deref()),
                content: payload.content.as_deref(),
                answer: payload.answer.as_ref().map(|a| a.as_deref()),
                category: category.as_ref().map(|c| c.as_deref()),
                difficulty: payload.difficulty.as_ref().map(|d| d.as_deref()),
                modified_at,
            };
            let question: ExamQuestion = diesel::update(exam_questions::table.find(question_id))
                .set(&changeset)
                .returning(ExamQuestion::as_returning())
                .get_result(&mut conn)?;
            ErasedJson::new(question)
        }
        QuestionKind::Mock => {
            let existing = find_mock(&mut conn, question_id)?;
            if let Some((source, title, number)) = payload.mock_key_change(&existing) {
                ensure_mock_unique(&mut conn, source, title, number, Some(question_id))?;
            }

            let changeset = MockQuestionChangeset {
                subject_id: payload.subject_id,
                source: payload.source.as_deref(),
                question_number: payload.question_number,
                question_type: payload.question_type.as_deref(),
                title: payload.title.as_ref().map(|t| t.as_deref()),
                content: payload.content.as_deref(),
                answer: payload.answer.as_ref().map(|a| a.as_deref()),
                category: category.as_ref().map(|c| c.as_deref()),
                difficulty: payload.difficulty.as_ref().map(|d| d.as_deref()),
                modified_at,
            };
            let question: MockQuestion = diesel::update(mock_questions::table.find(question_id))
                .set(&changeset)
                .returning(MockQuestion::as_returning())
                .get_result(&mut conn)?;
            ErasedJson::new(question)
        }
    };

    info!("Updated {} question {}", kind, question_id);
    Ok(body)
}

async fn delete_question(
    State(state): State<AppState>,
    Path((kind, question_id)): Path<(QuestionKind, i32)>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.pool.get()?;

    let deleted = match kind {
        QuestionKind::Exam => {
            diesel::delete(exam_questions::table.find(question_id)).execute(&mut conn)?
        }
        QuestionKind::Mock => {
            diesel::delete(mock_questions::table.find(question_id)).execute(&mut conn)?
        }
    };
    if deleted == 0 {
        return Err(ApiError::NotFound(format!(
            "Question not found: {kind}/{question_id}"
        )));
    }

    info!("Deleted {} question {}", kind, question_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn get_category_stats(
    State(state): State<AppState>,
    Path(kind): Path<QuestionKind>,
    Query(params): Query<SubjectParams>,
) -> Result<Json<Vec<TagStat>>, ApiError> {
    let mut conn = state.pool.get()?;
    let questions = conn.fetch_question_tags(kind, params.subject_id)?;
    Ok(Json(tag_stats(&questions)))
}

async fn get_subject_categories(
    State(state): State<AppState>,
    Path((kind, subject_id)): Path<(QuestionKind, i32)>,
) -> Result<Json<Vec<String>>, ApiError> {
    let mut conn = state.pool.get()?;
    let questions = conn.fetch_question_tags(kind, Some(subject_id))?;
    Ok(Json(tag_names(&questions)))
}
