//! Read access the tree services need from the relational store.
//!
//! Handlers pass a pooled `PgConnection`; unit tests use an in-memory store.

use crate::schema::{chapters, exam_categories, exam_questions, mock_questions, subjects};
use crate::tables::{Chapter, ExamCategory, QuestionTags};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which question table a count or listing reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    #[default]
    Exam,
    Mock,
}

impl QuestionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionKind::Exam => "exam",
            QuestionKind::Mock => "mock",
        }
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exam" => Ok(QuestionKind::Exam),
            "mock" => Ok(QuestionKind::Mock),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

pub trait CatalogStore {
    fn subject_exists(&mut self, subject_id: i32) -> QueryResult<bool>;

    /// Categories ordered by `order_num`, then `id`.
    fn fetch_categories(
        &mut self,
        subject_id: Option<i32>,
        enabled_only: bool,
    ) -> QueryResult<Vec<ExamCategory>>;

    fn fetch_category(&mut self, category_id: i32) -> QueryResult<Option<ExamCategory>>;

    fn count_child_categories(&mut self, category_id: i32) -> QueryResult<i64>;

    fn delete_category(&mut self, category_id: i32) -> QueryResult<usize>;

    /// Chapters ordered by `order_num`, then `id`.
    fn fetch_chapters(&mut self, subject_id: i32, enabled_only: bool)
        -> QueryResult<Vec<Chapter>>;

    fn fetch_question_tags(
        &mut self,
        kind: QuestionKind,
        subject_id: Option<i32>,
    ) -> QueryResult<Vec<QuestionTags>>;
}

impl CatalogStore for PgConnection {
    fn subject_exists(&mut self, subject_id: i32) -> QueryResult<bool> {
        diesel::select(diesel::dsl::exists(subjects::table.find(subject_id))).get_result(self)
    }

    fn fetch_categories(
        &mut self,
        subject_id: Option<i32>,
        enabled_only: bool,
    ) -> QueryResult<Vec<ExamCategory>> {
        let mut query = exam_categories::table
            .select(ExamCategory::as_select())
            .into_boxed();

        if let Some(subject_id) = subject_id {
            query = query.filter(exam_categories::subject_id.eq(subject_id));
        }
        if enabled_only {
            query = query.filter(exam_categories::enabled.eq(true));
        }

        query
            .order_by((exam_categories::order_num.asc(), exam_categories::id.asc()))
            .load(self)
    }

    fn fetch_category(&mut self, category_id: i32) -> QueryResult<Option<ExamCategory>> {
        exam_categories::table
            .find(category_id)
            .select(ExamCategory::as_select())
            .first(self)
            .optional()
    }

    fn count_child_categories(&mut self, category_id: i32) -> QueryResult<i64> {
        exam_categories::table
            .filter(exam_categories::parent_id.eq(category_id))
            .count()
            .get_result(self)
    }

    fn delete_category(&mut self, category_id: i32) -> QueryResult<usize> {
        diesel::delete(exam_categories::table.find(category_id)).execute(self)
    }

    fn fetch_chapters(
        &mut self,
        subject_id: i32,
        enabled_only: bool,
    ) -> QueryResult<Vec<Chapter>> {
        let mut query = chapters::table
            .filter(chapters::subject_id.eq(subject_id))
            .select(Chapter::as_select())
            .into_boxed();

        if enabled_only {
            query = query.filter(chapters::enabled.eq(true));
        }

        query
            .order_by((chapters::order_num.asc(), chapters::id.asc()))
            .load(self)
    }

    fn fetch_question_tags(
        &mut self,
        kind: QuestionKind,
        subject_id: Option<i32>,
    ) -> QueryResult<Vec<QuestionTags>> {
        match kind {
            QuestionKind::Exam => {
                let mut query = exam_questions::table
                    .select((
                        exam_questions::id,
                        exam_questions::subject_id,
                        exam_questions::category,
                        exam_questions::question_type,
                    ))
                    .into_boxed();
                if let Some(subject_id) = subject_id {
                    query = query.filter(exam_questions::subject_id.eq(subject_id));
                }
                query
                    .order_by(exam_questions::id.asc())
                    .load::<QuestionTags>(self)
            }
            QuestionKind::Mock => {
                let mut query = mock_questions::table
                    .select((
                        mock_questions::id,
                        mock_questions::subject_id,
                        mock_questions::category,
                        mock_questions::question_type,
                    ))
                    .into_boxed();
                if let Some(subject_id) = subject_id {
                    query = query.filter(mock_questions::subject_id.eq(subject_id));
                }
                query
                    .order_by(mock_questions::id.asc())
                    .load::<QuestionTags>(self)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;

    /// Vec-backed store mirroring the ordering guarantees of the Postgres one.
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        pub subjects: Vec<i32>,
        pub categories: Vec<ExamCategory>,
        pub chapters: Vec<Chapter>,
        pub exam_questions: Vec<QuestionTags>,
        pub mock_questions: Vec<QuestionTags>,
    }

    impl MemoryStore {
        pub fn with_subjects(subjects: &[i32]) -> Self {
            Self {
                subjects: subjects.to_vec(),
                ..Default::default()
            }
        }

        pub fn add_category(
            &mut self,
            id: i32,
            subject_id: i32,
            parent_id: Option<i32>,
            name: &str,
            order_num: i32,
            enabled: bool,
        ) {
            self.categories.push(ExamCategory {
                id,
                subject_id,
                parent_id,
                name: name.to_string(),
                code: name.to_string(),
                description: None,
                order_num,
                enabled,
                created_at: None,
                modified_at: None,
            });
        }

        pub fn add_chapter(
            &mut self,
            id: i32,
            subject_id: i32,
            parent_id: Option<i32>,
            name: &str,
            order_num: i32,
            enabled: bool,
        ) {
            self.chapters.push(Chapter {
                id,
                subject_id,
                parent_id,
                name: name.to_string(),
                order_num,
                enabled,
                created_at: None,
                modified_at: None,
            });
        }

        pub fn add_question(
            &mut self,
            kind: QuestionKind,
            subject_id: i32,
            category: Option<&str>,
            question_type: &str,
        ) {
            let rows = match kind {
                QuestionKind::Exam => &mut self.exam_questions,
                QuestionKind::Mock => &mut self.mock_questions,
            };
            rows.push(QuestionTags {
                id: rows.len() as i32 + 1,
                subject_id: Some(subject_id),
                category: category.map(String::from),
                question_type: question_type.to_string(),
            });
        }
    }

    impl CatalogStore for MemoryStore {
        fn subject_exists(&mut self, subject_id: i32) -> QueryResult<bool> {
            Ok(self.subjects.contains(&subject_id))
        }

        fn fetch_categories(
            &mut self,
            subject_id: Option<i32>,
            enabled_only: bool,
        ) -> QueryResult<Vec<ExamCategory>> {
            let mut rows: Vec<ExamCategory> = self
                .categories
                .iter()
                .filter(|c| subject_id.map_or(true, |sid| c.subject_id == sid))
                .filter(|c| !enabled_only || c.enabled)
                .cloned()
                .collect();
            rows.sort_by_key(|c| (c.order_num, c.id));
            Ok(rows)
        }

        fn fetch_category(&mut self, category_id: i32) -> QueryResult<Option<ExamCategory>> {
            Ok(self.categories.iter().find(|c| c.id == category_id).cloned())
        }

        fn count_child_categories(&mut self, category_id: i32) -> QueryResult<i64> {
            Ok(self
                .categories
                .iter()
                .filter(|c| c.parent_id == Some(category_id))
                .count() as i64)
        }

        fn delete_category(&mut self, category_id: i32) -> QueryResult<usize> {
            let before = self.categories.len();
            self.categories.retain(|c| c.id != category_id);
            Ok(before - self.categories.len())
        }

        fn fetch_chapters(
            &mut self,
            subject_id: i32,
            enabled_only: bool,
        ) -> QueryResult<Vec<Chapter>> {
            let mut rows: Vec<Chapter> = self
                .chapters
                .iter()
                .filter(|c| c.subject_id == subject_id)
                .filter(|c| !enabled_only || c.enabled)
                .cloned()
                .collect();
            rows.sort_by_key(|c| (c.order_num, c.id));
            Ok(rows)
        }

        fn fetch_question_tags(
            &mut self,
            kind: QuestionKind,
            subject_id: Option<i32>,
        ) -> QueryResult<Vec<QuestionTags>> {
            let rows = match kind {
                QuestionKind::Exam => &self.exam_questions,
                QuestionKind::Mock => &self.mock_questions,
            };
            Ok(rows
                .iter()
                .filter(|q| subject_id.is_none() || q.subject_id == subject_id)
                .cloned()
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_kind_parsing() {
        assert_eq!("exam".parse::<QuestionKind>(), Ok(QuestionKind::Exam));
        assert_eq!("mock".parse::<QuestionKind>(), Ok(QuestionKind::Mock));
        assert!("EXAM".parse::<QuestionKind>().is_err());
        assert_eq!(QuestionKind::Mock.to_string(), "mock");
        assert_eq!(QuestionKind::default(), QuestionKind::Exam);
    }

    #[test]
    fn test_question_kind_serde() {
        assert_eq!(
            serde_json::to_string(&QuestionKind::Mock).unwrap(),
            "\"mock\""
        );
        let kind: QuestionKind = serde_json::from_str("\"exam\"").unwrap();
        assert_eq!(kind, QuestionKind::Exam);
    }
}
