use crate::schema::*;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Queryable, Selectable, Serialize, Deserialize, Clone, PartialEq)]
#[diesel(table_name = subjects)]
pub struct Subject {
    pub id: i32,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub order_num: i32,
    pub enabled: bool,
    pub created_at: Option<chrono::NaiveDateTime>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

impl Subject {
    pub fn get_all(conn: &mut PgConnection) -> diesel::QueryResult<Vec<Subject>> {
        use crate::schema::subjects::dsl::*;
        subjects
            .order_by((order_num.asc(), id.asc()))
            .select(Subject::as_select())
            .load(conn)
    }

    pub fn get_by_id(conn: &mut PgConnection, subject_id: i32) -> diesel::QueryResult<Subject> {
        subjects::table
            .find(subject_id)
            .select(Subject::as_select())
            .first(conn)
    }
}

#[derive(Insertable)]
#[diesel(table_name = subjects)]
pub struct NewSubject<'a> {
    pub name: &'a str,
    pub code: &'a str,
    pub description: Option<&'a str>,
    pub order_num: i32,
    pub enabled: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = subjects)]
pub struct SubjectChangeset<'a> {
    pub name: Option<&'a str>,
    pub code: Option<&'a str>,
    pub description: Option<Option<&'a str>>,
    pub order_num: Option<i32>,
    pub enabled: Option<bool>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

#[derive(Debug, Queryable, Selectable, Serialize, Deserialize, Clone, PartialEq)]
#[diesel(table_name = chapters)]
pub struct Chapter {
    pub id: i32,
    pub subject_id: i32,
    pub parent_id: Option<i32>,
    pub name: String,
    pub order_num: i32,
    pub enabled: bool,
    pub created_at: Option<chrono::NaiveDateTime>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

impl Chapter {
    pub fn get_by_id(conn: &mut PgConnection, chapter_id: i32) -> diesel::QueryResult<Chapter> {
        chapters::table
            .find(chapter_id)
            .select(Chapter::as_select())
            .first(conn)
    }
}

#[derive(Insertable)]
#[diesel(table_name = chapters)]
pub struct NewChapter<'a> {
    pub subject_id: i32,
    pub parent_id: Option<i32>,
    pub name: &'a str,
    pub order_num: i32,
    pub enabled: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = chapters)]
pub struct ChapterChangeset<'a> {
    pub parent_id: Option<Option<i32>>,
    pub name: Option<&'a str>,
    pub order_num: Option<i32>,
    pub enabled: Option<bool>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

#[derive(Debug, Queryable, Selectable, Serialize, Deserialize, Clone, PartialEq)]
#[diesel(table_name = exam_categories)]
pub struct ExamCategory {
    pub id: i32,
    pub subject_id: i32,
    pub parent_id: Option<i32>,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub order_num: i32,
    pub enabled: bool,
    pub created_at: Option<chrono::NaiveDateTime>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = exam_categories)]
pub struct NewExamCategory<'a> {
    pub subject_id: i32,
    pub parent_id: Option<i32>,
    pub name: &'a str,
    pub code: &'a str,
    pub description: Option<&'a str>,
    pub order_num: i32,
    pub enabled: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = exam_categories)]
pub struct ExamCategoryChangeset<'a> {
    pub parent_id: Option<Option<i32>>,
    pub name: Option<&'a str>,
    pub code: Option<&'a str>,
    pub description: Option<Option<&'a str>>,
    pub order_num: Option<i32>,
    pub enabled: Option<bool>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

#[derive(Debug, Queryable, Selectable, Serialize, Deserialize, Clone, PartialEq)]
#[diesel(table_name = exam_questions)]
pub struct ExamQuestion {
    pub id: i32,
    pub subject_id: Option<i32>,
    pub year: i32,
    pub question_number: Option<i32>,
    pub question_type: String,
    pub title: Option<String>,
    pub content: String,
    pub answer: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub created_at: Option<chrono::NaiveDateTime>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = exam_questions)]
pub struct NewExamQuestion<'a> {
    pub subject_id: Option<i32>,
    pub year: i32,
    pub question_number: Option<i32>,
    pub question_type: &'a str,
    pub title: Option<&'a str>,
    pub content: &'a str,
    pub answer: Option<&'a str>,
    pub category: Option<&'a str>,
    pub difficulty: Option<&'a str>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = exam_questions)]
pub struct ExamQuestionChangeset<'a> {
    pub subject_id: Option<Option<i32>>,
    pub year: Option<i32>,
    pub question_number: Option<Option<i32>>,
    pub question_type: Option<&'a str>,
    pub title: Option<Option<&'a str>>,
    pub content: Option<&'a str>,
    pub answer: Option<Option<&'a str>>,
    pub category: Option<Option<&'a str>>,
    pub difficulty: Option<Option<&'a str>>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

#[derive(Debug, Queryable, Selectable, Serialize, Deserialize, Clone, PartialEq)]
#[diesel(table_name = mock_questions)]
pub struct MockQuestion {
    pub id: i32,
    pub subject_id: Option<i32>,
    pub source: String,
    pub question_number: Option<i32>,
    pub question_type: String,
    pub title: Option<String>,
    pub content: String,
    pub answer: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub created_at: Option<chrono::NaiveDateTime>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = mock_questions)]
pub struct NewMockQuestion<'a> {
    pub subject_id: Option<i32>,
    pub source: &'a str,
    pub question_number: Option<i32>,
    pub question_type: &'a str,
    pub title: Option<&'a str>,
    pub content: &'a str,
    pub answer: Option<&'a str>,
    pub category: Option<&'a str>,
    pub difficulty: Option<&'a str>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = mock_questions)]
pub struct MockQuestionChangeset<'a> {
    pub subject_id: Option<Option<i32>>,
    pub source: Option<&'a str>,
    pub question_number: Option<Option<i32>>,
    pub question_type: Option<&'a str>,
    pub title: Option<Option<&'a str>>,
    pub content: Option<&'a str>,
    pub answer: Option<Option<&'a str>>,
    pub category: Option<Option<&'a str>>,
    pub difficulty: Option<Option<&'a str>>,
    pub modified_at: Option<chrono::NaiveDateTime>,
}

/// The slice of a question row the tag aggregator consumes.
/// Loaded from either question table with a tuple select.
#[derive(Debug, Clone, PartialEq, Queryable)]
pub struct QuestionTags {
    pub id: i32,
    pub subject_id: Option<i32>,
    pub category: Option<String>,
    pub question_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::result::Error as DieselError;

    fn establish_connection() -> PgConnection {
        dotenv::dotenv().ok();
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set in .env file");
        PgConnection::establish(&database_url).expect("Error connecting to database")
    }

    fn insert_subject(conn: &mut PgConnection, subject_name: &str, subject_code: &str) -> Subject {
        diesel::insert_into(subjects::table)
            .values(&NewSubject {
                name: subject_name,
                code: subject_code,
                description: None,
                order_num: 1,
                enabled: true,
            })
            .returning(Subject::as_returning())
            .get_result(conn)
            .expect("Error saving new subject")
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn test_subject_crud() {
        let conn = &mut establish_connection();

        conn.test_transaction(|conn| {
            let created = insert_subject(conn, "Data Structures", "ds-crud");
            assert_eq!(created.code, "ds-crud");

            let read = Subject::get_by_id(conn, created.id)?;
            assert_eq!(read.name, "Data Structures");

            let updated = diesel::update(subjects::table.find(created.id))
                .set(&SubjectChangeset {
                    name: Some("Algorithms"),
                    ..Default::default()
                })
                .returning(Subject::as_returning())
                .get_result(conn)?;
            assert_eq!(updated.name, "Algorithms");
            assert_eq!(updated.code, "ds-crud");

            let deleted_count = diesel::delete(subjects::table.find(created.id)).execute(conn)?;
            assert_eq!(deleted_count, 1);

            let find_result = Subject::get_by_id(conn, created.id);
            assert!(matches!(find_result, Err(DieselError::NotFound)));

            Ok::<(), DieselError>(())
        });
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn test_category_parent_can_be_cleared() {
        let conn = &mut establish_connection();

        conn.test_transaction(|conn| {
            let subject = insert_subject(conn, "Operating Systems", "os-parent");

            let parent: ExamCategory = diesel::insert_into(exam_categories::table)
                .values(&NewExamCategory {
                    subject_id: subject.id,
                    parent_id: None,
                    name: "process",
                    code: "process",
                    description: None,
                    order_num: 1,
                    enabled: true,
                })
                .returning(ExamCategory::as_returning())
                .get_result(conn)?;

            let child: ExamCategory = diesel::insert_into(exam_categories::table)
                .values(&NewExamCategory {
                    subject_id: subject.id,
                    parent_id: Some(parent.id),
                    name: "scheduling",
                    code: "scheduling",
                    description: Some("CPU scheduling"),
                    order_num: 1,
                    enabled: true,
                })
                .returning(ExamCategory::as_returning())
                .get_result(conn)?;
            assert_eq!(child.parent_id, Some(parent.id));

            let moved: ExamCategory = diesel::update(exam_categories::table.find(child.id))
                .set(&ExamCategoryChangeset {
                    parent_id: Some(None),
                    ..Default::default()
                })
                .returning(ExamCategory::as_returning())
                .get_result(conn)?;
            assert_eq!(moved.parent_id, None);
            assert_eq!(moved.description.as_deref(), Some("CPU scheduling"));

            Ok::<(), DieselError>(())
        });
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn test_category_with_child_cannot_be_deleted() {
        let conn = &mut establish_connection();

        conn.test_transaction(|conn| {
            let subject = insert_subject(conn, "Compilers", "cc-restrict");

            let parent: ExamCategory = diesel::insert_into(exam_categories::table)
                .values(&NewExamCategory {
                    subject_id: subject.id,
                    parent_id: None,
                    name: "parsing",
                    code: "parsing",
                    description: None,
                    order_num: 1,
                    enabled: true,
                })
                .returning(ExamCategory::as_returning())
                .get_result(conn)?;

            diesel::insert_into(exam_categories::table)
                .values(&NewExamCategory {
                    subject_id: subject.id,
                    parent_id: Some(parent.id),
                    name: "lr-parsing",
                    code: "lr-parsing",
                    description: None,
                    order_num: 1,
                    enabled: true,
                })
                .execute(conn)?;

            // Savepoint, so the failed statement leaves the outer transaction usable
            let result = conn.transaction(|conn| {
                diesel::delete(exam_categories::table.find(parent.id)).execute(conn)
            });
            assert!(matches!(
                result,
                Err(DieselError::DatabaseError(
                    diesel::result::DatabaseErrorKind::ForeignKeyViolation,
                    _
                ))
            ));

            let remaining: i64 = exam_categories::table
                .filter(exam_categories::subject_id.eq(subject.id))
                .count()
                .get_result(conn)?;
            assert_eq!(remaining, 2);

            // Removing the subject still takes the whole tree with it
            diesel::delete(subjects::table.find(subject.id)).execute(conn)?;
            let remaining: i64 = exam_categories::table
                .filter(exam_categories::subject_id.eq(subject.id))
                .count()
                .get_result(conn)?;
            assert_eq!(remaining, 0);

            Ok::<(), DieselError>(())
        });
    }

    #[test]
    #[ignore = "requires DATABASE_URL"]
    fn test_question_tags_select() {
        let conn = &mut establish_connection();

        conn.test_transaction(|conn| {
            let subject = insert_subject(conn, "Networks", "net-tags");

            diesel::insert_into(exam_questions::table)
                .values(&NewExamQuestion {
                    subject_id: Some(subject.id),
                    year: 2021,
                    question_number: Some(3),
                    question_type: "CHOICE",
                    title: None,
                    content: "Which layer routes packets?",
                    answer: Some("Network"),
                    category: Some(r#"["routing","ip"]"#),
                    difficulty: None,
                })
                .execute(conn)?;

            let rows = exam_questions::table
                .filter(exam_questions::subject_id.eq(subject.id))
                .select((
                    exam_questions::id,
                    exam_questions::subject_id,
                    exam_questions::category,
                    exam_questions::question_type,
                ))
                .load::<QuestionTags>(conn)?;

            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].category.as_deref(), Some(r#"["routing","ip"]"#));
            assert_eq!(rows[0].question_type, "CHOICE");

            Ok::<(), DieselError>(())
        });
    }
}
