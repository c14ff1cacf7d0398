use super::generics::{build_tree, count_nodes, descendant_ids, filter_empty, TreeItem, TreeNode};
use crate::api::error::ApiError;
use crate::api::store::{CatalogStore, QuestionKind};
use crate::api::tag_counts::{count_tag, counts_by_subject, parse_tags, TagCounts};
use crate::tables::ExamCategory;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// A category row annotated with how many questions reference it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryNode {
    pub id: i32,
    pub subject_id: i32,
    pub parent_id: Option<i32>,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub order_num: i32,
    pub enabled: bool,
    pub question_count: i64,
}

impl CategoryNode {
    pub fn new(category: ExamCategory, question_count: i64) -> Self {
        Self {
            id: category.id,
            subject_id: category.subject_id,
            parent_id: category.parent_id,
            name: category.name,
            code: category.code,
            description: category.description,
            order_num: category.order_num,
            enabled: category.enabled,
            question_count,
        }
    }
}

impl TreeItem for CategoryNode {
    fn id(&self) -> i32 {
        self.id
    }

    fn parent_id(&self) -> Option<i32> {
        self.parent_id
    }

    fn order_num(&self) -> i32 {
        self.order_num
    }

    fn question_count(&self) -> Option<i64> {
        Some(self.question_count)
    }
}

impl TreeItem for ExamCategory {
    fn id(&self) -> i32 {
        self.id
    }

    fn parent_id(&self) -> Option<i32> {
        self.parent_id
    }

    fn order_num(&self) -> i32 {
        self.order_num
    }
}

pub type CategoryTree = Vec<TreeNode<CategoryNode>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryUsage {
    pub id: i32,
    pub name: String,
    pub has_children: bool,
    pub question_count: i64,
    pub mock_count: i64,
    pub can_delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryStats {
    pub total: i64,
    pub enabled: i64,
    pub tagged_questions: i64,
}

/// Attaches a question count to every category, crediting only questions of
/// the category's own subject.
pub fn annotate(categories: Vec<ExamCategory>, counts: &HashMap<i32, TagCounts>) -> Vec<CategoryNode> {
    categories
        .into_iter()
        .map(|category| {
            let count = counts
                .get(&category.subject_id)
                .map_or(0, |tags| tags.count(&category.name));
            CategoryNode::new(category, count)
        })
        .collect()
}

fn ensure_subject<S: CatalogStore>(store: &mut S, subject_id: i32) -> Result<(), ApiError> {
    if !store.subject_exists(subject_id)? {
        warn!("Subject {} not found", subject_id);
        return Err(ApiError::NotFound(format!("Subject not found: {subject_id}")));
    }
    Ok(())
}

/// Flat, annotated category list. `subject_id = None` covers every subject.
pub fn list_categories<S: CatalogStore>(
    store: &mut S,
    subject_id: Option<i32>,
    enabled_only: bool,
    kind: QuestionKind,
) -> Result<Vec<CategoryNode>, ApiError> {
    if let Some(subject_id) = subject_id {
        ensure_subject(store, subject_id)?;
    }

    let categories = store.fetch_categories(subject_id, enabled_only)?;
    let questions = store.fetch_question_tags(kind, subject_id)?;
    let counts = counts_by_subject(&questions);

    Ok(annotate(categories, &counts))
}

/// Enabled rows of one subject, without counts.
pub fn list_enabled<S: CatalogStore>(store: &mut S, subject_id: i32) -> Result<Vec<ExamCategory>, ApiError> {
    ensure_subject(store, subject_id)?;
    Ok(store.fetch_categories(Some(subject_id), true)?)
}

pub fn get_tree<S: CatalogStore>(
    store: &mut S,
    subject_id: i32,
    enabled_only: bool,
    kind: QuestionKind,
) -> Result<CategoryTree, ApiError> {
    info!(
        "Building category tree for subject {} (enabled_only: {}, kind: {})",
        subject_id, enabled_only, kind
    );

    let nodes = list_categories(store, Some(subject_id), enabled_only, kind)?;
    let tree = build_tree(nodes);

    info!(
        "Built category tree for subject {}: {} roots, {} nodes",
        subject_id,
        tree.len(),
        count_nodes(&tree)
    );
    Ok(tree)
}

/// Enabled categories of a subject with every question-free branch removed.
pub fn get_filtered_tree<S: CatalogStore>(
    store: &mut S,
    subject_id: i32,
    kind: QuestionKind,
) -> Result<CategoryTree, ApiError> {
    let tree = get_tree(store, subject_id, true, kind)?;
    Ok(filter_empty(tree))
}

fn find_category<S: CatalogStore>(store: &mut S, category_id: i32) -> Result<ExamCategory, ApiError> {
    store.fetch_category(category_id)?.ok_or_else(|| {
        warn!("Category {} not found", category_id);
        ApiError::NotFound(format!("Category not found: {category_id}"))
    })
}

fn count_category<S: CatalogStore>(
    store: &mut S,
    category: &ExamCategory,
    kind: QuestionKind,
) -> Result<i64, ApiError> {
    let questions = store.fetch_question_tags(kind, Some(category.subject_id))?;
    Ok(count_tag(
        questions.iter().map(|q| q.category.as_deref()),
        &category.name,
    ))
}

pub fn check_usage<S: CatalogStore>(store: &mut S, category_id: i32) -> Result<CategoryUsage, ApiError> {
    let category = find_category(store, category_id)?;

    let has_children = store.count_child_categories(category_id)? > 0;
    let question_count = count_category(store, &category, QuestionKind::Exam)?;
    let mock_count = count_category(store, &category, QuestionKind::Mock)?;

    Ok(CategoryUsage {
        id: category.id,
        name: category.name,
        has_children,
        question_count,
        mock_count,
        can_delete: !has_children && question_count == 0 && mock_count == 0,
    })
}

/// Deletes a category nobody depends on. Children and tagged questions must
/// be moved or re-tagged first.
pub fn delete<S: CatalogStore>(store: &mut S, category_id: i32) -> Result<(), ApiError> {
    let usage = check_usage(store, category_id)?;

    if usage.has_children {
        warn!("Refusing to delete category {}: has children", category_id);
        return Err(ApiError::Conflict(format!(
            "Category {} has child categories",
            usage.name
        )));
    }
    if usage.question_count > 0 {
        warn!(
            "Refusing to delete category {}: used by {} exam questions",
            category_id, usage.question_count
        );
        return Err(ApiError::Conflict(format!(
            "Category {} is used by {} exam questions",
            usage.name, usage.question_count
        )));
    }
    if usage.mock_count > 0 {
        warn!(
            "Refusing to delete category {}: used by {} mock questions",
            category_id, usage.mock_count
        );
        return Err(ApiError::Conflict(format!(
            "Category {} is used by {} mock questions",
            usage.name, usage.mock_count
        )));
    }

    if store.delete_category(category_id)? == 0 {
        return Err(ApiError::NotFound(format!("Category not found: {category_id}")));
    }

    info!("Deleted category {} ({})", category_id, usage.name);
    Ok(())
}

/// Enabled top-level categories that `exclude_id` could be moved under.
pub fn available_parents<S: CatalogStore>(
    store: &mut S,
    subject_id: i32,
    exclude_id: Option<i32>,
) -> Result<Vec<ExamCategory>, ApiError> {
    ensure_subject(store, subject_id)?;
    let categories = store.fetch_categories(Some(subject_id), false)?;

    let excluded: HashSet<i32> = match exclude_id {
        Some(id) => {
            let mut ids = descendant_ids(&categories, id);
            ids.insert(id);
            ids
        }
        None => HashSet::new(),
    };

    Ok(categories
        .into_iter()
        .filter(|c| c.enabled && c.parent_id.is_none() && !excluded.contains(&c.id))
        .collect())
}

pub fn category_stats<S: CatalogStore>(
    store: &mut S,
    subject_id: Option<i32>,
    kind: QuestionKind,
) -> Result<CategoryStats, ApiError> {
    let categories = store.fetch_categories(subject_id, false)?;
    let questions = store.fetch_question_tags(kind, subject_id)?;

    let tagged_questions = questions
        .iter()
        .filter(|q| !parse_tags(q.category.as_deref()).is_empty())
        .count() as i64;

    Ok(CategoryStats {
        total: categories.len() as i64,
        enabled: categories.iter().filter(|c| c.enabled).count() as i64,
        tagged_questions,
    })
}
