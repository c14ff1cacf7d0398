pub use crate::api::hierarchy::{
    CategoryNode, CategoryStats, CategoryTree, CategoryUsage, ChapterNode, ChapterTree, TreeNode,
};
pub use crate::api::QuestionKind;
use crate::{CATEGORIES_API, CHAPTERS_API};
use reqwest::{self, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unexpected server error ({0}): {1}")]
    ServerError(StatusCode, String),
}

// * URLs .....................................................................

pub fn category_tree_url(base_url: &str, subject_id: i32, enabled_only: bool) -> String {
    let base_url = base_url.trim_end_matches('/');
    if enabled_only {
        format!("{base_url}/{CATEGORIES_API}/subject/{subject_id}/tree/enabled")
    } else {
        format!("{base_url}/{CATEGORIES_API}/subject/{subject_id}/tree")
    }
}

pub fn filtered_category_tree_url(base_url: &str, subject_id: i32, kind: QuestionKind) -> String {
    format!(
        "{}/{CATEGORIES_API}/subject/{subject_id}/tree/enabled/{kind}",
        base_url.trim_end_matches('/')
    )
}

pub fn category_usage_url(base_url: &str, category_id: i32) -> String {
    format!(
        "{}/{CATEGORIES_API}/{category_id}/usage",
        base_url.trim_end_matches('/')
    )
}

pub fn chapter_tree_url(base_url: &str, subject_id: i32, all: bool) -> String {
    let base_url = base_url.trim_end_matches('/');
    if all {
        format!("{base_url}/{CHAPTERS_API}/subject/{subject_id}/tree/all")
    } else {
        format!("{base_url}/{CHAPTERS_API}/subject/{subject_id}/tree")
    }
}

// * Client ...................................................................

async fn get_json<T: DeserializeOwned>(url: &str) -> Result<T, ClientError> {
    let response = reqwest::get(url).await?;

    if response.status() == StatusCode::NOT_FOUND {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::NotFound(error_text));
    }

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::ServerError(status, error_text));
    }

    Ok(response.json::<T>().await?)
}

pub async fn fetch_category_tree(
    base_url: &str,
    subject_id: i32,
    enabled_only: bool,
) -> Result<CategoryTree, ClientError> {
    get_json(&category_tree_url(base_url, subject_id, enabled_only)).await
}

pub async fn fetch_filtered_category_tree(
    base_url: &str,
    subject_id: i32,
    kind: QuestionKind,
) -> Result<CategoryTree, ClientError> {
    get_json(&filtered_category_tree_url(base_url, subject_id, kind)).await
}

pub async fn fetch_category_usage(
    base_url: &str,
    category_id: i32,
) -> Result<CategoryUsage, ClientError> {
    get_json(&category_usage_url(base_url, category_id)).await
}

pub async fn fetch_chapter_tree(
    base_url: &str,
    subject_id: i32,
    all: bool,
) -> Result<ChapterTree, ClientError> {
    get_json(&chapter_tree_url(base_url, subject_id, all)).await
}

// * Rendering ................................................................

/// One line of the `--simple` outline.
pub trait OutlineLabel {
    fn label(&self) -> String;
}

impl OutlineLabel for CategoryNode {
    fn label(&self) -> String {
        format!("{} ({})", self.name, self.question_count)
    }
}

impl OutlineLabel for ChapterNode {
    fn label(&self) -> String {
        self.name.clone()
    }
}

/// Indented outline, two spaces per level.
pub fn render_tree<T: OutlineLabel>(nodes: &[TreeNode<T>]) -> String {
    let mut out = String::new();
    let mut stack: Vec<(&TreeNode<T>, usize)> = nodes.iter().rev().map(|node| (node, 0)).collect();

    while let Some((node, depth)) = stack.pop() {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&node.data.label());
        out.push('\n');
        stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
    }
    out
}
