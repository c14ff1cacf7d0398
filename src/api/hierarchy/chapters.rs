use super::generics::{build_tree, TreeItem, TreeNode};
use crate::api::error::ApiError;
use crate::api::store::CatalogStore;
use crate::tables::Chapter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterNode {
    pub id: i32,
    pub subject_id: i32,
    pub parent_id: Option<i32>,
    pub name: String,
    pub order_num: i32,
    pub enabled: bool,
}

impl From<Chapter> for ChapterNode {
    fn from(chapter: Chapter) -> Self {
        Self {
            id: chapter.id,
            subject_id: chapter.subject_id,
            parent_id: chapter.parent_id,
            name: chapter.name,
            order_num: chapter.order_num,
            enabled: chapter.enabled,
        }
    }
}

impl TreeItem for ChapterNode {
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

pub type ChapterTree = Vec<TreeNode<ChapterNode>>;

pub fn get_tree<S: CatalogStore>(
    store: &mut S,
    subject_id: i32,
    enabled_only: bool,
) -> Result<ChapterTree, ApiError> {
    if !store.subject_exists(subject_id)? {
        warn!("Subject {} not found", subject_id);
        return Err(ApiError::NotFound(format!("Subject not found: {subject_id}")));
    }

    let chapters = store.fetch_chapters(subject_id, enabled_only)?;
    let tree = build_tree(chapters.into_iter().map(ChapterNode::from).collect());

    info!(
        "Built chapter tree for subject {} with {} roots",
        subject_id,
        tree.len()
    );
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::store::memory::MemoryStore;

    fn names(nodes: &[TreeNode<ChapterNode>]) -> Vec<&str> {
        nodes.iter().map(|node| node.data.name.as_str()).collect()
    }

    fn store() -> MemoryStore {
        let mut store = MemoryStore::with_subjects(&[1]);
        store.add_chapter(1, 1, None, "Linear lists", 2, true);
        store.add_chapter(2, 1, None, "Introduction", 1, true);
        store.add_chapter(3, 1, Some(1), "Sequential storage", 1, true);
        store.add_chapter(4, 1, Some(1), "Linked storage", 2, false);
        store.add_chapter(5, 1, Some(4), "Doubly linked lists", 1, true);
        store
    }

    #[test]
    fn test_chapter_tree_all() {
        let mut store = store();
        let tree = get_tree(&mut store, 1, false).unwrap();

        assert_eq!(names(&tree), vec!["Introduction", "Linear lists"]);
        assert_eq!(
            names(&tree[1].children),
            vec!["Sequential storage", "Linked storage"]
        );
        assert_eq!(names(&tree[1].children[1].children), vec!["Doubly linked lists"]);
    }

    #[test]
    fn test_chapter_tree_enabled_promotes_orphans() {
        let mut store = store();
        let tree = get_tree(&mut store, 1, true).unwrap();

        assert_eq!(
            names(&tree),
            vec!["Introduction", "Doubly linked lists", "Linear lists"]
        );
        assert_eq!(names(&tree[2].children), vec!["Sequential storage"]);
    }

    #[test]
    fn test_chapter_tree_unknown_subject() {
        let mut store = store();
        assert!(matches!(get_tree(&mut store, 7, true), Err(ApiError::NotFound(_))));
    }
}
