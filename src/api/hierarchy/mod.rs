pub mod categories;
pub mod chapters;
pub mod generics;

pub use categories::{CategoryNode, CategoryStats, CategoryTree, CategoryUsage};
pub use chapters::{ChapterNode, ChapterTree};
pub use generics::{TreeItem, TreeNode};
