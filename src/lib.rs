pub mod api;
pub mod client;
pub mod config;
pub mod schema;
pub mod tables;
pub const BASE_URL: &str = "http://localhost:8081";
pub const SUBJECTS_API: &str = "subjects";
pub const CHAPTERS_API: &str = "chapters";
pub const CATEGORIES_API: &str = "categories";
pub const QUESTIONS_API: &str = "questions";
