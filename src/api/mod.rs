pub mod categories;
pub mod chapters;
pub mod error;
pub mod hierarchy;
pub mod questions;
mod state;
pub mod store;
pub mod subjects;
pub mod tag_counts;

use crate::config::Settings;
use axum::http::{HeaderValue, Method};
use axum::Router;
use serde::{Deserialize, Deserializer};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use error::ApiError;
pub use hierarchy::{CategoryNode, CategoryTree, CategoryUsage, ChapterNode, ChapterTree, TreeNode};
pub use state::{build_pool, AppState, Pool};
pub use store::{CatalogStore, QuestionKind};

/// Lets `Option<Option<T>>` tell an absent field (`None`) from an explicit
/// `null` (`Some(None)`). Use together with `#[serde(default)]`.
pub(crate) fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Routes without middleware, for tests and embedding.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(subjects::create_router())
        .merge(chapters::create_router())
        .merge(categories::create_router())
        .merge(questions::create_router())
}

pub fn create_router(pool: Pool, settings: &Settings) -> Router {
    let state = AppState::new(pool);

    routes()
        .layer(cors_layer(&settings.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "deserialize_some")]
        parent_id: Option<Option<i32>>,
    }

    #[test]
    fn test_deserialize_some() {
        let absent: Patch = serde_json::from_str("{}").unwrap();
        let null: Patch = serde_json::from_str(r#"{"parent_id": null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"parent_id": 7}"#).unwrap();

        assert_eq!(absent.parent_id, None);
        assert_eq!(null.parent_id, Some(None));
        assert_eq!(set.parent_id, Some(Some(7)));
    }

    #[test]
    fn test_routes_build() {
        // Overlapping route definitions panic when the router is assembled
        let _router: Router<AppState> = routes();
    }
}
