use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use diesel::result::DatabaseErrorKind;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Database error: {0}")]
    DatabaseError(diesel::result::Error),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal server error")]
    InternalServerError,
}

/// Body returned for every non-2xx response.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => ApiError::NotFound("Record not found".to_string()),
            // Constraint checks that raced a concurrent write
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info) => {
                warn!("Unique constraint violated: {}", info.message());
                ApiError::Conflict("Record already exists".to_string())
            }
            diesel::result::Error::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, ref info) => {
                warn!("Foreign key constraint violated: {}", info.message());
                ApiError::Conflict("Record is still referenced".to_string())
            }
            _ => ApiError::DatabaseError(err),
        }
    }
}

impl From<diesel::r2d2::PoolError> for ApiError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        error!("Failed to get connection from pool: {:?}", err);
        ApiError::InternalServerError
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if let ApiError::DatabaseError(ref err) = self {
            error!("Database error: {:?}", err);
        }

        let body = ErrorBody {
            code: status_code.as_u16(),
            message: self.to_string(),
        };

        (status_code, Json(body)).into_response()
    }
}
