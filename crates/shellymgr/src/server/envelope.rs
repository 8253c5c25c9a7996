// Response envelope and error mapping.
//
// Every success is `{success:true, data, meta}`; every failure is
// `{success:false, error:{code,message,details?}, meta}`. The error
// code is the stable `ErrorKind` string; HTTP status follows the kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use shellymgr_core::model::PageMeta;
use shellymgr_core::{CoreError, ErrorKind};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn meta(pagination: Option<PageMeta>) -> serde_json::Value {
    let mut meta = json!({
        "request_id": uuid::Uuid::new_v4().to_string(),
        "version": VERSION,
    });
    if let (Some(pagination), Some(map)) = (pagination, meta.as_object_mut()) {
        map.insert(
            "pagination".into(),
            serde_json::to_value(pagination).unwrap_or_default(),
        );
    }
    meta
}

/// `200 OK` with the standard envelope.
pub fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({
        "success": true,
        "data": data,
        "meta": meta(None),
    }))
    .into_response()
}

/// `200 OK` for listings, with pagination metadata.
pub fn ok_paged<T: Serialize>(items: &[T], pagination: PageMeta) -> Response {
    Json(json!({
        "success": true,
        "data": items,
        "meta": meta(Some(pagination)),
    }))
    .into_response()
}

/// Error wrapper mapping `CoreError` kinds onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl From<shellymgr_api::Error> for ApiError {
    fn from(err: shellymgr_api::Error) -> Self {
        Self(err.into())
    }
}

pub type ApiResult = Result<Response, ApiError>;

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::AuthRequired | ErrorKind::AuthFailed => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Unreachable => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();

        // Validation carries every failing field as details.
        let details = match &self.0 {
            CoreError::Validation { errors } => {
                serde_json::to_value(errors).ok()
            }
            CoreError::Device { code, message } => Some(json!({
                "device_code": code,
                "device_message": message,
            })),
            _ => None,
        };

        let mut error = json!({
            "code": kind.as_str(),
            "message": self.0.to_string(),
        });
        if let (Some(details), Some(map)) = (details, error.as_object_mut()) {
            map.insert("details".into(), details);
        }

        (
            status_for(kind),
            Json(json!({
                "success": false,
                "error": error,
                "meta": meta(None),
            })),
        )
            .into_response()
    }
}
