// 错误响应
//
// 失败时输出 {"errors":[{"id":"server","code":"<status>","title":"<key>","meta":{"arguments":[..]}}]}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::storage::{ErrorKind, FmError};

#[derive(Debug, Serialize)]
struct ErrorMeta {
    arguments: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ErrorObject {
    id: &'static str,
    code: String,
    title: &'static str,
    meta: ErrorMeta,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    errors: Vec<ErrorObject>,
}

/// 错误类别对应的 HTTP 状态码
pub fn status_of(err: &FmError) -> StatusCode {
    match err.kind {
        ErrorKind::PathEscape => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PolicyRestricted => StatusCode::FORBIDDEN,
        ErrorKind::QuotaExceeded => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::UploadValidation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Archive => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::InvalidRequest if err.key == "INVALID_RANGE" => StatusCode::RANGE_NOT_SATISFIABLE,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Storage => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for FmError {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        if status.is_server_error() {
            error!("请求失败: {}", self);
        } else {
            warn!("请求被拒绝: {}", self);
        }

        let body = ErrorBody {
            errors: vec![ErrorObject {
                id: "server",
                code: status.as_u16().to_string(),
                title: self.key,
                meta: ErrorMeta { arguments: self.args },
            }],
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_of(&FmError::path_escape("/..")), StatusCode::FORBIDDEN);
        assert_eq!(status_of(&FmError::not_found("/a")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(&FmError::conflict("/a")), StatusCode::CONFLICT);
        assert_eq!(
            status_of(&FmError::new(ErrorKind::InvalidRequest, "INVALID_RANGE")),
            StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            status_of(&FmError::new(ErrorKind::InvalidRequest, "FORBIDDEN_ACTION_DIR")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(&FmError::storage("ERROR_SERVER", "/a")), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = FmError::not_found("/missing.txt").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["errors"][0]["id"], "server");
        assert_eq!(value["errors"][0]["code"], "404");
        assert_eq!(value["errors"][0]["title"], "FILE_DOES_NOT_EXIST");
        assert_eq!(value["errors"][0]["meta"]["arguments"][0], "/missing.txt");
    }
}
