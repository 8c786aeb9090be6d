// 成功响应
//
// JSON 载荷包在 {"data": ...} 中；字节流直接输出并带上下载相关响应头

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::filemanager::{Disposition, FileStream, Payload};
use crate::storage::relpath;
use crate::uploader::UploadOutcome;

/// 按扩展名推断 Content-Type
pub fn content_type_for(name: &str) -> &'static str {
    match relpath::extension(name).to_lowercase().as_str() {
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "txt" | "md" | "csv" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "ogv" => "video/ogg",
        _ => "application/octet-stream",
    }
}

/// Content-Disposition，非 ASCII 文件名同时给出 RFC 5987 编码形式
fn disposition_header(disposition: Disposition, name: &str) -> String {
    let kind = match disposition {
        Disposition::Inline => "inline",
        Disposition::Attachment => "attachment",
    };
    let fallback: String = name
        .chars()
        .map(|c| if c.is_ascii() && c != '"' && c != '\\' && !c.is_ascii_control() { c } else { '_' })
        .collect();
    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind,
        fallback,
        urlencoding::encode(name)
    )
}

fn upload_meta(outcomes: &[UploadOutcome]) -> Value {
    let sessions: Vec<Value> = outcomes
        .iter()
        .filter_map(|o| o.session.as_ref())
        .map(|s| json!({ "target": s.target, "received": s.received, "total": s.total }))
        .collect();
    json!({
        "complete": outcomes.iter().all(|o| o.complete),
        "sessions": sessions,
    })
}

fn file_response(file: FileStream) -> Response {
    let status = if file.range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut response = Response::new(Body::from_stream(file.stream));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&file.name)));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.length));
    if let Ok(value) = HeaderValue::from_str(&disposition_header(file.disposition, &file.name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some((start, end)) = file.range {
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        if let Ok(value) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, file.total)) {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }
    if file.disposition == Disposition::Attachment {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("must-revalidate"));
    }
    response
}

impl IntoResponse for Payload {
    fn into_response(self) -> Response {
        match self {
            Payload::Item(item) => Json(json!({ "data": item })).into_response(),
            Payload::Items(items) => Json(json!({ "data": items })).into_response(),
            Payload::Uploaded(outcomes) => {
                let meta = upload_meta(&outcomes);
                let items: Vec<_> = outcomes.into_iter().map(|o| o.item).collect();
                Json(json!({ "data": items, "meta": meta })).into_response()
            }
            Payload::Summary(summary) => Json(json!({
                "data": { "id": "/", "type": "summary", "attributes": summary }
            }))
            .into_response(),
            Payload::Initiate(info) => Json(json!({
                "data": { "id": "/", "type": "initiate", "attributes": { "config": info } }
            }))
            .into_response(),
            Payload::File(file) => file_response(file),
        }
    }
}
