// 连接器 API 处理器
//
// GET  /api/filemanager?mode=..   查询类与简单写操作
// POST /api/filemanager           multipart（upload/replace）或表单（savefile/extract）

use axum::{
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{header, HeaderMap},
    Form,
};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::filemanager::{Action, Payload};
use crate::security::RequestContext;
use crate::server::state::AppState;
use crate::storage::{ByteRange, ErrorKind, FmError};
use crate::uploader::{ContentRange, UploadFile};

/// GET 查询参数
#[derive(Debug, Default, Deserialize)]
pub struct ConnectorQuery {
    #[serde(default)]
    pub mode: String,
    pub path: Option<String>,
    pub name: Option<String>,
    pub old: Option<String>,
    pub new: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub thumbnail: Option<String>,
}

/// POST 表单参数
#[derive(Debug, Default, Deserialize)]
pub struct ConnectorForm {
    #[serde(default)]
    pub mode: String,
    pub path: Option<String>,
    pub content: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
}

fn mode_error(mode: &str) -> FmError {
    FmError::new(ErrorKind::InvalidRequest, "MODE_ERROR").with_arg(mode)
}

fn required(value: Option<String>, name: &str) -> Result<String, FmError> {
    value.ok_or_else(|| FmError::new(ErrorKind::InvalidRequest, "INVALID_ACTION").with_arg(name))
}

fn upload_error(detail: impl ToString) -> FmError {
    FmError::new(ErrorKind::InvalidRequest, "ERROR_UPLOADING_FILE").with_arg(detail.to_string())
}

/// 解析 `Range: bytes=start-[end]`
///
/// # 返回
/// - 没有 Range 头时返回 None
/// - 格式错误或 start > end 时返回 INVALID_RANGE
pub fn parse_range(headers: &HeaderMap) -> Result<Option<ByteRange>, FmError> {
    let Some(value) = headers.get(header::RANGE) else {
        return Ok(None);
    };
    let invalid = || FmError::new(ErrorKind::InvalidRequest, "INVALID_RANGE");
    let text = value.to_str().map_err(|_| invalid())?;

    let re = Regex::new(r"^bytes=(\d+)-(\d*)$").map_err(|_| invalid())?;
    let caps = re.captures(text.trim()).ok_or_else(invalid)?;
    let start: u64 = caps[1].parse().map_err(|_| invalid())?;
    let end = match &caps[2] {
        "" => None,
        digits => Some(digits.parse::<u64>().map_err(|_| invalid())?),
    };
    if end.is_some_and(|end| end < start) {
        return Err(invalid());
    }
    Ok(Some(ByteRange { start, end }))
}

fn request_context(state: &AppState, headers: &HeaderMap) -> RequestContext {
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    RequestContext::new(state.access.clone()).with_content_length(content_length)
}

impl ConnectorQuery {
    fn into_action(self, range: Option<ByteRange>) -> Result<Action, FmError> {
        let action = match self.mode.as_str() {
            "initiate" => Action::Initiate,
            "getfolder" => Action::GetFolder {
                path: self.path.unwrap_or_else(|| "/".to_string()),
            },
            "getfile" => Action::GetFile {
                path: required(self.path, "path")?,
            },
            "addfolder" => Action::AddFolder {
                path: required(self.path, "path")?,
                name: required(self.name, "name")?,
            },
            "rename" => Action::Rename {
                old: required(self.old, "old")?,
                new: required(self.new, "new")?,
            },
            "move" => Action::Move {
                old: required(self.old, "old")?,
                new: required(self.new, "new")?,
            },
            "copy" => Action::Copy {
                source: required(self.source, "source")?,
                target: required(self.target, "target")?,
            },
            "delete" => Action::Delete {
                path: required(self.path, "path")?,
            },
            "editfile" => Action::EditFile {
                path: required(self.path, "path")?,
            },
            "readfile" => Action::ReadFile {
                path: required(self.path, "path")?,
                range,
            },
            "getimage" => Action::GetImage {
                path: required(self.path, "path")?,
                thumbnail: self.thumbnail.as_deref() == Some("true"),
            },
            "download" => Action::Download {
                path: required(self.path, "path")?,
            },
            "summarize" => Action::Summarize,
            other => return Err(mode_error(other)),
        };
        Ok(action)
    }
}

impl ConnectorForm {
    fn into_action(self) -> Result<Action, FmError> {
        let action = match self.mode.as_str() {
            "savefile" => Action::SaveFile {
                path: required(self.path, "path")?,
                content: self.content.unwrap_or_default(),
            },
            "extract" => Action::Extract {
                source: required(self.source, "source")?,
                target: required(self.target, "target")?,
            },
            other => return Err(mode_error(other)),
        };
        Ok(action)
    }
}

/// 读取 multipart 上传请求；Content-Range 头作用于请求中的文件
async fn multipart_action(mut multipart: Multipart, headers: &HeaderMap, param_name: &str) -> Result<Action, FmError> {
    let range = headers
        .get(header::CONTENT_RANGE)
        .map(|v| v.to_str().map_err(upload_error).and_then(ContentRange::parse))
        .transpose()?;
    let list_name = format!("{}[]", param_name);

    let mut mode = None;
    let mut path = None;
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == param_name || name == list_name {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let data = field.bytes().await.map_err(upload_error)?;
            let file = UploadFile::new(file_name, data);
            files.push(match range {
                Some(range) => file.with_range(range),
                None => file,
            });
            continue;
        }

        let value = field.text().await.map_err(upload_error)?;
        match name.as_str() {
            "mode" => mode = Some(value),
            "path" => path = Some(value),
            _ => debug!("忽略未知表单字段: {}", name),
        }
    }

    let path = required(path, "path")?;
    match mode.as_deref().unwrap_or_default() {
        "upload" => Ok(Action::Upload { path, files }),
        "replace" => {
            let file = files.into_iter().next().ok_or_else(|| upload_error("缺少上传文件"))?;
            Ok(Action::Replace { path, file })
        }
        other => Err(mode_error(other)),
    }
}

/// GET /api/filemanager?mode=getfolder&path=/
pub async fn connector_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ConnectorQuery>,
) -> Result<Payload, FmError> {
    let ctx = request_context(&state, &headers);
    let range = if query.mode == "readfile" {
        parse_range(&headers)?
    } else {
        None
    };
    let action = query.into_action(range)?;
    info!("API: {}", action.mode());
    state.file_manager.handle(action, &ctx).await
}

/// POST /api/filemanager
pub async fn connector_post(State(state): State<AppState>, request: Request) -> Result<Payload, FmError> {
    let headers = request.headers().clone();
    let ctx = request_context(&state, &headers);
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("multipart/form-data"));

    let action = if is_multipart {
        let multipart = Multipart::from_request(request, &state).await.map_err(upload_error)?;
        multipart_action(multipart, &headers, &state.config.upload.param_name).await?
    } else {
        let Form(form) = Form::<ConnectorForm>::from_request(request, &state)
            .await
            .map_err(|e| FmError::new(ErrorKind::InvalidRequest, "INVALID_ACTION").with_arg(e.to_string()))?;
        form.into_action()?
    };
    info!("API: {}", action.mode());
    state.file_manager.handle(action, &ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn range_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::RANGE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range(&HeaderMap::new()).unwrap(), None);
        assert_eq!(
            parse_range(&range_headers("bytes=2-5")).unwrap(),
            Some(ByteRange { start: 2, end: Some(5) })
        );
        assert_eq!(
            parse_range(&range_headers("bytes=7-")).unwrap(),
            Some(ByteRange { start: 7, end: None })
        );
        assert_eq!(parse_range(&range_headers("bytes=5-2")).unwrap_err().key, "INVALID_RANGE");
        assert_eq!(parse_range(&range_headers("items=0-1")).unwrap_err().key, "INVALID_RANGE");
    }

    #[test]
    fn test_query_into_action() {
        let query = ConnectorQuery {
            mode: "rename".to_string(),
            old: Some("/a.txt".to_string()),
            new: Some("b.txt".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            query.into_action(None).unwrap(),
            Action::Rename { old, new } if old == "/a.txt" && new == "b.txt"
        ));

        let query = ConnectorQuery {
            mode: "delete".to_string(),
            ..Default::default()
        };
        assert_eq!(query.into_action(None).unwrap_err().key, "INVALID_ACTION");

        let query = ConnectorQuery {
            mode: "format".to_string(),
            ..Default::default()
        };
        assert_eq!(query.into_action(None).unwrap_err().key, "MODE_ERROR");
    }

    #[test]
    fn test_form_into_action() {
        let form = ConnectorForm {
            mode: "extract".to_string(),
            source: Some("/a.zip".to_string()),
            target: Some("/out/".to_string()),
            ..Default::default()
        };
        assert!(matches!(form.into_action().unwrap(), Action::Extract { .. }));
    }

    #[test]
    fn test_query_values_decoded_once() {
        let uri: axum::http::Uri = "/api/filemanager?mode=getfile&path=%2F50%2541off.txt".parse().unwrap();
        let Query(query) = Query::<ConnectorQuery>::try_from_uri(&uri).unwrap();
        assert!(matches!(
            query.into_action(None).unwrap(),
            Action::GetFile { path } if path == "/50%41off.txt"
        ));
    }
}
