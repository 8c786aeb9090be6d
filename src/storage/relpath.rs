// 存储根目录内的相对路径工具
//
// 相对路径总是以 `/` 开头，目录以 `/` 结尾，根目录为 `/`

/// 是否为根目录
pub fn is_root(path: &str) -> bool {
    path.trim_matches('/').is_empty()
}

/// 去掉目录结尾的 `/`（根目录保持 `/`）
pub fn trim_dir_marker(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// 转为目录形式（结尾带 `/`）
pub fn as_dir(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// 在目录下拼接子项名
pub fn join(dir: &str, name: &str) -> String {
    let name = name.trim_matches('/');
    format!("{}{}", as_dir(dir), name)
}

/// 在目录下拼接子目录名（结尾带 `/`）
pub fn join_dir(dir: &str, name: &str) -> String {
    as_dir(&join(dir, name))
}

/// 父目录（结尾带 `/`）；根目录的父目录仍是根目录
pub fn parent(path: &str) -> String {
    let trimmed = trim_dir_marker(path);
    match trimmed.rfind('/') {
        Some(idx) => trimmed[..=idx].to_string(),
        None => "/".to_string(),
    }
}

/// 最后一段名称
pub fn file_name(path: &str) -> &str {
    let trimmed = trim_dir_marker(path);
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// 最后一个 `.` 之后的扩展名，没有则为空串
pub fn extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[idx + 1..],
        None => "",
    }
}

/// `path` 是否位于目录 `dir` 之内（不含 `dir` 本身）
pub fn is_within(path: &str, dir: &str) -> bool {
    let dir = as_dir(dir);
    path.len() > dir.len() && path.starts_with(&dir)
}

/// 把 `path` 从 `from` 目录下重新挂到 `to` 目录下
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    let from = as_dir(from);
    let rest = path.strip_prefix(&from)?;
    Some(format!("{}{}", as_dir(to), rest))
}
