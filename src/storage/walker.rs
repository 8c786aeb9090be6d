// 目录树遍历
//
// 显式工作栈的先序遍历，目录总在其子项之前出现；
// 汇总统计、ZIP 打包、递归复制/删除共用这一实现

use super::backend::StorageBackend;
use super::error::FmError;
use super::relpath;
use super::types::EntryMeta;

/// 遍历得到的条目
#[derive(Debug, Clone)]
pub struct WalkEntry {
    /// 相对路径，目录以 `/` 结尾
    pub path: String,
    pub meta: EntryMeta,
}

/// 条目过滤器：返回 false 时跳过该条目，目录则不再深入
pub type WalkFilter<'f> = &'f (dyn Fn(&str, &EntryMeta) -> bool + Send + Sync);

/// 先序遍历 `root` 下的所有条目（不含 `root` 本身）
pub async fn walk<B>(backend: &B, root: &str, filter: WalkFilter<'_>) -> Result<Vec<WalkEntry>, FmError>
where
    B: StorageBackend + ?Sized,
{
    let mut out = Vec::new();
    let mut stack = children_of(backend, &relpath::as_dir(root)).await?;
    stack.reverse();

    while let Some(entry) = stack.pop() {
        if !filter(&entry.path, &entry.meta) {
            continue;
        }

        if entry.meta.is_dir {
            let mut children = children_of(backend, &entry.path).await?;
            children.reverse();
            out.push(entry);
            stack.extend(children);
        } else {
            out.push(entry);
        }
    }

    Ok(out)
}

/// 子树统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSummary {
    pub size: u64,
    pub files: u64,
    pub folders: u64,
}

/// 统计 `root` 下（不含自身）通过过滤器的文件总大小、文件数与文件夹数
pub async fn summarize<B>(backend: &B, root: &str, filter: WalkFilter<'_>) -> Result<TreeSummary, FmError>
where
    B: StorageBackend + ?Sized,
{
    let entries = walk(backend, root, filter).await?;
    Ok(entries.iter().fold(TreeSummary::default(), |mut acc, entry| {
        if entry.meta.is_dir {
            acc.folders += 1;
        } else {
            acc.files += 1;
            acc.size += entry.meta.size;
        }
        acc
    }))
}

async fn children_of<B>(backend: &B, dir: &str) -> Result<Vec<WalkEntry>, FmError>
where
    B: StorageBackend + ?Sized,
{
    let mut entries: Vec<WalkEntry> = backend
        .list(dir)
        .await?
        .into_iter()
        .map(|child| {
            let path = if child.meta.is_dir {
                relpath::join_dir(dir, &child.name)
            } else {
                relpath::join(dir, &child.name)
            };
            WalkEntry { path, meta: child.meta }
        })
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}
