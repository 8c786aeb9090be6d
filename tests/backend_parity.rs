// 同一组连接器场景分别在本地磁盘与对象存储后端上运行，结果必须一致

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use filemanager_rust::config::AppConfig;
use filemanager_rust::filemanager::FileStream;
use filemanager_rust::storage::{LocalDisk, MemoryObjectClient, ObjectStore};
use filemanager_rust::uploader::UploadFile;
use filemanager_rust::{ErrorKind, FileManager, RequestContext, StorageBackend};
use futures::TryStreamExt;
use tempfile::TempDir;

struct Fixture {
    label: &'static str,
    /// 本地磁盘的根目录所在的外层目录，用来检查没有文件写到根目录之外
    outer: Option<TempDir>,
    backend: Arc<dyn StorageBackend>,
    fm: FileManager,
}

fn fixtures(config: &AppConfig) -> Vec<Fixture> {
    let outer = TempDir::new().unwrap();
    let root = outer.path().join("root");
    std::fs::create_dir(&root).unwrap();
    let local: Arc<dyn StorageBackend> = Arc::new(LocalDisk::new(&root).unwrap());
    let remote: Arc<dyn StorageBackend> =
        Arc::new(ObjectStore::new(Arc::new(MemoryObjectClient::new()), "tenant/files"));

    vec![
        Fixture {
            label: "local",
            outer: Some(outer),
            backend: local.clone(),
            fm: FileManager::new(local, config).unwrap(),
        },
        Fixture {
            label: "object_store",
            outer: None,
            backend: remote.clone(),
            fm: FileManager::new(remote, config).unwrap(),
        },
    ]
}

fn png(width: u32, height: u32) -> Bytes {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buf)
}

fn zip_of(entries: &[(&str, Option<&[u8]>)]) -> Bytes {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, data) in entries {
        match data {
            Some(data) => {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            None => writer.add_directory(*name, options).unwrap(),
        }
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

async fn body(file: FileStream) -> Vec<u8> {
    let chunks: Vec<Bytes> = file.stream.try_collect().await.unwrap();
    chunks.concat()
}

#[tokio::test]
async fn test_allow_list_upload() {
    let mut config = AppConfig::default();
    config.security.extensions.restrictions = vec!["jpg".to_string(), "png".to_string()];
    let ctx = RequestContext::default();

    for fx in fixtures(&config) {
        let err = fx
            .fm
            .upload("/", vec![UploadFile::new("malware.exe", Bytes::from_static(b"MZ"))], &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UploadValidation, "{}", fx.label);
        assert!(!fx.backend.exists("/malware.exe").await.unwrap(), "{}", fx.label);

        let outcomes = fx
            .fm
            .upload("/", vec![UploadFile::new("cat.png", png(16, 12))], &ctx)
            .await
            .unwrap();
        assert_eq!(outcomes[0].item.id, "/cat.png", "{}", fx.label);
        assert!(outcomes[0].complete);

        let meta = fx.backend.stat("/cat.png").await.unwrap().unwrap();
        assert!(!meta.is_dir, "{}", fx.label);
        let item = fx.fm.get_file("/cat.png", &ctx).await.unwrap();
        assert_eq!(item.attributes.width, Some(16), "{}", fx.label);
    }
}

#[tokio::test]
async fn test_add_folder_idempotence() {
    let ctx = RequestContext::default();

    for fx in fixtures(&AppConfig::default()) {
        fx.fm.add_folder("/", "projects", &ctx).await.unwrap();
        fx.backend
            .write("/projects/plan.txt", Bytes::from_static(b"draft"))
            .await
            .unwrap();

        let err = fx.fm.add_folder("/", "projects", &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict, "{}", fx.label);

        let items = fx.fm.get_folder("/projects/", &ctx).await.unwrap();
        assert_eq!(items.len(), 1, "{}", fx.label);
        assert_eq!(fx.backend.read_all("/projects/plan.txt").await.unwrap(), b"draft");
    }
}

#[tokio::test]
async fn test_write_read_round_trip() {
    let ctx = RequestContext::default();
    let large: Vec<u8> = (0..3 * 1024 * 1024 + 17).map(|i| (i % 251) as u8).collect();

    for fx in fixtures(&AppConfig::default()) {
        for payload in [Vec::new(), b"hello".to_vec(), large.clone()] {
            fx.backend.write("/a.txt", Bytes::from(payload.clone())).await.unwrap();
            assert_eq!(fx.backend.read_all("/a.txt").await.unwrap(), payload, "{}", fx.label);

            let file = fx.fm.read_file("/a.txt", None, &ctx).await.unwrap();
            assert_eq!(file.total, payload.len() as u64, "{}", fx.label);
            assert_eq!(body(file).await, payload, "{}", fx.label);
        }
    }
}

#[tokio::test]
async fn test_thumbnail_follows_rename() {
    let ctx = RequestContext::default();

    for fx in fixtures(&AppConfig::default()) {
        fx.backend.mkdir("/dir/").await.unwrap();
        fx.backend.write("/dir/a.jpg", png(40, 30)).await.unwrap();
        fx.fm.get_image("/dir/a.jpg", true, &ctx).await.unwrap();
        assert!(fx.backend.exists("/_thumbs/dir/a.jpg").await.unwrap(), "{}", fx.label);

        fx.fm.rename("/dir/a.jpg", "b.jpg", &ctx).await.unwrap();
        assert!(fx.backend.exists("/_thumbs/dir/b.jpg").await.unwrap(), "{}", fx.label);
        assert!(!fx.backend.exists("/_thumbs/dir/a.jpg").await.unwrap(), "{}", fx.label);
    }
}

#[tokio::test]
async fn test_extract_skips_escaping_entries() {
    let ctx = RequestContext::default();
    let archive = zip_of(&[
        ("../../evil.txt", Some(b"pwned")),
        ("readme.txt", Some(b"hi")),
        ("docs/", None),
        ("docs/guide.md", Some(b"# guide")),
    ]);

    for fx in fixtures(&AppConfig::default()) {
        fx.backend.mkdir("/dest/").await.unwrap();
        fx.backend.write("/bundle.zip", archive.clone()).await.unwrap();

        let items = fx.fm.extract("/bundle.zip", "/dest/", &ctx).await.unwrap();
        let mut ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["/dest/docs/", "/dest/readme.txt"], "{}", fx.label);

        assert_eq!(fx.backend.read_all("/dest/docs/guide.md").await.unwrap(), b"# guide");
        assert!(!fx.backend.exists("/evil.txt").await.unwrap(), "{}", fx.label);
        if let Some(outer) = &fx.outer {
            assert!(!outer.path().join("evil.txt").exists());
            assert!(!outer.path().parent().unwrap().join("evil.txt").exists());
        }
    }
}

#[tokio::test]
async fn test_upload_name_collision() {
    let ctx = RequestContext::default();

    for fx in fixtures(&AppConfig::default()) {
        fx.backend
            .write("/report.pdf", Bytes::from_static(b"%PDF original"))
            .await
            .unwrap();

        let outcomes = fx
            .fm
            .upload("/", vec![UploadFile::new("report.pdf", Bytes::from_static(b"%PDF second"))], &ctx)
            .await
            .unwrap();
        assert_eq!(outcomes[0].item.id, "/report(1).pdf", "{}", fx.label);
        assert_eq!(fx.backend.read_all("/report.pdf").await.unwrap(), b"%PDF original");
        assert_eq!(fx.backend.read_all("/report(1).pdf").await.unwrap(), b"%PDF second");
    }
}

#[tokio::test]
async fn test_folder_download_entry_count() {
    let ctx = RequestContext::default();

    for fx in fixtures(&AppConfig::default()) {
        fx.backend.mkdir_all("/album/day1/").await.unwrap();
        fx.backend.write("/album/a.txt", Bytes::from_static(b"a")).await.unwrap();
        fx.backend.write("/album/b.txt", Bytes::from_static(b"bb")).await.unwrap();
        fx.backend.write("/album/day1/c.txt", Bytes::from_static(b"ccc")).await.unwrap();

        let file = fx.fm.download("/album/", &ctx).await.unwrap();
        assert_eq!(file.name, "album.zip", "{}", fx.label);
        let bytes = body(file).await;

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 4, "{}", fx.label);

        let mut content = String::new();
        archive.by_name("day1/c.txt").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "ccc");
    }
}

#[tokio::test]
async fn test_missing_and_escaping_paths_fail_alike() {
    let ctx = RequestContext::default();

    for fx in fixtures(&AppConfig::default()) {
        let err = fx.fm.get_file("/nope.txt", &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound, "{}", fx.label);

        let err = fx.fm.get_folder("/../../etc/", &ctx).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::PathEscape, "{}", fx.label);
    }
}
