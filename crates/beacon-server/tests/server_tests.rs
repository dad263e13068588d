//! End-to-end tests for the index service.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use beacon_core::{
    BeaconConfig, BeaconError, Item, ItemType, MediaContent, MemoryDatabase, QueryFilter,
    dir_filename,
};
use beacon_server::{BeaconService, ExtensionParser, Mountpoint, ServerRequest, ServerResponse};
use tempfile::TempDir;

struct Fixture {
    temp: TempDir,
    disk: PathBuf,
    service: Arc<BeaconService>,
}

fn config(temp: &TempDir) -> BeaconConfig {
    BeaconConfig::builder()
        .database_dir(temp.path().join("db"))
        .watch(false)
        .parse_timer(Duration::from_millis(1))
        .update_timer(Duration::from_millis(1))
        .commit_delay(Duration::from_millis(5))
        .rescan_interval(Duration::from_secs(60))
        .build()
        .unwrap()
}

fn fixture_with(config: impl FnOnce(&TempDir) -> BeaconConfig) -> Fixture {
    let temp = TempDir::new().unwrap();
    let disk = temp.path().join("disk1");
    fs::create_dir(&disk).unwrap();
    let disk = fs::canonicalize(&disk).unwrap();

    let config = config(&temp);
    let db = Arc::new(MemoryDatabase::new(&config.database_dir));
    let service = BeaconService::with_hardware(config, db, Arc::new(ExtensionParser::new()), None);
    Fixture {
        temp,
        disk,
        service,
    }
}

fn fixture() -> Fixture {
    fixture_with(config)
}

fn mtime_secs(path: &Path) -> i64 {
    fs::metadata(path)
        .unwrap()
        .modified()
        .unwrap()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

async fn children(service: &BeaconService, dir: &Path) -> Vec<Item> {
    let filter = QueryFilter::new().parent_path(dir);
    match service.handle(ServerRequest::Query { filter }).await.unwrap() {
        ServerResponse::Items(items) => items,
        other => panic!("unexpected response {other:?}"),
    }
}

async fn next_cycle(mp: &Mountpoint, after: u64) {
    let finished = tokio::time::timeout(Duration::from_secs(10), mp.crawler().wait_cycle(after))
        .await
        .unwrap();
    assert!(finished);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_directory_is_indexed() {
    let f = fixture();
    fs::write(f.disk.join("a.jpg"), b"jpeg").unwrap();

    let mp = f.service.add_directory(&f.disk).await.unwrap();
    next_cycle(&mp, 0).await;

    let items = children(&f.service, &f.disk).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name(), "a.jpg");
    assert_eq!(items[0].kind, ItemType::from("image"));
    assert_eq!(items[0].mtime, mtime_secs(&f.disk.join("a.jpg")));
    assert_eq!(items[0].media, mp.id());

    f.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_load_is_idempotent() {
    let f = fixture();
    let mp = f.service.add_directory(&f.disk).await.unwrap();
    let id = mp.id().unwrap();

    assert!(!mp.load(id.clone()).await.unwrap());
    let again = f.service.add_directory(&f.disk).await.unwrap();
    assert!(Arc::ptr_eq(&mp, &again));
    assert_eq!(f.service.media().len(), 1);

    let info = f
        .service
        .handle(ServerRequest::MediaInformation { id })
        .await
        .unwrap();
    let ServerResponse::MediaInfo(Some(row)) = info else {
        panic!("media row missing");
    };
    assert_eq!(row.content, MediaContent::File);
    assert!(f.temp.path().join("db/overlay").join(row.name.file_name()).is_dir());

    f.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_changes_converge_on_rescan() {
    let f = fixture();
    let photo = f.disk.join("a.jpg");
    fs::write(&photo, b"jpeg").unwrap();
    let mp = f.service.add_directory(&f.disk).await.unwrap();
    next_cycle(&mp, 0).await;

    let later = SystemTime::now() + Duration::from_secs(100);
    File::options()
        .write(true)
        .open(&photo)
        .unwrap()
        .set_modified(later)
        .unwrap();
    fs::write(f.disk.join("b.mp3"), b"id3").unwrap();

    let after = mp.crawler().cycles();
    mp.crawler().rescan();
    next_cycle(&mp, after).await;

    let items = children(&f.service, &f.disk).await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].name(), "a.jpg");
    assert_eq!(items[0].mtime, mtime_secs(&photo));
    assert_eq!(items[1].kind, ItemType::from("audio"));

    fs::remove_file(&photo).unwrap();
    let after = mp.crawler().cycles();
    mp.crawler().rescan();
    next_cycle(&mp, after).await;
    let items = children(&f.service, &f.disk).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].name(), "b.mp3");

    f.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_adds_share_one_mountpoint() {
    let f = fixture();
    let (first, second) = tokio::join!(
        f.service.add_directory(&f.disk),
        f.service.add_directory(&f.disk)
    );
    assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    assert_eq!(f.service.media().len(), 1);

    f.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remounted_media_follows_new_mountpoint() {
    let f = fixture();
    let device = f.temp.path().join("sdz1");
    fs::write(&device, b"").unwrap();
    let usb0 = f.temp.path().join("usb0");
    let usb1 = f.temp.path().join("usb1");
    fs::create_dir(&usb0).unwrap();
    fs::create_dir(&usb1).unwrap();
    fs::write(usb0.join("a.jpg"), b"jpeg").unwrap();
    fs::write(usb1.join("a.jpg"), b"jpeg").unwrap();
    fs::write(usb1.join("b.jpg"), b"jpeg").unwrap();
    let usb0 = fs::canonicalize(&usb0).unwrap();
    let usb1 = fs::canonicalize(&usb1).unwrap();

    let added = f
        .service
        .handle(ServerRequest::DeviceAdd {
            device: Some(device.clone()),
            mountpoint: usb0.clone(),
        })
        .await
        .unwrap();
    let ServerResponse::Media(Some(media)) = added else {
        panic!("added media missing");
    };
    let id = media.id.unwrap();
    next_cycle(&f.service.media().get(&id).unwrap(), 0).await;
    assert_eq!(children(&f.service, &usb0).await.len(), 1);

    f.service
        .handle(ServerRequest::DeviceRemove { id: id.clone() })
        .await
        .unwrap();
    f.service
        .handle(ServerRequest::DeviceAdd {
            device: Some(device),
            mountpoint: usb1.clone(),
        })
        .await
        .unwrap();
    let mp = f.service.media().get(&id).unwrap();
    assert_eq!(mp.mountpoint(), usb1);
    next_cycle(&mp, 0).await;

    let root = mp.root().unwrap().unwrap();
    assert_eq!(root.filename, dir_filename(&usb1));
    let names: Vec<String> = children(&f.service, &usb1)
        .await
        .iter()
        .map(|item| item.name().to_string())
        .collect();
    assert_eq!(names, ["a.jpg", "b.jpg"]);
    assert!(children(&f.service, &usb0).await.is_empty());

    f.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_most_specific_mountpoint_wins() {
    let f = fixture();
    let inner = f.disk.join("inner");
    fs::create_dir(&inner).unwrap();

    f.service.add_directory(&f.disk).await.unwrap();
    f.service.add_directory(&inner).await.unwrap();

    let media = f.service.media();
    assert_eq!(media.mountpoint(&inner.join("x/y")).unwrap().mountpoint(), inner);
    assert_eq!(media.mountpoint(&f.disk.join("other")).unwrap().mountpoint(), f.disk);
    assert!(media.mountpoint(Path::new("/elsewhere")).is_none());

    f.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_device_requests() {
    let f = fixture();
    let mp = f.service.add_directory(&f.disk).await.unwrap();
    let id = mp.id().unwrap();

    let eject = f
        .service
        .handle(ServerRequest::DeviceEject { id: id.clone() })
        .await;
    assert!(eject.is_err());

    let removed = f
        .service
        .handle(ServerRequest::DeviceRemove { id: id.clone() })
        .await
        .unwrap();
    let ServerResponse::Media(Some(media)) = removed else {
        panic!("removed media missing");
    };
    assert_eq!(media.id, Some(id.clone()));
    assert!(f.service.media().is_empty());

    let again = f.service.handle(ServerRequest::DeviceRemove { id: id.clone() }).await.unwrap();
    assert_eq!(again, ServerResponse::Media(None));

    let unknown = f.service.handle(ServerRequest::DeviceEject { id }).await;
    assert!(matches!(unknown, Err(BeaconError::UnknownMedia { .. })));

    f.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_requires_known_media() {
    let f = fixture();
    let result = f
        .service
        .handle(ServerRequest::Monitor {
            directory: f.disk.clone(),
        })
        .await;
    assert!(result.is_err());

    f.service.add_directory(&f.disk).await.unwrap();
    let done = f
        .service
        .handle(ServerRequest::Monitor {
            directory: f.disk.clone(),
        })
        .await
        .unwrap();
    assert_eq!(done, ServerResponse::Done);

    f.service.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_channel_cache_is_loaded() {
    let f = fixture_with(|temp| {
        let path = temp.path().join("channels.xml");
        fs::write(
            &path,
            r#"<channels><channel url="http://example.com/feed"><directory>/media/feed</directory></channel></channels>"#,
        )
        .unwrap();
        let mut config = config(temp);
        config.channels_file = Some(path);
        config
    });

    let channels = f.service.channels().lock();
    assert_eq!(channels.list().len(), 1);
    assert!(channels.get("http://example.com/feed").is_some());
}

#[test]
fn test_request_wire_format() {
    let request = ServerRequest::DeviceRemove {
        id: beacon_core::MediaId::new("label:DISK"),
    };
    let json = serde_json::to_string(&request).unwrap();
    assert!(json.contains(r#""method":"device_remove""#));
}
