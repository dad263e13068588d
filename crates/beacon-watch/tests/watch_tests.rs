use std::fs;
use std::time::Duration;

use beacon_watch::{ChangeKind, INotify, WatchEvent};
use tempfile::TempDir;
use tokio::sync::broadcast;

async fn collect_until(
    rx: &mut broadcast::Receiver<WatchEvent>,
    stop: impl Fn(&WatchEvent) -> bool,
) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        let done = stop(&event);
        events.push(event);
        if done {
            break;
        }
    }
    events
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_write_yields_create_without_modify() {
    let Ok(inotify) = INotify::new() else {
        return;
    };
    let temp = TempDir::new().unwrap();
    let mut rx = inotify.watch(temp.path()).unwrap();

    let file = temp.path().join("a.jpg");
    fs::write(&file, b"jpeg bytes").unwrap();

    let events = collect_until(&mut rx, |e| e.kind == ChangeKind::CloseWrite).await;
    let kinds: Vec<ChangeKind> = events.iter().map(|e| e.kind).collect();

    assert_eq!(kinds, [ChangeKind::Create, ChangeKind::CloseWrite]);
    assert!(events.iter().all(|e| e.path == file));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_catch_all_and_ignore() {
    let Ok(inotify) = INotify::new() else {
        return;
    };
    let temp = TempDir::new().unwrap();
    let sub = temp.path().join("sub");
    fs::create_dir(&sub).unwrap();

    let _root_rx = inotify.watch(temp.path()).unwrap();
    let _sub_rx = inotify.watch(&sub).unwrap();
    let mut all = inotify.subscribe_all();
    assert!(inotify.is_watched(&sub));

    fs::write(sub.join("x"), b"").unwrap();
    let events = collect_until(&mut all, |e| e.kind == ChangeKind::CloseWrite).await;
    assert!(events.iter().any(|e| e.path == sub.join("x")));

    inotify.ignore(&sub).unwrap();
    assert!(!inotify.is_watched(&sub));
    assert!(inotify.ignore(&sub).is_err());
}

#[tokio::test]
async fn test_missing_path_is_an_error() {
    let Ok(inotify) = INotify::new() else {
        return;
    };
    let err = inotify
        .watch("/definitely/not/here".as_ref())
        .unwrap_err();
    assert!(!err.is_unavailable());
}
