use beacon_core::{
    AttrValue, Database, Item, ItemId, ItemType, MediaContent, MediaId, MemoryDatabase,
    QueryFilter, SchemaRegistry,
};
use tempfile::TempDir;

#[test]
fn test_item_id_equality() {
    let id1 = ItemId::new(ItemType::Dir, 42);
    let id2 = ItemId::new(ItemType::Dir, 42);
    let id3 = ItemId::new(ItemType::File, 42);

    assert_eq!(id1, id2);
    assert_ne!(id1, id3);
    assert_eq!(id1.to_string(), "dir:42");
}

#[test]
fn test_item_serde_round_trip_keeps_type_tags() {
    let mut item = Item::new_file("/media/disk1/a.jpg", Some(ItemId::new(ItemType::Dir, 1)));
    item.kind = ItemType::from("image");
    item.mtime = 1_700_000_000;
    item.attributes.insert("width".into(), AttrValue::Int(640));
    item.attributes.insert("comment".into(), AttrValue::Text("beach".into()));

    let json = serde_json::to_string(&item).unwrap();
    assert!(json.contains("\"image\""));
    let back: Item = serde_json::from_str(&json).unwrap();
    assert_eq!(back, item);
}

#[test]
fn test_media_root_lookup() {
    let db = MemoryDatabase::new("/tmp");
    let id = MediaId::new("7a1c-22f0");

    assert!(db.query_media(&id).unwrap().is_none());

    db.add_media(&id, MediaContent::File, Default::default())
        .unwrap();
    let root = db
        .add_object(Item::new_dir("/media/usb", None).with_media(id.clone()))
        .unwrap();

    let record = db.query_media(&id).unwrap().unwrap();
    assert_eq!(record.row.name, id);
    assert_eq!(record.root.and_then(|r| r.id), root.id);

    assert!(
        db.add_media(&id, MediaContent::File, Default::default())
            .is_err()
    );
}

#[test]
fn test_query_filters_combine() {
    let db = MemoryDatabase::new("/tmp");
    let root = db.add_object(Item::new_dir("/music", None)).unwrap();

    let mut song = Item::new_file("/music/song.mp3", root.id.clone());
    song.kind = ItemType::from("audio");
    song.attributes.insert("artist".into(), "Nina".into());
    db.add_object(song).unwrap();
    db.add_object(Item::new_file("/music/cover.txt", root.id.clone()))
        .unwrap();

    let audio = db
        .query(&QueryFilter::new().parent_path("/music").kind("audio"))
        .unwrap();
    assert_eq!(audio.len(), 1);
    assert_eq!(audio[0].name(), "song.mp3");

    let by_artist = db
        .query(&QueryFilter::new().attribute("artist", "Nina"))
        .unwrap();
    assert_eq!(by_artist.len(), 1);
}

#[test]
fn test_default_schema_covers_builtin_types() {
    let registry = SchemaRegistry::with_defaults();
    for name in ["dir", "file", "image", "video", "audio", "track_cdda"] {
        assert!(registry.get(&ItemType::from(name)).is_some(), "{name}");
    }
}

#[test]
fn test_persistent_store_commit() {
    let temp = TempDir::new().unwrap();
    let db = MemoryDatabase::open(temp.path()).unwrap();
    db.add_object(Item::new_dir("/media/disk1", None)).unwrap();

    let summary = db.commit().unwrap();
    assert_eq!(summary.changes, 1);
    assert!(temp.path().join("index.json").exists());
}
