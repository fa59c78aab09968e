mod common;

use common::{day, sample_source, text_message, MemoryBook};
use shadowmsg_core::db::apply_migrations;
use shadowmsg_core::error::CoreError;
use shadowmsg_core::query::{
    get_message, list_aliases, list_attachments_for_message, remove_alias, resolve_display_name,
    set_alias, store_stats,
};
use shadowmsg_core::sync::{read_sync_cursor, rebuild_search_indexes, sync, SyncOptions};
use shadowmsg_core::{open_store, open_store_in_memory};
use tempfile::tempdir;

#[test]
fn reopening_store_keeps_data_and_schema() {
    let tmp = tempdir().expect("temp");
    let path = tmp.path().join("nested").join("shadow.db");

    {
        let mut store = open_store(&path).expect("open");
        sync(&mut store.conn, &sample_source(), &SyncOptions::default()).expect("sync");
    }

    let store = open_store(&path).expect("reopen");
    apply_migrations(&store.conn).expect("migrate again");
    let version: i64 = store
        .conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .expect("version");
    assert_eq!(version, 4);
    assert_eq!(store_stats(&store.conn).expect("stats").messages, 5);
    assert_eq!(read_sync_cursor(&store.conn, "message").expect("cursor"), 5);
}

#[test]
fn fts_tables_exist() {
    let store = open_store_in_memory().expect("store");
    for name in ["message_fts", "message_fts_syllable"] {
        let count: i64 = store
            .conn
            .query_row(
                "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name=?1;",
                [name],
                |row| row.get(0),
            )
            .expect("lookup");
        assert_eq!(count, 1, "{} missing", name);
    }
}

#[test]
fn display_name_prefers_alias_then_contact_then_identifier() {
    let mut store = open_store_in_memory().expect("store");
    let mut source = sample_source();
    source.books = vec![MemoryBook::new("main", &[("Kim Minji", "+82 10 1234 5678")])];
    sync(&mut store.conn, &source, &SyncOptions::default()).expect("sync");

    assert_eq!(
        resolve_display_name(&store.conn, 1).expect("name").as_deref(),
        Some("Kim Minji")
    );
    assert_eq!(
        resolve_display_name(&store.conn, 2).expect("name").as_deref(),
        Some("Friend@Example.com")
    );

    set_alias(&store.conn, "010-1234-5678", "Minji", "82").expect("alias");
    assert_eq!(
        resolve_display_name(&store.conn, 1).expect("name").as_deref(),
        Some("Minji")
    );
    let view = get_message(&store.conn, 1).expect("query").expect("row");
    assert_eq!(view.sender_name.as_deref(), Some("Minji"));

    assert!(remove_alias(&store.conn, "+821012345678", "82").expect("remove"));
    assert_eq!(
        resolve_display_name(&store.conn, 1).expect("name").as_deref(),
        Some("Kim Minji")
    );
    assert_eq!(resolve_display_name(&store.conn, 99).expect("name"), None);
}

#[test]
fn blank_contact_name_falls_through() {
    let mut store = open_store_in_memory().expect("store");
    let mut source = sample_source();
    source.books = vec![MemoryBook::new("main", &[("   ", "010-1234-5678")])];
    sync(&mut store.conn, &source, &SyncOptions::default()).expect("sync");
    assert_eq!(
        resolve_display_name(&store.conn, 1).expect("name").as_deref(),
        Some("+821012345678")
    );
}

#[test]
fn alias_upsert_keeps_creation_time() {
    let store = open_store_in_memory().expect("store");
    let first = set_alias(&store.conn, "010-5555-0000", "Dad", "82").expect("set");
    assert_eq!(first.phone_normalized, "+821055550000");
    let second = set_alias(&store.conn, "+82 10 5555 0000", "Father", "82").expect("update");
    assert_eq!(second.created_at, first.created_at);

    let aliases = list_aliases(&store.conn).expect("list");
    assert_eq!(aliases.len(), 1);
    assert_eq!(aliases[0].alias, "Father");

    assert!(matches!(
        set_alias(&store.conn, "010-5555-0000", "  ", "82"),
        Err(CoreError::InvalidArgument(_))
    ));
    assert!(!remove_alias(&store.conn, "010-0000-0000", "82").expect("remove missing"));
}

#[test]
fn attachments_resolve_through_links() {
    let mut store = open_store_in_memory().expect("store");
    sync(&mut store.conn, &sample_source(), &SyncOptions::default()).expect("sync");
    let attachments = list_attachments_for_message(&store.conn, 3).expect("attachments");
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].mime_type.as_deref(), Some("image/jpeg"));
    assert!(list_attachments_for_message(&store.conn, 1).expect("none").is_empty());
}

#[test]
fn manual_index_rebuild_is_repeatable() {
    let mut store = open_store_in_memory().expect("store");
    sync(&mut store.conn, &sample_source(), &SyncOptions::default()).expect("sync");
    rebuild_search_indexes(&store.conn).expect("rebuild");
    rebuild_search_indexes(&store.conn).expect("rebuild again");
    let hits: i64 = store
        .conn
        .query_row(
            "SELECT COUNT(1) FROM message_fts WHERE message_fts MATCH '\"amazon\"';",
            [],
            |row| row.get(0),
        )
        .expect("match");
    assert_eq!(hits, 3);
}

fn match_count(store: &shadowmsg_core::ShadowDb, index: &str, phrase: &str) -> i64 {
    store
        .conn
        .query_row(
            &format!("SELECT COUNT(1) FROM {index} WHERE {index} MATCH ?1;"),
            [phrase],
            |row| row.get(0),
        )
        .expect("match")
}

#[test]
fn later_syncs_index_only_new_messages() {
    let mut store = open_store_in_memory().expect("store");
    let mut source = sample_source();
    sync(&mut store.conn, &source, &SyncOptions::default()).expect("first sync");
    assert_eq!(match_count(&store, "message_fts", "\"amazon\""), 3);

    source
        .messages
        .push(text_message(6, 1, "Amazon refund issued", day(2024, 6, 1)));
    sync(&mut store.conn, &source, &SyncOptions::default()).expect("second sync");
    assert_eq!(match_count(&store, "message_fts", "\"amazon\""), 4);
    assert_eq!(match_count(&store, "message_fts", "\"refund\""), 1);
    assert_eq!(match_count(&store, "message_fts_syllable", "\"a m a z o n\""), 4);

    sync(&mut store.conn, &source, &SyncOptions::default()).expect("idle sync");
    assert_eq!(match_count(&store, "message_fts", "\"amazon\""), 4);

    rebuild_search_indexes(&store.conn).expect("rebuild");
    assert_eq!(match_count(&store, "message_fts", "\"amazon\""), 4);
    assert_eq!(match_count(&store, "message_fts_syllable", "\"a m a z o n\""), 4);
}
