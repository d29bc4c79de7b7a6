use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use notes_collab::broadcast::{Frame, RoomManager};
use notes_collab::protocol::{ClientEvent, NoteUpdate, ServerEvent};
use notes_collab::relay::merge_updates;
use notes_collab::storage::{RocksNoteStore, StoreConfig};
use notes_core::{NoteDraft, NoteId, NoteStore, UserId};
use serde_json::json;
use uuid::Uuid;

fn sample_update() -> NoteUpdate {
    NoteUpdate {
        note_id: NoteId::new("bench-note"),
        updates: json!({
            "title": "Weekly plan",
            "content": "x".repeat(512),
            "isPublic": false,
            "tags": ["work", "todo"],
        })
        .as_object()
        .cloned()
        .unwrap_or_default(),
    }
}

fn bench_client_event_decode(c: &mut Criterion) {
    let frame = ClientEvent::NoteUpdate(sample_update()).encode().unwrap();

    c.bench_function("note_update_decode_512B", |b| {
        b.iter(|| {
            black_box(ClientEvent::decode(black_box(&frame)).unwrap());
        })
    });
}

fn bench_server_event_encode(c: &mut Criterion) {
    let updates = sample_update().updates;

    c.bench_function("note_updated_encode_512B", |b| {
        b.iter(|| {
            black_box(ServerEvent::NoteUpdated(black_box(updates.clone())).encode().unwrap());
        })
    });
}

fn bench_merge_updates(c: &mut Criterion) {
    let updates = sample_update().updates;

    c.bench_function("merge_updates", |b| {
        b.iter(|| {
            let mut draft = NoteDraft::default();
            black_box(merge_updates(&mut draft, black_box(&updates)));
        })
    });
}

fn bench_fanout_100_members(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let note = NoteId::new("bench-note");
    let frame: Frame = Arc::from(ServerEvent::NoteUpdated(sample_update().updates).encode().unwrap());

    c.bench_function("fanout_1_msg_100_members", |b| {
        b.iter(|| {
            rt.block_on(async {
                let rooms = RoomManager::new(16);
                let mut receivers = Vec::new();
                let mut members = Vec::new();
                for _ in 0..100 {
                    let conn = Uuid::new_v4();
                    receivers.push(rooms.register(conn).await);
                    rooms.join(conn, &note).await.unwrap();
                    members.push(conn);
                }

                let delivered = rooms.broadcast(members[0], &note, black_box(frame.clone())).await;
                black_box(delivered);
            });
        })
    });
}

fn bench_fanout_1000_messages(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let note = NoteId::new("bench-note");
    let frame: Frame = Arc::from(r#"{"event":"user-editing","data":{"user":null}}"#);

    c.bench_function("fanout_1000_msgs_10_members", |b| {
        b.iter(|| {
            rt.block_on(async {
                let rooms = RoomManager::new(1024);
                let mut receivers = Vec::new();
                let sender = Uuid::new_v4();
                receivers.push(rooms.register(sender).await);
                rooms.join(sender, &note).await.unwrap();
                for _ in 0..9 {
                    let conn = Uuid::new_v4();
                    receivers.push(rooms.register(conn).await);
                    rooms.join(conn, &note).await.unwrap();
                }

                for _ in 0..1000 {
                    rooms.broadcast(sender, &note, black_box(frame.clone())).await;
                }
            });
        })
    });
}

fn bench_store_update(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksNoteStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
    let owner = UserId::new("bench-user");
    let note = store.create_note(&owner, NoteDraft::default()).unwrap();
    let patch = notes_core::NotePatch {
        content: Some("y".repeat(1024)),
        ..Default::default()
    };

    c.bench_function("rocks_update_note_1KB", |b| {
        b.iter(|| {
            black_box(store.update_note(&note.id, black_box(&patch)).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_client_event_decode,
    bench_server_event_encode,
    bench_merge_updates,
    bench_fanout_100_members,
    bench_fanout_1000_messages,
    bench_store_update,
);
criterion_main!(benches);
