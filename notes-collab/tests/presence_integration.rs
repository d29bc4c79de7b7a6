//! Typing presence across two editors connected through a real relay.

use std::sync::Arc;

use notes_collab::autosave::{AutosaveConfig, ServicePersistence};
use notes_collab::client::{ClientConfig, ConnectionState, RelayClient, RelayEmitter, RelayEvent};
use notes_collab::editor::EditorSession;
use notes_collab::server::{RelayServer, ServerConfig};
use notes_core::{MemoryStore, NoteDraft, NoteField, NoteId, NoteService, User};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant};

async fn start_test_server() -> (Arc<RelayServer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(RelayServer::new(ServerConfig {
        bind_addr: addr.to_string(),
        ..ServerConfig::default()
    }));
    let running = server.clone();
    tokio::spawn(async move {
        let _ = running.serve(listener).await;
    });
    (server, format!("ws://{addr}"))
}

async fn connected_client(url: &str) -> (Arc<RelayClient>, mpsc::Receiver<RelayEvent>) {
    let mut client = RelayClient::connect(ClientConfig::new(url)).await.unwrap();
    let events = client.take_event_rx().unwrap();
    timeout(Duration::from_secs(2), async {
        while client.connection_state() != ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client never connected");
    (Arc::new(client), events)
}

async fn wait_for_members(server: &RelayServer, note: &NoteId, count: usize) {
    timeout(Duration::from_secs(2), async {
        while server.room_manager().members(note).await.len() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("room membership did not settle");
}

/// Feed relay events into `editor` until `done` holds.
async fn pump_until(
    editor: &mut EditorSession,
    events: &mut mpsc::Receiver<RelayEvent>,
    done: impl Fn(&EditorSession) -> bool,
) {
    timeout(Duration::from_secs(2), async {
        while !done(editor) {
            match events.recv().await {
                Some(event) => editor.apply_remote(event, Instant::now()),
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("condition not reached");
}

struct Users {
    service: NoteService,
    alice: User,
    bob: User,
}

fn users() -> Users {
    let service = NoteService::new(Arc::new(MemoryStore::new()));
    let alice = service.register_user("Alice", "alice@example.com").unwrap();
    let bob = service.register_user("Bob", "bob@example.com").unwrap();
    Users { service, alice, bob }
}

#[tokio::test]
async fn test_typing_label_follows_remote_editor() {
    let (server, url) = start_test_server().await;
    let u = users();
    let note = u
        .service
        .create(Some(&u.alice.id), NoteDraft::default())
        .unwrap();
    let note = u
        .service
        .add_collaborator(Some(&u.alice.id), note.id.as_str(), "bob@example.com")
        .unwrap()
        .unwrap();

    let config = AutosaveConfig {
        save_delay: Duration::from_millis(50),
        typing_timeout: Duration::from_millis(100),
    };
    let (alice_relay, _alice_events) = connected_client(&url).await;
    let (bob_relay, mut bob_events) = connected_client(&url).await;

    let mut alice = EditorSession::open(
        u.alice.to_ref(),
        &note,
        Arc::new(ServicePersistence::new(u.service.clone(), u.alice.id.clone())),
        Some(alice_relay.clone() as Arc<dyn RelayEmitter>),
        &config,
    );
    wait_for_members(&server, &note.id, 1).await;
    let mut bob = EditorSession::open(
        u.bob.to_ref(),
        &note,
        Arc::new(ServicePersistence::new(u.service.clone(), u.bob.id.clone())),
        Some(bob_relay.clone() as Arc<dyn RelayEmitter>),
        &config,
    );
    wait_for_members(&server, &note.id, 2).await;

    let start = Instant::now();
    alice.handle_change(NoteField::Content("Hi".into()), start);
    pump_until(&mut bob, &mut bob_events, |e| {
        e.draft().content == "Hi" && e.typing_label(Instant::now()).is_some()
    })
    .await;
    assert_eq!(
        bob.typing_label(Instant::now()).unwrap().to_string(),
        "Alice (Owner) is typing..."
    );

    alice.tick(start + config.typing_timeout);
    pump_until(&mut bob, &mut bob_events, |e| e.typing_label(Instant::now()).is_none()).await;

    alice.close();
    bob.close();
}

#[tokio::test]
async fn test_own_signals_do_not_show() {
    let (server, url) = start_test_server().await;
    let u = users();
    let note = u
        .service
        .create(Some(&u.alice.id), NoteDraft::default())
        .unwrap();

    // Same user in two windows.
    let (first, _first_events) = connected_client(&url).await;
    let (second, mut second_events) = connected_client(&url).await;
    let config = AutosaveConfig::default();
    let persistence = Arc::new(ServicePersistence::new(u.service.clone(), u.alice.id.clone()));

    let mut window_a = EditorSession::open(
        u.alice.to_ref(),
        &note,
        persistence.clone(),
        Some(first.clone() as Arc<dyn RelayEmitter>),
        &config,
    );
    wait_for_members(&server, &note.id, 1).await;
    let mut window_b = EditorSession::open(
        u.alice.to_ref(),
        &note,
        persistence,
        Some(second.clone() as Arc<dyn RelayEmitter>),
        &config,
    );
    wait_for_members(&server, &note.id, 2).await;

    window_a.handle_change(NoteField::Title("Plan".into()), Instant::now());
    pump_until(&mut window_b, &mut second_events, |e| e.draft().title == "Plan").await;
    assert!(window_b.typing_label(Instant::now()).is_none());
}
