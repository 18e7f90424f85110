//! Integration tests for pad history, moderation, fan-out and persistence.

use std::sync::Arc;

use tandem_collab::mailbox::{mailbox, Event, MailboxReceiver};
use tandem_collab::pad::{ChatEntry, Pad, PadId, RecordedDelta};
use tandem_collab::persist::{PersistQueue, PersistStats};
use tandem_collab::storage::{MemoryStore, Storage, StoreError, UserUpdate};
use tandem_collab::user::{shared, Permissions, User, UserId};
use tandem_collab::{ClientHandle, ClientId, RemoteInfo};
use tandem_core::{Delta, Op, StyleMeta};
use tokio::time::{timeout, Duration};

fn pad_over(store: Arc<dyn Storage>) -> Pad {
    Pad::new(1, "notes", PersistQueue::spawn(1, store, 16))
}

fn typed(text: &str, author: UserId) -> Op {
    Op::insert_with(text, StyleMeta::EMPTY.with_author(author).materialized())
}

fn styled(text: &str, author: UserId, style: StyleMeta) -> Op {
    Op::insert_with(text, style.overlay(&StyleMeta::EMPTY.with_author(author).materialized()))
}

async fn edit(pad: &Pad, author: UserId, ops: Vec<Op>) -> Arc<RecordedDelta> {
    let base = pad.revision().await;
    pad.submit_delta(author, base, Delta::from_ops(ops)).await.unwrap()
}

async fn text(pad: &Pad) -> String {
    pad.document().await.document.text()
}

fn member(capacity: usize) -> (Arc<ClientHandle>, MailboxReceiver) {
    let (tx, rx) = mailbox(capacity);
    (Arc::new(ClientHandle::new(tx, RemoteInfo::new("10.0.0.1", "test"))), rx)
}

fn drain(rx: &mut MailboxReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Five revisions by three users, with user 2 editing twice.
async fn interleaved_history(pad: &Pad) {
    edit(pad, 1, vec![typed("Hello", 1)]).await;
    edit(pad, 2, vec![Op::retain(5), typed(" big", 2)]).await;
    edit(pad, 1, vec![Op::retain(9), typed(" world", 1)]).await;
    edit(pad, 2, vec![typed(">> ", 2)]).await;
    edit(pad, 3, vec![Op::retain(18), typed("!", 3)]).await;
}

#[tokio::test]
async fn test_concurrent_edits_on_same_base() {
    let pad = pad_over(Arc::new(MemoryStore::new()));
    edit(&pad, 1, vec![typed("Hello World", 1)]).await;

    // Both clients edit revision 1.
    pad.submit_delta(2, 1, Delta::from_ops([Op::retain(5), typed(",", 2)]))
        .await
        .unwrap();
    let late = pad
        .submit_delta(3, 1, Delta::from_ops([Op::retain(11), typed("!", 3)]))
        .await
        .unwrap();

    assert_eq!(late.revision, 3);
    assert_eq!(late.delta.ops(), &[Op::retain(12), typed("!", 3)]);
    assert_eq!(text(&pad).await, "Hello, World!");
}

#[tokio::test]
async fn test_snapshots_follow_history() {
    let pad = pad_over(Arc::new(MemoryStore::new()));
    interleaved_history(&pad).await;

    let snapshots = pad.snapshots().await;
    assert_eq!(snapshots.len(), 6);
    for pair in snapshots.windows(2) {
        let delta = pad.delta_at(pair[1].revision).await.unwrap();
        assert_eq!(delta.delta.apply_to(&pair[0].document).unwrap(), pair[1].document);
    }
    assert_eq!(text(&pad).await, ">> Hello big world!");
}

#[tokio::test]
async fn test_invert_user_delta_removes_only_their_text() {
    let pad = pad_over(Arc::new(MemoryStore::new()));
    interleaved_history(&pad).await;

    let record = pad.invert_user_delta(9, 2).await.unwrap().unwrap();
    assert_eq!(record.revision, 6);
    assert_eq!(record.author, 9);

    // Same document, attribution included, as if user 2 never typed.
    let others = pad_over(Arc::new(MemoryStore::new()));
    edit(&others, 1, vec![typed("Hello", 1)]).await;
    edit(&others, 1, vec![Op::retain(5), typed(" world", 1)]).await;
    edit(&others, 3, vec![Op::retain(11), typed("!", 3)]).await;
    let document = pad.document().await.document.clone();
    assert_eq!(document, others.document().await.document);
    assert_eq!(document.text(), "Hello world!");
    assert_eq!(document.authors().collect::<Vec<_>>(), vec![1, 3]);

    // Nothing left to undo for an author who never typed.
    assert_eq!(pad.invert_user_delta(9, 42).await, Ok(None));
    assert_eq!(pad.revision().await, 6);
}

#[tokio::test]
async fn test_invert_user_delta_keeps_other_styles() {
    let bold = StyleMeta::EMPTY.with_bold(true);
    let italic = StyleMeta::EMPTY.with_italic(true);

    let pad = pad_over(Arc::new(MemoryStore::new()));
    edit(&pad, 1, vec![typed("abc", 1)]).await;
    edit(&pad, 2, vec![Op::retain(3), typed("XY", 2)]).await;
    edit(&pad, 3, vec![Op::retain(5), typed("def", 3)]).await;
    edit(&pad, 1, vec![Op::retain_with(8, bold)]).await;
    // User 2 also restyles text they did not write.
    edit(&pad, 2, vec![Op::retain_with(3, italic)]).await;
    pad.invert_user_delta(9, 2).await.unwrap().unwrap();

    let others = pad_over(Arc::new(MemoryStore::new()));
    edit(&others, 1, vec![typed("abc", 1)]).await;
    edit(&others, 3, vec![Op::retain(3), typed("def", 3)]).await;
    edit(&others, 1, vec![Op::retain_with(6, bold)]).await;

    let document = pad.document().await.document.clone();
    assert_eq!(document, others.document().await.document);
    assert_eq!(
        document.ops(),
        &[
            styled("abc", 1, bold),
            styled("def", 3, bold),
        ]
    );
}

#[tokio::test]
async fn test_invert_delta_undoes_one_revision() {
    let pad = pad_over(Arc::new(MemoryStore::new()));
    interleaved_history(&pad).await;

    pad.invert_delta(9, 3).await.unwrap();
    assert_eq!(text(&pad).await, ">> Hello big!");

    // Undoing the undo brings the text back.
    pad.invert_delta(9, 6).await.unwrap();
    assert_eq!(text(&pad).await, ">> Hello big world!");
}

#[tokio::test]
async fn test_restore_revision_matches_old_snapshot() {
    let pad = pad_over(Arc::new(MemoryStore::new()));
    interleaved_history(&pad).await;

    let record = pad.restore_revision(9, 2).await.unwrap().unwrap();
    assert_eq!(record.revision, 6);
    assert_eq!(text(&pad).await, pad.document_at(2).await.unwrap().document.text());

    // History is kept: the rollback itself can be undone.
    pad.invert_delta(9, 6).await.unwrap();
    assert_eq!(text(&pad).await, ">> Hello big world!");
    assert_eq!(pad.revision().await, 7);
}

#[tokio::test]
async fn test_hydrate_reproduces_every_snapshot() {
    let store = Arc::new(MemoryStore::new());
    let pad = pad_over(store.clone());
    interleaved_history(&pad).await;
    pad.invert_user_delta(9, 1).await.unwrap();
    let ann = User::new(1, "ann", Permissions::USER_DEFAULT);
    pad.send_chat(ClientId::nil(), &ann, "hi").await.unwrap();
    pad.flush().await;
    assert_eq!(pad.persist_stats(), PersistStats { written: 7, failed: 0 });

    let reloaded = Pad::hydrate(
        1,
        "notes",
        store.load_deltas(1).unwrap(),
        store.load_chat(1).unwrap(),
        PersistQueue::spawn(1, store.clone(), 16),
    );
    assert_eq!(reloaded.snapshots().await, pad.snapshots().await);
    assert_eq!(reloaded.recent_chat(10).await, pad.recent_chat(10).await);
    assert_eq!(reloaded.last_chat_id().await, 1);
}

/// Accepts reads, refuses every write.
struct FailingStore;

impl Storage for FailingStore {
    fn load_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(Vec::new())
    }
    fn load_pads(&self) -> Result<Vec<(PadId, String)>, StoreError> {
        Ok(Vec::new())
    }
    fn login(&self, _: &str, _: &str) -> Result<Option<UserId>, StoreError> {
        Ok(None)
    }
    fn register(&self, _: &str, _: &str, _: &User) -> Result<bool, StoreError> {
        Err(StoreError::Io("disk full".into()))
    }
    fn register_guest(&self, _: &User) -> Result<(), StoreError> {
        Err(StoreError::Io("disk full".into()))
    }
    fn update_user(&self, id: UserId, _: &UserUpdate) -> Result<(), StoreError> {
        Err(StoreError::UnknownUser(id))
    }
    fn insert_pad(&self, _: PadId, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Io("disk full".into()))
    }
    fn append_chat(&self, _: PadId, _: &ChatEntry) -> Result<(), StoreError> {
        Err(StoreError::Io("disk full".into()))
    }
    fn append_delta(&self, _: PadId, _: &RecordedDelta) -> Result<(), StoreError> {
        Err(StoreError::Io("disk full".into()))
    }
    fn load_chat(&self, _: PadId) -> Result<Vec<ChatEntry>, StoreError> {
        Ok(Vec::new())
    }
    fn load_deltas(&self, _: PadId) -> Result<Vec<RecordedDelta>, StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_failed_writes_leave_history_intact() {
    let pad = pad_over(Arc::new(FailingStore));
    interleaved_history(&pad).await;
    pad.flush().await;

    assert_eq!(pad.revision().await, 5);
    assert_eq!(text(&pad).await, ">> Hello big world!");
    assert_eq!(pad.persist_stats(), PersistStats { written: 0, failed: 5 });
}

#[tokio::test]
async fn test_full_mailbox_does_not_stall_other_members() {
    let pad = pad_over(Arc::new(MemoryStore::new()));
    let (slow, _slow_rx) = member(1);
    let (fast, mut fast_rx) = member(64);
    pad.join(slow.clone(), shared(User::new(1, "slow", Permissions::USER_DEFAULT)))
        .await;
    // Announcing `fast` fills the slow member's only slot.
    pad.join(fast, shared(User::new(2, "fast", Permissions::USER_DEFAULT)))
        .await;

    let edits = async {
        for i in 0..10 {
            edit(&pad, 2, vec![typed(&i.to_string(), 2)]).await;
        }
    };
    timeout(Duration::from_secs(2), edits)
        .await
        .expect("a full mailbox must not block the pad");

    let deltas = drain(&mut fast_rx)
        .into_iter()
        .filter_map(|event| match event {
            Event::Delta { record, .. } => Some(record.revision),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(deltas, (1..=10).collect::<Vec<_>>());
    assert_eq!(slow.mailbox.stats().dropped, 10);
}

#[tokio::test]
async fn test_chat_skips_sender_and_membership_is_announced() {
    let pad = pad_over(Arc::new(MemoryStore::new()));
    let (ann, mut ann_rx) = member(16);
    let (bob, mut bob_rx) = member(16);
    let ann_user = User::new(1, "ann", Permissions::USER_DEFAULT);
    pad.join(ann.clone(), shared(ann_user.clone())).await;
    pad.join(bob.clone(), shared(User::guest(2, Permissions::GUEST_DEFAULT)))
        .await;
    assert_eq!(pad.member_count().await, 2);
    assert!(pad.is_online(2).await);

    pad.send_chat(ann.id, &ann_user, "  hello  ").await.unwrap();

    let ann_events = drain(&mut ann_rx);
    assert_eq!(ann_events.len(), 1);
    match &ann_events[0] {
        Event::UserInfo { info, .. } => {
            assert_eq!(info.id, 2);
            assert_eq!(info.ip, None);
        }
        other => panic!("expected UserInfo, got {other:?}"),
    }
    match drain(&mut bob_rx).as_slice() {
        [Event::Chat { entry, .. }] => assert_eq!(entry.text, "ann: hello"),
        other => panic!("expected one chat line, got {other:?}"),
    }

    pad.leave(bob.id).await;
    assert!(!pad.is_online(2).await);
    assert!(matches!(
        drain(&mut ann_rx).as_slice(),
        [Event::UserLeave { user: 2, .. }]
    ));
}

#[tokio::test]
async fn test_moderators_see_where_members_connect_from() {
    let pad = pad_over(Arc::new(MemoryStore::new()));
    let (moderator, mut moderator_rx) = member(8);
    let (guest, _guest_rx) = member(8);
    let mod_perms = Permissions::USER_DEFAULT | Permissions::MOD;
    pad.join(moderator, shared(User::new(1, "mod", mod_perms))).await;
    pad.join(guest, shared(User::guest(2, Permissions::GUEST_DEFAULT)))
        .await;

    match drain(&mut moderator_rx).as_slice() {
        [Event::UserInfo { info, .. }] => {
            assert_eq!(info.ip.as_deref(), Some("10.0.0.1"));
            assert_eq!(info.user_agent.as_deref(), Some("test"));
        }
        other => panic!("expected UserInfo, got {other:?}"),
    }
}
