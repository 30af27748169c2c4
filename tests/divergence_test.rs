mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use common::{account, html_message, message, seeded_db, FakeMailbox, ACCOUNT_ID};
use reply_tracker::db::Database;
use reply_tracker::divergence::{CleanupSummary, DraftReconciler, DraftResolution};
use reply_tracker::metrics::MetricsCollector;
use reply_tracker::models::{Draft, NewDraftAction};
use reply_tracker::repository::ConversationStore;

fn reconciler(db: &Database) -> DraftReconciler {
    let store: Arc<dyn ConversationStore> = Arc::new(db.clone());
    DraftReconciler::new(store, MetricsCollector::default())
}

fn record(db: &Database, draft_id: &str, content: &str, age: Duration) -> i64 {
    db.record_draft_action(
        &NewDraftAction {
            email_account_id: ACCOUNT_ID.into(),
            thread_id: "t1".into(),
            message_id: "m0".into(),
            draft_id: draft_id.into(),
            content: content.into(),
        },
        Utc::now() - age,
    )
    .unwrap()
    .id
}

#[tokio::test]
async fn test_cleanup_deletes_unmodified_and_keeps_edited() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    let now = Utc::now();

    let untouched = record(&db, "d-untouched", "Thanks!\n\nTalk soon.", Duration::hours(3));
    mailbox.add_draft(Draft {
        id: "d-untouched".into(),
        message: html_message("x1", "t1", now, "<div>Thanks!</div><div><br></div><div>Talk soon.</div>"),
    });

    let edited = record(&db, "d-edited", "Thanks!", Duration::hours(2));
    mailbox.add_draft(Draft {
        id: "d-edited".into(),
        message: message("x2", "t1", now, "Thanks! I'll also bring the slides."),
    });

    let gone = record(&db, "d-gone", "See you there.", Duration::hours(1));

    let summary = reconciler(&db)
        .cleanup_thread_drafts(mailbox.as_ref(), &account(), "t1", now)
        .await
        .unwrap();

    assert_eq!(
        summary,
        CleanupSummary {
            deleted: 1,
            missing: 1,
            kept: 1,
            errors: 0
        }
    );
    assert_eq!(mailbox.deleted_drafts(), vec!["d-untouched".to_string()]);
    assert!(mailbox.has_draft("d-edited"));

    let fate = |id| db.get_draft_action(id).unwrap().unwrap().was_draft_sent;
    assert_eq!(fate(untouched), Some(false));
    assert_eq!(fate(edited), None);
    assert_eq!(fate(gone), Some(false));
}

#[tokio::test]
async fn test_cleanup_leaves_newer_drafts_alone() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    let now = Utc::now();
    record(&db, "d1", "Hello", Duration::zero());
    mailbox.add_draft(Draft {
        id: "d1".into(),
        message: message("x1", "t1", now, "Hello"),
    });

    let summary = reconciler(&db)
        .cleanup_thread_drafts(mailbox.as_ref(), &account(), "t1", now - Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(summary, CleanupSummary::default());
    assert!(mailbox.has_draft("d1"));
}

#[tokio::test]
async fn test_only_newest_outstanding_draft_is_resolved() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    let older = record(&db, "d-old", "First try", Duration::hours(5));
    let newer = record(&db, "d-new", "Second try", Duration::hours(1));

    let sent = message("m1", "t1", Utc::now(), "Second try, with a tweak");
    let resolution = reconciler(&db)
        .track_sent_draft_status(mailbox.as_ref(), &account(), "t1", &sent)
        .await
        .unwrap();

    let DraftResolution::Sent {
        action_id,
        similarity_score,
    } = resolution
    else {
        panic!("expected the draft to be resolved as sent, got {resolution:?}");
    };
    assert_eq!(action_id, newer);
    assert!(similarity_score > 0.0 && similarity_score < 1.0);
    assert_eq!(db.get_draft_action(older).unwrap().unwrap().was_draft_sent, None);
}

#[tokio::test]
async fn test_no_outstanding_draft() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    let sent = message("m1", "t1", Utc::now(), "Hello");

    let resolution = reconciler(&db)
        .track_sent_draft_status(mailbox.as_ref(), &account(), "t1", &sent)
        .await
        .unwrap();
    assert_eq!(resolution, DraftResolution::NoOutstandingDraft);
}
