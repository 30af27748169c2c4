mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use common::{account, mediator, message, seeded_db, FakeFactory, FakeMailbox, FixedClassifier, ACCOUNT_ID};
use reply_tracker::db::Database;
use reply_tracker::lock::{DbLockService, LockKey, LockService};
use reply_tracker::metrics::MetricsCollector;
use reply_tracker::models::{ConversationStatus, Draft, MailMessage, NewDraftAction, TrackerType};
use reply_tracker::outbound::{OutboundOutcome, OutboundReplyProcessor, SkipReason};
use reply_tracker::repository::ConversationStore;

const DRAFT_TEXT: &str = "Hi Sam,\n\nFriday works for me.";

fn processor(db: &Database, mailbox: &Arc<FakeMailbox>, classifier: Arc<FixedClassifier>) -> OutboundReplyProcessor {
    let store: Arc<dyn ConversationStore> = Arc::new(db.clone());
    OutboundReplyProcessor::new(
        store,
        Arc::new(FakeFactory(Arc::clone(mailbox))),
        classifier,
        Arc::new(DbLockService::new(db.clone(), StdDuration::from_secs(300))),
        mediator(db),
        MetricsCollector::default(),
    )
}

fn record_draft(db: &Database, draft_id: &str) -> i64 {
    db.record_draft_action(
        &NewDraftAction {
            email_account_id: ACCOUNT_ID.into(),
            thread_id: "t1".into(),
            message_id: "m0".into(),
            draft_id: draft_id.into(),
            content: DRAFT_TEXT.into(),
        },
        Utc::now() - Duration::hours(1),
    )
    .unwrap()
    .id
}

fn sent(body: &str) -> MailMessage {
    message("m1", "t1", Utc::now(), body)
}

fn with_thread(mailbox: &FakeMailbox) {
    mailbox.add_thread(
        "t1",
        vec![
            message("m0", "t1", Utc::now() - Duration::hours(2), "Does Friday work?"),
            sent(DRAFT_TEXT),
        ],
    );
}

#[tokio::test]
async fn test_existing_draft_marks_not_sent_without_log() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    with_thread(&mailbox);
    mailbox.add_draft(Draft {
        id: "d1".into(),
        message: message("draft-msg", "t1", Utc::now(), DRAFT_TEXT),
    });
    let action_id = record_draft(&db, "d1");

    let processor = processor(&db, &mailbox, FixedClassifier::new(ConversationStatus::AwaitingReply));
    processor
        .handle_outbound_message(&account(), &sent("Something I wrote myself"))
        .await
        .unwrap();

    let action = db.get_draft_action(action_id).unwrap().unwrap();
    assert_eq!(action.was_draft_sent, Some(false));
    assert!(db.get_draft_send_log(action_id).unwrap().is_none());
}

#[tokio::test]
async fn test_missing_draft_with_identical_text_scores_one() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    with_thread(&mailbox);
    let action_id = record_draft(&db, "d1");

    let processor = processor(&db, &mailbox, FixedClassifier::new(ConversationStatus::AwaitingReply));
    let sent_html = MailMessage {
        body_kind: reply_tracker::models::BodyKind::Html,
        ..sent("<div>Hi Sam,</div><div><br></div><div>Friday works for me.</div>")
    };
    processor.handle_outbound_message(&account(), &sent_html).await.unwrap();

    let action = db.get_draft_action(action_id).unwrap().unwrap();
    assert_eq!(action.was_draft_sent, Some(true));
    let log = db.get_draft_send_log(action_id).unwrap().unwrap();
    assert_eq!(log.sent_message_id, "m1");
    assert!((log.similarity_score - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_awaiting_reply_creates_tracker_and_labels() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    with_thread(&mailbox);
    let classifier = FixedClassifier::new(ConversationStatus::AwaitingReply);

    let processor = processor(&db, &mailbox, Arc::clone(&classifier));
    let outcome = processor
        .handle_outbound_message(&account(), &sent(DRAFT_TEXT))
        .await
        .unwrap();

    let OutboundOutcome::Processed { status, tracker_id } = outcome else {
        panic!("expected processing, got {outcome:?}");
    };
    assert_eq!(status, ConversationStatus::AwaitingReply);

    let trackers = db.list_trackers(ACCOUNT_ID, false).unwrap();
    assert_eq!(trackers.len(), 1);
    assert_eq!(Some(trackers[0].id), tracker_id);
    assert_eq!(trackers[0].tracker_type, TrackerType::AwaitingReply);
    assert_eq!(trackers[0].message_id, "m1");

    let awaiting = mailbox.label_id("Awaiting Reply").unwrap();
    assert_eq!(mailbox.label_calls(), vec![("m1".to_string(), awaiting)]);
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_duplicate_delivery_is_a_no_op() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    with_thread(&mailbox);
    let classifier = FixedClassifier::new(ConversationStatus::ToReply);

    let processor = processor(&db, &mailbox, Arc::clone(&classifier));
    let first = processor.handle_outbound_message(&account(), &sent(DRAFT_TEXT)).await.unwrap();
    let second = processor.handle_outbound_message(&account(), &sent(DRAFT_TEXT)).await.unwrap();

    assert!(matches!(first, OutboundOutcome::Processed { .. }));
    assert_eq!(second, OutboundOutcome::Skipped(SkipReason::AlreadyProcessing));
    assert_eq!(classifier.calls(), 1);
}

#[tokio::test]
async fn test_empty_thread_releases_lock_for_retry() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    let classifier = FixedClassifier::new(ConversationStatus::ToReply);

    let processor = processor(&db, &mailbox, Arc::clone(&classifier));
    let outcome = processor.handle_outbound_message(&account(), &sent("hello")).await.unwrap();
    assert_eq!(outcome, OutboundOutcome::Skipped(SkipReason::EmptyThread));

    let locks = DbLockService::new(db.clone(), StdDuration::from_secs(300));
    assert!(locks.acquire(&LockKey::new(ACCOUNT_ID, "t1", "m1")).await.unwrap());
}

#[tokio::test]
async fn test_fyi_resolves_open_trackers() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    with_thread(&mailbox);

    processor(&db, &mailbox, FixedClassifier::new(ConversationStatus::ToReply))
        .handle_outbound_message(&account(), &sent(DRAFT_TEXT))
        .await
        .unwrap();
    assert_eq!(db.list_trackers(ACCOUNT_ID, false).unwrap().len(), 1);

    let later = message("m2", "t1", Utc::now(), "Thanks, all done.");
    let outcome = processor(&db, &mailbox, FixedClassifier::new(ConversationStatus::Fyi))
        .handle_outbound_message(&account(), &later)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        OutboundOutcome::Processed {
            status: ConversationStatus::Fyi,
            tracker_id: None
        }
    );
    assert!(db.list_trackers(ACCOUNT_ID, false).unwrap().is_empty());
}

#[tokio::test]
async fn test_tracking_disabled_still_reconciles_drafts() {
    let (_dir, db) = seeded_db();
    let mailbox = FakeMailbox::new();
    with_thread(&mailbox);
    let action_id = record_draft(&db, "d1");
    let mut disabled = account();
    disabled.outbound_tracking_enabled = false;

    let classifier = FixedClassifier::new(ConversationStatus::ToReply);
    let outcome = processor(&db, &mailbox, Arc::clone(&classifier))
        .handle_outbound_message(&disabled, &sent(DRAFT_TEXT))
        .await
        .unwrap();

    assert_eq!(outcome, OutboundOutcome::Skipped(SkipReason::TrackingDisabled));
    assert_eq!(classifier.calls(), 0);
    assert_eq!(db.get_draft_action(action_id).unwrap().unwrap().was_draft_sent, Some(true));
}
