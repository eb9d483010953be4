//! Integration tests for the notification coalescer.

mod common;

use common::RecordingMailer;
use request_injector::config::NotifyConfig;
use request_injector::locker::Locker;
use request_injector::notify::{Communicator, Notification};
use std::sync::Arc;

fn accumulating() -> NotifyConfig {
    NotifyConfig {
        accumulate: true,
        ..NotifyConfig::default()
    }
}

fn communicator(mailer: &Arc<RecordingMailer>, config: NotifyConfig) -> Communicator {
    Communicator::new(mailer.clone(), Arc::new(Locker::new()), config)
}

fn success_notice(prepid: &str, body: &str) -> Notification {
    Notification::new(
        vec!["jdoe@example.org".into()],
        format!("Injection succeeded for {prepid}"),
        body,
    )
    .accumulate(true)
}

#[tokio::test]
async fn accumulated_messages_collapse_into_one_entry() {
    let mailer = Arc::new(RecordingMailer::new());
    let com = communicator(&mailer, accumulating());

    com.send(success_notice("PPD-Run3-00001", "first")).await;
    com.send(success_notice("PPD-Run3-00002", "second")).await;

    assert!(mailer.sent().is_empty());
    let cached = com.cached();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].1.count, 2);
    assert_eq!(cached[0].1.text, "first\n\nsecond");
}

#[tokio::test]
async fn flush_sends_and_forgets_entries() {
    let mailer = Arc::new(RecordingMailer::new());
    let com = communicator(&mailer, accumulating());

    com.send(success_notice("PPD-Run3-00001", "first")).await;
    com.send(success_notice("PPD-Run3-00002", "second")).await;

    let report = com.flush(1).await;
    assert_eq!(report.sent, 1);
    assert_eq!(report.kept, 0);
    assert!(com.cached().is_empty());

    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.starts_with("first\n\nsecond"));

    let again = com.flush(1).await;
    assert_eq!(again.sent, 0);
    assert_eq!(mailer.sent().len(), 1);
}

#[tokio::test]
async fn flush_keeps_entries_below_the_threshold() {
    let mailer = Arc::new(RecordingMailer::new());
    let com = communicator(&mailer, accumulating());

    com.send(success_notice("PPD-Run3-00001", "only one")).await;
    let report = com.flush(2).await;

    assert_eq!(report.sent, 0);
    assert_eq!(report.kept, 1);
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn flush_keeps_entries_at_the_threshold() {
    let mailer = Arc::new(RecordingMailer::new());
    let com = communicator(&mailer, accumulating());

    com.send(success_notice("PPD-Run3-00001", "only one")).await;
    let report = com.flush(1).await;

    assert_eq!(report.sent, 0);
    assert_eq!(report.kept, 1);
    assert!(mailer.sent().is_empty());
    assert_eq!(com.cached()[0].1.count, 1);

    let report = com.flush(0).await;
    assert_eq!(report.sent, 1);
    assert!(com.cached().is_empty());
}

#[tokio::test]
async fn different_recipients_get_different_entries() {
    let mailer = Arc::new(RecordingMailer::new());
    let com = communicator(&mailer, accumulating());

    com.send(success_notice("PPD-Run3-00001", "a")).await;
    com.send(
        Notification::new(
            vec!["other@example.org".into()],
            "Injection succeeded for PPD-Run3-00002",
            "b",
        )
        .accumulate(true),
    )
    .await;

    assert_eq!(com.cached().len(), 2);
}

#[tokio::test]
async fn without_the_global_switch_messages_go_out_at_once() {
    let mailer = Arc::new(RecordingMailer::new());
    let com = communicator(&mailer, NotifyConfig::default());

    let id = com.send(success_notice("PPD-Run3-00001", "hello")).await;

    assert!(com.cached().is_empty());
    let sent = mailer.sent();
    assert_eq!(sent.len(), 1);
    let message = &sent[0];
    assert_eq!(message.id, id);
    assert_eq!(message.subject, "[Injector] Injection succeeded for PPD-Run3-00001");
    assert!(message.to.contains(&"jdoe@example.org".to_string()));
    assert!(message.to.contains(&"injector@localhost".to_string()));
    assert_eq!(message.cc, vec!["injector@localhost".to_string()]);
    assert!(message.body.ends_with("Injection announcing service"));
}

#[tokio::test]
async fn force_accumulation_overrides_the_per_call_flag() {
    let mailer = Arc::new(RecordingMailer::new());
    let config = NotifyConfig {
        force_accumulate: true,
        ..NotifyConfig::default()
    };
    let com = communicator(&mailer, config);

    com.send(Notification::new(vec!["jdoe@example.org".into()], "Alert", "x"))
        .await;

    assert!(mailer.sent().is_empty());
    assert_eq!(com.cached().len(), 1);
}

#[tokio::test]
async fn reply_to_is_carried_on_immediate_messages() {
    let mailer = Arc::new(RecordingMailer::new());
    let com = communicator(&mailer, NotifyConfig::default());

    com.send(
        Notification::new(vec!["jdoe@example.org".into()], "Re: batch", "body")
            .reply_to("<abc@example.org>"),
    )
    .await;

    assert_eq!(
        mailer.sent()[0].in_reply_to.as_deref(),
        Some("<abc@example.org>")
    );
}

#[tokio::test]
async fn transport_errors_are_swallowed_and_entries_kept() {
    let mailer = Arc::new(RecordingMailer::broken());
    let com = communicator(&mailer, accumulating());

    com.send(success_notice("PPD-Run3-00001", "a")).await;
    let report = com.flush(0).await;

    assert_eq!(report.sent, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.kept, 1);
    assert_eq!(com.cached().len(), 1);
}
