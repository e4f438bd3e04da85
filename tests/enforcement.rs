mod common;

use std::sync::Arc;

use halfduplex_bot_lib::core::arbiter::{
    spawn_enforcer, BatchReport, ChannelScope, EnforcementCommand, PermissionEnforcer, ScopeError,
};
use halfduplex_bot_lib::core::voice::{ChannelId, ParticipantId};

use common::{mutes, unmutes, Call, FakeConnection, BOT, HALL, LOBBY};

fn enforcer(fake: &Arc<FakeConnection>) -> PermissionEnforcer<FakeConnection> {
    PermissionEnforcer::new(
        Arc::clone(fake),
        ChannelScope::new(["Half-Duplex Channel"]),
        BOT,
    )
}

#[tokio::test]
async fn revoke_skips_speaker_and_bot() {
    let fake = Arc::new(FakeConnection::standard());
    let report = enforcer(&fake).revoke_others(HALL, ParticipantId(11)).await;

    assert_eq!(
        report,
        BatchReport {
            issued: 3,
            skipped: 2,
            failed: 0
        }
    );
    assert_eq!(mutes(&fake.calls()), vec![12, 13, 14]);
    assert_eq!(fake.muted(), vec![12, 13, 14]);
}

#[tokio::test]
async fn restore_never_touches_the_bot() {
    let fake = Arc::new(FakeConnection::standard());
    let enforcer = enforcer(&fake);
    enforcer.revoke_others(HALL, ParticipantId(11)).await;
    fake.clear_calls();

    let report = enforcer.restore_all(HALL).await;
    assert_eq!(report.issued, 4);
    assert_eq!(report.skipped, 1);
    assert_eq!(unmutes(&fake.calls()), vec![11, 12, 13, 14]);
    assert!(fake.muted().is_empty());
}

#[tokio::test]
async fn one_failure_does_not_stop_the_batch() {
    let fake = Arc::new(FakeConnection::standard());
    fake.fail_for(ParticipantId(12));

    let report = enforcer(&fake).revoke_others(HALL, ParticipantId(11)).await;
    assert_eq!(report.issued, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(mutes(&fake.calls()), vec![12, 13, 14]);
    assert_eq!(fake.muted(), vec![13, 14]);
}

#[tokio::test]
async fn repeated_batches_are_harmless() {
    let fake = Arc::new(FakeConnection::standard());
    let enforcer = enforcer(&fake);

    let first = enforcer.revoke_others(HALL, ParticipantId(11)).await;
    let second = enforcer.revoke_others(HALL, ParticipantId(11)).await;
    assert_eq!(first, second);
    assert_eq!(fake.muted(), vec![12, 13, 14]);

    enforcer.restore_all(HALL).await;
    let again = enforcer.restore_all(HALL).await;
    assert_eq!(again.failed, 0);
    assert!(fake.muted().is_empty());
}

#[tokio::test]
async fn roster_is_read_at_execution_time() {
    let fake = Arc::new(FakeConnection::standard());
    let enforcer = enforcer(&fake);

    fake.remove_participant(ParticipantId(13));
    fake.add_participant(ParticipantId(15), "latecomer", HALL);
    enforcer.revoke_others(HALL, ParticipantId(11)).await;

    assert_eq!(fake.muted(), vec![12, 14, 15]);
}

#[tokio::test]
async fn other_channels_are_untouched() {
    let fake = Arc::new(FakeConnection::standard());
    enforcer(&fake).revoke_others(HALL, ParticipantId(11)).await;

    assert!(!fake.calls().contains(&Call::Mute(ParticipantId(20))));
    let lobby = enforcer(&fake).restore_all(LOBBY).await;
    assert_eq!(lobby.issued, 1);
}

#[tokio::test]
async fn worker_applies_commands_in_order() {
    let fake = Arc::new(FakeConnection::standard());
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let worker = spawn_enforcer(Arc::new(enforcer(&fake)), rx);

    tx.send(EnforcementCommand::RevokeOthers {
        channel: HALL,
        speaker: ParticipantId(11),
    })
    .expect("queue open");
    tx.send(EnforcementCommand::RestoreAll { channel: HALL })
        .expect("queue open");
    drop(tx);
    worker.await.expect("worker finishes");

    let calls = fake.calls();
    assert_eq!(calls.len(), 7);
    assert!(calls[..3].iter().all(|call| matches!(call, Call::Mute(_))));
    assert!(calls[3..].iter().all(|call| matches!(call, Call::Unmute(_))));
    assert!(fake.muted().is_empty());
}

#[tokio::test]
async fn scope_resolution_skips_missing_channels() {
    let fake = FakeConnection::standard();

    let scope = ChannelScope::new(["Half-Duplex Channel", "Radio"]);
    let channels = scope.resolve(&fake).await.expect("one channel resolves");
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].id, HALL);

    let missing = ChannelScope::new(["Radio"]);
    assert_eq!(
        missing.resolve(&fake).await,
        Err(ScopeError::NoChannelsInScope(vec!["Radio".to_string()]))
    );
}

#[tokio::test]
async fn scope_roster_reflects_current_membership() {
    let fake = FakeConnection::standard();
    let scope = ChannelScope::new(["Half-Duplex Channel"]);

    assert_eq!(scope.roster(&fake, HALL).await.len(), 5);
    fake.remove_participant(ParticipantId(14));
    assert_eq!(scope.roster(&fake, HALL).await.len(), 4);
    assert!(scope.roster(&fake, ChannelId(99)).await.is_empty());
}
