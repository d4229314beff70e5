use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};

use super::*;
use crate::service::LocalVoice;

const LOUNGE: ChannelId = ChannelId(1);
const STUDIO: ChannelId = ChannelId(2);

fn member(id: u64) -> Member {
    let name = match id {
        1 => "alice",
        2 => "bob",
        3 => "carol",
        4 => "dave",
        _ => "guest",
    };
    Member::new(id, name)
}

/// A lounge holding the given members, in join order.
fn lounge(ids: &[u64]) -> (Arc<LocalVoice>, Coordinator) {
    let voice = Arc::new(LocalVoice::new());
    voice.create_channel(LOUNGE, "Lounge");
    voice.create_channel(STUDIO, "Studio");
    for &id in ids {
        voice.join(LOUNGE, member(id)).unwrap();
    }
    let coordinator = Coordinator::new(voice.clone(), voice.clone(), StickConfig::default());
    (voice, coordinator)
}

fn holders(report: &SessionReport) -> Vec<u64> {
    report.turns.iter().map(|t| t.holder.0).collect()
}

fn ids(users: &[UserId]) -> Vec<u64> {
    users.iter().map(|u| u.0).collect()
}

#[tokio::test(start_paused = true)]
async fn test_each_member_holds_the_stick_once() {
    let (voice, coordinator) = lounge(&[1, 2, 3]);

    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(2))
        .await
        .unwrap();

    assert!(!voice.is_muted(UserId(1)));
    assert!(voice.is_muted(UserId(2)));
    assert!(voice.is_muted(UserId(3)));
    assert_eq!(handle.session().state(), SessionState::Running);
    assert_eq!(handle.session().holder(), Some(member(1)));

    sleep(Duration::from_millis(2500)).await;
    assert!(voice.is_muted(UserId(1)));
    assert!(!voice.is_muted(UserId(2)));
    assert!(voice.is_muted(UserId(3)));
    assert_eq!(handle.session().holder(), Some(member(2)));
    assert_eq!(handle.session().queued(), vec![member(3)]);

    let session = handle.session().clone();
    let report = handle.join().await.unwrap();

    assert_eq!(holders(&report), vec![1, 2, 3]);
    assert!(report.turns.iter().all(|t| !t.cancelled));
    assert_eq!(ids(&report.restored), vec![1, 2, 3]);
    assert!(report.dropped.is_empty());
    assert!(voice.muted_users().is_empty());
    assert_eq!(session.state(), SessionState::Destroyed);
    assert!(coordinator.talking_stick(LOUNGE).is_none());

    let messages = voice.messages_in(LOUNGE);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "Talking stick has been destroyed.");
    assert!(messages[0]
        .history
        .contains(&"bob has the talking stick for 2s.".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_turn_duration_is_clamped() {
    let (_voice, coordinator) = lounge(&[1]);
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(0))
        .await
        .unwrap();
    assert_eq!(handle.session().turn_secs(), 1);
    handle.join().await.unwrap();

    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(600))
        .await
        .unwrap();
    assert_eq!(handle.session().turn_secs(), 60);
    coordinator.stop_talking_stick(LOUNGE).unwrap();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_rejected_without_side_effects() {
    let (voice, coordinator) = lounge(&[1, 2, 3]);
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(10))
        .await
        .unwrap();
    let calls = voice.mute_calls();

    let err = coordinator
        .start_talking_stick(LOUNGE, member(2), Some(5))
        .await
        .err()
        .unwrap();

    assert!(matches!(err, CoordError::SessionAlreadyActive(LOUNGE)));
    assert_eq!(voice.mute_calls(), calls);
    assert_eq!(handle.session().holder(), Some(member(1)));
    assert_eq!(handle.session().queued(), vec![member(2), member(3)]);
    assert!(Arc::ptr_eq(
        &coordinator.talking_stick(LOUNGE).unwrap(),
        handle.session()
    ));

    coordinator.stop_talking_stick(LOUNGE).unwrap();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sessions_in_different_channels_are_independent() {
    let (voice, coordinator) = lounge(&[1, 2]);
    voice.join(STUDIO, member(3)).unwrap();
    voice.join(STUDIO, member(4)).unwrap();

    let lounge_stick = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(3))
        .await
        .unwrap();
    let studio_stick = coordinator
        .start_talking_stick(STUDIO, member(3), Some(1))
        .await
        .unwrap();
    assert_eq!(coordinator.active_sessions().len(), 2);

    let studio = studio_stick.join().await.unwrap();
    assert_eq!(holders(&studio), vec![3, 4]);
    assert_eq!(
        lounge_stick.session().state(),
        SessionState::Running,
        "lounge turns are longer and unaffected"
    );

    let lounge = lounge_stick.join().await.unwrap();
    assert_eq!(holders(&lounge), vec![1, 2]);
    assert!(coordinator.active_sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_skip_vote_cuts_turn_short() {
    let (voice, coordinator) = lounge(&[1, 2, 3, 4]);
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(30))
        .await
        .unwrap();

    assert_eq!(
        coordinator.request_skip(LOUNGE, &member(2)).await.unwrap(),
        VoteOutcome::Accepted { votes: 1, needed: 2 }
    );
    assert_eq!(
        coordinator.request_skip(LOUNGE, &member(2)).await.unwrap(),
        VoteOutcome::Accepted { votes: 1, needed: 2 }
    );

    sleep(Duration::from_millis(5500)).await;
    assert_eq!(handle.session().holder(), Some(member(1)));

    assert_eq!(
        coordinator.request_skip(LOUNGE, &member(3)).await.unwrap(),
        VoteOutcome::ThresholdReached
    );

    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.session().holder(), Some(member(2)));
    assert!(voice.is_muted(UserId(1)));
    assert!(
        voice
            .messages_in(LOUNGE)
            .iter()
            .any(|m| m.text == "Skipping user.")
    );

    // The passed vote belonged to alice's turn.
    assert_eq!(
        coordinator.request_skip(LOUNGE, &member(4)).await.unwrap(),
        VoteOutcome::Accepted { votes: 1, needed: 2 }
    );

    coordinator.stop_talking_stick(LOUNGE).unwrap();
    let report = handle.join().await.unwrap();
    assert_eq!(
        report.turns[0],
        TurnRecord {
            holder: UserId(1),
            cancelled: true
        }
    );
    assert!(voice.muted_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_skip_vote_times_out() {
    let (voice, coordinator) = lounge(&[1, 2, 3, 4]);
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(30))
        .await
        .unwrap();

    coordinator.request_skip(LOUNGE, &member(2)).await.unwrap();
    sleep(Duration::from_secs(16)).await;

    assert_eq!(handle.session().holder(), Some(member(1)));
    assert!(
        voice
            .messages_in(LOUNGE)
            .iter()
            .any(|m| m.text == "Not enough votes to skip user.")
    );

    // A fresh vote can be opened once the old one expired.
    assert_eq!(
        coordinator.request_skip(LOUNGE, &member(3)).await.unwrap(),
        VoteOutcome::Accepted { votes: 1, needed: 2 }
    );

    coordinator.stop_talking_stick(LOUNGE).unwrap();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_skip_between_turns_does_not_touch_the_next_turn() {
    let (voice, coordinator) = lounge(&[1, 2, 3, 4]);
    voice.set_mute_delay(Duration::from_millis(500));
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(2))
        .await
        .unwrap();

    // alice's countdown ended at 2.5s; bob is not unmuted until 3.5s.
    sleep(Duration::from_millis(2200)).await;
    assert!(!handle.session().is_turn_open());
    assert_eq!(
        coordinator.request_skip(LOUNGE, &member(3)).await.unwrap(),
        VoteOutcome::Closed
    );
    assert_eq!(
        coordinator.request_skip(LOUNGE, &member(4)).await.unwrap(),
        VoteOutcome::Closed
    );
    assert!(handle.session().current_vote().is_none());
    assert_eq!(handle.session().holder(), Some(member(1)));

    let report = handle.join().await.unwrap();
    assert_eq!(holders(&report), vec![1, 2, 3, 4]);
    assert!(report.turns.iter().all(|t| !t.cancelled));
    assert!(voice.muted_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_join_during_closing_unmute_is_left_unmuted() {
    let (voice, coordinator) = lounge(&[1, 2]);
    voice.set_mute_delay(Duration::from_millis(500));
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(1))
        .await
        .unwrap();
    let session = handle.session().clone();

    // Last turn ends at 3.5s, bob is muted by 4s, the closing pass runs to 4.5s.
    sleep(Duration::from_millis(3700)).await;
    voice.join(LOUNGE, member(4)).unwrap();
    assert!(!coordinator.on_member_joined(LOUNGE, member(4)).await);
    assert_eq!(session.state(), SessionState::Destroyed);

    let report = handle.join().await.unwrap();
    assert_eq!(ids(&report.restored), vec![1, 2]);
    assert!(!voice.is_muted(UserId(4)));
    assert!(voice.muted_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_skip_without_session_is_rejected() {
    let (_voice, coordinator) = lounge(&[1, 2]);
    let err = coordinator.request_skip(LOUNGE, &member(2)).await.unwrap_err();
    assert!(matches!(err, CoordError::NoActiveSession(LOUNGE)));
    assert!(matches!(
        coordinator.stop_talking_stick(LOUNGE),
        Err(CoordError::NoActiveSession(LOUNGE))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_departed_member_is_dropped_not_fatal() {
    let (voice, coordinator) = lounge(&[1, 2, 3]);
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(2))
        .await
        .unwrap();

    sleep(Duration::from_millis(500)).await;
    voice.leave(UserId(3));

    let report = handle.join().await.unwrap();
    assert_eq!(holders(&report), vec![1, 2]);
    assert_eq!(ids(&report.restored), vec![1, 2]);
    assert_eq!(ids(&report.dropped), vec![3]);
    assert!(!voice.is_muted(UserId(1)));
    assert!(!voice.is_muted(UserId(2)));
}

#[tokio::test(start_paused = true)]
async fn test_unmutable_member_never_gets_a_turn() {
    let (voice, coordinator) = lounge(&[1, 2, 3]);
    voice.reject_mutes_for(UserId(2));

    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(1))
        .await
        .unwrap();
    assert_eq!(handle.session().queued(), vec![member(3)]);
    assert_eq!(handle.session().snapshot(), vec![UserId(1), UserId(3)]);

    let report = handle.join().await.unwrap();
    assert_eq!(holders(&report), vec![1, 3]);
    assert_eq!(ids(&report.dropped), vec![2]);
    assert_eq!(ids(&report.restored), vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_joiner_is_muted_and_queued_at_the_back() {
    let (voice, coordinator) = lounge(&[1, 2, 3]);
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(2))
        .await
        .unwrap();

    sleep(Duration::from_secs(1)).await;
    voice.join(LOUNGE, member(4)).unwrap();
    assert!(coordinator.on_member_joined(LOUNGE, member(4)).await);
    assert!(voice.is_muted(UserId(4)));

    sleep(Duration::from_secs(2)).await;
    assert_eq!(handle.session().queued(), vec![member(3), member(4)]);

    let report = handle.join().await.unwrap();
    assert_eq!(holders(&report), vec![1, 2, 3, 4]);
    assert!(voice.muted_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropped_member_who_rejoins_is_requeued() {
    let (voice, coordinator) = lounge(&[1, 2, 3, 4]);
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(2))
        .await
        .unwrap();

    sleep(Duration::from_millis(500)).await;
    voice.leave(UserId(3));

    // carol is dropped when her turn comes up at 4s; dave takes over.
    sleep(Duration::from_secs(4)).await;
    assert_eq!(handle.session().holder(), Some(member(4)));
    voice.join(LOUNGE, member(3)).unwrap();

    let report = handle.join().await.unwrap();
    assert_eq!(holders(&report), vec![1, 2, 4, 3]);
    assert!(report.dropped.is_empty());
    assert_eq!(ids(&report.restored), vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_forced_teardown_drains_every_turn() {
    let (voice, coordinator) = lounge(&[1, 2, 3]);
    let started = Instant::now();
    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(60))
        .await
        .unwrap();

    sleep(Duration::from_millis(1500)).await;
    coordinator.stop_talking_stick(LOUNGE).unwrap();
    assert!(matches!(
        coordinator.request_skip(LOUNGE, &member(2)).await,
        Ok(VoteOutcome::Closed)
    ));

    let report = handle.join().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(holders(&report), vec![1, 2, 3]);
    assert!(report.turns.iter().all(|t| t.cancelled));
    assert_eq!(ids(&report.restored), vec![1, 2, 3]);
    assert!(voice.muted_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_display_outage_does_not_stop_rotation() {
    let (voice, coordinator) = lounge(&[1, 2]);
    voice.set_display_available(false);

    let handle = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(1))
        .await
        .unwrap();
    let report = handle.join().await.unwrap();

    assert_eq!(holders(&report), vec![1, 2]);
    assert!(report.display_failures > 0);
    assert_eq!(ids(&report.restored), vec![1, 2]);
    assert!(voice.messages_in(LOUNGE).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_membership_read_failure_releases_the_channel() {
    let (_voice, coordinator) = lounge(&[1]);
    let missing = ChannelId(99);

    let err = coordinator
        .start_talking_stick(missing, member(1), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, CoordError::Service(ServiceError::ChannelNotFound(_))));
    assert!(coordinator.talking_stick(missing).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_muteall_restores_everyone_including_joiners() {
    let (voice, coordinator) = lounge(&[1, 2, 3]);
    let handle = coordinator
        .start_muteall(LOUNGE, member(1), 3)
        .await
        .unwrap();

    assert!(!voice.is_muted(UserId(1)));
    assert!(voice.is_muted(UserId(2)));
    assert!(voice.is_muted(UserId(3)));

    sleep(Duration::from_secs(1)).await;
    voice.join(LOUNGE, member(4)).unwrap();
    assert!(coordinator.on_member_joined(LOUNGE, member(4)).await);
    assert_eq!(handle.session().tracked_count(), 4);

    let report = handle.join().await.unwrap();
    assert!(!report.cancelled);
    assert_eq!(ids(&report.restored), vec![1, 2, 3, 4]);
    assert!(voice.muted_users().is_empty());
    assert_eq!(voice.messages_in(LOUNGE)[0].text, "Unmuted all users.");
    assert!(coordinator.muteall(LOUNGE).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_muteall_join_while_closing_is_not_stranded() {
    let (voice, coordinator) = lounge(&[1, 2]);
    voice.set_mute_delay(Duration::from_millis(500));
    let handle = coordinator
        .start_muteall(LOUNGE, member(1), 2)
        .await
        .unwrap();
    let session = handle.session().clone();

    // carol's mute is in flight when the countdown ends at 2.5s.
    sleep(Duration::from_millis(1700)).await;
    voice.join(LOUNGE, member(3)).unwrap();
    let carol = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.on_member_joined(LOUNGE, member(3)).await }
    });

    // dave arrives after the closing pass collected its members.
    sleep(Duration::from_millis(500)).await;
    assert!(session.is_closing());
    voice.join(LOUNGE, member(4)).unwrap();
    assert!(!coordinator.on_member_joined(LOUNGE, member(4)).await);

    assert!(!carol.await.unwrap());
    let report = handle.join().await.unwrap();
    assert_eq!(ids(&report.restored), vec![1, 2, 3]);
    sleep(Duration::from_secs(1)).await;
    assert!(voice.muted_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_muteall_stop_and_single_instance() {
    let (voice, coordinator) = lounge(&[1, 2]);
    let started = Instant::now();
    let handle = coordinator
        .start_muteall(LOUNGE, member(1), 600)
        .await
        .unwrap();
    assert_eq!(handle.session().secs(), 60);

    assert!(matches!(
        coordinator.start_muteall(LOUNGE, member(2), 5).await,
        Err(CoordError::SessionAlreadyActive(LOUNGE))
    ));

    sleep(Duration::from_millis(2500)).await;
    coordinator.stop_muteall(LOUNGE).unwrap();

    let report = handle.join().await.unwrap();
    assert!(report.cancelled);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(voice.muted_users().is_empty());
    assert!(matches!(
        coordinator.stop_muteall(LOUNGE),
        Err(CoordError::NoActiveSession(LOUNGE))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_join_without_session_is_left_alone() {
    let (voice, coordinator) = lounge(&[1]);
    voice.join(LOUNGE, member(2)).unwrap();
    assert!(!coordinator.on_member_joined(LOUNGE, member(2)).await);
    assert!(!voice.is_muted(UserId(2)));
}

#[tokio::test(start_paused = true)]
async fn test_force_unmute_channel() {
    let (voice, coordinator) = lounge(&[1, 2, 3]);
    voice.set_mute(&member(2), true).await.unwrap();
    voice.set_mute(&member(3), true).await.unwrap();
    voice.reject_mutes_for(UserId(3));

    let report = coordinator.force_unmute_channel(LOUNGE).await.unwrap();

    assert_eq!(ids(&report.restored), vec![1, 2]);
    assert_eq!(ids(&report.unreachable), vec![3]);
    assert!(!voice.is_muted(UserId(2)));
}

#[tokio::test(start_paused = true)]
async fn test_active_sessions_lists_both_kinds() {
    let (_voice, coordinator) = lounge(&[1, 2, 3]);
    let stick = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(10))
        .await
        .unwrap();
    let mute = coordinator.start_muteall(LOUNGE, member(2), 10).await.unwrap();

    let sessions = coordinator.active_sessions();
    assert_eq!(sessions.len(), 2);
    let stick_info = sessions
        .iter()
        .find(|s| s.kind == SessionKind::TalkingStick)
        .unwrap();
    assert_eq!(stick_info.holder, Some(member(1)));
    assert_eq!(stick_info.queued, vec![member(2), member(3)]);

    coordinator.stop_talking_stick(LOUNGE).unwrap();
    coordinator.stop_muteall(LOUNGE).unwrap();
    stick.join().await.unwrap();
    mute.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_all_releases_every_channel() {
    let (voice, coordinator) = lounge(&[1, 2]);
    voice.join(STUDIO, member(3)).unwrap();
    voice.join(STUDIO, member(4)).unwrap();

    let stick = coordinator
        .start_talking_stick(LOUNGE, member(1), Some(60))
        .await
        .unwrap();
    let mute = coordinator.start_muteall(STUDIO, member(3), 60).await.unwrap();

    assert_eq!(coordinator.stop_all(), 2);
    assert_eq!(coordinator.stop_all(), 1, "the draining stick is not signalled twice");

    stick.join().await.unwrap();
    assert!(mute.join().await.unwrap().cancelled);
    assert!(voice.muted_users().is_empty());
}
