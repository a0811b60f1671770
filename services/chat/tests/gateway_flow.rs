//! End-to-end flows through the gateway with the in-memory backends

mod support;

use tokio_test::assert_ok;

use chat::{
    ApiError, MatchOutcome, Outbound,
    gateway::CLOSE_SUPERSEDED,
    models::{
        ClientEvent, EndNotice, EndReason, Gender, PreferredGender, ReportReason, ServerEvent,
        SessionStatus,
    },
    store::SessionStore,
};
use support::{Harness, ended, errors};

#[tokio::test]
async fn test_first_requester_waits_second_is_paired() {
    let h = Harness::new();
    let mut a = h.connect(&h.anyone()).await;
    let mut b = h.connect(&h.anyone()).await;

    h.send(&a, ClientEvent::FindChat { interests: None }).await;
    let waiting = a.events();
    let chat_id = match waiting.as_slice() {
        [ServerEvent::WaitingForPartner { chat_id, .. }] => *chat_id,
        other => panic!("unexpected events {:?}", other),
    };

    h.send(&b, ClientEvent::FindChat { interests: None }).await;
    for events in [a.events(), b.events()] {
        assert_eq!(
            events,
            vec![
                ServerEvent::started(chat_id),
                ServerEvent::ChatFound { chat_id }
            ]
        );
    }

    let session = h.store.get(chat_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert!(session.is_participant(a.id()));
    assert!(session.is_participant(b.id()));
    assert_eq!(h.gateway.presence().current_session(a.id()), Some(chat_id));
    assert_eq!(h.gateway.presence().current_session(b.id()), Some(chat_id));
}

#[tokio::test]
async fn test_gender_preferences_route_to_compatible_waiter() {
    let h = Harness::new();
    let b = h.user(Gender::Female, PreferredGender::Male, &[]);
    let a = h.user(Gender::Male, PreferredGender::Female, &[]);
    let c = h.user(Gender::Male, PreferredGender::Male, &[]);
    h.connect(&b).await;
    h.connect(&c).await;

    let waiting = assert_ok!(h.gateway.find_chat(&b, None).await);

    // C wants men, B is a woman who wants men: no pairing either way
    let outcome = assert_ok!(h.gateway.find_chat(&c, None).await);
    assert!(matches!(outcome, MatchOutcome::Waiting { .. }));

    let outcome = assert_ok!(h.gateway.find_chat(&a, None).await);
    assert_eq!(
        outcome,
        MatchOutcome::Attached {
            session_id: waiting.session_id(),
            peer_id: b.id
        }
    );
    assert_eq!(h.gateway.matchmaker().waiting_len().await, 1);
}

#[tokio::test]
async fn test_shared_interest_is_preferred_over_queue_order() {
    let h = Harness::new();
    let x = h.user(Gender::Other, PreferredGender::Any, &["music"]);
    let y = h.user(Gender::Other, PreferredGender::Any, &["chess"]);
    let requester = h.user(Gender::Other, PreferredGender::Any, &[]);

    assert_ok!(h.gateway.find_chat(&x, None).await);
    let y_waiting = assert_ok!(h.gateway.find_chat(&y, None).await);

    let outcome = assert_ok!(
        h.gateway
            .find_chat(&requester, Some(vec![" chess ".to_string()]))
            .await
    );
    assert_eq!(
        outcome,
        MatchOutcome::Attached {
            session_id: y_waiting.session_id(),
            peer_id: y.id
        }
    );
}

#[tokio::test]
async fn test_profile_interests_apply_when_none_are_sent() {
    let h = Harness::new();
    let x = h.user(Gender::Other, PreferredGender::Any, &["music"]);
    let y = h.user(Gender::Other, PreferredGender::Any, &["chess"]);
    let requester = h.user(Gender::Other, PreferredGender::Any, &["chess"]);

    assert_ok!(h.gateway.find_chat(&x, None).await);
    let y_waiting = assert_ok!(h.gateway.find_chat(&y, None).await);

    let outcome = assert_ok!(h.gateway.find_chat(&requester, None).await);
    assert_eq!(outcome.session_id(), y_waiting.session_id());
}

#[tokio::test]
async fn test_messages_are_filtered_and_delivered_to_both() {
    let h = Harness::new();
    let (mut a, mut b, chat_id) = h.paired().await;

    h.send(
        &a,
        ClientEvent::SendMessage {
            chat_id,
            message: "  hello there  ".to_string(),
        },
    )
    .await;

    let sent = a.events();
    let received = b.events();
    match (sent.as_slice(), received.as_slice()) {
        ([ServerEvent::MessageSent(own)], [ServerEvent::NewMessage(theirs)]) => {
            assert!(own.is_own);
            assert!(!theirs.is_own);
            assert_eq!(own.id, theirs.id);
            assert_eq!(theirs.message, "hello there");
        }
        other => panic!("unexpected delivery {:?}", other),
    }

    let session = h.store.get(chat_id).await.unwrap().unwrap();
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.messages[0].sender_id, a.id());
}

#[tokio::test]
async fn test_messages_keep_send_order() {
    let h = Harness::new();
    let (a, mut b, chat_id) = h.paired().await;

    for i in 0..20 {
        h.send(
            &a,
            ClientEvent::SendMessage {
                chat_id,
                message: format!("message {}", i),
            },
        )
        .await;
    }

    let delivered: Vec<String> = b
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::NewMessage(payload) => Some(payload.message),
            _ => None,
        })
        .collect();
    let stored: Vec<String> = h
        .store
        .get(chat_id)
        .await
        .unwrap()
        .unwrap()
        .messages
        .into_iter()
        .map(|m| m.text)
        .collect();

    assert_eq!(delivered.len(), 20);
    assert_eq!(delivered, stored);
}

#[tokio::test]
async fn test_typing_reaches_only_the_peer() {
    let h = Harness::new();
    let (mut a, mut b, chat_id) = h.paired().await;

    h.send(&a, ClientEvent::TypingStart { chat_id }).await;
    h.send(&a, ClientEvent::TypingStop { chat_id }).await;

    assert!(a.events().is_empty());
    assert_eq!(
        b.events(),
        vec![
            ServerEvent::UserTyping { typing: true },
            ServerEvent::UserTyping { typing: false }
        ]
    );
}

#[tokio::test]
async fn test_skip_notifies_partner_once() {
    let h = Harness::new();
    let (mut a, mut b, chat_id) = h.paired().await;

    h.send(
        &a,
        ClientEvent::SkipChat {
            chat_id,
            reason: None,
        },
    )
    .await;

    assert_eq!(ended(&a.events()), vec![EndNotice::UserSkipped]);
    assert_eq!(ended(&b.events()), vec![EndNotice::PartnerLeft]);
    assert_eq!(h.gateway.presence().current_session(b.id()), None);

    let session = h.store.get(chat_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Ended);
    assert_eq!(session.end_reason, Some(EndReason::UserSkipped));

    // A second skip changes nothing for the partner
    h.send(
        &a,
        ClientEvent::SkipChat {
            chat_id,
            reason: None,
        },
    )
    .await;
    assert!(b.events().is_empty());
}

#[tokio::test]
async fn test_invalid_skip_reason_errors_to_origin_only() {
    let h = Harness::new();
    let (mut a, mut b, chat_id) = h.paired().await;

    h.send(
        &a,
        ClientEvent::SkipChat {
            chat_id,
            reason: Some("bored".to_string()),
        },
    )
    .await;

    assert_eq!(errors(&a.events()), vec!["Invalid end reason".to_string()]);
    assert!(b.events().is_empty());
    let session = h.store.get(chat_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
}

#[tokio::test]
async fn test_disconnect_ends_session_for_partner() {
    let h = Harness::new();
    let (a, mut b, chat_id) = h.paired().await;

    h.gateway.disconnect(a.id(), a.handle.id()).await;

    assert_eq!(ended(&b.events()), vec![EndNotice::PartnerDisconnected]);
    assert_eq!(h.gateway.presence().current_session(b.id()), None);
    assert!(!h.gateway.presence().is_online(a.id()));
    assert!(!h.users.is_online(a.id()));

    let session = h.store.get(chat_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Ended);
    assert_eq!(session.end_reason, Some(EndReason::UserDisconnected));
}

#[tokio::test]
async fn test_messages_after_end_are_rejected() {
    let h = Harness::new();
    let (mut a, mut b, chat_id) = h.paired().await;
    h.gateway.disconnect(b.id(), b.handle.id()).await;
    a.events();

    h.send(
        &a,
        ClientEvent::SendMessage {
            chat_id,
            message: "anyone?".to_string(),
        },
    )
    .await;

    assert_eq!(
        errors(&a.events()),
        vec!["Chat session is not active".to_string()]
    );
    assert!(b.events().is_empty());
    let session = h.store.get(chat_id).await.unwrap().unwrap();
    assert!(session.messages.is_empty());
}

#[tokio::test]
async fn test_outsider_cannot_write_into_session() {
    let h = Harness::new();
    let (mut a, mut b, chat_id) = h.paired().await;
    let mut mallory = h.connect(&h.anyone()).await;

    h.send(
        &mallory,
        ClientEvent::SendMessage {
            chat_id,
            message: "hi".to_string(),
        },
    )
    .await;

    assert_eq!(
        errors(&mallory.events()),
        vec!["You are not in this chat".to_string()]
    );
    assert!(a.events().is_empty());
    assert!(b.events().is_empty());
}

#[tokio::test]
async fn test_realtime_report_is_recorded_and_ends_chat() {
    let h = Harness::new();
    let (mut a, mut b, chat_id) = h.paired().await;

    h.send(
        &a,
        ClientEvent::ReportUser {
            chat_id,
            reason: "harassment".to_string(),
            description: Some("rude".to_string()),
        },
    )
    .await;

    let reporter = a.events();
    assert!(matches!(
        reporter.first(),
        Some(ServerEvent::ReportSubmitted { .. })
    ));
    assert_eq!(ended(&reporter), vec![EndNotice::Reported]);
    assert_eq!(ended(&b.events()), vec![EndNotice::PartnerLeft]);

    let reports = h.store.reports().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].reported_by, a.id());
    assert_eq!(reports[0].reported_user_id, b.id());
    assert_eq!(reports[0].reason, ReportReason::Harassment);
    assert_eq!(reports[0].chat_id, Some(chat_id));

    let session = h.store.get(chat_id).await.unwrap().unwrap();
    assert_eq!(session.end_reason, Some(EndReason::Reported));
}

#[tokio::test]
async fn test_report_with_unknown_reason_changes_nothing() {
    let h = Harness::new();
    let (mut a, _b, chat_id) = h.paired().await;

    h.send(
        &a,
        ClientEvent::ReportUser {
            chat_id,
            reason: "vibes".to_string(),
            description: None,
        },
    )
    .await;

    assert_eq!(errors(&a.events()), vec!["Invalid report reason".to_string()]);
    assert!(h.store.reports().await.is_empty());
    let session = h.store.get(chat_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Active);
}

#[tokio::test]
async fn test_http_report_ends_the_named_session() {
    let h = Harness::new();
    let (mut a, mut b, chat_id) = h.paired().await;

    let report = assert_ok!(
        h.gateway
            .report(a.id(), b.id(), Some(chat_id), "spam", None)
            .await
    );
    assert_eq!(report.status, "pending");
    assert_eq!(ended(&a.events()), vec![EndNotice::Reported]);
    assert_eq!(ended(&b.events()), vec![EndNotice::PartnerLeft]);

    let self_report = h.gateway.report(a.id(), a.id(), None, "spam", None).await;
    assert!(self_report.is_err());
    assert_eq!(h.store.reports().await.len(), 1);
}

#[tokio::test]
async fn test_newer_connection_supersedes_older() {
    let h = Harness::new();
    let (mut a, mut b, chat_id) = h.paired().await;

    let mut replacement = h.connect(&a.user).await;
    let closed = a
        .frames()
        .into_iter()
        .any(|frame| matches!(frame, Outbound::Close { code, .. } if code == CLOSE_SUPERSEDED));
    assert!(closed);

    // The old connection going away must not end the chat
    h.gateway.disconnect(a.id(), a.handle.id()).await;
    assert!(b.events().is_empty());
    assert_eq!(
        h.gateway.presence().current_session(a.id()),
        Some(chat_id)
    );

    h.send(
        &b,
        ClientEvent::SendMessage {
            chat_id,
            message: "still there?".to_string(),
        },
    )
    .await;
    assert!(matches!(
        replacement.events().as_slice(),
        [ServerEvent::NewMessage(_)]
    ));
}

#[tokio::test]
async fn test_second_request_while_chatting_is_rejected() {
    let h = Harness::new();
    let (mut a, _b, chat_id) = h.paired().await;

    h.send(&a, ClientEvent::FindChat { interests: None }).await;

    assert_eq!(
        errors(&a.events()),
        vec!["You are already in a chat".to_string()]
    );
    assert_eq!(h.gateway.presence().current_session(a.id()), Some(chat_id));
}

#[tokio::test]
async fn test_banned_and_unknown_users_are_refused() {
    let h = Harness::new();
    let mut banned = h.anyone();
    banned.banned = true;
    h.users.insert(banned.clone());

    assert!(matches!(
        h.gateway.authenticate(banned.id).await,
        Err(ApiError::Forbidden(_))
    ));
    assert!(matches!(
        h.gateway.authenticate(uuid::Uuid::new_v4()).await,
        Err(ApiError::Unauthorized)
    ));

    let allowed = h.anyone();
    let user = assert_ok!(h.gateway.authenticate(allowed.id).await);
    assert_eq!(user.id, allowed.id);
}

#[tokio::test]
async fn test_history_lists_finished_chats() {
    let h = Harness::new();
    let (a, _b, first) = h.paired().await;
    assert_ok!(h.gateway.end_chat(a.id(), first, None).await);

    let page = assert_ok!(h.gateway.history(a.id(), None, None).await);
    assert_eq!(page.total, 1);
    assert_eq!(page.chats.len(), 1);
    assert_eq!(page.chats[0].id, first);
}
