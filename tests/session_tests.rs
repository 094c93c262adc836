//! Integration tests for `MatchSession`.
//!
//! Uses the shared `MockTransport` from `tests/common` to script authority
//! replies, and `channel_pair` where the authority has to react to what the
//! client sends.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use mahjong_match_client::protocol::{DiscardTileRequest, StartMatchResponse};
use mahjong_match_client::{
    channel_pair, Action, ActionOutcome, ClientRequest, Credentials, ErrorCode, MatchError,
    MatchEvent, MatchSession, RejectReason, ServerMessage, SessionConfig, SessionEvent,
    SessionPhase, TileId, Wind,
};
use tokio::sync::mpsc;
use tokio_test::{assert_pending, assert_ready};

use common::{
    accepted_for_json, accepted_json, accepted_with_state_json, error_json, event_json,
    match_started_json, opening_json, opening_state, rejected_json, rejected_with_state_json,
    sent_requests, MockTransport, EAST_DRAW, EAST_HAND,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

type Sent = Arc<StdMutex<Vec<String>>>;

/// Build a session whose authority answers with `incoming` in order.
fn session_with(
    incoming: Vec<Option<Result<String, MatchError>>>,
    config: SessionConfig,
) -> (
    MatchSession<MockTransport>,
    mpsc::Receiver<SessionEvent>,
    Sent,
    Arc<AtomicBool>,
) {
    let (transport, sent, closed) = MockTransport::new(incoming);
    let (session, events) = MatchSession::new(transport, config);
    (session, events, sent, closed)
}

/// A started session in the opening position. `replies` follow the start reply.
async fn started_session(
    replies: Vec<Option<Result<String, MatchError>>>,
) -> (
    MatchSession<MockTransport>,
    mpsc::Receiver<SessionEvent>,
    Sent,
    Arc<AtomicBool>,
) {
    let mut incoming = vec![Some(Ok(opening_json()))];
    incoming.extend(replies);
    let (mut session, events, sent, closed) = session_with(incoming, SessionConfig::new());
    session.start().await.expect("start should succeed");
    (session, events, sent, closed)
}

fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ════════════════════════════════════════════════════════════════════
// Startup
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn start_sends_version_and_adopts_state() {
    let (mut session, mut events, sent, _closed) =
        session_with(vec![Some(Ok(opening_json()))], SessionConfig::new());

    let state = session.start().await.unwrap().clone();
    assert_eq!(state, opening_state());
    assert_eq!(session.phase(), SessionPhase::Active);
    assert!(session.is_active());

    let requests = sent_requests(&sent);
    assert_eq!(
        requests,
        vec![ClientRequest::StartMatch {
            client_version: env!("CARGO_PKG_VERSION").into(),
            credentials: None,
        }]
    );

    match events.recv().await.unwrap() {
        SessionEvent::StateChanged(view) => {
            assert_eq!(view.current_turn, Wind::East);
            assert_eq!(view.match_id, opening_state().id);
        }
        other => panic!("expected StateChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn start_sends_saved_credentials_and_keeps_issued_ones() {
    let saved = Credentials {
        id: uuid::Uuid::from_u128(1),
        token: "saved".into(),
    };
    let issued = Credentials {
        id: uuid::Uuid::from_u128(1),
        token: "rotated".into(),
    };
    let reply = serde_json::to_string(&ServerMessage::MatchStarted(Box::new(
        StartMatchResponse {
            state: opening_state(),
            credentials: Some(issued.clone()),
        },
    )))
    .unwrap();

    let config = SessionConfig::new().with_credentials(saved.clone());
    let (mut session, _events, sent, _closed) = session_with(vec![Some(Ok(reply))], config);
    assert_eq!(session.credentials(), Some(&saved));

    session.start().await.unwrap();
    assert_eq!(session.credentials(), Some(&issued));
    match &sent_requests(&sent)[0] {
        ClientRequest::StartMatch { credentials, .. } => {
            assert_eq!(credentials.as_ref(), Some(&saved));
        }
        other => panic!("expected StartMatch, got {other:?}"),
    }
}

#[tokio::test]
async fn start_error_reply_terminates_session() {
    let (mut session, mut events, _sent, closed) =
        session_with(vec![Some(Ok(error_json("match full")))], SessionConfig::new());

    let err = session.start().await.unwrap_err();
    assert!(
        matches!(err, MatchError::ServerError { ref message, .. } if message == "match full"),
        "got {err:?}"
    );
    assert_eq!(session.phase(), SessionPhase::Terminated);
    assert!(closed.load(Ordering::Relaxed));
    assert_eq!(drain(&mut events), vec![SessionEvent::Terminated]);

    // Retrying is the caller's business: this session is done.
    assert!(matches!(
        session.start().await.unwrap_err(),
        MatchError::Terminated
    ));
}

#[tokio::test]
async fn start_with_inconsistent_state_is_rejected() {
    let mut broken = opening_state();
    // The same physical tile in two hands.
    broken.players[Wind::West].hand = vec![EAST_HAND[0]];

    let (mut session, _events, _sent, _closed) = session_with(
        vec![Some(Ok(match_started_json(broken)))],
        SessionConfig::new(),
    );
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, MatchError::InvalidState { .. }), "got {err:?}");
    assert_eq!(session.phase(), SessionPhase::Terminated);
    assert!(session.state().is_none());
}

#[tokio::test]
async fn start_when_transport_closes_is_fatal() {
    let (mut session, _events, _sent, _closed) = session_with(vec![None], SessionConfig::new());
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, MatchError::TransportClosed));
    assert_eq!(session.phase(), SessionPhase::Terminated);
}

#[tokio::test]
async fn side_loads_run_alongside_the_handshake() {
    let (transport, mut authority) = channel_pair();
    let (request_seen_tx, request_seen_rx) = tokio::sync::oneshot::channel::<()>();
    let (loaded_tx, loaded_rx) = tokio::sync::oneshot::channel::<()>();

    // The authority only answers once the side-load finished, and the
    // side-load only finishes once the authority saw the request.
    let authority_task = tokio::spawn(async move {
        let request = authority.recv().await.unwrap();
        assert!(request.contains("StartMatch"));
        request_seen_tx.send(()).unwrap();
        loaded_rx.await.unwrap();
        authority
            .send(&ServerMessage::match_started(opening_state()))
            .unwrap();
        authority
    });

    let (mut session, _events) = MatchSession::new(transport, SessionConfig::new());
    let side_loads = async move {
        request_seen_rx
            .await
            .map_err(|_| MatchError::SideLoad("authority gone".into()))?;
        loaded_tx.send(()).unwrap();
        Ok::<(), MatchError>(())
    };

    tokio::time::timeout(Duration::from_secs(5), session.start_with(side_loads))
        .await
        .expect("handshake and side-loads should not wait on each other")
        .unwrap();
    assert_eq!(session.phase(), SessionPhase::Active);
    drop(authority_task.await.unwrap());
}

#[tokio::test]
async fn failed_side_load_aborts_start() {
    // No reply scripted: the handshake would wait forever.
    let (mut session, mut events, _sent, closed) = session_with(vec![], SessionConfig::new());

    let err = session
        .start_with(async { Err(MatchError::SideLoad("tile faces missing".into())) })
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::SideLoad(_)));
    assert_eq!(session.phase(), SessionPhase::Terminated);
    assert!(closed.load(Ordering::Relaxed));
    assert_eq!(drain(&mut events), vec![SessionEvent::Terminated]);
}

// ════════════════════════════════════════════════════════════════════
// Actions
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn east_discard_is_predicted_then_confirmed() {
    let (mut session, mut events, sent, _closed) =
        started_session(vec![Some(Ok(accepted_json()))]).await;
    drain(&mut events);

    let outcome = session.discard(Wind::East, EAST_HAND[1]).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Confirmed);

    let state = session.state().unwrap();
    let east = state.player(Wind::East);
    assert_eq!(east.hand, vec![EAST_HAND[0], EAST_HAND[2], EAST_DRAW]);
    assert_eq!(east.current_draw, None);
    assert_eq!(east.discards, vec![EAST_HAND[1]]);
    assert_eq!(state.current_turn, Wind::South);

    let requests = sent_requests(&sent);
    assert_eq!(
        requests[1],
        ClientRequest::DiscardTile(DiscardTileRequest {
            player: Wind::East,
            tile: EAST_HAND[1],
            request_id: 1,
        })
    );

    // Only the prediction changed the table; confirmation is silent.
    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 1);
    match &emitted[0] {
        SessionEvent::StateChanged(view) => {
            assert_eq!(view.current_turn, Wind::South);
            let east = view.seat(Wind::East).unwrap();
            assert_eq!(east.discards[0].id, EAST_HAND[1]);
        }
        other => panic!("expected StateChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn discarding_the_drawn_tile_keeps_the_hand() {
    let (mut session, _events, _sent, _closed) =
        started_session(vec![Some(Ok(accepted_json()))]).await;

    session.discard(Wind::East, EAST_DRAW).await.unwrap();
    let east = session.state().unwrap().player(Wind::East).clone();
    assert_eq!(east.hand, EAST_HAND.to_vec());
    assert_eq!(east.discards, vec![EAST_DRAW]);
}

#[tokio::test]
async fn rejection_rolls_back_and_notifies_view() {
    let (mut session, mut events, _sent, _closed) = started_session(vec![Some(Ok(
        rejected_json(ErrorCode::TileNotHeld, "tile is not in your hand"),
    ))])
    .await;
    drain(&mut events);

    let err = session
        .discard(Wind::East, EAST_HAND[0])
        .await
        .unwrap_err();
    match &err {
        MatchError::ActionRejected { code, reason } => {
            assert_eq!(*code, Some(ErrorCode::TileNotHeld));
            assert_eq!(reason.as_deref(), Some("tile is not in your hand"));
        }
        other => panic!("expected ActionRejected, got {other:?}"),
    }
    assert!(err.is_recoverable());
    assert_eq!(session.state(), Some(&opening_state()));
    assert_eq!(session.phase(), SessionPhase::Active);

    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 3, "prediction, rollback, rejection: {emitted:?}");
    match &emitted[1] {
        SessionEvent::StateChanged(view) => assert_eq!(view.current_turn, Wind::East),
        other => panic!("expected StateChanged, got {other:?}"),
    }
    assert_eq!(
        emitted[2],
        SessionEvent::ActionRejected {
            seat: Wind::East,
            action: Action::Discard(EAST_HAND[0]),
            code: Some(ErrorCode::TileNotHeld),
            reason: Some("tile is not in your hand".into()),
        }
    );
}

#[tokio::test]
async fn rejection_with_a_state_adopts_it_and_notifies_view() {
    // The authority refuses and reports that South already drew.
    let mut authoritative = opening_state();
    authoritative.players[Wind::South].current_draw = Some(TileId(2));
    authoritative.revision = 4;

    let (mut session, mut events, _sent, _closed) = started_session(vec![Some(Ok(
        rejected_with_state_json(ErrorCode::NotYourTurn, "south is acting", authoritative.clone()),
    ))])
    .await;
    drain(&mut events);

    let err = session
        .discard(Wind::East, EAST_HAND[2])
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            MatchError::ActionRejected {
                code: Some(ErrorCode::NotYourTurn),
                ..
            }
        ),
        "got {err:?}"
    );
    assert_eq!(session.state(), Some(&authoritative));
    assert_ne!(session.state(), Some(&opening_state()));
    assert_eq!(session.phase(), SessionPhase::Active);

    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 3, "prediction, adopted state, rejection: {emitted:?}");
    match &emitted[1] {
        SessionEvent::StateChanged(view) => {
            let south = view.seat(Wind::South).unwrap();
            assert_eq!(south.draw.as_ref().map(|tile| tile.id), Some(TileId(2)));
        }
        other => panic!("expected StateChanged, got {other:?}"),
    }
    assert_eq!(
        emitted[2],
        SessionEvent::ActionRejected {
            seat: Wind::East,
            action: Action::Discard(EAST_HAND[2]),
            code: Some(ErrorCode::NotYourTurn),
            reason: Some("south is acting".into()),
        }
    );
}

#[tokio::test]
async fn rejection_with_an_unrecognized_code_still_notifies_view() {
    let reply = r#"{"type":"DiscardResult","data":{"accepted":false,"error_code":"TILE_ALREADY_CLAIMED","reason":"claimed by north"}}"#;
    let (mut session, mut events, _sent, _closed) =
        started_session(vec![Some(Ok(reply.into()))]).await;
    drain(&mut events);

    let err = session
        .discard(Wind::East, EAST_HAND[0])
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            MatchError::ActionRejected {
                code: Some(ErrorCode::Unknown),
                ..
            }
        ),
        "got {err:?}"
    );
    assert_eq!(session.state(), Some(&opening_state()));
    assert_eq!(
        drain(&mut events).last(),
        Some(&SessionEvent::ActionRejected {
            seat: Wind::East,
            action: Action::Discard(EAST_HAND[0]),
            code: Some(ErrorCode::Unknown),
            reason: Some("claimed by north".into()),
        })
    );
}

#[tokio::test]
async fn illegal_intents_are_dropped_without_sending() {
    let (mut session, mut events, sent, _closed) = started_session(vec![]).await;
    drain(&mut events);

    let outcome = session.discard(Wind::South, TileId(1)).await.unwrap();
    assert_eq!(
        outcome,
        ActionOutcome::Dropped(RejectReason::NotYourTurn {
            seat: Wind::South,
            current: Wind::East,
        })
    );

    let outcome = session.discard(Wind::East, TileId(1)).await.unwrap();
    assert_eq!(
        outcome,
        ActionOutcome::Dropped(RejectReason::TileNotHeld {
            seat: Wind::East,
            tile: TileId(1),
        })
    );

    assert_eq!(sent.lock().unwrap().len(), 1, "only the start request");
    assert_eq!(session.state(), Some(&opening_state()));
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn accepted_state_replaces_the_prediction() {
    let mut authoritative = opening_state();
    authoritative.players[Wind::East].hand = vec![EAST_HAND[0], EAST_DRAW, EAST_HAND[2]];
    authoritative.players[Wind::East].current_draw = None;
    authoritative.players[Wind::East].discards = vec![EAST_HAND[1]];
    authoritative.current_turn = Wind::South;
    authoritative.revision = 9;

    let (mut session, _events, _sent, _closed) = started_session(vec![Some(Ok(
        accepted_with_state_json(authoritative.clone()),
    ))])
    .await;

    let outcome = session.discard(Wind::East, EAST_HAND[1]).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Corrected);
    assert_eq!(session.state(), Some(&authoritative));
}

#[tokio::test]
async fn accepted_state_matching_the_prediction_confirms() {
    let mut predicted = opening_state();
    predicted.players[Wind::East].hand = vec![EAST_HAND[0], EAST_HAND[2], EAST_DRAW];
    predicted.players[Wind::East].current_draw = None;
    predicted.players[Wind::East].discards = vec![EAST_HAND[1]];
    predicted.current_turn = Wind::South;
    predicted.revision = 1;

    let (mut session, _events, _sent, _closed) =
        started_session(vec![Some(Ok(accepted_with_state_json(predicted.clone())))]).await;

    let outcome = session.discard(Wind::East, EAST_HAND[1]).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Confirmed);
    assert_eq!(session.state(), Some(&predicted));
}

#[tokio::test]
async fn transport_failure_rolls_back() {
    let (mut session, _events, _sent, _closed) = started_session(vec![Some(Err(
        MatchError::TransportReceive("connection reset".into()),
    ))])
    .await;

    let err = session
        .discard(Wind::East, EAST_HAND[1])
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::TransportReceive(_)));
    assert!(err.is_recoverable());
    assert_eq!(session.state(), Some(&opening_state()));
    assert_eq!(session.phase(), SessionPhase::Active);
}

#[tokio::test]
async fn closed_transport_rolls_back() {
    let (mut session, _events, _sent, _closed) = started_session(vec![None]).await;

    let err = session
        .discard(Wind::East, EAST_HAND[1])
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::TransportClosed));
    assert_eq!(session.state(), Some(&opening_state()));
}

#[tokio::test]
async fn malformed_response_rolls_back_and_keeps_raw_payload() {
    let (mut session, _events, _sent, _closed) =
        started_session(vec![Some(Ok("{not json".into()))]).await;

    let err = session
        .discard(Wind::East, EAST_HAND[1])
        .await
        .unwrap_err();
    match err {
        MatchError::MalformedResponse { raw, .. } => assert_eq!(raw, "{not json"),
        other => panic!("expected MalformedResponse, got {other:?}"),
    }
    assert_eq!(session.state(), Some(&opening_state()));
    assert_eq!(session.phase(), SessionPhase::Active);
}

#[tokio::test]
async fn server_error_during_action_rolls_back() {
    let (mut session, _events, _sent, _closed) =
        started_session(vec![Some(Ok(error_json("internal")))]).await;

    let err = session
        .discard(Wind::East, EAST_HAND[1])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MatchError::ServerError {
            error_code: Some(ErrorCode::InternalError),
            ..
        }
    ));
    assert_eq!(session.state(), Some(&opening_state()));
}

#[tokio::test]
async fn start_reply_during_action_is_unexpected() {
    let (mut session, _events, _sent, _closed) =
        started_session(vec![Some(Ok(opening_json()))]).await;

    let err = session
        .discard(Wind::East, EAST_HAND[1])
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::UnexpectedMessage { .. }));
    assert_eq!(session.state(), Some(&opening_state()));
}

#[tokio::test]
async fn session_recovers_after_a_failed_exchange() {
    // The first request never got an answer; the authority tags the second.
    let (mut session, _events, _sent, _closed) = started_session(vec![
        Some(Err(MatchError::TransportReceive("blip".into()))),
        Some(Ok(accepted_for_json(2))),
    ])
    .await;

    assert!(session.discard(Wind::East, EAST_HAND[1]).await.is_err());
    let outcome = session.discard(Wind::East, EAST_HAND[1]).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Confirmed);
    assert_eq!(session.state().unwrap().current_turn, Wind::South);
}

#[tokio::test(start_paused = true)]
async fn response_timeout_rolls_back() {
    let (mut session, _events, _sent, _closed) = session_with(
        vec![Some(Ok(opening_json()))],
        SessionConfig::new().with_response_timeout(Duration::from_secs(5)),
    );
    session.start().await.unwrap();

    let err = session
        .discard(Wind::East, EAST_HAND[1])
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::Timeout));
    assert_eq!(session.state(), Some(&opening_state()));
    assert_eq!(session.phase(), SessionPhase::Active);
}

/// A toy authority that answers every discard with `StandardRules`, tagging
/// verdicts with the request id. Its first discard verdict is held back for
/// `first_delay`. Returns the authority's final state.
fn spawn_rules_authority(
    mut authority: mahjong_match_client::AuthorityEnd,
    first_delay: Duration,
) -> tokio::task::JoinHandle<mahjong_match_client::MatchState> {
    use mahjong_match_client::{Rules, StandardRules};

    tokio::spawn(async move {
        let mut state = opening_state();
        let mut delay = Some(first_delay);
        while let Some(text) = authority.recv().await {
            let reply = match serde_json::from_str::<ClientRequest>(&text).unwrap() {
                ClientRequest::StartMatch { .. } => ServerMessage::match_started(state.clone()),
                ClientRequest::DiscardTile(DiscardTileRequest {
                    player,
                    tile,
                    request_id,
                }) => {
                    if let Some(delay) = delay.take() {
                        tokio::time::sleep(delay).await;
                    }
                    let verdict = match StandardRules.apply(&state, player, &Action::Discard(tile))
                    {
                        Ok(next) => {
                            state = next;
                            ServerMessage::accepted()
                        }
                        Err(reason) => ServerMessage::rejected(reason.code(), reason.to_string()),
                    };
                    verdict.answering(request_id)
                }
            };
            authority.send(&reply).unwrap();
        }
        state
    })
}

#[tokio::test(start_paused = true)]
async fn late_verdict_is_not_taken_for_the_next_reply() {
    let (transport, authority) = channel_pair();
    let authority_task = spawn_rules_authority(authority, Duration::from_millis(80));
    let config = SessionConfig::new().with_response_timeout(Duration::from_millis(50));
    let (mut session, mut events) = MatchSession::new(transport, config);
    session.start().await.unwrap();

    let err = session
        .discard(Wind::East, EAST_HAND[0])
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::Timeout), "got {err:?}");
    assert_eq!(session.state(), Some(&opening_state()));
    drain(&mut events);

    // The authority did take the first discard once it got round to it, so
    // the second one is refused as out of turn.
    let err = session
        .discard(Wind::East, EAST_HAND[1])
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            MatchError::ActionRejected {
                code: Some(ErrorCode::NotYourTurn),
                ..
            }
        ),
        "got {err:?}"
    );
    assert!(drain(&mut events).contains(&SessionEvent::ActionRejected {
        seat: Wind::East,
        action: Action::Discard(EAST_HAND[1]),
        code: Some(ErrorCode::NotYourTurn),
        reason: Some(
            RejectReason::NotYourTurn {
                seat: Wind::East,
                current: Wind::South,
            }
            .to_string()
        ),
    }));

    let local = session.state().unwrap().clone();
    assert_eq!(local.player(Wind::East).discards, vec![EAST_HAND[0]]);
    assert_eq!(local.current_turn, Wind::South);

    session.terminate().await;
    assert_eq!(local, authority_task.await.unwrap());
}

#[tokio::test]
async fn verdict_after_an_unreadable_frame_is_applied_later() {
    let drawn = MatchEvent::TileDrawn {
        seat: Wind::South,
        tile: TileId(2),
    };
    // The garbled frame is not the verdict: the real one follows it.
    let (mut session, _events, _sent, _closed) = started_session(vec![
        Some(Ok("{garbled".into())),
        Some(Ok(accepted_json())),
        Some(Ok(event_json(drawn))),
    ])
    .await;

    let err = session
        .discard(Wind::East, EAST_HAND[1])
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::MalformedResponse { .. }));
    assert_eq!(session.state(), Some(&opening_state()));

    // Waiting for the next event picks up the verdict on the way.
    assert_eq!(session.next_event().await.unwrap(), drawn);
    let state = session.state().unwrap();
    assert_eq!(state.player(Wind::East).discards, vec![EAST_HAND[1]]);
    assert_eq!(state.player(Wind::South).current_draw, Some(TileId(2)));
    assert_eq!(state.current_turn, Wind::South);
}

#[tokio::test]
async fn stray_verdict_with_nothing_pending_is_unexpected() {
    let (mut session, _events, _sent, _closed) =
        started_session(vec![Some(Ok(accepted_json()))]).await;

    let err = session.next_event().await.unwrap_err();
    assert!(matches!(err, MatchError::UnexpectedMessage { .. }), "got {err:?}");
    assert_eq!(session.state(), Some(&opening_state()));
}

// ════════════════════════════════════════════════════════════════════
// Authority events
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn events_apply_in_order() {
    let (mut session, _events, _sent, _closed) = started_session(vec![
        Some(Ok(accepted_json())),
        Some(Ok(event_json(MatchEvent::TileDrawn {
            seat: Wind::South,
            tile: TileId(2),
        }))),
        Some(Ok(event_json(MatchEvent::TileDiscarded {
            seat: Wind::South,
            tile: TileId(135),
        }))),
    ])
    .await;

    session.discard(Wind::East, EAST_HAND[1]).await.unwrap();

    let drawn = session.next_event().await.unwrap();
    assert_eq!(
        drawn,
        MatchEvent::TileDrawn {
            seat: Wind::South,
            tile: TileId(2),
        }
    );
    session.next_event().await.unwrap();

    let state = session.state().unwrap();
    let south = state.player(Wind::South);
    assert_eq!(south.hand, vec![TileId(1), TileId(2)]);
    assert_eq!(south.discards, vec![TileId(135)]);
    assert_eq!(state.current_turn, Wind::West);
    assert_eq!(state.revision, 3);
}

#[tokio::test]
async fn events_before_the_verdict_are_queued() {
    let drawn = MatchEvent::TileDrawn {
        seat: Wind::South,
        tile: TileId(2),
    };
    let (mut session, _events, _sent, _closed) = started_session(vec![
        Some(Ok(event_json(drawn))),
        Some(Ok(accepted_json())),
    ])
    .await;

    let outcome = session.discard(Wind::East, EAST_HAND[1]).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Confirmed);
    // Not applied yet: it waits for the caller.
    assert_eq!(
        session.state().unwrap().player(Wind::South).current_draw,
        None
    );

    // The script is exhausted, so this can only come from the queue.
    assert_eq!(session.next_event().await.unwrap(), drawn);
    assert_eq!(
        session.state().unwrap().player(Wind::South).current_draw,
        Some(TileId(2))
    );
}

#[tokio::test]
async fn contradicting_event_is_reported() {
    let (mut session, _events, _sent, _closed) =
        started_session(vec![Some(Ok(event_json(MatchEvent::TileDiscarded {
            seat: Wind::West,
            tile: TileId(3),
        })))])
        .await;

    let err = session.next_event().await.unwrap_err();
    assert!(matches!(
        err,
        MatchError::InvalidEvent(RejectReason::NotYourTurn { .. })
    ));
    assert_eq!(session.state(), Some(&opening_state()));
}

// ════════════════════════════════════════════════════════════════════
// Cancellation and teardown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cancelling_a_pending_action_resolves_it() {
    let (mut session, mut events, sent, closed) = started_session(vec![]).await;
    let token = session.cancel_token();

    {
        let mut pending = tokio_test::task::spawn(session.discard(Wind::East, EAST_HAND[1]));
        assert_pending!(pending.poll());

        token.cancel();
        let result = assert_ready!(pending.poll());
        assert!(matches!(result, Err(MatchError::Cancelled)), "got {result:?}");
    }

    assert_eq!(session.phase(), SessionPhase::Terminated);
    assert!(session.state().is_none());
    assert!(closed.load(Ordering::Relaxed));
    assert_eq!(drain(&mut events).last(), Some(&SessionEvent::Terminated));

    // Later calls fail fast and send nothing.
    let frames = sent.lock().unwrap().len();
    assert!(matches!(
        session.discard(Wind::East, EAST_HAND[0]).await,
        Err(MatchError::Terminated)
    ));
    assert!(matches!(
        session.start().await,
        Err(MatchError::Terminated)
    ));
    assert!(matches!(
        session.next_event().await,
        Err(MatchError::Terminated)
    ));
    assert_eq!(sent.lock().unwrap().len(), frames);
}

#[tokio::test]
async fn cancelling_during_start_resolves_promptly() {
    let (mut session, _events, _sent, _closed) = session_with(vec![], SessionConfig::new());
    let token = session.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), session.start())
        .await
        .expect("cancellation should release the pending start");
    assert!(matches!(result, Err(MatchError::Cancelled)));
    assert_eq!(session.phase(), SessionPhase::Terminated);
}

#[tokio::test]
async fn cancelling_a_pending_event_wait_resolves_it() {
    let (mut session, _events, _sent, _closed) = started_session(vec![]).await;
    let token = session.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(5), session.next_event())
        .await
        .expect("cancellation should release the pending receive");
    assert!(matches!(result, Err(MatchError::Cancelled)));
    assert_eq!(session.phase(), SessionPhase::Terminated);
}

#[tokio::test]
async fn cancelling_an_idle_session_terminates_on_next_call() {
    let (mut session, mut events, sent, closed) = started_session(vec![]).await;
    drain(&mut events);

    session.cancel_token().cancel();
    session.cancel_token().cancel();
    assert!(!session.is_active());

    let err = session.discard(Wind::East, EAST_HAND[1]).await.unwrap_err();
    assert!(matches!(err, MatchError::Terminated));
    assert!(closed.load(Ordering::Relaxed));
    assert_eq!(sent.lock().unwrap().len(), 1);
    assert_eq!(drain(&mut events), vec![SessionEvent::Terminated]);
}

#[tokio::test]
async fn terminate_releases_state_and_closes_transport() {
    let (mut session, mut events, _sent, closed) = started_session(vec![]).await;
    drain(&mut events);

    session.terminate().await;
    assert_eq!(session.phase(), SessionPhase::Terminated);
    assert!(session.state().is_none());
    assert!(session.view().is_none());
    assert!(closed.load(Ordering::Relaxed));
    assert!(session.cancel_token().is_cancelled());
    assert_eq!(drain(&mut events), vec![SessionEvent::Terminated]);
}

#[tokio::test(start_paused = true)]
async fn cancelling_with_a_full_event_channel_resolves() {
    let (mut session, mut events, _sent, closed) = session_with(
        vec![Some(Ok(opening_json()))],
        SessionConfig::new().with_event_channel_capacity(1),
    );
    session.start().await.unwrap();
    // The start event fills the channel and nobody reads it.
    let token = session.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        session.discard(Wind::East, EAST_HAND[1]),
    )
    .await
    .expect("cancellation should release the pending discard");
    assert!(matches!(result, Err(MatchError::Cancelled)), "got {result:?}");
    assert_eq!(session.phase(), SessionPhase::Terminated);
    assert!(closed.load(Ordering::Relaxed));

    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::StateChanged(_)
    ));
}

#[tokio::test]
async fn full_event_channel_does_not_stall_the_session() {
    let (mut session, mut events, _sent, _closed) = session_with(
        vec![Some(Ok(opening_json())), Some(Ok(accepted_json()))],
        SessionConfig::new().with_event_channel_capacity(1),
    );
    session.start().await.unwrap();
    // Channel now holds the start event; the prediction event is dropped.
    let outcome = session.discard(Wind::East, EAST_HAND[1]).await.unwrap();
    assert_eq!(outcome, ActionOutcome::Confirmed);

    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::StateChanged(_)
    ));
}

// ════════════════════════════════════════════════════════════════════
// Loopback authority
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn loopback_authority_round() {
    use mahjong_match_client::{Rules, StandardRules};

    let (transport, mut authority) = channel_pair();
    let authority_task = tokio::spawn(async move {
        let mut state = opening_state();
        while let Some(text) = authority.recv().await {
            let reply = match serde_json::from_str::<ClientRequest>(&text).unwrap() {
                ClientRequest::StartMatch { .. } => ServerMessage::match_started(state.clone()),
                ClientRequest::DiscardTile(DiscardTileRequest {
                    player,
                    tile,
                    request_id,
                }) => match StandardRules.apply(&state, player, &Action::Discard(tile)) {
                    Ok(next) => {
                        state = next;
                        ServerMessage::accepted().answering(request_id)
                    }
                    Err(reason) => ServerMessage::rejected(reason.code(), reason.to_string())
                        .answering(request_id),
                },
            };
            authority.send(&reply).unwrap();
        }
        state
    });

    let (mut session, _events) = MatchSession::new(transport, SessionConfig::new());
    session.start().await.unwrap();
    assert_eq!(
        session.discard(Wind::East, EAST_DRAW).await.unwrap(),
        ActionOutcome::Confirmed
    );
    let predicted = session.state().unwrap().clone();

    session.terminate().await;
    let authoritative = authority_task.await.unwrap();
    assert_eq!(predicted, authoritative);
}
