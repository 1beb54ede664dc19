mod common;

use callmesh::call::{CallSession, NegotiationRole, REASON_NOT_AVAILABLE, REASON_REJECTED};
use callmesh::error::Error;
use callmesh::media::{MediaStream, RemoteMediaStream, TrackKind};
use callmesh::peer::{
    CallNotice, NegotiationOutcome, NoticeKind, SessionDescription, TransportEvent,
};
use callmesh::signaling::{
    events, ActiveUser, Envelope, IncomingPreOffer, PreOfferAnswer, SignalingChannel,
};
use callmesh::state::{
    AppStateStore, ApplicationState, CallRejection, CallState, ChatMessage, StatePatch,
};
use common::*;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Harness {
    call: CallSession,
    notices: mpsc::UnboundedReceiver<CallNotice>,
    outbound: mpsc::UnboundedReceiver<Envelope>,
    factory: Arc<FakeTransportFactory>,
    local: MediaStream,
    store: AppStateStore,
}

impl Harness {
    fn new() -> Self {
        let (signaling, outbound) = SignalingChannel::new();
        let (tx, notices) = mpsc::unbounded_channel();
        let factory = FakeTransportFactory::new();
        let mut call = CallSession::new(signaling, factory.clone(), tx);
        let local = MediaStream::camera("local-stream");
        let store = AppStateStore::new();
        store.apply_all(call.on_local_media_ready(local.clone()));
        Self {
            call,
            notices,
            outbound,
            factory,
            local,
            store,
        }
    }

    fn apply(&self, patches: Vec<StatePatch>) -> Vec<StatePatch> {
        self.store.apply_all(patches.clone());
        patches
    }

    /// Feeds the next `n` notices back into the session.
    async fn pump(&mut self, n: usize) -> Vec<CallNotice> {
        let mut seen = Vec::new();
        for _ in 0..n {
            let notice = tokio::time::timeout(WAIT, self.notices.recv())
                .await
                .expect("timed out waiting for a call notice")
                .expect("notice channel closed");
            seen.push(notice.clone());
            let patches = self.call.on_notice(notice).await;
            self.apply(patches);
        }
        seen
    }

    fn sent(&mut self) -> Vec<Envelope> {
        drain(&mut self.outbound)
    }

    /// Caller side up to the moment the offer went out.
    async fn dial_and_offer(&mut self, callee: &str) {
        let patches = self.call.place_call(&user(callee), "me");
        self.apply(patches);
        let patches = self.call.on_pre_offer_answer(PreOfferAnswer::CallAccepted).await;
        self.apply(patches);
        self.pump(1).await;
    }

    /// Callee side: pre-offer accepted, transport created.
    async fn accept_from(&mut self, caller: &str) {
        let patches = self.call.on_pre_offer(pre_offer(caller, "Alice"), false);
        self.apply(patches);
        let patches = self.call.accept().await;
        self.apply(patches);
    }
}

fn user(socket_id: &str) -> ActiveUser {
    ActiveUser {
        username: format!("user-{socket_id}"),
        socket_id: socket_id.into(),
    }
}

fn pre_offer(caller: &str, username: &str) -> IncomingPreOffer {
    IncomingPreOffer {
        caller_socket_id: caller.into(),
        caller_username: username.into(),
    }
}

#[tokio::test]
async fn local_media_makes_session_available() {
    let h = Harness::new();
    assert_eq!(h.call.state(), CallState::Available);
    assert!(h.call.check_if_call_is_possible());
    let snapshot = h.store.snapshot();
    assert_eq!(snapshot.call_state, CallState::Available);
    assert_eq!(snapshot.local_stream.as_ref().map(|s| s.id()), Some("local-stream"));
}

#[tokio::test]
async fn offerer_scenario_ends_in_progress_as_offerer() {
    let mut h = Harness::new();

    let patches = h.call.place_call(&user("P"), "me");
    assert!(patches.contains(&StatePatch::CallingDialogVisible(true)));
    h.apply(patches);
    assert_eq!(h.call.state(), CallState::InProgress);

    let sent = h.sent();
    let pre = named(&sent, events::PRE_OFFER);
    assert_eq!(pre.len(), 1);
    assert_eq!(pre[0].data["callee"]["socketId"], json!("P"));
    assert_eq!(pre[0].data["caller"]["username"], json!("me"));

    let patches = h.call.on_pre_offer_answer(PreOfferAnswer::CallAccepted).await;
    assert!(patches.contains(&StatePatch::CallingDialogVisible(false)));
    h.apply(patches);
    assert_eq!(h.call.role(), NegotiationRole::Offerer);

    let notices = h.pump(1).await;
    assert!(matches!(
        notices[0].kind,
        NoticeKind::Negotiation(NegotiationOutcome::OfferReady(_))
    ));
    let sent = h.sent();
    let offer = named(&sent, events::WEBRTC_OFFER);
    assert_eq!(offer.len(), 1);
    assert_eq!(offer[0].data["calleeSocketId"], json!("P"));
    assert_eq!(offer[0].data["offer"]["type"], json!("offer"));

    h.call.on_answer(SessionDescription::answer("v=0 remote-answer"));
    h.pump(1).await;

    assert_eq!(h.call.state(), CallState::InProgress);
    assert_eq!(h.call.role(), NegotiationRole::Offerer);
    assert!(h.call.is_remote_description_set());
    assert_eq!(
        entries(&h.factory.log),
        vec![
            "create_transport",
            "open_data_channel",
            "create_offer",
            "set_local:v=0 fake-offer",
            "set_remote:v=0 remote-answer",
        ]
    );
    assert!(!h.store.snapshot().calling_dialog_visible);
}

#[tokio::test]
async fn answer_is_ignored_unless_offerer() {
    let mut h = Harness::new();
    h.accept_from("caller").await;
    h.call.on_answer(SessionDescription::answer("v=0 stray"));
    tokio::task::yield_now().await;
    assert_eq!(count(&h.factory.log, "set_remote"), 0);
    assert_eq!(h.call.role(), NegotiationRole::None);
}

#[tokio::test]
async fn rejecting_alice_resets_and_clears_caller_name() {
    let mut h = Harness::new();
    let patches = h.call.on_pre_offer(pre_offer("alice-socket", "Alice"), false);
    h.apply(patches);
    assert_eq!(h.call.state(), CallState::Requested);
    assert_eq!(h.store.snapshot().caller_username, "Alice");

    let patches = h.call.reject().await;
    h.apply(patches);

    let sent = h.sent();
    let answers = named(&sent, events::PRE_OFFER_ANSWER);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].data["callerSocketId"], json!("alice-socket"));
    assert_eq!(answers[0].data["answer"], json!("CALL_REJECTED"));

    assert_eq!(h.call.state(), CallState::Available);
    assert_eq!(h.call.peer(), None);
    let snapshot = h.store.snapshot();
    assert_eq!(snapshot.call_state, CallState::Available);
    assert!(snapshot.caller_username.is_empty());
    assert_eq!(h.factory.created(), 0);
}

#[tokio::test]
async fn pre_offer_while_busy_yields_not_available() {
    let mut h = Harness::new();
    h.call.on_pre_offer(pre_offer("first", "Alice"), false);
    h.sent();

    let patches = h.call.on_pre_offer(pre_offer("second", "Bob"), false);
    assert!(patches.is_empty());
    assert_eq!(h.call.state(), CallState::Requested);
    assert_eq!(h.call.peer(), Some("first"));

    let sent = h.sent();
    let answers = named(&sent, events::PRE_OFFER_ANSWER);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].data["callerSocketId"], json!("second"));
    assert_eq!(answers[0].data["answer"], json!("CALL_NOT_AVAILABLE"));
}

#[tokio::test]
async fn pre_offer_without_local_media_or_during_group_call_is_declined() {
    let (signaling, mut outbound) = SignalingChannel::new();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut call = CallSession::new(signaling, FakeTransportFactory::new(), tx);
    assert_eq!(call.state(), CallState::Unavailable);
    assert!(!call.check_if_call_is_possible());

    call.on_pre_offer(pre_offer("x", "X"), false);
    assert_eq!(call.state(), CallState::Unavailable);

    call.on_local_media_ready(MediaStream::camera("local"));
    call.on_pre_offer(pre_offer("y", "Y"), true);
    assert_eq!(call.state(), CallState::Available);

    let sent = drain(&mut outbound);
    let answers = named(&sent, events::PRE_OFFER_ANSWER);
    assert_eq!(answers.len(), 2);
    assert!(answers
        .iter()
        .all(|a| a.data["answer"] == json!("CALL_NOT_AVAILABLE")));
}

#[tokio::test]
async fn rejection_reasons_are_surfaced_then_cleared() {
    let mut h = Harness::new();

    let patches = h.call.place_call(&user("busy-callee"), "me");
    h.apply(patches);
    let patches = h
        .call
        .on_pre_offer_answer(PreOfferAnswer::CallNotAvailable)
        .await;
    h.apply(patches);
    assert_eq!(h.call.state(), CallState::Available);
    assert_eq!(
        h.store.snapshot().call_rejected,
        CallRejection {
            rejected: true,
            reason: REASON_NOT_AVAILABLE.into(),
        }
    );

    let patches = h.call.place_call(&user("grumpy-callee"), "me");
    h.apply(patches);
    assert_eq!(h.store.snapshot().call_rejected, CallRejection::default());

    let patches = h.call.on_pre_offer_answer(PreOfferAnswer::CallRejected).await;
    h.apply(patches);
    assert_eq!(h.store.snapshot().call_rejected.reason, REASON_REJECTED);
    assert!(h.call.is_idle());
    assert_eq!(h.factory.created(), 0);
}

#[tokio::test]
async fn early_candidates_apply_after_remote_description_in_arrival_order() {
    let mut h = Harness::new();
    h.accept_from("caller").await;

    h.call.on_remote_candidate(candidate(1));
    h.call.on_remote_candidate(candidate(2));
    assert_eq!(h.call.pending_candidates(), 2);
    assert!(!h.call.is_remote_description_set());

    let patches = h.call.on_offer(SessionDescription::offer("v=0 remote-offer")).await;
    h.apply(patches);
    assert_eq!(h.call.role(), NegotiationRole::Answerer);

    // remote description set, answer ready
    h.pump(2).await;
    assert_eq!(h.call.pending_candidates(), 0);

    h.call.on_remote_candidate(candidate(3));
    h.pump(3).await;

    let log = entries(&h.factory.log);
    let set_remote = log
        .iter()
        .position(|e| e == "set_remote:v=0 remote-offer")
        .unwrap();
    let applied: Vec<(usize, &String)> = log
        .iter()
        .enumerate()
        .filter(|(_, e)| e.starts_with("add_candidate:"))
        .collect();
    assert_eq!(applied.len(), 3);
    assert!(applied.iter().all(|(i, _)| *i > set_remote));
    let order: Vec<&str> = applied.iter().map(|(_, e)| e.as_str()).collect();
    assert_eq!(
        order,
        vec![
            format!("add_candidate:{}", candidate(1).candidate),
            format!("add_candidate:{}", candidate(2).candidate),
            format!("add_candidate:{}", candidate(3).candidate),
        ]
    );

    let sent = h.sent();
    let answers = named(&sent, events::WEBRTC_ANSWER);
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].data["callerSocketId"], json!("caller"));
}

#[tokio::test]
async fn candidates_outside_a_call_are_dropped() {
    let mut h = Harness::new();
    h.call.on_remote_candidate(candidate(9));
    assert_eq!(h.call.pending_candidates(), 0);
}

#[tokio::test]
async fn local_candidates_are_trickled_to_the_peer() {
    let mut h = Harness::new();
    h.dial_and_offer("P").await;
    h.sent();

    h.factory
        .last_notices()
        .transport(TransportEvent::LocalCandidate(candidate(4)));
    h.pump(1).await;

    let sent = h.sent();
    let trickled = named(&sent, events::WEBRTC_CANDIDATE);
    assert_eq!(trickled.len(), 1);
    assert_eq!(trickled[0].data["connectedUserSocketId"], json!("P"));
    assert_eq!(
        trickled[0].data["candidate"]["candidate"],
        json!(candidate(4).candidate)
    );
}

#[tokio::test]
async fn hang_up_is_idempotent() {
    let mut h = Harness::new();

    let patches = h.call.hang_up().await;
    assert!(patches.is_empty());
    assert!(h.sent().is_empty());
    assert_eq!(h.call.state(), CallState::Available);

    h.dial_and_offer("P").await;
    h.sent();
    let generation = h.call.generation();

    let patches = h.call.hang_up().await;
    h.apply(patches.clone());
    assert!(patches.contains(&StatePatch::ResetCallData));
    let sent = h.sent();
    let hangups = named(&sent, events::USER_HANGED_UP);
    assert_eq!(hangups.len(), 1);
    assert_eq!(hangups[0].data["connectedUserSocketId"], json!("P"));
    assert_eq!(count(&h.factory.log, "close"), 1);
    assert_eq!(h.call.generation(), generation + 1);

    let before = h.store.snapshot();
    let patches = h.call.hang_up().await;
    assert!(patches.is_empty());
    assert!(h.sent().is_empty());
    assert_eq!(count(&h.factory.log, "close"), 1);
    assert_eq!(h.call.generation(), generation + 1);
    assert_eq!(h.store.snapshot(), before);
}

#[tokio::test]
async fn remote_hang_up_resets_without_echo() {
    let mut h = Harness::new();
    h.accept_from("caller").await;
    h.sent();

    let patches = h.call.on_remote_hang_up().await;
    h.apply(patches);
    assert_eq!(h.call.state(), CallState::Available);
    assert!(named(&h.sent(), events::USER_HANGED_UP).is_empty());
    assert_eq!(count(&h.factory.log, "close"), 1);
}

#[tokio::test]
async fn stale_notices_from_an_abandoned_call_are_discarded() {
    let mut h = Harness::new();
    let patches = h.call.place_call(&user("P"), "me");
    h.apply(patches);
    h.call.on_pre_offer_answer(PreOfferAnswer::CallAccepted).await;
    let old = h.call.generation();

    h.call.on_remote_hang_up().await;
    h.sent();
    assert_ne!(h.call.generation(), old);

    let patches = h
        .call
        .on_notice(CallNotice {
            generation: old,
            kind: NoticeKind::Negotiation(NegotiationOutcome::OfferReady(
                SessionDescription::offer("v=0 late"),
            )),
        })
        .await;
    assert!(patches.is_empty());

    let patches = h
        .call
        .on_notice(CallNotice {
            generation: old,
            kind: NoticeKind::Transport(TransportEvent::RemoteStream(RemoteMediaStream::new(
                "late-remote",
                None,
            ))),
        })
        .await;
    assert!(patches.is_empty());
    assert!(h.call.remote_media().is_none());
    assert!(named(&h.sent(), events::WEBRTC_OFFER).is_empty());
    assert_eq!(h.call.state(), CallState::Available);
}

#[tokio::test]
async fn remote_stream_is_published_once() {
    let mut h = Harness::new();
    h.dial_and_offer("P").await;

    let notices = h.factory.last_notices();
    notices.transport(TransportEvent::RemoteStream(RemoteMediaStream::new("remote", None)));
    notices.transport(TransportEvent::RemoteStream(RemoteMediaStream::new("remote", None)));
    h.pump(2).await;

    assert_eq!(
        h.call.remote_media(),
        Some(&RemoteMediaStream::new("remote", Some("P".into())))
    );
    assert_eq!(
        h.store.snapshot().remote_stream.map(|s| s.id),
        Some("remote".to_string())
    );

    let patches = h.call.hang_up().await;
    h.apply(patches);
    assert!(h.call.remote_media().is_none());
    assert!(h.store.snapshot().remote_stream.is_none());
}

#[tokio::test]
async fn screen_share_swaps_video_track_without_renegotiation() {
    let mut h = Harness::new();
    let capture = FakeCapture::new("unused");
    h.dial_and_offer("P").await;
    h.sent();

    let patches = h.call.toggle_screen_share(capture.as_ref()).await;
    assert_eq!(patches, vec![StatePatch::ScreenSharingActive(true)]);
    assert!(h.call.is_screen_sharing());
    let share = capture.shares.lock().unwrap()[0].clone();
    let share_track = share.video_track().unwrap();

    let patches = h.call.toggle_screen_share(capture.as_ref()).await;
    assert_eq!(patches, vec![StatePatch::ScreenSharingActive(false)]);
    assert!(!h.call.is_screen_sharing());
    assert!(share_track.is_ended());

    let camera = h.local.video_track().unwrap();
    let replaced: Vec<String> = entries(&h.factory.log)
        .into_iter()
        .filter(|e| e.starts_with("replace_video:"))
        .collect();
    assert_eq!(
        replaced,
        vec![
            format!("replace_video:{}", share_track.id()),
            format!("replace_video:{}", camera.id()),
        ]
    );
    assert_eq!(count(&h.factory.log, "create_offer"), 1);
    assert!(named(&h.sent(), events::WEBRTC_OFFER).is_empty());
    assert!(!camera.is_ended());
}

#[tokio::test]
async fn screen_share_needs_a_call() {
    let mut h = Harness::new();
    let capture = FakeCapture::new("unused");
    let patches = h.call.toggle_screen_share(capture.as_ref()).await;
    assert!(patches.is_empty());
    assert!(capture.shares.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reset_stops_share_and_reenables_tracks() {
    let mut h = Harness::new();
    let capture = FakeCapture::new("unused");
    h.dial_and_offer("P").await;
    h.call.toggle_screen_share(capture.as_ref()).await;
    h.local.set_kind_enabled(TrackKind::Audio, false);
    h.local.set_kind_enabled(TrackKind::Video, false);

    let patches = h.call.hang_up().await;
    h.apply(patches);

    let share = capture.shares.lock().unwrap()[0].clone();
    assert!(share.tracks().iter().all(|t| t.is_ended()));
    assert!(h.local.tracks().iter().all(|t| t.is_enabled()));
    let snapshot = h.store.snapshot();
    assert!(!snapshot.screen_sharing_active);
    assert!(snapshot.local_camera_enabled && snapshot.local_microphone_enabled);
}

#[tokio::test]
async fn chat_needs_an_open_channel() {
    let mut h = Harness::new();
    assert!(matches!(
        h.call.send_message("too early".into()).await,
        Err(Error::ChannelNotOpen)
    ));

    h.dial_and_offer("P").await;
    assert!(matches!(
        h.call.send_message("still early".into()).await,
        Err(Error::ChannelNotOpen)
    ));

    let notices = h.factory.last_notices();
    notices.transport(TransportEvent::ChannelOpen);
    notices.transport(TransportEvent::Message("hello there".into()));
    h.pump(2).await;
    assert!(h.call.is_data_channel_open());
    assert_eq!(
        h.store.snapshot().message,
        ChatMessage {
            received: true,
            content: "hello there".into(),
        }
    );

    h.call.send_message("hi".into()).await.unwrap();
    assert_eq!(count(&h.factory.log, "send:hi"), 1);
    assert_eq!(count(&h.factory.log, "send:"), 1);

    notices.transport(TransportEvent::ChannelClosed);
    h.pump(1).await;
    assert!(matches!(
        h.call.send_message("gone".into()).await,
        Err(Error::ChannelNotOpen)
    ));
}

#[tokio::test]
async fn transport_failure_acts_as_hang_up() {
    let mut h = Harness::new();
    h.dial_and_offer("P").await;
    h.sent();

    h.factory.last_notices().transport(TransportEvent::Failed);
    h.pump(1).await;

    assert_eq!(h.call.state(), CallState::Available);
    assert_eq!(h.store.snapshot().call_state, CallState::Available);
    let sent = h.sent();
    assert_eq!(named(&sent, events::USER_HANGED_UP).len(), 1);
    assert_eq!(count(&h.factory.log, "close"), 1);
}

#[tokio::test]
async fn transport_creation_failure_abandons_the_call() {
    let mut h = Harness::new();
    h.factory
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.call.on_pre_offer(pre_offer("caller", "Alice"), false);
    let patches = h.call.accept().await;
    h.apply(patches.clone());

    assert!(patches.contains(&StatePatch::ResetCallData));
    assert_eq!(h.call.state(), CallState::Available);
    let sent = h.sent();
    assert_eq!(named(&sent, events::PRE_OFFER_ANSWER).len(), 1);
    assert_eq!(named(&sent, events::USER_HANGED_UP).len(), 1);
}

#[tokio::test]
async fn abandoned_call_resets_even_when_the_relay_is_gone() {
    let mut h = Harness::new();
    h.factory
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);
    h.call.on_pre_offer(pre_offer("caller", "Alice"), false);
    drop(h.outbound);

    let patches = h.call.accept().await;
    assert!(patches.contains(&StatePatch::ResetCallData));
    assert_eq!(h.call.state(), CallState::Available);
    assert_eq!(h.call.peer(), None);
}

#[tokio::test]
async fn mixed_event_sequences_keep_a_defined_state() {
    let mut h = Harness::new();
    let capture = FakeCapture::new("unused");
    for round in 0..6u32 {
        match round % 3 {
            0 => {
                h.call.place_call(&user("P"), "me");
                h.call.on_pre_offer(pre_offer("Q", "Q"), false);
                h.call.on_pre_offer_answer(PreOfferAnswer::CallAccepted).await;
                h.call.on_remote_candidate(candidate(round));
                h.call.toggle_screen_share(capture.as_ref()).await;
            }
            1 => {
                h.call.on_pre_offer(pre_offer("Q", "Q"), false);
                h.call.on_answer(SessionDescription::answer("v=0 early"));
                h.call.accept().await;
                h.call.on_offer(SessionDescription::offer("v=0 o")).await;
                h.call.reject().await;
            }
            _ => {
                h.call.on_remote_hang_up().await;
                h.call.on_pre_offer_answer(PreOfferAnswer::CallRejected).await;
                h.call.accept().await;
            }
        }
        assert!(matches!(
            h.call.state(),
            CallState::Available | CallState::Requested | CallState::InProgress
        ));
        h.call.hang_up().await;
        h.call.reject().await;
        assert!(h.call.is_idle());
        assert_eq!(h.call.pending_candidates(), 0);
        assert!(!h.call.is_screen_sharing());
    }
}
