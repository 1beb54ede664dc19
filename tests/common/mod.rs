#![allow(dead_code)]

use async_trait::async_trait;
use callmesh::error::{Error, Result};
use callmesh::media::{LocalMediaStream, MediaCapture, MediaStream, MediaTrack, RemoteMediaStream};
use callmesh::mesh::{MeshEndpoint, MeshEndpointFactory, MeshEvent, MeshNoticeSender};
use callmesh::peer::{
    IceCandidate, NoticeSender, PeerTransport, SessionDescription, TransportFactory,
};
use callmesh::signaling::Envelope;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn count(log: &CallLog, prefix: &str) -> usize {
    entries(log).iter().filter(|e| e.starts_with(prefix)).count()
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host"),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

// ---- peer transport ----

pub struct FakeTransport {
    log: CallLog,
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn open_data_channel(&self) -> Result<()> {
        self.log.lock().unwrap().push("open_data_channel".into());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        self.log.lock().unwrap().push("create_offer".into());
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.log.lock().unwrap().push("create_answer".into());
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("set_local:{}", desc.sdp));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("set_remote:{}", desc.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("add_candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn replace_video_track(&self, track: Arc<MediaTrack>) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("replace_video:{}", track.id()));
        Ok(())
    }

    async fn send_text(&self, text: String) -> Result<()> {
        self.log.lock().unwrap().push(format!("send:{text}"));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.log.lock().unwrap().push("close".into());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransportFactory {
    pub log: CallLog,
    created: Mutex<Vec<NoticeSender>>,
    pub fail: AtomicBool,
}

impl FakeTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    /// Sender handed to the most recent transport, for raising transport events.
    pub fn last_notices(&self) -> NoticeSender {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no transport created")
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        _local: &LocalMediaStream,
        notices: NoticeSender,
    ) -> Result<Arc<dyn PeerTransport>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Capture("no transport".into()));
        }
        self.created.lock().unwrap().push(notices);
        self.log.lock().unwrap().push("create_transport".into());
        Ok(Arc::new(FakeTransport {
            log: self.log.clone(),
        }))
    }
}

// ---- media capture ----

pub struct FakeCapture {
    pub local: MediaStream,
    pub fail: bool,
    pub shares: Mutex<Vec<MediaStream>>,
}

impl FakeCapture {
    pub fn new(stream_id: &str) -> Arc<Self> {
        Arc::new(Self {
            local: MediaStream::camera(stream_id),
            fail: false,
            shares: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            local: MediaStream::camera("unused"),
            fail: true,
            shares: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn user_media(&self) -> Result<LocalMediaStream> {
        if self.fail {
            return Err(Error::Capture("permission denied".into()));
        }
        Ok(self.local.clone())
    }

    async fn display_media(&self) -> Result<MediaStream> {
        let share = MediaStream::screen();
        self.shares.lock().unwrap().push(share.clone());
        Ok(share)
    }
}

// ---- mesh endpoints ----

struct Member {
    stream_id: String,
    notices: MeshNoticeSender,
}

/// In-memory broker linking fake endpoints by peer id
#[derive(Default)]
pub struct MeshNetwork {
    members: Mutex<HashMap<String, Member>>,
    next: AtomicUsize,
    pub destroyed: Mutex<Vec<String>>,
}

impl MeshNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_registered(&self, peer_id: &str) -> bool {
        self.members.lock().unwrap().contains_key(peer_id)
    }
}

pub struct FakeEndpoint {
    network: Arc<MeshNetwork>,
    peer_id: String,
}

#[async_trait]
impl MeshEndpoint for FakeEndpoint {
    async fn connect(&self, peer_id: &str) -> Result<()> {
        let members = self.network.members.lock().unwrap();
        let (Some(me), Some(them)) = (members.get(&self.peer_id), members.get(peer_id)) else {
            return Err(Error::Capture(format!("unknown peer {peer_id}")));
        };
        me.notices.send(MeshEvent::StreamAdded(RemoteMediaStream::new(
            them.stream_id.clone(),
            Some(peer_id.to_owned()),
        )));
        them.notices.send(MeshEvent::StreamAdded(RemoteMediaStream::new(
            me.stream_id.clone(),
            Some(self.peer_id.clone()),
        )));
        Ok(())
    }

    async fn destroy(&self) {
        self.network.members.lock().unwrap().remove(&self.peer_id);
        self.network
            .destroyed
            .lock()
            .unwrap()
            .push(self.peer_id.clone());
    }
}

pub struct FakeEndpointFactory {
    pub network: Arc<MeshNetwork>,
}

impl FakeEndpointFactory {
    pub fn new(network: Arc<MeshNetwork>) -> Arc<Self> {
        Arc::new(Self { network })
    }
}

#[async_trait]
impl MeshEndpointFactory for FakeEndpointFactory {
    async fn open(
        &self,
        local: &LocalMediaStream,
        notices: MeshNoticeSender,
    ) -> Result<Arc<dyn MeshEndpoint>> {
        let n = self.network.next.fetch_add(1, Ordering::SeqCst);
        let peer_id = format!("peer-{n}");
        notices.send(MeshEvent::Opened {
            peer_id: peer_id.clone(),
        });
        self.network.members.lock().unwrap().insert(
            peer_id.clone(),
            Member {
                stream_id: local.id().to_owned(),
                notices,
            },
        );
        Ok(Arc::new(FakeEndpoint {
            network: self.network.clone(),
            peer_id,
        }))
    }
}

// ---- relay traffic ----

pub fn drain(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        out.push(envelope);
    }
    out
}

pub fn named<'a>(envelopes: &'a [Envelope], event: &str) -> Vec<&'a Envelope> {
    envelopes.iter().filter(|e| e.event == event).collect()
}

/// Reads outbound envelopes until one named `event` shows up.
pub async fn expect_event(rx: &mut mpsc::UnboundedReceiver<Envelope>, event: &str) -> Envelope {
    tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(envelope) if envelope.event == event => return envelope,
                Some(_) => continue,
                None => panic!("signaling channel closed while waiting for {event}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {event}"))
}
