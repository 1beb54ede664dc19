use crate::peer::transport::{NoticeSender, TransportEvent};
use std::sync::Arc;
use tokio::sync::Mutex;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

pub const CHAT_CHANNEL_LABEL: &str = "chat";

/// Slot holding the chat channel once created or accepted
pub type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// Stores `dc` in `slot` and forwards its open/message/close events.
pub async fn attach_dc(dc: &Arc<RTCDataChannel>, slot: &ChannelSlot, notices: &NoticeSender) {
    tracing::debug!(label = dc.label(), "attaching chat channel");
    *slot.lock().await = Some(dc.clone());

    dc.on_open(Box::new({
        let notices = notices.clone();
        move || {
            tracing::info!("chat data channel opened");
            notices.transport(TransportEvent::ChannelOpen);
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let notices = notices.clone();
        move |msg: DataChannelMessage| {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            tracing::debug!(len = text.len(), "chat message received");
            notices.transport(TransportEvent::Message(text));
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new({
        let notices = notices.clone();
        move || {
            tracing::info!("chat data channel closed");
            notices.transport(TransportEvent::ChannelClosed);
            Box::pin(async {})
        }
    }));
}
