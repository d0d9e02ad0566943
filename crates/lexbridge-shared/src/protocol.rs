//! Gateway wire protocol.
//!
//! Every frame is a JSON text frame of the form
//! `{"event": "<name>", "data": {...}}`. Payload fields are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    CaseId, ChannelId, ConnectionStatus, MessageKind, PresenceStatus, ProposalStatus, Role, UserId,
};

/// Events sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinChannel(ChannelRef),
    LeaveChannel(ChannelRef),
    SendMessage(SendMessage),
    MarkRead(MarkRead),
    TypingStart(ChannelRef),
    TypingStop(ChannelRef),

    #[serde(rename = "initiate-call")]
    InitiateCall(SignalRequest),
    #[serde(rename = "accept-call")]
    AcceptCall(SignalRequest),
    #[serde(rename = "reject-call")]
    RejectCall(SignalRequest),
    #[serde(rename = "end-call")]
    EndCall(SignalRequest),
    #[serde(rename = "offer")]
    Offer(SignalRequest),
    #[serde(rename = "answer")]
    Answer(SignalRequest),
    #[serde(rename = "ice-candidate")]
    IceCandidate(SignalRequest),

    Ping,
}

impl ClientEvent {
    /// Split a call-signaling event into its kind and request, if it is one.
    pub fn as_signal(&self) -> Option<(SignalKind, &SignalRequest)> {
        match self {
            Self::InitiateCall(r) => Some((SignalKind::InitiateCall, r)),
            Self::AcceptCall(r) => Some((SignalKind::AcceptCall, r)),
            Self::RejectCall(r) => Some((SignalKind::RejectCall, r)),
            Self::EndCall(r) => Some((SignalKind::EndCall, r)),
            Self::Offer(r) => Some((SignalKind::Offer, r)),
            Self::Answer(r) => Some((SignalKind::Answer, r)),
            Self::IceCandidate(r) => Some((SignalKind::IceCandidate, r)),
            _ => None,
        }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRef {
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub channel_id: ChannelId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_ref: Option<String>,
    /// Opaque client correlation id echoed back in `message_sent`.
    #[serde(default)]
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRead {
    pub channel_id: ChannelId,
    /// `None` marks everything unread in the channel.
    #[serde(default)]
    pub message_ids: Option<Vec<Uuid>>,
}

/// A signaling message as sent by the caller: exactly one of `to_user` and
/// `channel_id` names the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    #[serde(default)]
    pub to_user: Option<UserId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    InitiateCall,
    AcceptCall,
    RejectCall,
    EndCall,
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// The outbound echo a target receives for this signal.
    pub fn into_event(self, envelope: SignalEnvelope) -> ServerEvent {
        match self {
            Self::InitiateCall => ServerEvent::IncomingCall(envelope),
            Self::AcceptCall => ServerEvent::CallAccepted(envelope),
            Self::RejectCall => ServerEvent::CallRejected(envelope),
            Self::EndCall => ServerEvent::CallEnded(envelope),
            Self::Offer => ServerEvent::Offer(envelope),
            Self::Answer => ServerEvent::Answer(envelope),
            Self::IceCandidate => ServerEvent::IceCandidate(envelope),
        }
    }
}

/// Events pushed by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected(Connected),
    JoinedChannel(JoinedChannel),
    LeftChannel(ChannelRef),
    NewMessage(MessagePayload),
    MessageSent(MessageAck),
    MessagesRead(ReadReceipt),
    MessageNotification(MessageNotice),
    UserStatusUpdate(PresenceUpdate),
    UserTyping(TypingUpdate),
    ChannelReady(ChannelReady),
    ProposalUpdate(ProposalUpdate),
    ConnectionUpdate(ConnectionUpdate),

    #[serde(rename = "incoming-call")]
    IncomingCall(SignalEnvelope),
    #[serde(rename = "call-accepted")]
    CallAccepted(SignalEnvelope),
    #[serde(rename = "call-rejected")]
    CallRejected(SignalEnvelope),
    #[serde(rename = "call-ended")]
    CallEnded(SignalEnvelope),
    #[serde(rename = "offer")]
    Offer(SignalEnvelope),
    #[serde(rename = "answer")]
    Answer(SignalEnvelope),
    #[serde(rename = "ice-candidate")]
    IceCandidate(SignalEnvelope),

    Pong,
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedChannel {
    pub channel_id: ChannelId,
    /// How many previously unread messages were marked read by joining.
    pub unread_cleared: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: Uuid,
    pub channel_id: ChannelId,
    /// Position in the channel; strictly increasing in acceptance order.
    pub seq: i64,
    pub sender: UserId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: Option<String>,
    pub file_ref: Option<String>,
    pub read_by: Vec<UserId>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAck {
    pub channel_id: ChannelId,
    pub message_id: Uuid,
    pub seq: i64,
    pub sent_at: DateTime<Utc>,
    pub client_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub channel_id: ChannelId,
    pub read_by: UserId,
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotice {
    pub channel_id: ChannelId,
    pub message_id: Uuid,
    pub sender: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub is_typing: bool,
}

/// Pushed to both parties once a channel has been provisioned for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReady {
    pub channel_id: ChannelId,
    pub case_id: Option<CaseId>,
    pub connection_id: Option<Uuid>,
    pub counterpart: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalUpdate {
    pub case_id: CaseId,
    pub proposal_id: Uuid,
    pub status: ProposalStatus,
    pub from: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub connection_id: Uuid,
    pub status: ConnectionStatus,
    pub from: UserId,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalEnvelope {
    pub from: UserId,
    pub channel_id: Option<ChannelId>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_message() {
        let json = r#"{"event":"send_message","data":{"channelId":"query_1","content":"hello","type":"text"}}"#;
        match ClientEvent::from_json(json).unwrap() {
            ClientEvent::SendMessage(msg) => {
                assert_eq!(msg.channel_id.as_str(), "query_1");
                assert_eq!(msg.content.as_deref(), Some("hello"));
                assert_eq!(msg.kind, MessageKind::Text);
                assert!(msg.file_ref.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_signal_events() {
        let json = r#"{"event":"ice-candidate","data":{"channelId":"direct_a_b","payload":{"candidate":"x"}}}"#;
        let event = ClientEvent::from_json(json).unwrap();
        let (kind, request) = event.as_signal().expect("signal");
        assert_eq!(kind, SignalKind::IceCandidate);
        assert_eq!(request.channel_id.as_ref().map(|c| c.as_str()), Some("direct_a_b"));
        assert_eq!(request.payload["candidate"], "x");

        let ping = ClientEvent::from_json(r#"{"event":"ping"}"#).unwrap();
        assert!(ping.as_signal().is_none());
    }

    #[test]
    fn test_mark_read_without_ids() {
        let json = r#"{"event":"mark_read","data":{"channelId":"query_1"}}"#;
        match ClientEvent::from_json(json).unwrap() {
            ClientEvent::MarkRead(m) => assert!(m.message_ids.is_none()),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_shape() {
        let from = UserId::new();
        let event = SignalKind::InitiateCall.into_event(SignalEnvelope {
            from,
            channel_id: None,
            payload: serde_json::json!({"video": true}),
        });
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "incoming-call");
        assert_eq!(value["data"]["from"], from.to_string());

        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::error("rate_limited", "slow down").to_json().unwrap())
                .unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["code"], "rate_limited");
    }
}
