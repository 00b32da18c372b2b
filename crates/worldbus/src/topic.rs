use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ProtoError;
use crate::user::UserId;

/// Wire shape of every bus message.
///
/// `user_id` scopes an outbound event to one recipient; `None` means broadcast. Inbound
/// payloads carry their user id inside `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub const SET_USER_NAME: &str = "set_user_name";
pub const USER_ACTION: &str = "user_action";
pub const USER_DISCONNECT: &str = "user_disconnect";
pub const IMAGE_CREATION_RESPONSE: &str = "image_creation_response";
pub const SUMMON_AGENT_RESPONSE: &str = "summon_agent_response";
pub const AI_RESPONSE: &str = "ai_response";

pub const INSTRUCTIONS: &str = "instructions";
pub const NAME_INVALID: &str = "name_invalid";
pub const ROOM_UPDATE: &str = "room_update";
pub const WORLD_UPDATE: &str = "world_update";
pub const WORLD_DATA_UPDATE: &str = "world_data_update";
pub const LOGOUT: &str = "logout";
pub const IMAGE_CREATION_REQUEST: &str = "image_creation_request";
pub const AI_REQUEST: &str = "ai_request";
pub const SUMMON_AGENT_REQUEST: &str = "summon_agent_request";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetUserName {
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    pub user_id: UserId,
    pub user_input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDisconnect {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCreationResponse {
    pub room_name: String,
    #[serde(default)]
    pub image_filename: String,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummonAgentResponse {
    pub request_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiResponse {
    pub request_id: String,
    #[serde(default)]
    pub ai_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomUpdate {
    pub image: Option<String>,
    pub title: String,
    pub description: String,
    pub exits: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldDataUpdate {
    pub user_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCreationRequest {
    pub world_name: String,
    pub room_name: String,
    pub description: String,
    pub landscape: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRequest {
    pub prompt: String,
    pub request_id: String,
    pub system_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummonAgentRequest {
    pub request_id: String,
    pub request_data: String,
}

/// Everything the orchestrator consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SetUserName(SetUserName),
    UserAction(UserAction),
    UserDisconnect(UserDisconnect),
    ImageCreationResponse(ImageCreationResponse),
    SummonAgentResponse(SummonAgentResponse),
    AiResponse(AiResponse),
}

impl Inbound {
    pub fn from_envelope(env: Envelope) -> Result<Self, ProtoError> {
        let Envelope { topic, data, .. } = env;
        let ev = match topic.as_str() {
            SET_USER_NAME => Inbound::SetUserName(decode(&topic, data)?),
            USER_ACTION => Inbound::UserAction(decode(&topic, data)?),
            USER_DISCONNECT => Inbound::UserDisconnect(decode(&topic, data)?),
            IMAGE_CREATION_RESPONSE => Inbound::ImageCreationResponse(decode(&topic, data)?),
            SUMMON_AGENT_RESPONSE => Inbound::SummonAgentResponse(decode(&topic, data)?),
            AI_RESPONSE => Inbound::AiResponse(decode(&topic, data)?),
            _ => return Err(ProtoError::UnknownTopic(topic)),
        };
        Ok(ev)
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Inbound::SetUserName(_) => SET_USER_NAME,
            Inbound::UserAction(_) => USER_ACTION,
            Inbound::UserDisconnect(_) => USER_DISCONNECT,
            Inbound::ImageCreationResponse(_) => IMAGE_CREATION_RESPONSE,
            Inbound::SummonAgentResponse(_) => SUMMON_AGENT_RESPONSE,
            Inbound::AiResponse(_) => AI_RESPONSE,
        }
    }
}

fn decode<T: DeserializeOwned>(topic: &str, data: serde_json::Value) -> Result<T, ProtoError> {
    serde_json::from_value(data).map_err(|e| ProtoError::Malformed {
        topic: topic.to_string(),
        reason: e.to_string(),
    })
}

/// Outbound event bodies, one per topic.
#[derive(Debug, Clone, PartialEq)]
pub enum OutEvent {
    Instructions(String),
    NameInvalid(String),
    RoomUpdate(RoomUpdate),
    WorldUpdate(String),
    WorldDataUpdate(WorldDataUpdate),
    Logout(String),
    ImageCreationRequest(ImageCreationRequest),
    AiRequest(AiRequest),
    SummonAgentRequest(SummonAgentRequest),
}

impl OutEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            OutEvent::Instructions(_) => INSTRUCTIONS,
            OutEvent::NameInvalid(_) => NAME_INVALID,
            OutEvent::RoomUpdate(_) => ROOM_UPDATE,
            OutEvent::WorldUpdate(_) => WORLD_UPDATE,
            OutEvent::WorldDataUpdate(_) => WORLD_DATA_UPDATE,
            OutEvent::Logout(_) => LOGOUT,
            OutEvent::ImageCreationRequest(_) => IMAGE_CREATION_REQUEST,
            OutEvent::AiRequest(_) => AI_REQUEST,
            OutEvent::SummonAgentRequest(_) => SUMMON_AGENT_REQUEST,
        }
    }

    fn data(&self) -> serde_json::Value {
        let v = match self {
            OutEvent::Instructions(s)
            | OutEvent::NameInvalid(s)
            | OutEvent::WorldUpdate(s)
            | OutEvent::Logout(s) => Ok(serde_json::Value::String(s.clone())),
            OutEvent::RoomUpdate(x) => serde_json::to_value(x),
            OutEvent::WorldDataUpdate(x) => serde_json::to_value(x),
            OutEvent::ImageCreationRequest(x) => serde_json::to_value(x),
            OutEvent::AiRequest(x) => serde_json::to_value(x),
            OutEvent::SummonAgentRequest(x) => serde_json::to_value(x),
        };
        // Plain structs of strings and integers always serialize.
        v.unwrap_or(serde_json::Value::Null)
    }
}

/// One outbound event plus its optional recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Option<UserId>,
    pub event: OutEvent,
}

impl Outbound {
    pub fn broadcast(event: OutEvent) -> Self {
        Self { to: None, event }
    }

    pub fn to(user: &UserId, event: OutEvent) -> Self {
        Self {
            to: Some(user.clone()),
            event,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope {
            topic: self.event.topic().to_string(),
            user_id: self.to.clone(),
            data: self.event.data(),
        }
    }
}

/// Decode an `ai_request` envelope (used by the requester side of the bus).
pub fn ai_request_from_envelope(env: Envelope) -> Result<AiRequest, ProtoError> {
    if env.topic != AI_REQUEST {
        return Err(ProtoError::UnknownTopic(env.topic));
    }
    decode(AI_REQUEST, env.data)
}

pub fn ai_response_envelope(request_id: &str, text: &str) -> Envelope {
    Envelope {
        topic: AI_RESPONSE.to_string(),
        user_id: None,
        data: serde_json::json!({
            "request_id": request_id,
            "ai_response": text,
        }),
    }
}
