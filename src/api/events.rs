use serde::{Deserialize, Serialize};

/// Envelope for messages arriving from the browser:
/// `{"type": "requestAuth", "payload": {"phone": "+79817750018"}}`.
/// Payload fields are extracted per event type in the socket handler.
#[derive(Debug, Clone, Deserialize)]
pub struct WsIncomingMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Events emitted to the browser, serialized as `{"type", "payload"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerEvent {
    /// New-user flow: deep link into the bot, optionally with a QR image.
    #[serde(rename_all = "camelCase")]
    AuthKey {
        key: String,
        link: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        qr_code: Option<String>,
    },
    /// Known-user flow: a code was delivered to the user's Telegram account.
    SmsCodeSent { phone: String },
    #[serde(rename_all = "camelCase")]
    AuthSuccess {
        phone: String,
        name: String,
        session_token: String,
    },
    AuthError { message: String },
    /// Silent re-authorization from a session or long-term token.
    #[serde(rename_all = "camelCase")]
    AlreadyAuthorized {
        phone: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },
    LogoutSuccess,
    SessionReset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_events_serialize_with_camel_case_tags() {
        let event = ServerEvent::AuthSuccess {
            phone: "+79817750018".to_string(),
            name: "Ivan".to_string(),
            session_token: "tok".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "authSuccess",
                "payload": {"phone": "+79817750018", "name": "Ivan", "sessionToken": "tok"}
            })
        );

        assert_eq!(
            serde_json::to_value(ServerEvent::LogoutSuccess).unwrap(),
            json!({"type": "logoutSuccess"})
        );
    }

    #[test]
    fn auth_key_omits_missing_qr_code() {
        let event = ServerEvent::AuthKey {
            key: "abc12345".to_string(),
            link: "https://t.me/autor1z_bot?start=abc12345".to_string(),
            qr_code: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert!(value["payload"].get("qrCode").is_none());
    }

    #[test]
    fn incoming_message_tolerates_missing_payload() {
        let msg: WsIncomingMessage = serde_json::from_str(r#"{"type": "logout"}"#).unwrap();
        assert_eq!(msg.msg_type, "logout");
        assert!(msg.payload.is_null());
    }
}
