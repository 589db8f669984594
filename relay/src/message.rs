//! Inbound provider messages and the host-facing notification format.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use state_store::ChannelId;

/// A message delivered by the platform messaging provider.
///
/// The provider hands over a flat string map. Only `chid` is required for
/// routing; the encryption headers and body are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMessage {
    /// Channel ID the broker routed this message for
    pub chid: Option<String>,
    /// `Encryption` header
    pub enc: Option<String>,
    /// `Crypto-Key` header
    pub cryptokey: Option<String>,
    /// Deprecated `Encryption-Key` header
    pub enckey: Option<String>,
    /// Encrypted payload
    pub body: Option<String>,
}

impl ProviderMessage {
    /// A message addressed to `chid` with no headers or body.
    pub fn for_channel(chid: impl Into<String>) -> Self {
        Self {
            chid: Some(chid.into()),
            ..Self::default()
        }
    }

    /// Build a message from the provider's field map. Unknown keys are ignored.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let field = |key: &str| fields.get(key).cloned();
        Self {
            chid: field("chid"),
            enc: field("enc"),
            cryptokey: field("cryptokey"),
            enckey: field("enckey"),
            body: field("body"),
        }
    }

    pub fn with_enc(mut self, enc: impl Into<String>) -> Self {
        self.enc = Some(enc.into());
        self
    }

    pub fn with_cryptokey(mut self, cryptokey: impl Into<String>) -> Self {
        self.cryptokey = Some(cryptokey.into());
        self
    }

    pub fn with_enckey(mut self, enckey: impl Into<String>) -> Self {
        self.enckey = Some(enckey.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The channel ID, treating an empty `chid` as absent.
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.chid
            .as_deref()
            .filter(|chid| !chid.is_empty())
            .map(ChannelId::from)
    }
}

/// A push notification in the form the host consumes.
///
/// Serializes to `{"channelID", "enc", "cryptokey", "enckey", "message"}`;
/// absent fields are omitted. At most one of `cryptokey` and `enckey` is
/// expected, but the host is the one to enforce that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMessage {
    #[serde(rename = "channelID")]
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cryptokey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enckey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HostMessage {
    pub(crate) fn from_provider(channel_id: ChannelId, message: &ProviderMessage) -> Self {
        Self {
            channel_id,
            enc: message.enc.clone(),
            cryptokey: message.cryptokey.clone(),
            enckey: message.enckey.clone(),
            message: message.body.clone(),
        }
    }

    /// Serialize into the JSON blob handed to the host.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_from_fields_picks_known_keys() {
        let fields: HashMap<String, String> = [
            ("chid", "abc"),
            ("enc", "salt=1"),
            ("cryptokey", "dh=2"),
            ("body", "payload"),
            ("collapse_key", "ignored"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let message = ProviderMessage::from_fields(&fields);

        assert_eq!(message.chid.as_deref(), Some("abc"));
        assert_eq!(message.enc.as_deref(), Some("salt=1"));
        assert_eq!(message.cryptokey.as_deref(), Some("dh=2"));
        assert_eq!(message.enckey, None);
        assert_eq!(message.body.as_deref(), Some("payload"));
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some(""), None)]
    #[case(Some("abc"), Some("abc"))]
    fn test_channel_id(#[case] chid: Option<&str>, #[case] expected: Option<&str>) {
        let message = ProviderMessage {
            chid: chid.map(str::to_string),
            ..ProviderMessage::default()
        };
        assert_eq!(message.channel_id(), expected.map(ChannelId::from));
    }

    #[test]
    fn test_host_message_json_shape() {
        let provider = ProviderMessage::for_channel("abc")
            .with_enc("salt=1")
            .with_enckey("dh=2")
            .with_body("payload");
        let host = HostMessage::from_provider(ChannelId::new("abc"), &provider);

        let value: serde_json::Value = serde_json::from_str(&host.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            serde_json::json!({
                "channelID": "abc",
                "enc": "salt=1",
                "enckey": "dh=2",
                "message": "payload",
            })
        );
    }
}
