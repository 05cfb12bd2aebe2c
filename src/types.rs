use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How long a bearer token is trusted locally. The provider never reports
/// an expiry, so this is a client-side approximation from creation time.
pub const SESSION_TTL_MS: i64 = 60 * 60 * 1000;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub id: String,
    pub domain: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub quota: u64,
    #[serde(default)]
    pub used: u64,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    #[serde(default)]
    pub disposition: String,
    #[serde(default)]
    pub transfer_encoding: String,
    #[serde(default)]
    pub related: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub download_url: String,
}

/// One message. The list endpoint returns the summary fields only; `text`,
/// `html` and `attachments` stay `None` until the detail fetch upgrades the
/// record in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub msgid: String,
    #[serde(default)]
    pub from: EmailAddress,
    #[serde(default)]
    pub to: Vec<EmailAddress>,
    #[serde(default)]
    pub cc: Vec<EmailAddress>,
    #[serde(default)]
    pub bcc: Vec<EmailAddress>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub intro: String,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub has_attachments: bool,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

impl Email {
    pub fn is_full(&self) -> bool {
        self.text.is_some() || self.html.is_some() || self.attachments.is_some()
    }
}

/// Bearer token plus the account it belongs to. `expires_at` is epoch
/// milliseconds, computed locally at creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub account: Account,
    pub expires_at: i64,
}

impl Session {
    pub fn new(token: String, account: Account) -> Self {
        Self {
            token,
            account,
            expires_at: now_ms() + SESSION_TTL_MS,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.expires_at > now_ms()
    }
}

/// Token exchange response. Carries only the token and account id; the full
/// account record requires a follow-up fetch.
#[derive(Clone, Debug, Deserialize)]
pub struct AuthToken {
    pub token: String,
    pub id: String,
}

/// Hydra-style pagination envelope used by every list endpoint.
#[derive(Debug, Deserialize)]
pub struct Paginated<T> {
    #[serde(rename = "hydra:member", default = "Vec::new")]
    pub member: Vec<T>,
    #[serde(rename = "hydra:totalItems", default)]
    pub total_items: u64,
}

/// Raw RFC822 source payload from the source endpoint.
#[derive(Debug, Deserialize)]
pub struct MessageSource {
    pub data: String,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
