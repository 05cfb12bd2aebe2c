pub mod ident;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use url::Url;

use crate::config::AppDefaults;
use crate::errors::{AppError, AppResult};
use crate::http::HttpClient;
use crate::types::{Account, AuthToken, Domain, Email, MessageSource, Paginated, Session};

/// One method per remote capability, plus composite flows as default
/// methods. The controller is written against this trait; tests drive it
/// with an in-memory fake.
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Domains currently usable for address generation.
    async fn active_domains(&self) -> AppResult<Vec<Domain>>;

    async fn create_account(&self, address: &str, password: &str) -> AppResult<Account>;

    async fn account(&self, account_id: &str, token: &str) -> AppResult<Account>;

    async fn delete_account(&self, account_id: &str, token: &str) -> AppResult<()>;

    /// Exchanges credentials for a bearer token and the account id.
    async fn token(&self, address: &str, password: &str) -> AppResult<AuthToken>;

    async fn messages(&self, token: &str) -> AppResult<Vec<Email>>;

    async fn message(&self, message_id: &str, token: &str) -> AppResult<Email>;

    async fn delete_message(&self, message_id: &str, token: &str) -> AppResult<()>;

    /// Marks a message seen server-side and returns the updated record.
    async fn mark_seen(&self, message_id: &str, token: &str) -> AppResult<Email>;

    /// Raw RFC822 source text of a message.
    async fn message_source(&self, message_id: &str, token: &str) -> AppResult<String>;

    /// Opaque attachment bytes.
    async fn attachment(&self, attachment_id: &str, token: &str) -> AppResult<Vec<u8>>;

    /// Creates a throwaway account on a random active domain and signs in.
    /// Fails atomically: no session exists unless every step succeeded.
    async fn quick_register(&self) -> AppResult<Session> {
        let domains = self.active_domains().await?;
        let domain = ident::pick_domain(&domains)?;
        let address = ident::random_address(&domain);
        let password = ident::random_password();

        let account = self.create_account(&address, &password).await?;
        let auth = self.token(&address, &password).await?;
        info!(address = %account.address, "Registered throwaway account");
        Ok(Session::new(auth.token, account))
    }

    /// Signs in with existing credentials. The token exchange alone returns
    /// only a token and account id, so the full record is fetched after.
    async fn login_with_credentials(&self, address: &str, password: &str) -> AppResult<Session> {
        let auth = self.token(address, password).await?;
        let account = self.account(&auth.id, &auth.token).await?;
        Ok(Session::new(auth.token, account))
    }

    /// Creates an account with caller-supplied credentials and signs in.
    async fn register_with_credentials(&self, address: &str, password: &str) -> AppResult<Session> {
        let account = self.create_account(address, password).await?;
        let auth = self.token(address, password).await?;
        Ok(Session::new(auth.token, account))
    }
}

/// Typed wrappers over the provider's REST endpoints, each one rate-limited
/// and retried by the underlying client.
pub struct MailClient {
    http: HttpClient,
    base: Url,
}

impl MailClient {
    pub fn new(defaults: &AppDefaults) -> AppResult<Self> {
        Ok(Self {
            http: HttpClient::new(defaults)?,
            base: defaults.api_base.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| AppError::Config("API base cannot hold paths".to_string()))?;
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl MailApi for MailClient {
    async fn active_domains(&self) -> AppResult<Vec<Domain>> {
        let url = self.endpoint(&["domains"])?;
        let page: Paginated<Domain> = self.http.get_json(url, None).await?;
        Ok(page.member.into_iter().filter(|d| d.is_active).collect())
    }

    async fn create_account(&self, address: &str, password: &str) -> AppResult<Account> {
        let url = self.endpoint(&["accounts"])?;
        self.http
            .post_json(url, &json!({"address": address, "password": password}), None)
            .await
    }

    async fn account(&self, account_id: &str, token: &str) -> AppResult<Account> {
        let url = self.endpoint(&["accounts", account_id])?;
        self.http.get_json(url, Some(token)).await
    }

    async fn delete_account(&self, account_id: &str, token: &str) -> AppResult<()> {
        let url = self.endpoint(&["accounts", account_id])?;
        self.http.delete(url, token).await
    }

    async fn token(&self, address: &str, password: &str) -> AppResult<AuthToken> {
        let url = self.endpoint(&["token"])?;
        self.http
            .post_json(url, &json!({"address": address, "password": password}), None)
            .await
    }

    async fn messages(&self, token: &str) -> AppResult<Vec<Email>> {
        let url = self.endpoint(&["messages"])?;
        let page: Paginated<Email> = self.http.get_json(url, Some(token)).await?;
        Ok(page.member)
    }

    async fn message(&self, message_id: &str, token: &str) -> AppResult<Email> {
        let url = self.endpoint(&["messages", message_id])?;
        self.http.get_json(url, Some(token)).await
    }

    async fn delete_message(&self, message_id: &str, token: &str) -> AppResult<()> {
        let url = self.endpoint(&["messages", message_id])?;
        self.http.delete(url, token).await
    }

    async fn mark_seen(&self, message_id: &str, token: &str) -> AppResult<Email> {
        let url = self.endpoint(&["messages", message_id])?;
        self.http
            .patch_merge(url, &json!({"seen": true}), token)
            .await
    }

    async fn message_source(&self, message_id: &str, token: &str) -> AppResult<String> {
        let url = self.endpoint(&["sources", message_id])?;
        let source: MessageSource = self.http.get_json(url, Some(token)).await?;
        Ok(source.data)
    }

    async fn attachment(&self, attachment_id: &str, token: &str) -> AppResult<Vec<u8>> {
        let url = self.endpoint(&["attachments", attachment_id])?;
        self.http.get_bytes(url, token).await
    }
}
