use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use burner::api::MailApi;
use burner::errors::{AppError, AppResult};
use burner::inbox::InboxController;
use burner::session::SessionStore;
use burner::types::{Account, AuthToken, Domain, Email, EmailAddress};

/// In-memory provider: a mutable inbox plus knobs for failure injection.
#[derive(Default)]
struct FakeApi {
    inbox: Mutex<Vec<Email>>,
    list_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    mark_seen_calls: Mutex<Vec<String>>,
    created_addresses: Mutex<Vec<String>>,
    fail_deletes: Mutex<HashSet<String>>,
    detail_delay: Mutex<Option<Duration>>,
    reject_auth: AtomicBool,
}

impl FakeApi {
    fn push_email(&self, email: Email) {
        self.inbox.lock().unwrap().push(email);
    }

    fn contains(&self, id: &str) -> bool {
        self.inbox.lock().unwrap().iter().any(|e| e.id == id)
    }

    fn account() -> Account {
        Account {
            id: "acc1".to_string(),
            address: "someone@a.test".to_string(),
            quota: 40_000_000,
            used: 0,
            is_disabled: false,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl MailApi for FakeApi {
    async fn active_domains(&self) -> AppResult<Vec<Domain>> {
        Ok(vec![
            Domain {
                id: "d1".to_string(),
                domain: "a.test".to_string(),
                is_active: true,
                is_private: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            Domain {
                id: "d2".to_string(),
                domain: "b.test".to_string(),
                is_active: false,
                is_private: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        ])
    }

    async fn create_account(&self, address: &str, _password: &str) -> AppResult<Account> {
        self.created_addresses
            .lock()
            .unwrap()
            .push(address.to_string());
        let mut account = Self::account();
        account.address = address.to_string();
        Ok(account)
    }

    async fn account(&self, _account_id: &str, _token: &str) -> AppResult<Account> {
        Ok(Self::account())
    }

    async fn delete_account(&self, _account_id: &str, _token: &str) -> AppResult<()> {
        Ok(())
    }

    async fn token(&self, _address: &str, _password: &str) -> AppResult<AuthToken> {
        Ok(AuthToken {
            token: "tok-1".to_string(),
            id: "acc1".to_string(),
        })
    }

    async fn messages(&self, _token: &str) -> AppResult<Vec<Email>> {
        if self.reject_auth.load(Ordering::SeqCst) {
            return Err(AppError::Unauthorized("Invalid token".to_string()));
        }
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inbox.lock().unwrap().clone())
    }

    async fn message(&self, message_id: &str, _token: &str) -> AppResult<Email> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let found = self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == message_id)
            .cloned();
        // A configured delay models a response already in flight while the
        // caller races ahead.
        let delay = *self.detail_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match found {
            Some(mut email) => {
                email.text = Some("body text".to_string());
                Ok(email)
            }
            None => Err(AppError::Api("Message not found".to_string())),
        }
    }

    async fn delete_message(&self, message_id: &str, _token: &str) -> AppResult<()> {
        if self.fail_deletes.lock().unwrap().contains(message_id) {
            return Err(AppError::Api(format!("Failed to delete {message_id}")));
        }
        self.inbox.lock().unwrap().retain(|e| e.id != message_id);
        Ok(())
    }

    async fn mark_seen(&self, message_id: &str, _token: &str) -> AppResult<Email> {
        self.mark_seen_calls
            .lock()
            .unwrap()
            .push(message_id.to_string());
        let mut inbox = self.inbox.lock().unwrap();
        match inbox.iter_mut().find(|e| e.id == message_id) {
            Some(email) => {
                email.seen = true;
                Ok(email.clone())
            }
            None => Err(AppError::Api("Message not found".to_string())),
        }
    }

    async fn message_source(&self, message_id: &str, _token: &str) -> AppResult<String> {
        Ok(format!("Subject: source of {message_id}\r\n\r\nbody"))
    }

    async fn attachment(&self, _attachment_id: &str, _token: &str) -> AppResult<Vec<u8>> {
        Ok(vec![0x25, 0x50, 0x44, 0x46])
    }
}

fn email(id: &str, seen: bool) -> Email {
    Email {
        id: id.to_string(),
        account_id: "acc1".to_string(),
        msgid: format!("<{id}@a.test>"),
        from: EmailAddress {
            address: "sender@b.test".to_string(),
            name: "Sender".to_string(),
        },
        to: Vec::new(),
        cc: Vec::new(),
        bcc: Vec::new(),
        subject: format!("subject {id}"),
        intro: "preview".to_string(),
        seen,
        is_deleted: false,
        has_attachments: false,
        size: 1024,
        download_url: String::new(),
        source_url: String::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
        text: None,
        html: None,
        attachments: None,
    }
}

fn setup() -> (InboxController<FakeApi>, Arc<FakeApi>, tempfile::TempDir) {
    let api = Arc::new(FakeApi::default());
    let tmp = tempfile::tempdir().unwrap();
    let store = SessionStore::with_file(tmp.path().join("session.json"));
    let controller = InboxController::new(Arc::clone(&api), store, Duration::from_secs(5));
    (controller, api, tmp)
}

/// Lets spawned tasks run until they are all parked on timers.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn polling_starts_once_and_fetches_immediately() {
    let (controller, api, _tmp) = setup();
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;

    assert!(controller.is_polling());
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);

    // Starting again while running must not add a second timer.
    controller.start_polling();
    controller.start_polling();
    settle().await;
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn poll_tick_replaces_the_collection() {
    let (controller, api, _tmp) = setup();
    api.push_email(email("m1", false));
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;
    assert_eq!(controller.emails().len(), 1);

    api.push_email(email("m2", false));
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    let ids: Vec<String> = controller.emails().iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
}

#[tokio::test(start_paused = true)]
async fn select_upgrades_and_marks_read_immediately() {
    let (controller, api, _tmp) = setup();
    api.push_email(email("m1", false));
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;

    let full = controller.select_email("m1").await.unwrap();
    assert_eq!(full.text.as_deref(), Some("body text"));

    // Local flag flips without waiting for the next poll tick.
    assert!(controller.emails()[0].seen);
    assert_eq!(controller.selected().unwrap().id, "m1");
    assert_eq!(api.mark_seen_calls.lock().unwrap().as_slice(), ["m1"]);
}

#[tokio::test(start_paused = true)]
async fn select_uses_cached_detail() {
    let (controller, api, _tmp) = setup();
    api.push_email(email("m1", true));
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;

    controller.select_email("m1").await.unwrap();
    controller.select_email("m1").await.unwrap();
    assert_eq!(api.detail_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn delete_removes_and_clears_selection() {
    let (controller, api, _tmp) = setup();
    api.push_email(email("m1", true));
    api.push_email(email("m2", true));
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;

    controller.select_email("m1").await.unwrap();
    controller.delete_email("m1").await.unwrap();

    assert!(!api.contains("m1"));
    assert!(controller.selected().is_none());
    let ids: Vec<String> = controller.emails().iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec!["m2"]);
}

#[tokio::test(start_paused = true)]
async fn detail_arriving_after_deletion_does_not_resurrect() {
    let (controller, api, _tmp) = setup();
    api.push_email(email("m1", false));
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;

    *api.detail_delay.lock().unwrap() = Some(Duration::from_millis(500));

    let controller = Arc::new(controller);
    let select_task = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.select_email("m1").await }
    });
    settle().await;

    // The detail response is in flight; delete the message underneath it.
    controller.delete_email("m1").await.unwrap();
    assert!(controller.emails().is_empty());

    tokio::time::sleep(Duration::from_millis(600)).await;
    settle().await;

    assert!(controller.emails().is_empty());
    assert!(controller.selected().is_none());
    assert!(api.mark_seen_calls.lock().unwrap().is_empty());

    let fetched = select_task.await.unwrap().unwrap();
    assert_eq!(fetched.id, "m1");
}

#[tokio::test(start_paused = true)]
async fn clear_all_reports_partial_failure_without_losing_track() {
    let (controller, api, _tmp) = setup();
    api.push_email(email("m1", true));
    api.push_email(email("m2", true));
    api.push_email(email("m3", true));
    api.fail_deletes.lock().unwrap().insert("m2".to_string());
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;

    let err = controller.clear_all().await.unwrap_err();
    assert!(err.to_string().contains("1 of 3"));

    // Confirmed deletions are gone locally; the failed one stays.
    let ids: Vec<String> = controller.emails().iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec!["m2"]);
    assert!(api.contains("m2"));
    assert!(!api.contains("m1"));
    assert!(!api.contains("m3"));
}

#[tokio::test(start_paused = true)]
async fn clear_all_empties_inbox_on_success() {
    let (controller, api, _tmp) = setup();
    api.push_email(email("m1", true));
    api.push_email(email("m2", true));
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;

    controller.clear_all().await.unwrap();
    assert!(controller.emails().is_empty());
    assert!(api.inbox.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn poll_401_tears_down_the_session() {
    let (controller, api, _tmp) = setup();
    api.push_email(email("m1", false));
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;
    assert!(controller.session().is_some());

    api.reject_auth.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    assert!(controller.session().is_none());
    assert!(!controller.is_polling());
    assert!(controller.emails().is_empty());
    // The durable mirror is cleared too.
    assert!(!controller.restore());
}

#[tokio::test(start_paused = true)]
async fn logout_stops_polling_and_clears_state() {
    let (controller, api, _tmp) = setup();
    api.push_email(email("m1", false));
    controller.login("someone@a.test", "pw").await.unwrap();
    settle().await;

    controller.logout();
    assert!(controller.session().is_none());
    assert!(controller.emails().is_empty());
    assert!(!controller.is_polling());

    let calls = api.list_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(api.list_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test(start_paused = true)]
async fn operations_without_a_session_fail_fast() {
    let (controller, api, _tmp) = setup();

    let err = controller.refresh().await.unwrap_err();
    assert!(matches!(err, AppError::NotAuthenticated));
    let err = controller.delete_email("m1").await.unwrap_err();
    assert!(matches!(err, AppError::NotAuthenticated));

    // Nothing was dispatched.
    assert_eq!(api.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn quick_register_only_uses_active_domains() {
    let (controller, api, _tmp) = setup();

    for _ in 0..3 {
        let session = controller.quick_register().await.unwrap();
        assert!(session.account.address.ends_with("@a.test"));
    }
    for address in api.created_addresses.lock().unwrap().iter() {
        assert!(address.ends_with("@a.test"));
    }
}

#[tokio::test(start_paused = true)]
async fn restored_session_resumes_polling() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("session.json");

    let api = Arc::new(FakeApi::default());
    let first = InboxController::new(
        Arc::clone(&api),
        SessionStore::with_file(path.clone()),
        Duration::from_secs(5),
    );
    first.login("someone@a.test", "pw").await.unwrap();
    first.stop_polling();

    let second = InboxController::new(
        Arc::clone(&api),
        SessionStore::with_file(path),
        Duration::from_secs(5),
    );
    assert!(second.restore());
    settle().await;
    assert!(second.is_polling());
    assert!(second.session().is_some());
}
