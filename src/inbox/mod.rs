pub mod state;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::api::MailApi;
use crate::errors::{AppError, AppResult};
use crate::session::SessionStore;
use crate::types::{Domain, Email, Session};

pub use state::{InboxEvent, InboxState};

static ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$").unwrap());

/// Read-only view published to consumers after every state change.
#[derive(Clone, Debug, Default)]
pub struct InboxSnapshot {
    pub emails: Vec<Email>,
    pub selected: Option<Email>,
    pub polling: bool,
}

struct Shared {
    session: Option<Session>,
    epoch: u64,
    state: InboxState,
    polling: bool,
}

impl Shared {
    /// Ends the current session: later events stamped with an older epoch
    /// are discarded instead of being applied to the next session.
    fn teardown(&mut self) {
        self.epoch += 1;
        self.session = None;
        self.state.clear();
        self.polling = false;
    }
}

/// Owns one logical session slot and the inbox derived from it: the
/// authenticated session, the polling task handle, and the reducer state.
/// All mutation goes through `InboxEvent` application stamped against the
/// session epoch, so results arriving after logout or re-login are dropped.
pub struct InboxController<A: ?Sized> {
    api: Arc<A>,
    store: SessionStore,
    poll_interval: Duration,
    shared: Arc<Mutex<Shared>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    updates: watch::Sender<InboxSnapshot>,
}

impl<A> InboxController<A>
where
    A: MailApi + ?Sized + 'static,
{
    pub fn new(api: Arc<A>, store: SessionStore, poll_interval: Duration) -> Self {
        let (updates, _) = watch::channel(InboxSnapshot::default());
        Self {
            api,
            store,
            poll_interval,
            shared: Arc::new(Mutex::new(Shared {
                session: None,
                epoch: 0,
                state: InboxState::default(),
                polling: false,
            })),
            poll_task: Mutex::new(None),
            updates,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<InboxSnapshot> {
        self.updates.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn emails(&self) -> Vec<Email> {
        self.lock().state.emails().to_vec()
    }

    pub fn selected(&self) -> Option<Email> {
        self.lock().state.selected().cloned()
    }

    pub fn is_polling(&self) -> bool {
        self.lock().polling
    }

    /// Installs a previously persisted session, if one is still valid.
    pub fn restore(&self) -> bool {
        match self.store.load() {
            Some(session) => {
                info!(address = %session.account.address, "Restored session");
                self.install(session, false);
                true
            }
            None => false,
        }
    }

    pub async fn quick_register(&self) -> AppResult<Session> {
        let session = self.api.quick_register().await?;
        self.install(session.clone(), true);
        Ok(session)
    }

    pub async fn login(&self, address: &str, password: &str) -> AppResult<Session> {
        validate_credentials(address, password)?;
        let session = self.api.login_with_credentials(address, password).await?;
        self.install(session.clone(), true);
        Ok(session)
    }

    pub async fn register(&self, address: &str, password: &str) -> AppResult<Session> {
        validate_credentials(address, password)?;
        let session = self.api.register_with_credentials(address, password).await?;
        self.install(session.clone(), true);
        Ok(session)
    }

    pub fn logout(&self) {
        self.stop_polling();
        self.lock().teardown();
        self.store.clear();
        self.publish();
        info!("Signed out");
    }

    /// Deletes the remote account, then ends the session locally.
    pub async fn delete_account(&self) -> AppResult<()> {
        let (token, _) = self.auth_snapshot()?;
        let account_id = self
            .lock()
            .session
            .as_ref()
            .map(|s| s.account.id.clone())
            .ok_or(AppError::NotAuthenticated)?;

        self.api
            .delete_account(&account_id, &token)
            .await
            .map_err(|e| self.note_auth_failure(e))?;
        self.logout();
        Ok(())
    }

    /// One manual full list fetch, outside the polling cadence.
    pub async fn refresh(&self) -> AppResult<()> {
        let (token, epoch) = self.auth_snapshot()?;
        let list = self
            .api
            .messages(&token)
            .await
            .map_err(|e| self.note_auth_failure(e))?;
        self.apply_if_current(epoch, InboxEvent::ListReplaced(list));
        Ok(())
    }

    /// Opens a message: detail is fetched only when not already cached, the
    /// record is upgraded in place, and an unseen message is marked read
    /// server-side with the local flag flipped immediately after.
    ///
    /// If the message was deleted while the detail fetch was in flight, the
    /// fetched record is returned but nothing is applied.
    pub async fn select_email(&self, id: &str) -> AppResult<Email> {
        let (token, epoch) = self.auth_snapshot()?;

        let cached = self.lock().state.get(id).filter(|e| e.is_full()).cloned();
        let full = match cached {
            Some(email) => email,
            None => self
                .api
                .message(id, &token)
                .await
                .map_err(|e| self.note_auth_failure(e))?,
        };

        let applied = {
            let mut shared = self.lock();
            if shared.epoch == epoch && shared.state.contains(id) {
                shared.state.apply(InboxEvent::DetailLoaded(full.clone()));
                shared.state.select(id);
                true
            } else {
                false
            }
        };
        self.publish();

        if applied && !full.seen {
            self.api
                .mark_seen(id, &token)
                .await
                .map_err(|e| self.note_auth_failure(e))?;
            self.apply_if_current(epoch, InboxEvent::MarkedRead(id.to_string()));
        }

        Ok(full)
    }

    pub fn clear_selection(&self) {
        self.lock().state.clear_selection();
        self.publish();
    }

    /// Deletes one message remotely, then drops it from local state. If it
    /// was selected, the selection is cleared by the reducer.
    pub async fn delete_email(&self, id: &str) -> AppResult<()> {
        let (token, epoch) = self.auth_snapshot()?;
        self.api
            .delete_message(id, &token)
            .await
            .map_err(|e| self.note_auth_failure(e))?;
        self.apply_if_current(epoch, InboxEvent::Deleted(id.to_string()));
        Ok(())
    }

    /// Deletes every known message with concurrent fan-out. Only confirmed
    /// remote deletions are removed locally; a partial failure surfaces an
    /// error while the failed messages stay in state, so the next poll
    /// cannot resurrect anything silently.
    pub async fn clear_all(&self) -> AppResult<()> {
        let (token, epoch) = self.auth_snapshot()?;
        let ids = self.lock().state.ids();
        if ids.is_empty() {
            return Ok(());
        }

        let total = ids.len();
        let deletions = ids.into_iter().map(|id| {
            let api = Arc::clone(&self.api);
            let token = token.clone();
            async move {
                let result = api.delete_message(&id, &token).await;
                (id, result)
            }
        });
        let results = join_all(deletions).await;

        let mut failed = 0usize;
        let mut auth_error = None;
        {
            let mut shared = self.lock();
            for (id, result) in results {
                match result {
                    Ok(()) => {
                        if shared.epoch == epoch {
                            shared.state.apply(InboxEvent::Deleted(id));
                        }
                    }
                    Err(e) => {
                        warn!(message = %id, error = %e, "Deleting message failed");
                        failed += 1;
                        if e.is_auth() {
                            auth_error = Some(e);
                        }
                    }
                }
            }
        }
        self.publish();

        if let Some(e) = auth_error {
            return Err(self.note_auth_failure(e));
        }
        if failed > 0 {
            return Err(AppError::Api(format!(
                "Failed to delete {failed} of {total} messages"
            )));
        }
        Ok(())
    }

    pub async fn message_source(&self, id: &str) -> AppResult<String> {
        let (token, _) = self.auth_snapshot()?;
        self.api
            .message_source(id, &token)
            .await
            .map_err(|e| self.note_auth_failure(e))
    }

    pub async fn download_attachment(&self, attachment_id: &str) -> AppResult<Vec<u8>> {
        let (token, _) = self.auth_snapshot()?;
        self.api
            .attachment(attachment_id, &token)
            .await
            .map_err(|e| self.note_auth_failure(e))
    }

    /// Domain listing needs no session.
    pub async fn domains(&self) -> AppResult<Vec<Domain>> {
        self.api.active_domains().await
    }

    /// Starts the polling loop. A no-op while a loop is already running;
    /// the first fetch happens immediately, not after the first interval.
    pub fn start_polling(&self) {
        let mut slot = lock_unpoisoned(&self.poll_task);
        if let Some(handle) = slot.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }

        {
            let mut shared = self.lock();
            if shared.session.is_none() {
                return;
            }
            shared.polling = true;
        }
        self.publish();

        let api = Arc::clone(&self.api);
        let shared = Arc::clone(&self.shared);
        let updates = self.updates.clone();
        let store = self.store.clone();
        let period = self.poll_interval;
        *slot = Some(tokio::spawn(poll_loop(api, shared, updates, store, period)));
    }

    /// Cancels the polling task. In-flight user-initiated requests are
    /// unaffected; their results are still epoch-checked on arrival.
    pub fn stop_polling(&self) {
        let handle = lock_unpoisoned(&self.poll_task).take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.lock().polling = false;
        self.publish();
    }

    fn install(&self, session: Session, persist: bool) {
        if persist {
            if let Err(e) = self.store.save(&session) {
                warn!(error = %e, "Persisting session failed; continuing in-memory");
            }
        }
        {
            let mut shared = self.lock();
            shared.epoch += 1;
            shared.session = Some(session);
            shared.state.clear();
        }
        self.publish();
        self.start_polling();
    }

    /// Token plus the epoch it was read under. Fails fast without touching
    /// the network when no valid session is installed.
    fn auth_snapshot(&self) -> AppResult<(String, u64)> {
        let expired = {
            let shared = self.lock();
            match &shared.session {
                Some(session) if session.is_valid() => {
                    return Ok((session.token.clone(), shared.epoch));
                }
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            warn!("Session expired locally; tearing down");
            self.invalidate();
            return Err(AppError::Unauthorized("Session expired".to_string()));
        }
        Err(AppError::NotAuthenticated)
    }

    /// A 401 from any authenticated call is authoritative: the session is
    /// torn down immediately instead of waiting for the local clock.
    fn note_auth_failure(&self, error: AppError) -> AppError {
        if error.is_auth() {
            warn!(error = %error, "Authentication rejected by server; tearing down session");
            self.invalidate();
        }
        error
    }

    fn invalidate(&self) {
        self.stop_polling();
        self.lock().teardown();
        self.store.clear();
        self.publish();
    }

    fn apply_if_current(&self, epoch: u64, event: InboxEvent) {
        {
            let mut shared = self.lock();
            if shared.epoch != epoch || shared.session.is_none() {
                return;
            }
            shared.state.apply(event);
        }
        self.publish();
    }

    fn publish(&self) {
        let snapshot = {
            let shared = self.lock();
            snapshot_of(&shared)
        };
        self.updates.send_replace(snapshot);
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock_unpoisoned(&self.shared)
    }
}

async fn poll_loop<A>(
    api: Arc<A>,
    shared: Arc<Mutex<Shared>>,
    updates: watch::Sender<InboxSnapshot>,
    store: SessionStore,
    period: Duration,
) where
    A: MailApi + ?Sized,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let snapshot = {
            let shared = lock_unpoisoned(&shared);
            shared
                .session
                .as_ref()
                .map(|s| (s.token.clone(), shared.epoch))
        };
        let Some((token, epoch)) = snapshot else {
            break;
        };

        match api.messages(&token).await {
            Ok(list) => {
                {
                    let mut shared = lock_unpoisoned(&shared);
                    if shared.epoch == epoch && shared.session.is_some() {
                        shared.state.apply(InboxEvent::ListReplaced(list));
                    }
                }
                publish_to(&updates, &shared);
            }
            Err(e) if e.is_auth() => {
                warn!(error = %e, "Authentication rejected during poll; tearing down session");
                {
                    let mut shared = lock_unpoisoned(&shared);
                    if shared.epoch == epoch {
                        shared.teardown();
                        store.clear();
                    }
                }
                publish_to(&updates, &shared);
            }
            Err(e) => {
                warn!(error = %e, "Fetching messages failed");
            }
        }
    }

    lock_unpoisoned(&shared).polling = false;
    publish_to(&updates, &shared);
}

fn publish_to(updates: &watch::Sender<InboxSnapshot>, shared: &Arc<Mutex<Shared>>) {
    let snapshot = {
        let shared = lock_unpoisoned(shared);
        snapshot_of(&shared)
    };
    updates.send_replace(snapshot);
}

fn snapshot_of(shared: &Shared) -> InboxSnapshot {
    InboxSnapshot {
        emails: shared.state.emails().to_vec(),
        selected: shared.state.selected().cloned(),
        polling: shared.polling,
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn validate_credentials(address: &str, password: &str) -> AppResult<()> {
    if !ADDRESS_RE.is_match(address) {
        return Err(AppError::InvalidInput(format!(
            "Invalid email address: {address}"
        )));
    }
    if password.is_empty() {
        return Err(AppError::InvalidInput(
            "Password must not be empty".to_string(),
        ));
    }
    Ok(())
}
