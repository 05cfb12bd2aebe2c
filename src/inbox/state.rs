use crate::types::Email;

/// State transitions, applied in event-arrival order. Every event is checked
/// against current membership: an event referencing an id that is no longer
/// present is a no-op, never a resurrection.
#[derive(Debug)]
pub enum InboxEvent {
    /// A full list fetch finished; the collection is replaced wholesale.
    ListReplaced(Vec<Email>),
    /// A lazy detail fetch finished; the record is upgraded in place.
    DetailLoaded(Email),
    /// A server-side mark-seen succeeded; flip the local flag now rather
    /// than waiting for the next poll.
    MarkedRead(String),
    /// A remote deletion was confirmed; drop the local record.
    Deleted(String),
}

/// In-memory inbox: id-unique email list plus the current selection.
#[derive(Debug, Default, Clone)]
pub struct InboxState {
    emails: Vec<Email>,
    selected_id: Option<String>,
}

impl InboxState {
    pub fn apply(&mut self, event: InboxEvent) {
        match event {
            InboxEvent::ListReplaced(incoming) => self.replace_list(incoming),
            InboxEvent::DetailLoaded(full) => {
                if let Some(slot) = self.emails.iter_mut().find(|e| e.id == full.id) {
                    *slot = full;
                }
            }
            InboxEvent::MarkedRead(id) => {
                if let Some(email) = self.emails.iter_mut().find(|e| e.id == id) {
                    email.seen = true;
                }
            }
            InboxEvent::Deleted(id) => {
                self.emails.retain(|e| e.id != id);
                if self.selected_id.as_deref() == Some(id.as_str()) {
                    self.selected_id = None;
                }
            }
        }
    }

    /// New list wins, but locally-known upgrades survive until the server
    /// catches up: detail fields carry over and a locally-flipped seen flag
    /// is not un-flipped by a stale summary.
    fn replace_list(&mut self, incoming: Vec<Email>) {
        let mut next: Vec<Email> = Vec::with_capacity(incoming.len());
        for mut email in incoming {
            if next.iter().any(|e| e.id == email.id) {
                continue;
            }
            if let Some(existing) = self.emails.iter().find(|e| e.id == email.id) {
                email.seen |= existing.seen;
                if existing.is_full() && !email.is_full() {
                    email.text = existing.text.clone();
                    email.html = existing.html.clone();
                    email.attachments = existing.attachments.clone();
                }
            }
            next.push(email);
        }

        self.emails = next;
        if let Some(id) = &self.selected_id {
            if !self.contains(id) {
                self.selected_id = None;
            }
        }
    }

    pub fn emails(&self) -> &[Email] {
        &self.emails
    }

    pub fn ids(&self) -> Vec<String> {
        self.emails.iter().map(|e| e.id.clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Email> {
        self.emails.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.emails.iter().any(|e| e.id == id)
    }

    /// Selects an email only if it is still present.
    pub fn select(&mut self, id: &str) -> bool {
        if self.contains(id) {
            self.selected_id = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected_id = None;
    }

    pub fn selected(&self) -> Option<&Email> {
        self.selected_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn clear(&mut self) {
        self.emails.clear();
        self.selected_id = None;
    }
}
