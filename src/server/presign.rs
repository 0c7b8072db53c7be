use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignTicket {
    pub upload_id: String,
    pub token: String,
    pub file_name: String,
    pub file_type: String,
    /// Size declared at presign time, if any.
    pub file_size: Option<u64>,
    pub expires_at: DateTime<Utc>,
}

impl PresignTicket {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outstanding presigned upload grants, one per upload id.
pub struct PresignRegistry {
    tickets: DashMap<String, PresignTicket>,
    ttl: Duration,
}

impl PresignRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tickets: DashMap::new(),
            ttl,
        }
    }

    pub fn issue(
        &self,
        upload_id: &str,
        file_name: &str,
        file_type: &str,
        file_size: Option<u64>,
    ) -> PresignTicket {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let ticket = PresignTicket {
            upload_id: upload_id.to_string(),
            token: Uuid::new_v4().simple().to_string(),
            file_name: file_name.to_string(),
            file_type: file_type.to_string(),
            file_size,
            expires_at: Utc::now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.tickets.insert(upload_id.to_string(), ticket.clone());
        ticket
    }

    /// The ticket for `upload_id` if `token` matches and it has not expired.
    pub fn check(&self, upload_id: &str, token: &str) -> Result<PresignTicket, String> {
        let ticket = self
            .tickets
            .get(upload_id)
            .map(|t| t.clone())
            .ok_or_else(|| format!("no presigned grant for {upload_id}"))?;
        if ticket.token != token {
            return Err("token does not match".to_string());
        }
        if ticket.is_expired(Utc::now()) {
            return Err("presigned url has expired".to_string());
        }
        Ok(ticket)
    }

    pub fn remove(&self, upload_id: &str) -> bool {
        self.tickets.remove(upload_id).is_some()
    }

    /// Drop expired tickets, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.tickets.len();
        self.tickets.retain(|_, ticket| !ticket.is_expired(now));
        before.saturating_sub(self.tickets.len())
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}
