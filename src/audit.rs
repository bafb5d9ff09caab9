//! Append-then-finalize audit trail for every processed event.
//!
//! A record is written with status `pending` before any processing and
//! moved to `success` or `error` afterwards. Audit failures are logged and
//! never block the reply path.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::router::context::Context;
use crate::state::{AuditRecord, AuditStatus, StateStore};

/// Writer over the store's audit sink.
pub struct AuditLog {
    store: Arc<dyn StateStore>,
}

impl AuditLog {
    /// Build a log over the given store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Open a `pending` record for an inbound message.
    pub async fn begin(&self, ctx: &Context) -> Uuid {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: ctx.user_id.clone(),
            chat_id: ctx.chat_id.clone(),
            raw_message: ctx.body.clone(),
            parsed: None,
            status: AuditStatus::Pending,
            response: None,
            error: None,
        };
        if let Err(e) = self.store.append_audit(&record).await {
            warn!(error = %e, "failed to append audit record");
        }
        record.id
    }

    /// Finalize a record with its outcome.
    pub async fn finish(
        &self,
        id: Uuid,
        status: AuditStatus,
        parsed: Option<&serde_json::Value>,
        response: Option<&str>,
        error: Option<&str>,
    ) {
        if let Err(e) = self
            .store
            .update_audit(id, status, parsed, response, error)
            .await
        {
            warn!(error = %e, "failed to finalize audit record");
        }
    }
}
