use crate::error::ActionError;
use crate::services::api::ClinicApi;
use shared::{ApprovalDecision, ApprovalQueueQuery, PendingApproval, Session, UpdateApprovalRequest};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApprovalQueueState {
    pub items: Vec<PendingApproval>,
    pub search: Option<String>,
    pub filter: String,
    pub in_flight: BTreeSet<u64>,
    pub loading: bool,
    pub error: Option<String>,
}

impl ApprovalQueueState {
    /// Loaded items narrowed by the local filter (patient name or id,
    /// case-insensitive).
    pub fn visible(&self) -> Vec<&PendingApproval> {
        let needle = self.filter.trim().to_lowercase();
        self.items
            .iter()
            .filter(|item| {
                needle.is_empty()
                    || item.patient_name.to_lowercase().contains(&needle)
                    || item.patient_id.to_string().contains(&needle)
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved(ApprovalDecision),
    /// The row was no longer listed, so someone already resolved it.
    AlreadyResolved,
}

/// Branch-admin list of pending attendance requests.
///
/// Resolving a row removes it immediately; if the backend refuses, the row
/// goes back where it was.
pub struct ApprovalQueue {
    api: Arc<dyn ClinicApi>,
    session: Session,
    require_rejection_reason: bool,
    state: Mutex<ApprovalQueueState>,
}

impl ApprovalQueue {
    pub fn new(api: Arc<dyn ClinicApi>, session: Session, require_rejection_reason: bool) -> Self {
        Self {
            api,
            session,
            require_rejection_reason,
            state: Mutex::new(ApprovalQueueState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ApprovalQueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> ApprovalQueueState {
        self.lock().clone()
    }

    pub fn set_filter(&self, filter: impl Into<String>) {
        self.lock().filter = filter.into();
    }

    fn ensure_permitted(&self) -> Result<(), ActionError> {
        if self.session.role.can_resolve_approvals() {
            Ok(())
        } else {
            Err(ActionError::NotPermitted("resolve attendance approvals"))
        }
    }

    /// Fetch pending requests, optionally narrowed server-side by `search`.
    pub async fn refresh(&self, search: Option<String>) -> Result<(), ActionError> {
        self.ensure_permitted()?;
        let search = search.filter(|s| !s.trim().is_empty());
        {
            let mut state = self.lock();
            state.loading = true;
            state.search = search.clone();
        }

        let query = ApprovalQueueQuery::pending(self.session.branch_id, search);
        let result = self.api.pending_approvals(&query).await;

        let mut state = self.lock();
        state.loading = false;
        match result {
            Ok(items) => {
                let in_flight = state.in_flight.clone();
                state.items = items
                    .into_iter()
                    .filter(|item| !in_flight.contains(&item.attendance_id))
                    .collect();
                state.error = None;
                debug!(component = "approvals", count = state.items.len(), "Approval queue loaded");
                Ok(())
            }
            Err(err) => {
                warn!(component = "approvals", error = %err, "Approval queue refresh failed, keeping previous list");
                state.error = Some(err.user_message());
                Err(err.into())
            }
        }
    }

    pub async fn approve(&self, attendance_id: u64) -> Result<ResolveOutcome, ActionError> {
        self.resolve(attendance_id, ApprovalDecision::Approved, None).await
    }

    /// Reject a request. `reason` is mandatory only when configured so.
    pub async fn reject(&self, attendance_id: u64, reason: Option<&str>) -> Result<ResolveOutcome, ActionError> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if self.require_rejection_reason && reason.is_none() {
            return Err(ActionError::MissingRejectionReason);
        }
        self.resolve(attendance_id, ApprovalDecision::Rejected, reason.map(str::to_string))
            .await
    }

    async fn resolve(
        &self,
        attendance_id: u64,
        decision: ApprovalDecision,
        remarks: Option<String>,
    ) -> Result<ResolveOutcome, ActionError> {
        self.ensure_permitted()?;

        let (index, item) = {
            let mut state = self.lock();
            let Some(index) = state.items.iter().position(|i| i.attendance_id == attendance_id) else {
                debug!(component = "approvals", attendance_id, "Request no longer listed, treating as resolved");
                return Ok(ResolveOutcome::AlreadyResolved);
            };
            let item = state.items.remove(index);
            state.in_flight.insert(attendance_id);
            state.error = None;
            (index, item)
        };

        let request = UpdateApprovalRequest::new(attendance_id, decision, self.session.employee_id, remarks);
        let result = self.api.update_approval(&request).await;

        let mut state = self.lock();
        state.in_flight.remove(&attendance_id);
        match result {
            Ok(_) => {
                info!(
                    component = "approvals",
                    attendance_id,
                    patient_id = item.patient_id,
                    %decision,
                    date = %item.attendance_date,
                    "Attendance request resolved"
                );
                Ok(ResolveOutcome::Resolved(decision))
            }
            Err(err) => {
                warn!(component = "approvals", attendance_id, error = %err, "Resolution failed, restoring row");
                let index = index.min(state.items.len());
                state.items.insert(index, item);
                state.error = Some(err.user_message());
                Err(ActionError::Api(err))
            }
        }
    }

    /// Shorthand for callers that only care about the backend error.
    pub fn last_error(&self) -> Option<String> {
        self.lock().error.clone()
    }
}
