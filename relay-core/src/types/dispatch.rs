use serde::Serialize;

/// Per-recipient outcome of a batched operation. Every recipient lands in
/// exactly one of the two lists, in processing order; each id must be
/// recorded once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchResult {
    succeeded: Vec<String>,
    failed: Vec<String>,
}

impl DispatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, recipient: impl Into<String>) {
        self.succeeded.push(recipient.into());
    }

    pub fn record_failure(&mut self, recipient: impl Into<String>) {
        self.failed.push(recipient.into());
    }

    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn succeeded(&self) -> &[String] {
        &self.succeeded
    }

    pub fn failed(&self) -> &[String] {
        &self.failed
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<String>) {
        (self.succeeded, self.failed)
    }

    pub fn into_broadcast_report(self, message_id: impl Into<String>) -> BroadcastReport {
        let success = self.success();
        BroadcastReport {
            success,
            message_id: message_id.into(),
            failed_groups: (!success).then_some(self.failed),
        }
    }

    pub fn into_clear_report(self) -> ClearReport {
        let success = self.success();
        ClearReport {
            success,
            cleared_groups: self.succeeded,
            failed_groups: (!success).then_some(self.failed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub success: bool,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_groups: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReport {
    pub success: bool,
    pub cleared_groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_groups: Option<Vec<String>>,
}
