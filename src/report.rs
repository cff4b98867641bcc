//! Reports filed against members over a deposit review
use super::types::TimeStamp;
use chrono::Utc;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Rejected,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct MemberReport {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub reporter_user_id: String,
    #[n(2)]
    pub reported_member_id: String,
    #[n(3)]
    pub related_transaction_id: String,
    #[n(4)]
    pub reason: String,
    #[n(5)]
    pub status: ReportStatus,
    #[n(6)]
    pub penalty_charged: bool,
    #[n(7)]
    pub reviewed_by: Option<String>,
    #[n(8)]
    pub reviewed_at: Option<TimeStamp<Utc>>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub penalty_entry_id: Option<String>,
}

/// Resolution of a pending report. The store applies it only while the
/// report is still `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportUpdate {
    pub status: ReportStatus,
    pub reviewed_by: String,
    pub reviewed_at: TimeStamp<Utc>,
    pub penalty_charged: bool,
    pub penalty_entry_id: Option<String>,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Approved => "approved",
            ReportStatus::Rejected => "rejected",
        }
    }
    pub fn is_terminal(&self) -> bool {
        *self != ReportStatus::Pending
    }
}

impl MemberReport {
    pub fn new(
        id: String,
        reporter_user_id: String,
        reported_member_id: String,
        related_transaction_id: String,
        reason: String,
    ) -> Self {
        Self {
            id,
            reporter_user_id,
            reported_member_id,
            related_transaction_id,
            reason,
            status: ReportStatus::Pending,
            penalty_charged: false,
            reviewed_by: None,
            reviewed_at: None,
            created_at: TimeStamp::new(),
            penalty_entry_id: None,
        }
    }
}

impl ReportUpdate {
    pub fn approved(leader_id: &str, penalty_entry_id: String) -> Self {
        Self {
            status: ReportStatus::Approved,
            reviewed_by: leader_id.to_string(),
            reviewed_at: TimeStamp::new(),
            penalty_charged: true,
            penalty_entry_id: Some(penalty_entry_id),
        }
    }
    pub fn rejected(leader_id: &str) -> Self {
        Self {
            status: ReportStatus::Rejected,
            reviewed_by: leader_id.to_string(),
            reviewed_at: TimeStamp::new(),
            penalty_charged: false,
            penalty_entry_id: None,
        }
    }
    pub fn apply_to(&self, report: &MemberReport) -> Option<MemberReport> {
        if report.status.is_terminal() {
            return None;
        }

        let mut updated = report.clone();
        updated.status = self.status;
        updated.reviewed_by = Some(self.reviewed_by.clone());
        updated.reviewed_at = Some(self.reviewed_at.clone());
        updated.penalty_charged = self.penalty_charged;
        updated.penalty_entry_id = self.penalty_entry_id.clone();
        Some(updated)
    }
}
