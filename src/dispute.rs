//! Dispute resolution workflow
//!
//! A user reports a member over a deposit that member reviewed. A leader
//! resolves the report exactly once; approving it debits the member the
//! report penalty, clamped to what they hold.
use super::account::Role;
use super::context::WalletContext;
use super::error::{EntityKind, StoreError, WalletError, WalletResult};
use super::ledger::{EntryType, LedgerEntry};
use super::notify::{EventType, Payload};
use super::report::{MemberReport, ReportStatus, ReportUpdate};
use super::utils;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportApproval {
    pub report: MemberReport,
    pub penalty: LedgerEntry,
}

pub struct DisputeWorkflow {
    ctx: WalletContext,
}

impl DisputeWorkflow {
    pub fn new(ctx: WalletContext) -> Self {
        Self { ctx }
    }

    pub fn file_report(
        &self,
        reporter_id: &str,
        reported_member_id: &str,
        related_transaction_id: &str,
        reason: &str,
    ) -> WalletResult<MemberReport> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WalletError::InvalidReport("a reason is required".into()));
        }
        if reporter_id == reported_member_id {
            return Err(WalletError::InvalidReport("cannot report yourself".into()));
        }

        self.ctx.engine.load_user(reporter_id)?;
        let reported = self.ctx.engine.load_user(reported_member_id)?;
        if reported.role != Role::Member {
            return Err(WalletError::InvalidReport(format!(
                "{reported_member_id} is not a member"
            )));
        }

        let related = self.ctx.engine.load_entry(related_transaction_id)?;
        if related.assigned_member_id.as_deref() != Some(reported_member_id) {
            return Err(WalletError::InvalidReport(format!(
                "{related_transaction_id} was not reviewed by {reported_member_id}"
            )));
        }

        let id = utils::new_report_id()
            .map_err(|e| WalletError::StoreUnavailable(format!("could not mint report id: {e}")))?;
        let report = MemberReport::new(
            id,
            reporter_id.to_string(),
            reported_member_id.to_string(),
            related_transaction_id.to_string(),
            reason.to_string(),
        );

        let report = self
            .ctx
            .engine
            .with_retry("insert_report", || self.ctx.reports.insert(report.clone()))
            .map_err(|e| WalletError::from_store(e, EntityKind::Report))?;

        tracing::info!(report_id = %report.id, reporter_id, reported_member_id, "report filed");
        self.ctx.notify(
            reported_member_id,
            EventType::ReportFiled,
            Payload::new()
                .with("report_id", &report.id)
                .with("transaction_id", related_transaction_id),
        );
        Ok(report)
    }

    /// Upholds the report and charges the member exactly one penalty.
    pub fn approve(&self, report_id: &str, leader_id: &str) -> WalletResult<ReportApproval> {
        self.require_leader(leader_id)?;

        self.ctx.engine.with_entity_lock(report_id, || {
            let report = self.load_pending(report_id)?;

            // keyed by the report, a retry after a failed resolve reuses it
            let penalty = self.ctx.engine.apply_debit_once(
                &report.reported_member_id,
                self.ctx.config.report_penalty,
                EntryType::ReportPenalty,
                &report.id,
            )?;

            let update = ReportUpdate::approved(leader_id, penalty.id.clone());
            let report = self.resolve(report_id, &update)?;

            tracing::info!(
                report_id,
                leader_id,
                member_id = %report.reported_member_id,
                collected = %penalty.amount.abs(),
                "report approved"
            );
            self.ctx.notify(
                &report.reporter_user_id,
                EventType::ReportApproved,
                Payload::new().with("report_id", report_id),
            );
            self.ctx.notify(
                &report.reported_member_id,
                EventType::PenaltyCharged,
                Payload::new()
                    .with("report_id", report_id)
                    .with_amount("penalty", self.ctx.config.report_penalty)
                    .with_amount("collected", penalty.amount.abs())
                    .with_amount("balance", penalty.balance_after),
            );

            Ok(ReportApproval { report, penalty })
        })
    }

    /// Dismisses the report; no balance changes.
    pub fn reject(&self, report_id: &str, leader_id: &str) -> WalletResult<MemberReport> {
        self.require_leader(leader_id)?;

        self.ctx.engine.with_entity_lock(report_id, || {
            self.load_pending(report_id)?;
            let report = self.resolve(report_id, &ReportUpdate::rejected(leader_id))?;

            tracing::info!(report_id, leader_id, "report rejected");
            self.ctx.notify(
                &report.reporter_user_id,
                EventType::ReportRejected,
                Payload::new().with("report_id", report_id),
            );
            Ok(report)
        })
    }

    pub fn pending_reports(&self) -> WalletResult<Vec<MemberReport>> {
        self.ctx
            .engine
            .with_retry("find_reports", || {
                self.ctx.reports.find_by_status(ReportStatus::Pending)
            })
            .map_err(WalletError::from)
    }

    pub fn reports_against(&self, member_id: &str) -> WalletResult<Vec<MemberReport>> {
        self.ctx
            .engine
            .with_retry("find_reports", || self.ctx.reports.find_by_reported(member_id))
            .map_err(WalletError::from)
    }

    fn load_pending(&self, report_id: &str) -> WalletResult<MemberReport> {
        let report = self
            .ctx
            .engine
            .with_retry("get_report", || self.ctx.reports.get(report_id))
            .map_err(|e| WalletError::from_store(e, EntityKind::Report))?;

        if report.status.is_terminal() {
            return Err(WalletError::already_resolved(EntityKind::Report, report_id));
        }
        Ok(report)
    }

    fn resolve(&self, report_id: &str, update: &ReportUpdate) -> WalletResult<MemberReport> {
        self.ctx
            .engine
            .with_retry("resolve_report", || self.ctx.reports.update(report_id, update))
            .map_err(|err| match err {
                StoreError::Conflict(id) => WalletError::already_resolved(EntityKind::Report, id),
                other => WalletError::from_store(other, EntityKind::Report),
            })
    }

    fn require_leader(&self, leader_id: &str) -> WalletResult<()> {
        let leader = self.ctx.engine.load_user(leader_id)?;
        if !leader.is_leader() {
            return Err(WalletError::unauthorized(leader_id, "resolve reports"));
        }
        Ok(())
    }
}
