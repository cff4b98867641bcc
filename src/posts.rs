//! Charging for marketplace posts
use super::account::UserUpdate;
use super::context::WalletContext;
use super::error::{EntityKind, WalletError, WalletResult};
use super::ledger::{EntryStatus, EntryType, LedgerEntry};
use super::notify::{EventType, Payload};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCharge {
    /// Covered by the free post allowance
    FreeAllowance { remaining: u32 },
    Paid(LedgerEntry),
}

pub struct PostPayments {
    ctx: WalletContext,
}

impl PostPayments {
    pub fn new(ctx: WalletContext) -> Self {
        Self { ctx }
    }

    /// Uses a free post if any remain, otherwise debits `post_cost`.
    pub fn charge_post(&self, user_id: &str, post_id: &str) -> WalletResult<PostCharge> {
        let charge = self.ctx.engine.with_user_lock(user_id, || -> WalletResult<PostCharge> {
            let account = self.ctx.engine.load_user(user_id)?;

            if account.free_posts_remaining > 0 {
                let remaining = account.free_posts_remaining - 1;
                let update = UserUpdate::new().set_free_posts(remaining);
                self.ctx
                    .engine
                    .with_retry("use_free_post", || self.ctx.users.update(user_id, &update))
                    .map_err(|e| WalletError::from_store(e, EntityKind::User))?;
                return Ok(PostCharge::FreeAllowance { remaining });
            }

            let entry = self.ctx.engine.debit_locked(
                user_id,
                self.ctx.config.post_cost,
                EntryType::PostPayment,
                Some(post_id.to_string()),
                UserUpdate::new(),
            )?;
            Ok(PostCharge::Paid(entry))
        })?;

        let payload = match &charge {
            PostCharge::FreeAllowance { remaining } => Payload::new()
                .with("post_id", post_id)
                .with("free_posts_remaining", remaining),
            PostCharge::Paid(entry) => Payload::new()
                .with("post_id", post_id)
                .with_amount("cost", entry.amount.abs()),
        };
        tracing::info!(user_id, post_id, free = matches!(charge, PostCharge::FreeAllowance { .. }), "post charged");
        self.ctx.notify(user_id, EventType::PostCharged, payload);
        Ok(charge)
    }

    /// Refunds what was paid for `post_id`, at most once.
    pub fn refund_post(&self, user_id: &str, post_id: &str) -> WalletResult<LedgerEntry> {
        let refund = self.ctx.engine.with_user_lock(user_id, || {
            let history = self.ctx.engine.history(user_id)?;
            let for_post = |entry_type: EntryType| {
                history.iter().find(|e| {
                    e.entry_type == entry_type
                        && e.status == EntryStatus::Approved
                        && e.related_entity_id.as_deref() == Some(post_id)
                })
            };

            let payment = for_post(EntryType::PostPayment)
                .ok_or_else(|| WalletError::not_found(EntityKind::Post, post_id))?;
            if for_post(EntryType::Refund).is_some() {
                return Err(WalletError::already_resolved(EntityKind::Post, post_id));
            }

            self.ctx.engine.credit_locked(
                user_id,
                payment.amount.abs(),
                EntryType::Refund,
                Some(post_id.to_string()),
            )
        })?;

        tracing::info!(user_id, post_id, amount = %refund.amount, "post refunded");
        self.ctx.notify(
            user_id,
            EventType::PostRefunded,
            Payload::new()
                .with("post_id", post_id)
                .with_amount("amount", refund.amount),
        );
        Ok(refund)
    }
}
