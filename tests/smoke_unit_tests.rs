//! Smoke screen unit tests for the wallet engine components
//!
//! These run against the in-memory store and mostly cover one rule each:
//! authorization checks, terminal states, the affordability check and the
//! free post allowance. Scenarios spanning several workflows live in
//! `scenarios.rs`.

use std::sync::Arc;
use wallet_roles::{
    Money, WalletConfig, WalletError, WalletService,
    account::{Role, UserAccount},
    error::EntityKind,
    ledger::{EntryStatus, EntryType},
    notify::{EventType, RecordingEmitter},
    posts::PostCharge,
    utils,
};

fn service() -> (WalletService, Arc<RecordingEmitter>) {
    let emitter = Arc::new(RecordingEmitter::new());
    let service = WalletService::in_memory(WalletConfig::default(), emitter.clone());
    (service, emitter)
}

fn seed(service: &WalletService, city: &str, role: Role, balance: i64) -> UserAccount {
    let mut account = UserAccount::new(
        utils::new_user_id().unwrap(),
        "seeded".into(),
        city.into(),
        Money::mru(balance),
        0,
    );
    account.role = role;
    service.import_account(account).unwrap()
}

// BALANCE ENGINE TESTS
#[cfg(test)]
mod engine_tests {
    use super::*;

    /// Affordability reports the shortfall without changing anything
    #[test]
    fn affordability_reports_shortfall() {
        let (service, _) = service();
        let user = seed(&service, "c1", Role::Normal, 300);

        let check = service
            .engine()
            .check_affordability(&user.id, Money::mru(500))
            .unwrap();
        assert!(!check.can_afford);
        assert_eq!(check.shortfall, Money::mru(200));

        let check = service
            .engine()
            .check_affordability(&user.id, Money::mru(300))
            .unwrap();
        assert!(check.can_afford);
        assert_eq!(check.shortfall, Money::ZERO);
    }

    /// Credits and debits leave one approved, balanced entry each
    #[test]
    fn every_movement_leaves_one_approved_entry() {
        let (service, _) = service();
        let user = seed(&service, "c1", Role::Normal, 0);

        let credit = service
            .engine()
            .apply_credit(&user.id, Money::mru(120), EntryType::Refund, None)
            .unwrap();
        let debit = service
            .engine()
            .apply_debit(&user.id, Money::mru(20), EntryType::PostPayment, Some("post_9".into()))
            .unwrap();

        assert_eq!(credit.status, EntryStatus::Approved);
        assert_eq!(debit.amount, -Money::mru(20));
        assert_eq!(debit.balance_before, Money::mru(120));
        assert_eq!(debit.balance_after, Money::mru(100));

        let history = service.engine().history(&user.id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.status == EntryStatus::Approved && e.is_balanced()));
        assert_eq!(
            history.last().unwrap().balance_after,
            service.account(&user.id).unwrap().wallet_balance
        );
    }

    /// Debits beyond the balance fail and leave no trace
    #[test]
    fn overdraw_is_rejected() {
        let (service, _) = service();
        let user = seed(&service, "c1", Role::Normal, 10);

        let err = service
            .engine()
            .apply_debit(&user.id, Money::mru(11), EntryType::PostPayment, None)
            .unwrap_err();

        assert_eq!(
            err,
            WalletError::InsufficientBalance {
                user_id: user.id.clone(),
                required: Money::mru(11),
                available: Money::mru(10),
            }
        );
        assert_eq!(service.account(&user.id).unwrap().wallet_balance, Money::mru(10));
        assert!(service.engine().history(&user.id).unwrap().is_empty());
    }

    /// Zero and negative amounts are refused
    #[test]
    fn non_positive_amounts_are_invalid() {
        let (service, _) = service();
        let user = seed(&service, "c1", Role::Normal, 10);

        let zero = service
            .engine()
            .apply_credit(&user.id, Money::ZERO, EntryType::Refund, None);
        let negative = service
            .engine()
            .apply_debit(&user.id, -Money::mru(5), EntryType::PostPayment, None);

        assert!(matches!(zero, Err(WalletError::InvalidAmount(_))));
        assert!(matches!(negative, Err(WalletError::InvalidAmount(_))));
    }

    /// Penalties never push a balance below zero
    #[test]
    fn penalty_on_empty_wallet_collects_nothing() {
        let (service, _) = service();
        let user = seed(&service, "c1", Role::Member, 0);

        let entry = service
            .engine()
            .apply_debit(&user.id, Money::mru(500), EntryType::ReportPenalty, None)
            .unwrap();

        assert_eq!(entry.amount, Money::ZERO);
        assert_eq!(entry.balance_after, Money::ZERO);
    }

    /// A credit that would overflow the balance is refused before anything is written
    #[test]
    fn overflowing_credit_is_invalid() {
        let (service, _) = service();
        let user = seed(&service, "c1", Role::Normal, 0);
        let max = Money::new(rust_decimal::Decimal::MAX);

        service
            .engine()
            .apply_credit(&user.id, max, EntryType::Refund, None)
            .unwrap();
        let err = service
            .engine()
            .apply_credit(&user.id, Money::mru(1), EntryType::Refund, None)
            .unwrap_err();

        assert_eq!(err, WalletError::InvalidAmount(Money::mru(1)));
        assert_eq!(service.account(&user.id).unwrap().wallet_balance, max);
        assert_eq!(service.engine().history(&user.id).unwrap().len(), 1);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let (service, _) = service();

        let err = service
            .engine()
            .apply_credit("user_missing", Money::mru(1), EntryType::Refund, None)
            .unwrap_err();
        assert!(matches!(
            err,
            WalletError::NotFound {
                kind: EntityKind::User,
                ..
            }
        ));
    }
}

// DEPOSIT WORKFLOW TESTS
#[cfg(test)]
mod deposit_tests {
    use super::*;

    /// Only the assigned member may resolve a member-reviewed deposit
    #[test]
    fn other_reviewers_are_unauthorized() {
        let (service, _) = service();
        let requester = seed(&service, "c1", Role::Normal, 0);
        let member = seed(&service, "c1", Role::Member, 2000);
        let leader = seed(&service, "c1", Role::Leader, 0);

        let deposit = service
            .deposits()
            .submit(&requester.id, Money::mru(300), "proof.jpg")
            .unwrap();
        assert_eq!(deposit.assigned_member_id.as_deref(), Some(member.id.as_str()));

        let by_leader = service.deposits().approve(&deposit.id, &leader.id);
        let by_self = service.deposits().approve(&deposit.id, &requester.id);
        assert!(matches!(by_leader, Err(WalletError::Unauthorized { .. })));
        assert!(matches!(by_self, Err(WalletError::Unauthorized { .. })));
        assert_eq!(service.account(&requester.id).unwrap().wallet_balance, Money::ZERO);
    }

    /// The richest qualifying member of the city gets the review
    #[test]
    fn richest_member_is_assigned() {
        let (service, _) = service();
        let requester = seed(&service, "c1", Role::Member, 5000);
        seed(&service, "c1", Role::Member, 1000);
        let richest = seed(&service, "c1", Role::Member, 4000);

        // the requester never reviews their own deposit
        let deposit = service
            .deposits()
            .submit(&requester.id, Money::mru(50), "proof.jpg")
            .unwrap();
        assert_eq!(deposit.assigned_member_id.as_deref(), Some(richest.id.as_str()));
    }

    /// A resolved deposit stays resolved
    #[test]
    fn second_resolution_is_already_resolved() {
        let (service, _) = service();
        let requester = seed(&service, "c1", Role::Normal, 0);
        let member = seed(&service, "c1", Role::Member, 2000);

        let deposit = service
            .deposits()
            .submit(&requester.id, Money::mru(300), "proof.jpg")
            .unwrap();
        service.deposits().approve(&deposit.id, &member.id).unwrap();

        let again = service.deposits().approve(&deposit.id, &member.id);
        let reject = service.deposits().reject(&deposit.id, &member.id, "late");
        assert!(matches!(again, Err(WalletError::AlreadyResolved { .. })));
        assert!(matches!(reject, Err(WalletError::AlreadyResolved { .. })));

        assert_eq!(service.account(&requester.id).unwrap().wallet_balance, Money::mru(300));
        assert_eq!(service.account(&member.id).unwrap().wallet_balance, Money::mru(2005));
    }

    /// Rejection records the reason and moves no money
    #[test]
    fn rejection_keeps_balances() {
        let (service, emitter) = service();
        let requester = seed(&service, "c1", Role::Normal, 40);
        let member = seed(&service, "c1", Role::Member, 2000);

        let deposit = service
            .deposits()
            .submit(&requester.id, Money::mru(300), "proof.jpg")
            .unwrap();
        let rejected = service
            .deposits()
            .reject(&deposit.id, &member.id, "blurry receipt")
            .unwrap();

        assert_eq!(rejected.status, EntryStatus::Rejected);
        assert_eq!(rejected.note.as_deref(), Some("blurry receipt"));
        assert_eq!(rejected.balance_after, rejected.balance_before);
        assert_eq!(service.account(&requester.id).unwrap().wallet_balance, Money::mru(40));
        assert_eq!(service.account(&member.id).unwrap().wallet_balance, Money::mru(2000));
        assert!(emitter.events_for(&requester.id).contains(&EventType::DepositRejected));
    }

    /// Authority is fixed at assignment even if the member's balance drops
    #[test]
    fn assigned_member_keeps_authority() {
        let (service, _) = service();
        let requester = seed(&service, "c1", Role::Normal, 0);
        let member = seed(&service, "c1", Role::Member, 1000);

        let deposit = service
            .deposits()
            .submit(&requester.id, Money::mru(300), "proof.jpg")
            .unwrap();
        service
            .engine()
            .apply_debit(&member.id, Money::mru(900), EntryType::PostPayment, None)
            .unwrap();

        let approval = service.deposits().approve(&deposit.id, &member.id).unwrap();
        assert_eq!(approval.deposit.status, EntryStatus::Approved);
        assert_eq!(service.account(&member.id).unwrap().wallet_balance, Money::mru(105));
    }

    /// Members see their assignments, normal users cannot review
    #[test]
    fn pending_queue_per_reviewer() {
        let (service, _) = service();
        let requester = seed(&service, "c1", Role::Normal, 0);
        let member = seed(&service, "c1", Role::Member, 2000);

        service
            .deposits()
            .submit(&requester.id, Money::mru(10), "a.jpg")
            .unwrap();
        service
            .deposits()
            .submit(&requester.id, Money::mru(20), "b.jpg")
            .unwrap();

        let queue = service.deposits().pending_for_reviewer(&member.id).unwrap();
        assert_eq!(queue.len(), 2);
        assert!(matches!(
            service.deposits().pending_for_reviewer(&requester.id),
            Err(WalletError::Unauthorized { .. })
        ));
    }

    /// A leader cannot approve an escalated deposit they submitted
    #[test]
    fn leader_cannot_approve_own_deposit() {
        let (service, _) = service();
        let leader = seed(&service, "c1", Role::Leader, 0);
        let other_leader = seed(&service, "c1", Role::Leader, 0);

        let deposit = service
            .deposits()
            .submit(&leader.id, Money::mru(250), "proof.jpg")
            .unwrap();
        assert_eq!(deposit.status, EntryStatus::AssignedToLeader);

        assert!(matches!(
            service.deposits().approve(&deposit.id, &leader.id),
            Err(WalletError::Unauthorized { .. })
        ));
        assert_eq!(service.account(&leader.id).unwrap().wallet_balance, Money::ZERO);

        service.deposits().approve(&deposit.id, &other_leader.id).unwrap();
        assert_eq!(service.account(&leader.id).unwrap().wallet_balance, Money::mru(250));
    }

    /// Reward entries and ledger entries that aren't deposits cannot be approved as deposits
    #[test]
    fn non_deposit_entries_are_not_found() {
        let (service, _) = service();
        let user = seed(&service, "c1", Role::Normal, 0);
        let leader = seed(&service, "c1", Role::Leader, 0);

        let refund = service
            .engine()
            .apply_credit(&user.id, Money::mru(5), EntryType::Refund, None)
            .unwrap();

        let err = service.deposits().approve(&refund.id, &leader.id).unwrap_err();
        assert!(matches!(
            err,
            WalletError::NotFound {
                kind: EntityKind::Deposit,
                ..
            }
        ));
    }
}

// ROLE WORKFLOW TESTS
#[cfg(test)]
mod role_tests {
    use super::*;

    /// Leaders promote users holding the member threshold, nothing is debited
    #[test]
    fn leader_promotes_member() {
        let (service, emitter) = service();
        let leader = seed(&service, "c1", Role::Leader, 0);
        let user = seed(&service, "c1", Role::Normal, 1000);

        let promoted = service.roles().promote_to_member(&leader.id, &user.id).unwrap();

        assert_eq!(promoted.role, Role::Member);
        assert_eq!(promoted.wallet_balance, Money::mru(1000));
        assert!(emitter.events_for(&user.id).contains(&EventType::MemberPromoted));
    }

    #[test]
    fn promotion_requires_threshold() {
        let (service, _) = service();
        let leader = seed(&service, "c1", Role::Leader, 0);
        let user = seed(&service, "c1", Role::Normal, 999);

        let err = service.roles().promote_to_member(&leader.id, &user.id).unwrap_err();
        assert!(matches!(err, WalletError::InsufficientBalance { .. }));
        assert_eq!(service.account(&user.id).unwrap().role, Role::Normal);
    }

    #[test]
    fn only_leaders_promote_and_demote() {
        let (service, _) = service();
        let member = seed(&service, "c1", Role::Member, 5000);
        let user = seed(&service, "c1", Role::Normal, 5000);

        assert!(matches!(
            service.roles().promote_to_member(&member.id, &user.id),
            Err(WalletError::Unauthorized { .. })
        ));
        assert!(matches!(
            service.roles().demote_to_normal(&user.id, &member.id, "no reason"),
            Err(WalletError::Unauthorized { .. })
        ));
    }

    /// Leaders can never be demoted or promoted through the workflow
    #[test]
    fn leader_role_is_out_of_reach() {
        let (service, _) = service();
        let leader = seed(&service, "c1", Role::Leader, 0);
        let other = seed(&service, "c1", Role::Leader, 5000);

        assert!(matches!(
            service.roles().demote_to_normal(&leader.id, &other.id, "coup"),
            Err(WalletError::InvalidTransition { .. })
        ));
        assert!(matches!(
            service.roles().promote_to_member(&leader.id, &other.id),
            Err(WalletError::InvalidTransition { .. })
        ));
    }

    /// Demotion clears the subscription without refunding it
    #[test]
    fn demoting_ex_member_clears_due_date() {
        let (service, emitter) = service();
        let leader = seed(&service, "c1", Role::Leader, 0);
        let user = seed(&service, "c1", Role::Normal, 2500);

        service.roles().activate_ex_member(&user.id).unwrap();
        let demoted = service
            .roles()
            .demote_to_normal(&leader.id, &user.id, "abuse of posting")
            .unwrap();

        assert_eq!(demoted.role, Role::Normal);
        assert!(demoted.ex_member_next_payment_due.is_none());
        assert_eq!(demoted.wallet_balance, Money::mru(500));

        let demotion = emitter
            .events()
            .into_iter()
            .find(|n| n.event == EventType::RoleDemoted)
            .unwrap();
        assert_eq!(demotion.payload.get("reason"), Some("abuse of posting"));
        assert_eq!(demotion.payload.get("from"), Some("ex_member"));
    }

    /// Members must be demoted before subscribing
    #[test]
    fn member_cannot_activate_ex_member() {
        let (service, _) = service();
        let member = seed(&service, "c1", Role::Member, 5000);

        let err = service.roles().activate_ex_member(&member.id).unwrap_err();
        assert!(matches!(
            err,
            WalletError::InvalidTransition {
                from: Role::Member,
                to: Role::ExMember,
                ..
            }
        ));
        assert_eq!(service.account(&member.id).unwrap().wallet_balance, Money::mru(5000));
    }

    #[test]
    fn leader_grants_ex_member_at_user_cost() {
        let (service, _) = service();
        let leader = seed(&service, "c1", Role::Leader, 0);
        let user = seed(&service, "c1", Role::Normal, 2000);

        let entry = service.roles().grant_ex_member(&leader.id, &user.id).unwrap();

        assert_eq!(entry.entry_type, EntryType::ExMemberSubscription);
        assert_eq!(entry.amount, -Money::mru(2000));
        let account = service.account(&user.id).unwrap();
        assert_eq!(account.role, Role::ExMember);
        assert!(account.ex_member_next_payment_due.is_some());
        assert_eq!(service.account(&leader.id).unwrap().wallet_balance, Money::ZERO);
    }
}

// DISPUTE WORKFLOW TESTS
#[cfg(test)]
mod dispute_tests {
    use super::*;

    fn reviewed_deposit(service: &WalletService) -> (UserAccount, UserAccount, String) {
        let requester = seed(service, "c1", Role::Normal, 0);
        let member = seed(service, "c1", Role::Member, 1000);
        let deposit = service
            .deposits()
            .submit(&requester.id, Money::mru(100), "proof.jpg")
            .unwrap();
        service
            .deposits()
            .reject(&deposit.id, &member.id, "not received")
            .unwrap();
        (requester, member, deposit.id)
    }

    #[test]
    fn rejected_report_moves_no_money() {
        let (service, emitter) = service();
        let leader = seed(&service, "c1", Role::Leader, 0);
        let (requester, member, deposit_id) = reviewed_deposit(&service);

        let report = service
            .disputes()
            .file_report(&requester.id, &member.id, &deposit_id, "wrong call")
            .unwrap();
        let rejected = service.disputes().reject(&report.id, &leader.id).unwrap();

        assert!(!rejected.penalty_charged);
        assert_eq!(rejected.reviewed_by.as_deref(), Some(leader.id.as_str()));
        assert_eq!(service.account(&member.id).unwrap().wallet_balance, Money::mru(1000));
        assert!(emitter.events_for(&requester.id).contains(&EventType::ReportRejected));

        assert!(matches!(
            service.disputes().approve(&report.id, &leader.id),
            Err(WalletError::AlreadyResolved { .. })
        ));
        assert_eq!(service.account(&member.id).unwrap().wallet_balance, Money::mru(1000));
    }

    #[test]
    fn full_penalty_when_affordable() {
        let (service, _) = service();
        let leader = seed(&service, "c1", Role::Leader, 0);
        let (requester, member, deposit_id) = reviewed_deposit(&service);

        let report = service
            .disputes()
            .file_report(&requester.id, &member.id, &deposit_id, "wrong call")
            .unwrap();
        let approval = service.disputes().approve(&report.id, &leader.id).unwrap();

        assert_eq!(approval.penalty.amount, -Money::mru(500));
        assert_eq!(approval.report.penalty_entry_id.as_deref(), Some(approval.penalty.id.as_str()));
        assert_eq!(service.account(&member.id).unwrap().wallet_balance, Money::mru(500));
        assert!(service.disputes().pending_reports().unwrap().is_empty());
        assert_eq!(service.disputes().reports_against(&member.id).unwrap().len(), 1);
    }

    #[test]
    fn reports_must_target_the_reviewing_member() {
        let (service, _) = service();
        let (requester, member, deposit_id) = reviewed_deposit(&service);
        let bystander = seed(&service, "c1", Role::Member, 3000);
        let normal = seed(&service, "c1", Role::Normal, 0);

        let wrong_member =
            service
                .disputes()
                .file_report(&requester.id, &bystander.id, &deposit_id, "wrong call");
        let not_member = service
            .disputes()
            .file_report(&requester.id, &normal.id, &deposit_id, "wrong call");
        let no_reason = service
            .disputes()
            .file_report(&requester.id, &member.id, &deposit_id, "   ");
        let self_report = service
            .disputes()
            .file_report(&member.id, &member.id, &deposit_id, "oops");

        for result in [wrong_member, not_member, no_reason, self_report] {
            assert!(matches!(result, Err(WalletError::InvalidReport(_))));
        }
    }

    #[test]
    fn members_cannot_resolve_reports() {
        let (service, _) = service();
        let (requester, member, deposit_id) = reviewed_deposit(&service);
        let report = service
            .disputes()
            .file_report(&requester.id, &member.id, &deposit_id, "wrong call")
            .unwrap();

        assert!(matches!(
            service.disputes().approve(&report.id, &member.id),
            Err(WalletError::Unauthorized { .. })
        ));
        assert_eq!(service.disputes().pending_reports().unwrap().len(), 1);
    }
}

// POST PAYMENT TESTS
#[cfg(test)]
mod post_tests {
    use super::*;

    #[test]
    fn free_posts_are_used_first() {
        let (service, _) = service();
        let user = service.register_user("poster", "c1").unwrap();
        service
            .engine()
            .apply_credit(&user.id, Money::mru(60), EntryType::Refund, None)
            .unwrap();

        for expected in [2, 1, 0] {
            let charge = service.posts().charge_post(&user.id, "post_free").unwrap();
            assert_eq!(charge, PostCharge::FreeAllowance { remaining: expected });
        }

        let paid = service.posts().charge_post(&user.id, "post_paid").unwrap();
        assert!(matches!(paid, PostCharge::Paid(ref e) if e.amount == -Money::mru(50)));
        assert_eq!(service.account(&user.id).unwrap().wallet_balance, Money::mru(10));

        let broke = service.posts().charge_post(&user.id, "post_broke");
        assert!(matches!(broke, Err(WalletError::InsufficientBalance { .. })));
    }

    #[test]
    fn refund_happens_once() {
        let (service, _) = service();
        let user = seed(&service, "c1", Role::Normal, 100);

        service.posts().charge_post(&user.id, "post_1").unwrap();
        let refund = service.posts().refund_post(&user.id, "post_1").unwrap();

        assert_eq!(refund.entry_type, EntryType::Refund);
        assert_eq!(refund.amount, Money::mru(50));
        assert_eq!(service.account(&user.id).unwrap().wallet_balance, Money::mru(100));

        assert!(matches!(
            service.posts().refund_post(&user.id, "post_1"),
            Err(WalletError::AlreadyResolved { .. })
        ));
        assert!(matches!(
            service.posts().refund_post(&user.id, "post_never_paid"),
            Err(WalletError::NotFound { .. })
        ));
    }
}
