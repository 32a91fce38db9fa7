use certsync::{EntityState, FieldOverride, SequenceToken, StaleWriteGuard};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Accounts {
    balances: BTreeMap<String, u64>,
}

impl Accounts {
    fn with(entries: &[(&str, u64)]) -> Self {
        Self {
            balances: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn balance(&self, id: &str) -> Option<u64> {
        self.balances.get(id).copied()
    }
}

impl FieldOverride<String, u64> for Accounts {
    fn apply_override(&mut self, field: &String, value: &u64) {
        self.balances.insert(field.clone(), *value);
    }
}

type AccountsGuard = StaleWriteGuard<Accounts, String, u64>;

// ── Tickets ──────────────────────────────────────────────────────

#[test]
fn tickets_increase_in_issue_order() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();
    let t3 = guard.issue_ticket();
    assert!(t1 < t2 && t2 < t3);
}

#[test]
fn fresh_guard_has_no_applied_write() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    assert_eq!(guard.snapshot(), EntityState::default());
    assert_eq!(guard.name(), "counter");
}

// ── Issue-order writes ───────────────────────────────────────────

#[test]
fn newer_ticket_survives_reversed_completion() {
    let guard: StaleWriteGuard<&'static str> = StaleWriteGuard::new("proposal");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();

    assert!(guard.try_apply(t2, true, |v| *v = "second"));
    assert!(!guard.try_apply(t1, true, |v| *v = "first"));

    let state = guard.snapshot();
    assert_eq!(state.value, "second");
    assert_eq!(state.applied_sequence, Some(t2));
}

#[test]
fn in_order_writes_all_apply() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();
    assert!(guard.try_apply(t1, false, |v| *v = 1));
    assert!(guard.try_apply(t2, false, |v| *v = 2));
    assert_eq!(guard.value(), 2);
}

#[test]
fn rejected_write_does_not_run_mutation() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();
    guard.try_apply(t2, true, |v| *v = 2);

    let mut ran = false;
    assert!(!guard.try_apply(t1, true, |_| ran = true));
    assert!(!ran);
}

#[test]
fn same_ticket_uncertified_never_replaces_certified() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    let t = guard.issue_ticket();

    assert!(guard.try_apply(t, true, |v| *v = 2));
    assert!(!guard.try_apply(t, false, |v| *v = 1));

    let state = guard.snapshot();
    assert_eq!(state.value, 2);
    assert!(state.certified);
}

#[test]
fn same_ticket_certified_upgrades_query_data() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    let t = guard.issue_ticket();

    assert!(guard.try_apply(t, false, |v| *v = 1));
    assert!(!guard.snapshot().certified);
    assert!(guard.try_apply(t, true, |v| *v = 2));

    let state = guard.snapshot();
    assert_eq!(state.value, 2);
    assert!(state.certified);
}

#[test]
fn newer_uncertified_write_replaces_older_certified() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();

    guard.try_apply(t1, true, |v| *v = 1);
    assert!(guard.try_apply(t2, false, |v| *v = 2));
    assert!(!guard.snapshot().certified);
}

#[test]
fn foreign_token_moves_clock_forward() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    assert!(guard.try_apply(SequenceToken::new(40), true, |v| *v = 40));
    assert!(guard.issue_ticket() > SequenceToken::new(40));
}

// ── Overrides ────────────────────────────────────────────────────

#[test]
fn override_survives_late_full_state_write() {
    let guard = AccountsGuard::new("accounts");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();

    assert!(guard.try_apply(t1, true, |s| *s = Accounts::with(&[("A", 50)])));
    assert!(guard.apply_override(t2, "A".to_string(), 100));
    assert!(guard.try_apply(t1, true, |s| *s = Accounts::with(&[("A", 50)])));

    assert_eq!(guard.value().balance("A"), Some(100));
}

#[test]
fn override_is_reapplied_over_full_list_issued_before_it() {
    let guard = AccountsGuard::new("accounts");
    let list_ticket = guard.issue_ticket();
    let transfer_ticket = guard.issue_ticket();

    guard.apply_override(transfer_ticket, "A".to_string(), 75);
    assert!(guard.try_apply(list_ticket, true, |s| {
        *s = Accounts::with(&[("A", 10), ("B", 20)])
    }));

    let accounts = guard.value();
    assert_eq!(accounts.balance("A"), Some(75));
    assert_eq!(accounts.balance("B"), Some(20));
    assert_eq!(guard.pending_overrides().len(), 1);
}

#[test]
fn newer_full_state_write_supersedes_override() {
    let guard = AccountsGuard::new("accounts");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();

    guard.apply_override(t1, "A".to_string(), 75);
    assert!(guard.try_apply(t2, true, |s| *s = Accounts::with(&[("A", 80)])));

    assert_eq!(guard.value().balance("A"), Some(80));
    assert!(guard.pending_overrides().is_empty());
}

#[test]
fn override_older_than_state_is_rejected() {
    let guard = AccountsGuard::new("accounts");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();

    guard.try_apply(t2, true, |s| *s = Accounts::with(&[("A", 5)]));
    assert!(!guard.apply_override(t1, "A".to_string(), 1));
    assert_eq!(guard.value().balance("A"), Some(5));
}

#[test]
fn older_override_for_same_field_is_rejected() {
    let guard = AccountsGuard::new("accounts");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();

    assert!(guard.apply_override(t2, "A".to_string(), 2));
    assert!(!guard.apply_override(t1, "A".to_string(), 1));
    assert!(guard.apply_override(t1, "B".to_string(), 1));

    let pending = guard.pending_overrides();
    assert_eq!(pending.len(), 2);
    assert_eq!(guard.value().balance("A"), Some(2));
}

#[test]
fn override_does_not_touch_applied_sequence() {
    let guard = AccountsGuard::new("accounts");
    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();

    guard.try_apply(t1, true, |s| *s = Accounts::with(&[("A", 1)]));
    guard.apply_override(t2, "A".to_string(), 2);

    let state = guard.snapshot();
    assert_eq!(state.applied_sequence, Some(t1));
    assert!(state.certified);
}

// ── Mutations, revert and reset ──────────────────────────────────

#[test]
fn cancel_without_certified_data_resets_to_default() {
    let guard: Arc<StaleWriteGuard<u64>> = Arc::new(StaleWriteGuard::new("neurons"));
    let mutation = guard.begin_mutation();

    assert!(mutation.set(5, false));
    assert!(mutation.cancel());

    let state = guard.snapshot();
    assert_eq!(state.value, 0);
    assert!(!state.certified);
}

#[test]
fn cancel_restores_last_certified_value() {
    let guard: Arc<StaleWriteGuard<u64>> = Arc::new(StaleWriteGuard::new("neurons"));
    let first = guard.begin_mutation();
    first.set(10, true);

    let second = guard.begin_mutation();
    second.update(false, |v| *v += 10);
    assert_eq!(guard.value(), 20);

    assert!(second.cancel());
    let state = guard.snapshot();
    assert_eq!(state.value, 10);
    assert!(state.certified);
}

#[test]
fn cancel_is_noop_once_newer_data_landed() {
    let guard: Arc<StaleWriteGuard<u64>> = Arc::new(StaleWriteGuard::new("neurons"));
    let older = guard.begin_mutation();
    let newer = guard.begin_mutation();

    older.set(1, false);
    newer.set(2, false);

    assert!(!older.cancel());
    assert_eq!(guard.value(), 2);
}

#[test]
fn cancel_is_noop_for_certified_data() {
    let guard: Arc<StaleWriteGuard<u64>> = Arc::new(StaleWriteGuard::new("neurons"));
    let mutation = guard.begin_mutation();
    mutation.set(3, true);
    let token = mutation.token();

    assert!(!mutation.cancel());
    assert!(!guard.revert_unproven(token));
    assert_eq!(guard.value(), 3);
}

#[test]
fn reset_makes_in_flight_tickets_stale() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("session");
    let before = guard.issue_ticket();
    guard.try_apply(before, true, |v| *v = 7);

    let in_flight = guard.issue_ticket();
    guard.reset();

    assert_eq!(guard.value(), 0);
    assert!(!guard.try_apply(in_flight, true, |v| *v = 9));

    let after = guard.issue_ticket();
    assert!(guard.try_apply(after, false, |v| *v = 11));
    assert_eq!(guard.value(), 11);
}

#[test]
fn reset_clears_overrides() {
    let guard = AccountsGuard::new("accounts");
    let t = guard.issue_ticket();
    guard.apply_override(t, "A".to_string(), 3);
    guard.reset();

    assert!(guard.pending_overrides().is_empty());
    assert_eq!(guard.value(), Accounts::default());
}

// ── Publishing ───────────────────────────────────────────────────

#[test]
fn subscribers_see_every_applied_write() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    guard.subscribe(move |state| sink.lock().unwrap().push((state.value, state.certified)));

    let t1 = guard.issue_ticket();
    let t2 = guard.issue_ticket();
    guard.try_apply(t2, false, |v| *v = 2);
    guard.try_apply(t1, true, |v| *v = 1);
    guard.try_apply(t2, true, |v| *v = 3);

    assert_eq!(*seen.lock().unwrap(), vec![(2, false), (3, true)]);
}

#[test]
fn unsubscribed_callbacks_are_not_called() {
    let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("counter");
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    let id = guard.subscribe(move |_| *counter.lock().unwrap() += 1);

    let t1 = guard.issue_ticket();
    guard.try_apply(t1, true, |v| *v = 1);
    assert!(guard.unsubscribe(id));
    assert!(!guard.unsubscribe(id));

    let t2 = guard.issue_ticket();
    guard.try_apply(t2, true, |v| *v = 2);
    assert_eq!(*calls.lock().unwrap(), 1);
}

fn completion_orders() -> impl Strategy<Value = Vec<u64>> {
    (1u64..24).prop_flat_map(|n| Just((1..=n).collect::<Vec<_>>()).prop_shuffle())
}

proptest! {
    /// Whatever order responses complete in, the last-issued write wins
    /// and published sequences never go backwards.
    #[test]
    fn latest_issued_write_wins(order in completion_orders()) {
        let guard: StaleWriteGuard<u64> = StaleWriteGuard::new("prop");
        let n = order.len() as u64;
        for _ in 0..n {
            guard.issue_ticket();
        }

        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);
        guard.subscribe(move |state| sink.lock().unwrap().push(state.applied_sequence));

        for raw in &order {
            let token = SequenceToken::new(*raw);
            guard.try_apply(token, true, |v| *v = *raw);
        }

        prop_assert_eq!(guard.value(), n);
        prop_assert_eq!(guard.snapshot().applied_sequence, Some(SequenceToken::new(n)));
        let published = published.lock().unwrap();
        prop_assert!(published.windows(2).all(|w| w[0] < w[1]));
    }
}
