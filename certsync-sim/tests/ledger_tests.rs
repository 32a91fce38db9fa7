use certsync::remote::mock::MockWrite;
use certsync::{
    BatchOrchestrator, FetchRequest, FieldOverride, Identity, PrincipalId, RemoteRead,
    RemoteWrite,
};
use certsync_sim::{LatencyProfile, Neuron, NeuronId, NeuronList, SimLedger, Vote};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn ledger(ineligible: &[u64]) -> Arc<SimLedger> {
    SimLedger::new(
        LatencyProfile {
            query: Duration::from_millis(5),
            update: Duration::from_millis(50),
            jitter: Duration::ZERO,
        },
        ineligible.iter().copied().map(NeuronId),
        1,
    )
}

fn user() -> (PrincipalId, Identity) {
    let principal = PrincipalId::new();
    (principal, Identity::authenticated(principal))
}

// ── Reads ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn query_lags_until_replica_syncs() {
    let ledger = ledger(&[]);
    let (principal, identity) = user();
    let other = PrincipalId::new();
    ledger.open_account(principal, 100);
    assert_ok!(ledger.transfer(principal, other, 40));

    let read = ledger.balance_read(principal);
    assert_eq!(assert_ok!(read.fetch(FetchRequest::query(identity)).await), 100);
    assert_eq!(assert_ok!(read.fetch(FetchRequest::update(identity)).await), 60);

    ledger.sync_replica();
    assert_eq!(assert_ok!(read.fetch(FetchRequest::query(identity)).await), 60);
    assert_eq!(ledger.certified_balance(other), 40);
}

#[tokio::test(start_paused = true)]
async fn anonymous_callers_only_get_queries() {
    let ledger = ledger(&[]);
    let (principal, _) = user();
    ledger.open_account(principal, 10);
    let read = ledger.balance_read(principal);

    assert_ok!(read.fetch(FetchRequest::query(Identity::Anonymous)).await);
    let err = assert_err!(read.fetch(FetchRequest::update(Identity::Anonymous)).await);
    assert!(err.message.contains("signed-in"));
}

#[tokio::test(start_paused = true)]
async fn unknown_account_and_neuron_fail() {
    let ledger = ledger(&[]);
    let (principal, identity) = user();

    assert_err!(
        ledger
            .balance_read(principal)
            .fetch(FetchRequest::update(identity))
            .await
    );
    assert_err!(
        ledger
            .neuron_read(NeuronId(9))
            .fetch(FetchRequest::query(identity))
            .await
    );
}

#[test]
fn transfer_rejects_overdraft() {
    let ledger = ledger(&[]);
    let (principal, _) = user();
    ledger.open_account(principal, 10);

    let err = assert_err!(ledger.transfer(principal, PrincipalId::new(), 11));
    assert_eq!(err.message, "insufficient funds: 10 < 11");
    assert_eq!(ledger.certified_balance(principal), 10);
}

#[tokio::test(start_paused = true)]
async fn neuron_list_is_ordered_by_id() {
    let ledger = ledger(&[]);
    let (_, identity) = user();
    ledger.add_neuron(NeuronId(3), 300);
    ledger.add_neuron(NeuronId(1), 100);

    let list = assert_ok!(ledger.neurons_read().fetch(FetchRequest::query(identity)).await);
    assert_eq!(list.ids(), vec![NeuronId(1), NeuronId(3)]);
}

// ── Votes ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn vote_is_certified_before_replica() {
    let ledger = ledger(&[]);
    let (_, identity) = user();
    ledger.add_neuron(NeuronId(1), 100);

    assert_ok!(ledger.vote_write(Vote::No).mutate(identity, NeuronId(1)).await);

    let read = ledger.neuron_read(NeuronId(1));
    assert_eq!(assert_ok!(read.fetch(FetchRequest::query(identity)).await).vote, None);
    assert_eq!(
        assert_ok!(read.fetch(FetchRequest::update(identity)).await).vote,
        Some(Vote::No)
    );
}

#[tokio::test(start_paused = true)]
async fn vote_rejections() {
    let ledger = ledger(&[2]);
    let (_, identity) = user();
    ledger.add_neuron(NeuronId(1), 100);
    ledger.add_neuron(NeuronId(2), 200);
    let write = ledger.vote_write(Vote::Yes);

    let err = assert_err!(write.mutate(identity, NeuronId(2)).await);
    assert_eq!(err.message, "neuron #2 is not eligible to vote");

    assert_err!(write.mutate(Identity::Anonymous, NeuronId(1)).await);
    assert_ok!(write.mutate(identity, NeuronId(1)).await);
    let err = assert_err!(write.mutate(identity, NeuronId(1)).await);
    assert_eq!(err.message, "neuron #1 already voted");
}

#[tokio::test(start_paused = true)]
async fn batch_vote_reports_ineligible_neurons() {
    let ledger = ledger(&[3]);
    let (_, identity) = user();
    for n in 1..=4 {
        ledger.add_neuron(NeuronId(n), n * 100);
    }

    let outcome = BatchOrchestrator::new("vote")
        .run_writes(
            (1..=4).map(NeuronId).collect(),
            identity,
            Arc::new(ledger.vote_write(Vote::Yes)) as Arc<dyn RemoteWrite<NeuronId>>,
            &mut (),
        )
        .await
        .unwrap();

    assert_eq!(outcome.succeeded_ids, vec![NeuronId(1), NeuronId(2), NeuronId(4)]);
    assert_eq!(
        outcome.failure.unwrap().summary(),
        "1 of 4 failed (#3): transport error: neuron #3 is not eligible to vote"
    );
}

#[tokio::test(start_paused = true)]
async fn mock_write_stands_in_for_ledger() {
    let remote = MockWrite::new([NeuronId(2)]);
    let (_, identity) = user();

    let outcome = BatchOrchestrator::default()
        .run_writes(
            vec![NeuronId(1), NeuronId(2)],
            identity,
            Arc::clone(&remote) as Arc<dyn RemoteWrite<NeuronId>>,
            &mut (),
        )
        .await
        .unwrap();

    assert_eq!(outcome.failed_ids, vec![NeuronId(2)]);
    assert_eq!(remote.applied(), vec![(identity, NeuronId(1))]);
}

// ── Model ────────────────────────────────────────────────────────

#[test]
fn vote_override_touches_one_neuron() {
    let mut list = NeuronList(vec![
        Neuron {
            id: NeuronId(1),
            stake: 100,
            vote: None,
        },
        Neuron {
            id: NeuronId(2),
            stake: 200,
            vote: None,
        },
    ]);

    list.apply_override(&NeuronId(2), &Some(Vote::Yes));
    list.apply_override(&NeuronId(7), &Some(Vote::No));

    assert_eq!(list.get(NeuronId(1)).unwrap().vote, None);
    assert_eq!(list.get(NeuronId(2)).unwrap().vote, Some(Vote::Yes));
    assert_eq!(list.voted(), 1);
}

#[test]
fn neuron_serializes_with_plain_id() {
    let neuron = Neuron {
        id: NeuronId(4),
        stake: 10,
        vote: Some(Vote::No),
    };
    let json = serde_json::to_string(&neuron).unwrap();
    assert_eq!(json, r#"{"id":4,"stake":10,"vote":"no"}"#);
}
