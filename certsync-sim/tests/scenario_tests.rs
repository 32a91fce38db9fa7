use certsync::ClientConfig;
use certsync_sim::{run_scenario, NeuronId, ScenarioConfig, Vote};
use pretty_assertions::assert_eq;

fn config(ticks: u64) -> ScenarioConfig {
    ScenarioConfig {
        client: ClientConfig {
            poll_interval_ms: 1_000,
            ..ClientConfig::default()
        },
        ineligible: vec![NeuronId(3)],
        ticks,
        ..ScenarioConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn session_ends_on_certified_data() {
    let report = run_scenario(config(2)).await.unwrap();

    assert_eq!(report.balance.value, 750);
    assert!(report.balance.certified);
    // Stale replica answer first, then the certified correction.
    assert_eq!(
        report.balance_history[..4],
        [(1000, false), (1000, true), (1000, false), (750, true)]
    );

    assert_eq!(report.vote.failed_ids, vec![NeuronId(3)]);
    assert_eq!(report.neurons.value.voted(), 4);
    assert_eq!(report.neurons.value.get(NeuronId(3)).unwrap().vote, None);
    assert_eq!(
        report.neurons.value.get(NeuronId(5)).unwrap().vote,
        Some(Vote::Yes)
    );
}

#[tokio::test(start_paused = true)]
async fn polling_fetches_each_neuron_once_per_tick() {
    let report = run_scenario(config(2)).await.unwrap();

    assert_eq!(report.neuron_fetches, 10);
    // Per tick: two balance answers and two answers for each of 5 neurons.
    assert_eq!(report.polls_published, 24);
}

#[tokio::test(start_paused = true)]
async fn no_ticks_means_no_polling() {
    let report = run_scenario(config(0)).await.unwrap();

    assert_eq!(report.neuron_fetches, 0);
    assert_eq!(report.polls_published, 0);
    assert_eq!(report.balance_history.len(), 4);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let mut config = config(1);
    config.client.poll_interval_ms = 0;

    let err = run_scenario(config).await.unwrap_err();
    assert!(err.to_string().contains("invalid client configuration"));
}

#[tokio::test]
async fn oversized_tick_count_is_rejected() {
    let err = run_scenario(config(u64::MAX)).await.unwrap_err();
    assert!(err.to_string().contains("ticks exceed the poll window"));
}
