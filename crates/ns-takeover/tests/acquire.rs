mod common;

use std::time::Duration;

use dns_types::protocol::types::test_util::*;
use ns_takeover::acquire::*;
use ns_takeover::cancel::CancellationToken;
use ns_takeover::provider::{ProviderError, Tag};

use common::*;

fn fast() -> AcquisitionConfig {
    AcquisitionConfig {
        inter_attempt_delay: Duration::ZERO,
        tags: Vec::new(),
    }
}

fn targets(names: &[&str]) -> Vec<String> {
    nameservers(names)
}

async fn run(
    provider: ScriptedProvider,
    config: AcquisitionConfig,
    targets: &[String],
    attempt_limit: usize,
    cancel: &CancellationToken,
) -> (
    AcquisitionLoop<ScriptedProvider>,
    Result<TakeoverResult, AcquisitionError>,
) {
    let acquisition = AcquisitionLoop::new(provider, config);
    let result = acquisition
        .acquire(&domain("www.example.com."), targets, attempt_limit, cancel)
        .await;
    (acquisition, result)
}

#[tokio::test]
async fn exhausts_after_exactly_the_attempt_limit() {
    let (acquisition, result) = run(
        ScriptedProvider::new(non_matching()),
        fast(),
        &targets(&["ns-100.awsdns-12.org"]),
        5,
        &CancellationToken::new(),
    )
    .await;
    let result = result.unwrap();
    let provider = acquisition.provider();

    assert!(!result.success);
    assert!(!result.cancelled);
    assert_eq!(5, result.attempts);
    assert_eq!(None, result.zone_id);
    assert!(result.found_nameservers.is_empty());
    assert_eq!(4, result.unique_nameservers_observed);
    assert_eq!(5, result.frequencies.count("ns-1.awsdns-01.com"));
    assert_eq!(5, provider.creates());
    assert_eq!(5, provider.deletes());
    assert!(provider.live().is_empty());
}

#[tokio::test]
async fn match_on_attempt_k_leaves_the_zone_live() {
    let (acquisition, result) = run(
        ScriptedProvider::new(non_matching())
            .then(Ok(non_matching()))
            .then(Ok(non_matching()))
            .then(Ok(nameservers(&[
                "ns-9.awsdns-09.com",
                "ns-100.awsdns-12.org",
                "ns-10.awsdns-10.net",
                "ns-11.awsdns-11.co.uk",
            ]))),
        fast(),
        &targets(&["ns-100.awsdns-12.org."]),
        10,
        &CancellationToken::new(),
    )
    .await;
    let result = result.unwrap();
    let provider = acquisition.provider();

    assert!(result.success);
    assert_eq!(3, result.attempts);
    assert_eq!(vec!["ns-100.awsdns-12.org"], result.found_nameservers);
    assert_eq!(Some(zone_id(3)), result.zone_id);
    assert_eq!(2, provider.deletes());
    assert!(!provider.events().contains(&Event::Delete(zone_id(3))));
    assert!(provider.live().contains(&zone_id(3)));
    assert!(provider.events().contains(&Event::Comment(
        zone_id(3),
        "Subdomain takeover of www.example.com".to_string()
    )));
}

#[tokio::test]
async fn never_two_zones_live_at_once() {
    let (acquisition, result) = run(
        ScriptedProvider::new(non_matching()),
        fast(),
        &targets(&["ns-100.awsdns-12.org"]),
        20,
        &CancellationToken::new(),
    )
    .await;
    let provider = acquisition.provider();

    assert!(result.is_ok());
    assert_eq!(1, provider.max_live());

    // strictly alternating: create n, delete n, create n+1, ...
    let events = provider.events();
    for (i, pair) in events.chunks(2).enumerate() {
        assert_eq!(
            vec![Event::Create(zone_id(i + 1)), Event::Delete(zone_id(i + 1))],
            pair
        );
    }
}

#[tokio::test]
async fn end_to_end_match_on_fourth_attempt() {
    let (_, result) = run(
        ScriptedProvider::new(Vec::new())
            .then(Ok(nameservers(&["ns-1..", "ns-2..", "ns-3..", "ns-4.."])))
            .then(Ok(nameservers(&["ns-1..", "ns-2..", "ns-3..", "ns-4.."])))
            .then(Ok(nameservers(&["ns-1..", "ns-2..", "ns-3..", "ns-4.."])))
            .then(Ok(nameservers(&[
                "ns-100.example-provider.com",
                "ns-5..",
                "ns-6..",
                "ns-7..",
            ]))),
        fast(),
        &targets(&["ns-100.example-provider.com"]),
        1000,
        &CancellationToken::new(),
    )
    .await;
    let result = result.unwrap();

    assert!(result.success);
    assert_eq!(4, result.attempts);
    assert_eq!(vec!["ns-100.example-provider.com"], result.found_nameservers);
    assert_eq!("www.example.com", result.domain_name);
}

#[tokio::test]
async fn create_failure_is_fatal() {
    let (acquisition, result) = run(
        ScriptedProvider::new(non_matching())
            .then(Ok(non_matching()))
            .then(Err(ProviderError::Rejected("TooManyHostedZones".to_string()))),
        fast(),
        &targets(&["ns-100.awsdns-12.org"]),
        10,
        &CancellationToken::new(),
    )
    .await;
    let provider = acquisition.provider();

    assert_eq!(
        Err(AcquisitionError::Provider {
            error: ProviderError::Rejected("TooManyHostedZones".to_string()),
            leaked_zones: Vec::new(),
        }),
        result
    );
    assert_eq!(1, provider.creates());
    assert!(provider.live().is_empty());
}

#[tokio::test]
async fn create_failure_reports_earlier_leaked_zones() {
    let (acquisition, result) = run(
        ScriptedProvider::new(non_matching())
            .undeletable(&zone_id(1))
            .then(Ok(non_matching()))
            .then(Ok(non_matching()))
            .then(Err(ProviderError::Rejected("TooManyHostedZones".to_string()))),
        fast(),
        &targets(&["ns-100.awsdns-12.org"]),
        10,
        &CancellationToken::new(),
    )
    .await;
    let provider = acquisition.provider();

    assert_eq!(
        Err(AcquisitionError::Provider {
            error: ProviderError::Rejected("TooManyHostedZones".to_string()),
            leaked_zones: vec![zone_id(1)],
        }),
        result
    );
    assert_eq!(2, provider.creates());
    assert_eq!(vec![zone_id(1)], provider.live().into_iter().collect::<Vec<_>>());
}

#[tokio::test]
async fn delete_failure_is_reported_and_the_loop_continues() {
    let (acquisition, result) = run(
        ScriptedProvider::new(non_matching()).undeletable(&zone_id(2)),
        fast(),
        &targets(&["ns-100.awsdns-12.org"]),
        4,
        &CancellationToken::new(),
    )
    .await;
    let result = result.unwrap();

    assert_eq!(4, result.attempts);
    assert_eq!(vec![zone_id(2)], result.leaked_zones);
    assert_eq!(4, acquisition.provider().creates());
}

#[tokio::test]
async fn delete_of_missing_zone_is_success() {
    let (_, result) = run(
        ScriptedProvider::new(non_matching()).missing(&zone_id(1)),
        fast(),
        &targets(&["ns-100.awsdns-12.org"]),
        2,
        &CancellationToken::new(),
    )
    .await;

    assert!(result.unwrap().leaked_zones.is_empty());
}

#[tokio::test]
async fn tags_are_passed_to_every_zone() {
    let tag = Tag {
        key: "purpose".to_string(),
        value: "takeover-test".to_string(),
    };
    let (acquisition, _) = run(
        ScriptedProvider::new(non_matching()),
        AcquisitionConfig {
            inter_attempt_delay: Duration::ZERO,
            tags: vec![tag.clone()],
        },
        &targets(&["ns-100.awsdns-12.org"]),
        3,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(vec![vec![tag.clone()]; 3], acquisition.provider().tags());
}

#[tokio::test]
async fn cancelled_before_start_creates_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (acquisition, result) = run(
        ScriptedProvider::new(non_matching()),
        fast(),
        &targets(&["ns-100.awsdns-12.org"]),
        10,
        &cancel,
    )
    .await;
    let result = result.unwrap();

    assert!(result.cancelled);
    assert!(!result.success);
    assert_eq!(0, result.attempts);
    assert_eq!(0, acquisition.provider().creates());
}

#[tokio::test(start_paused = true)]
async fn cancel_during_delay_cleans_up_and_stops() {
    let cancel = CancellationToken::new();

    let (acquisition, result) = run(
        ScriptedProvider::new(non_matching()).cancel_after(1, cancel.clone()),
        AcquisitionConfig {
            inter_attempt_delay: Duration::from_secs(3600),
            tags: Vec::new(),
        },
        &targets(&["ns-100.awsdns-12.org"]),
        10,
        &cancel,
    )
    .await;
    let result = result.unwrap();
    let provider = acquisition.provider();

    assert!(result.cancelled);
    assert_eq!(1, result.attempts);
    assert_eq!(1, provider.deletes());
    assert!(provider.live().is_empty());
}

#[tokio::test]
async fn cancel_from_another_task_wakes_the_delay() {
    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        })
    };

    let (acquisition, result) = run(
        ScriptedProvider::new(non_matching()),
        AcquisitionConfig {
            inter_attempt_delay: Duration::from_secs(3600),
            tags: Vec::new(),
        },
        &targets(&["ns-100.awsdns-12.org"]),
        1000,
        &cancel,
    )
    .await;
    canceller.await.unwrap();
    let result = result.unwrap();

    assert!(result.cancelled);
    assert_eq!(1, result.attempts);
    assert!(acquisition.provider().live().is_empty());
}

#[tokio::test]
async fn root_level_domain_is_rejected() {
    let acquisition = AcquisitionLoop::new(ScriptedProvider::new(non_matching()), fast());

    let result = acquisition
        .acquire(
            &domain("example."),
            &targets(&["ns-100.awsdns-12.org"]),
            10,
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(result, Err(AcquisitionError::NoParentZone(_))));
    assert_eq!(0, acquisition.provider().creates());
}
