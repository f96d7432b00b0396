//! End-to-end engine behavior against mock providers

mod common;

use common::{builder, engine, fingerprint, heuristics, ranked, ConcurrencyProbe, MockBehavior, MockProvider};
use std::sync::Arc;
use std::time::Duration;
use threatlens_core::{Error, ProviderError, ProviderVerdict, RiskLevel, SourceStatus, LOCAL_HEURISTICS};
use threatlens_engine::{BreakerConfig, BreakerState, CacheInvalidation, ProviderOptions, RateLimit};
use tokio_util::sync::CancellationToken;

const HOUR: Duration = Duration::from_secs(3600);

fn breaker(threshold: u32, cooldown_secs: u64) -> BreakerConfig {
    BreakerConfig {
        failure_threshold: threshold,
        cooldown: Duration::from_secs(cooldown_secs),
    }
}

#[tokio::test]
async fn test_highest_priority_positive_decides() {
    let a = Arc::new(MockProvider::threat("a", RiskLevel::High, 0.9, "Emotet"));
    let b = Arc::new(MockProvider::threat("b", RiskLevel::Critical, 0.95, "Ryuk"));
    let engine = engine(&[(&b, ranked(2)), (&a, ranked(1))]);

    let verdict = engine
        .assess(&fingerprint('a'), &CancellationToken::new())
        .await
        .unwrap();

    assert!(verdict.is_threat);
    assert_eq!(verdict.risk_level, RiskLevel::High);
    assert_eq!(verdict.confidence, 0.9);
    assert_eq!(verdict.threat_name.as_deref(), Some("Emotet"));
    assert_eq!(verdict.source, "a");
    assert_eq!(verdict.contributing_sources(), vec!["a", "b"]);
    assert!(verdict.live_consulted);
    assert!(!verdict.heuristic_only);
    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cached_provider_not_called_within_ttl() {
    let a = Arc::new(MockProvider::threat("a", RiskLevel::High, 0.9, "Emotet"));
    let b = Arc::new(MockProvider::clean("b", 0.6));
    let engine = engine(&[
        (&a, ranked(1).with_cache_ttl(24 * HOUR)),
        (&b, ranked(2).with_cache_ttl(Duration::ZERO)),
    ]);
    let fp = fingerprint('b');
    let cancel = CancellationToken::new();

    engine.assess(&fp, &cancel).await.unwrap();
    tokio::time::advance(HOUR).await;
    let verdict = engine.assess(&fp, &cancel).await.unwrap();

    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 2);
    assert_eq!(verdict.outcome("a"), Some(&SourceStatus::Cached));
    assert_eq!(verdict.outcome("b"), Some(&SourceStatus::Fresh));
    assert!(verdict.contributors[0].from_cache);
    assert_eq!(verdict.threat_name.as_deref(), Some("Emotet"));
    assert_eq!(engine.metrics().cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn test_expired_cache_entry_is_requeried() {
    let a = Arc::new(MockProvider::clean("a", 0.8));
    let engine = engine(&[(&a, ranked(1).with_cache_ttl(24 * HOUR))]);
    let fp = fingerprint('c');
    let cancel = CancellationToken::new();

    engine.assess(&fp, &cancel).await.unwrap();
    tokio::time::advance(24 * HOUR).await;
    let verdict = engine.assess(&fp, &cancel).await.unwrap();

    assert_eq!(a.call_count(), 2);
    assert_eq!(verdict.outcome("a"), Some(&SourceStatus::Fresh));
}

#[tokio::test]
async fn test_failing_provider_opens_breaker() {
    let a = Arc::new(MockProvider::clean("a", 0.8));
    let c = Arc::new(MockProvider::failing("c"));
    let engine = engine(&[
        (&a, ranked(1).with_cache_ttl(Duration::ZERO)),
        (&c, ranked(3).with_breaker(breaker(5, 300))),
    ]);
    let cancel = CancellationToken::new();

    for seed in ['1', '2', '3', '4', '5'] {
        let verdict = engine.assess(&fingerprint(seed), &cancel).await.unwrap();
        assert!(matches!(verdict.outcome("c"), Some(SourceStatus::Failed(_))));
        assert!(!verdict.is_threat);
    }

    let sixth = engine.assess(&fingerprint('6'), &cancel).await.unwrap();
    assert_eq!(c.call_count(), 5);
    assert_eq!(
        sixth.outcome("c"),
        Some(&SourceStatus::Skipped(ProviderError::CircuitOpen))
    );

    let health = engine.health_status();
    let c_health = health.iter().find(|h| h.provider == "c").unwrap();
    assert_eq!(c_health.breaker, BreakerState::Open);
    assert_eq!(c_health.consecutive_failures, 5);
    assert!(c_health.retry_in.is_some());
    assert_eq!(
        c_health.last_error.as_ref().map(|e| &e.error),
        Some(&ProviderError::unavailable("simulated provider failure"))
    );
    let a_health = health.iter().find(|h| h.provider == "a").unwrap();
    assert_eq!(a_health.breaker, BreakerState::Closed);
    assert!(a_health.last_error.is_none());

    let json = serde_json::to_value(&health).unwrap();
    let c_json = json
        .as_array()
        .unwrap()
        .iter()
        .find(|h| h["provider"] == "c")
        .unwrap();
    assert_eq!(c_json["breaker"], "open");
    assert_eq!(c_json["consecutive_failures"], 5);
    assert_eq!(c_json["priority"], 3);
    assert!(c_json["rate"]["remaining_per_minute"].is_u64());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_trial_closes_or_reopens() {
    let c = Arc::new(MockProvider::failing("c"));
    let engine = engine(&[(&c, ranked(1).with_breaker(breaker(2, 60)).with_cache_ttl(Duration::ZERO))]);
    let cancel = CancellationToken::new();
    let fp = fingerprint('d');

    engine.assess(&fp, &cancel).await.unwrap();
    engine.assess(&fp, &cancel).await.unwrap();
    let skipped = engine.assess(&fp, &cancel).await.unwrap();
    assert!(skipped.heuristic_only);
    assert_eq!(c.call_count(), 2);

    // Failed trial restarts the cooldown
    tokio::time::advance(Duration::from_secs(60)).await;
    engine.assess(&fp, &cancel).await.unwrap();
    assert_eq!(c.call_count(), 3);
    assert_eq!(engine.health_status()[0].breaker, BreakerState::Open);

    tokio::time::advance(Duration::from_secs(30)).await;
    engine.assess(&fp, &cancel).await.unwrap();
    assert_eq!(c.call_count(), 3);

    // Successful trial closes and resets
    tokio::time::advance(Duration::from_secs(30)).await;
    c.set_behavior(MockBehavior::Answer(ProviderVerdict::clean("c", 0.7)));
    let recovered = engine.assess(&fp, &cancel).await.unwrap();
    assert_eq!(c.call_count(), 4);
    assert_eq!(recovered.outcome("c"), Some(&SourceStatus::Fresh));

    let health = &engine.health_status()[0];
    assert_eq!(health.breaker, BreakerState::Closed);
    assert_eq!(health.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_skips_provider() {
    let a = Arc::new(MockProvider::clean("a", 0.8));
    let engine = engine(&[(&a, ranked(1).with_rate_limit(RateLimit::new(2, 100)))]);
    let cancel = CancellationToken::new();

    engine.assess(&fingerprint('1'), &cancel).await.unwrap();
    engine.assess(&fingerprint('2'), &cancel).await.unwrap();
    let third = engine.assess(&fingerprint('3'), &cancel).await.unwrap();

    assert_eq!(a.call_count(), 2);
    assert_eq!(
        third.outcome("a"),
        Some(&SourceStatus::Skipped(ProviderError::RateLimitExceeded))
    );
    assert!(third.heuristic_only);

    let rate = engine.health_status()[0].rate.unwrap();
    assert_eq!(rate.remaining_per_minute, 0);
    assert_eq!(rate.remaining_per_day, 98);

    tokio::time::advance(Duration::from_secs(60)).await;
    let fourth = engine.assess(&fingerprint('4'), &cancel).await.unwrap();
    assert_eq!(fourth.outcome("a"), Some(&SourceStatus::Fresh));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assessments_never_over_admit() {
    let a = Arc::new(MockProvider::clean("a", 0.8).with_latency(Duration::from_millis(5)));
    let engine = engine(&[(&a, ranked(1).with_rate_limit(RateLimit::new(5, 1000)))]);

    let seeds: Vec<char> = "0123456789abcdef".chars().collect();
    let handles: Vec<_> = seeds
        .into_iter()
        .map(|seed| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .assess(&fingerprint(seed), &CancellationToken::new())
                    .await
            })
        })
        .collect();

    let mut fresh = 0;
    for handle in handles {
        let verdict = handle.await.unwrap().unwrap();
        if verdict.live_consulted {
            fresh += 1;
        }
    }

    assert_eq!(a.call_count(), 5);
    assert_eq!(fresh, 5);
}

#[tokio::test]
async fn test_everything_unavailable_falls_back_to_heuristics() {
    let failing = Arc::new(MockProvider::failing("failing"));
    let disabled = Arc::new(MockProvider::threat("disabled", RiskLevel::High, 0.9, "X"));
    let keyless = Arc::new(MockProvider::clean("keyless", 0.8).unconfigured());
    let engine = engine(&[
        (&failing, ranked(1)),
        (&disabled, ranked(2).disabled()),
        (&keyless, ranked(3)),
    ]);

    let verdict = engine
        .assess(&fingerprint('e'), &CancellationToken::new())
        .await
        .unwrap();

    assert!(verdict.heuristic_only);
    assert!(!verdict.live_consulted);
    assert_eq!(verdict.source, LOCAL_HEURISTICS);
    assert!(!verdict.is_threat);
    assert_eq!(verdict.outcome("disabled"), Some(&SourceStatus::Disabled));
    assert!(matches!(
        verdict.outcome("keyless"),
        Some(SourceStatus::Skipped(ProviderError::ConfigurationMissing(_)))
    ));
    assert!(matches!(verdict.outcome("failing"), Some(SourceStatus::Failed(_))));
    assert_eq!(disabled.call_count(), 0);
    assert_eq!(keyless.call_count(), 0);
    assert_eq!(engine.metrics().heuristic_fallbacks, 1);
}

#[tokio::test]
async fn test_no_answer_and_no_heuristic_is_error() {
    let failing = Arc::new(MockProvider::failing("failing"));
    let engine = builder(&[(&failing, ranked(1))]).build().unwrap();

    let result = engine
        .assess(&fingerprint('f'), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(Error::NoVerdictSource)));
}

#[tokio::test]
async fn test_builder_rejects_empty_and_duplicate() {
    assert!(matches!(builder(&[]).build(), Err(Error::Config(_))));
    assert!(builder(&[]).with_heuristics(heuristics()).build().is_ok());

    let one = Arc::new(MockProvider::new("same"));
    let two = Arc::new(MockProvider::new("same"));
    let result = builder(&[(&one, ranked(1)), (&two, ranked(2))])
        .with_heuristics(heuristics())
        .build();
    assert!(matches!(result, Err(Error::Config(msg)) if msg.contains("same")));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_counts_as_failure() {
    let slow = Arc::new(MockProvider::new("slow").with_behavior(MockBehavior::Hang));
    let fast = Arc::new(MockProvider::clean("fast", 0.5));
    let engine = builder(&[
        (&slow, ranked(1).with_breaker(breaker(1, 60))),
        (&fast, ranked(2)),
    ])
    .with_heuristics(heuristics())
    .call_timeout(Duration::from_secs(2))
    .build()
    .unwrap();

    let verdict = engine
        .assess(&fingerprint('1'), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        verdict.outcome("slow"),
        Some(&SourceStatus::Failed(ProviderError::Timeout))
    );
    assert_eq!(verdict.source, "fast");
    assert_eq!(verdict.confidence, 0.5);
    assert_eq!(engine.health_status()[0].breaker, BreakerState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_failure_does_not_cancel_siblings() {
    let broken = Arc::new(MockProvider::failing("broken"));
    let slow = Arc::new(
        MockProvider::threat("slow", RiskLevel::Medium, 0.6, "Qakbot")
            .with_latency(Duration::from_millis(500)),
    );
    let engine = engine(&[(&broken, ranked(1)), (&slow, ranked(2))]);

    let verdict = engine
        .assess(&fingerprint('2'), &CancellationToken::new())
        .await
        .unwrap();

    assert!(verdict.is_threat);
    assert_eq!(verdict.source, "slow");
    assert_eq!(verdict.threat_name.as_deref(), Some("Qakbot"));
    assert_eq!(verdict.missing_sources(), vec!["broken"]);
}

#[tokio::test(start_paused = true)]
async fn test_arrival_order_does_not_change_verdict() {
    let cancel = CancellationToken::new();
    let mut verdicts = Vec::new();

    for (a_latency, b_latency) in [(10, 900), (900, 10)] {
        let a = Arc::new(
            MockProvider::threat("a", RiskLevel::High, 0.7, "Emotet")
                .with_latency(Duration::from_millis(a_latency)),
        );
        let b = Arc::new(
            MockProvider::threat("b", RiskLevel::High, 0.85, "Heodo")
                .with_latency(Duration::from_millis(b_latency)),
        );
        let engine = engine(&[(&a, ranked(1)), (&b, ranked(2))]);
        verdicts.push(engine.assess(&fingerprint('3'), &cancel).await.unwrap());
    }

    let (first, second) = (&verdicts[0], &verdicts[1]);
    assert_eq!(first.source, second.source);
    assert_eq!(first.threat_name, second.threat_name);
    assert_eq!(first.confidence, 0.85);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.contributing_sources(), second.contributing_sources());
    assert_eq!(first.outcomes, second.outcomes);
}

#[tokio::test(start_paused = true)]
async fn test_global_concurrency_limit() {
    let probe = Arc::new(ConcurrencyProbe::default());
    let mocks: Vec<Arc<MockProvider>> = ["p1", "p2", "p3", "p4", "p5"]
        .iter()
        .map(|name| {
            Arc::new(
                MockProvider::clean(name, 0.5)
                    .with_latency(Duration::from_millis(100))
                    .with_probe(Arc::clone(&probe)),
            )
        })
        .collect();
    let entries: Vec<_> = mocks.iter().map(|m| (m, ProviderOptions::default())).collect();
    let engine = builder(&entries)
        .with_heuristics(heuristics())
        .max_concurrent_calls(2)
        .build()
        .unwrap();

    let verdict = engine
        .assess(&fingerprint('4'), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(verdict.contributors.len(), 5);
    assert_eq!(probe.peak(), 2);
    // Unranked providers order by id
    assert_eq!(verdict.contributing_sources(), vec!["p1", "p2", "p3", "p4", "p5"]);
    assert_eq!(verdict.source, "p1");
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_returns_cancelled() {
    let slow = Arc::new(MockProvider::clean("slow", 0.8).with_latency(Duration::from_secs(10)));
    let engine = engine(&[(&slow, ranked(1))]);
    let fp = fingerprint('5');
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    };
    let (result, _) = tokio::join!(engine.assess(&fp, &cancel), canceller);

    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(slow.call_count(), 1);
    assert_eq!(engine.cache_len(), 0);
    assert_eq!(engine.metrics().cancellations, 1);
    assert_eq!(engine.metrics().assessments, 0);

    // Already-cancelled token: nothing is dispatched
    let result = engine.assess(&fp, &cancel).await;
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(slow.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_call_dropped_while_queued_keeps_quota() {
    let a = Arc::new(MockProvider::clean("a", 0.8).with_latency(Duration::from_secs(10)));
    let b = Arc::new(MockProvider::clean("b", 0.7));
    let engine = builder(&[
        (&a, ranked(1)),
        (&b, ranked(2).with_rate_limit(RateLimit::new(1, 100))),
    ])
    .with_heuristics(heuristics())
    .max_concurrent_calls(1)
    .build()
    .unwrap();
    let fp = fingerprint('7');

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    };
    let (result, _) = tokio::join!(engine.assess(&fp, &cancel), canceller);
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(a.call_count(), 1);
    assert_eq!(b.call_count(), 0);

    let remaining = |engine: &threatlens_engine::IntelEngine| {
        engine
            .health_status()
            .into_iter()
            .find(|h| h.provider == "b")
            .and_then(|h| h.rate)
            .map(|r| r.remaining_per_minute)
    };
    assert_eq!(remaining(&engine), Some(1));

    let verdict = engine.assess(&fp, &CancellationToken::new()).await.unwrap();
    assert_eq!(b.call_count(), 1);
    assert_eq!(verdict.outcome("b"), Some(&SourceStatus::Fresh));
    assert_eq!(remaining(&engine), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_trial_is_handed_back() {
    let c = Arc::new(MockProvider::failing("c"));
    let engine = engine(&[(&c, ranked(1).with_breaker(breaker(1, 10)))]);
    let fp = fingerprint('6');

    engine.assess(&fp, &CancellationToken::new()).await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;

    c.set_behavior(MockBehavior::Hang);
    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        }
    };
    let (result, _) = tokio::join!(engine.assess(&fp, &cancel), canceller);
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(c.call_count(), 2);

    c.set_behavior(MockBehavior::Answer(ProviderVerdict::clean("c", 0.9)));
    let verdict = engine.assess(&fp, &CancellationToken::new()).await.unwrap();
    assert_eq!(c.call_count(), 3);
    assert_eq!(verdict.outcome("c"), Some(&SourceStatus::Fresh));
    assert_eq!(engine.health_status()[0].breaker, BreakerState::Closed);
}

#[tokio::test]
async fn test_invalidate_cache_scopes() {
    let a = Arc::new(MockProvider::clean("a", 0.8));
    let b = Arc::new(MockProvider::clean("b", 0.7));
    let engine = engine(&[(&a, ranked(1)), (&b, ranked(2))]);
    let cancel = CancellationToken::new();
    let (x, y) = (fingerprint('7'), fingerprint('8'));

    engine.assess(&x, &cancel).await.unwrap();
    engine.assess(&y, &cancel).await.unwrap();
    assert_eq!(engine.cache_len(), 4);

    assert_eq!(engine.invalidate_cache(CacheInvalidation::Fingerprint(x.clone())), 2);
    engine.assess(&x, &cancel).await.unwrap();
    engine.assess(&y, &cancel).await.unwrap();
    assert_eq!(a.call_count(), 3);

    assert_eq!(engine.invalidate_cache(CacheInvalidation::All), 4);
    assert_eq!(engine.cache_len(), 0);
}

#[tokio::test]
async fn test_poll_health_records_probe() {
    let up = Arc::new(MockProvider::new("up"));
    let down = Arc::new(MockProvider::new("down"));
    let off = Arc::new(MockProvider::new("off"));
    down.set_healthy(false);
    let engine = engine(&[(&up, ranked(1)), (&down, ranked(2)), (&off, ranked(3).disabled())]);

    let mut probes = engine.poll_health().await;
    probes.sort();
    assert_eq!(
        probes,
        vec![("down".to_string(), false), ("up".to_string(), true)]
    );

    let health = engine.health_status();
    assert_eq!(engine.provider_ids(), vec!["up", "down", "off"]);
    assert!(health[0].last_health_check.unwrap().healthy);
    assert!(!health[1].last_health_check.unwrap().healthy);
    assert!(health[2].last_health_check.is_none());
    assert!(!health[2].enabled);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweeper_reclaims_expired_entries() {
    let a = Arc::new(MockProvider::clean("a", 0.8));
    let engine = builder(&[(&a, ranked(1).with_cache_ttl(Duration::from_secs(30)))])
        .with_heuristics(heuristics())
        .sweep_interval(Duration::from_secs(60))
        .build()
        .unwrap();

    engine
        .assess(&fingerprint('9'), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(engine.cache_len(), 1);

    let shutdown = CancellationToken::new();
    let tasks = engine.spawn_background_tasks(shutdown.clone());
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(engine.cache_len(), 0);

    shutdown.cancel();
    tasks.join().await;
}
