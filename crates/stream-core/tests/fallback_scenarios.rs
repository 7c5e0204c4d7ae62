mod common;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use common::{down, ok, SequenceProber, A, B};
use stream_core::config::{Config, BACKUP_STREAM_URL_ENV, STREAM_URL_ENV};
use stream_core::fallback::FallbackManager;
use stream_core::health::HealthStatus;
use stream_core::monitor::{HealthMonitor, MonitorConfig};
use stream_core::events::EventBus;
use stream_core::selector::SelectorOptions;
use stream_core::sources::{CandidateSource, SourceConfig, DEFAULT_STREAM_URLS, EMERGENCY_PRIORITY};
use stream_core::store::{FileSettingsStore, MemorySettingsStore, SettingsStore, StreamUrlUpdate};

fn env_sources(vars: &[(&str, &str)]) -> SourceConfig {
    let env: HashMap<&str, &str> = vars.iter().copied().collect();
    let mut config = Config::default();
    config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));
    config.sources
}

fn uncached() -> SelectorOptions {
    SelectorOptions {
        enable_caching: false,
        ..SelectorOptions::default()
    }
}

#[tokio::test]
async fn backup_wins_when_primary_is_down() {
    let sources = env_sources(&[(STREAM_URL_ENV, A), (BACKUP_STREAM_URL_ENV, B)]);
    let prober = Arc::new(SequenceProber::new());
    prober.script(A, vec![down(503)]);
    prober.script(B, vec![ok(120)]);
    let mgr = FallbackManager::new(sources, uncached(), Arc::new(MemorySettingsStore::new()), prober);

    let candidates = mgr.get_fallback_urls().await;
    let summary: Vec<(&str, u32)> = candidates.iter().map(|c| (c.url.as_str(), c.priority)).collect();
    assert_eq!(
        summary,
        vec![
            (A, 1),
            (B, 2),
            (DEFAULT_STREAM_URLS[0], 100),
            (DEFAULT_STREAM_URLS[1], 101),
        ]
    );

    assert_eq!(mgr.get_fallback_url(None).await.as_deref(), Some(B));
}

#[tokio::test]
async fn everything_down_still_yields_a_url_and_critical_health() {
    let sources = env_sources(&[(STREAM_URL_ENV, A), (BACKUP_STREAM_URL_ENV, B)]);
    let prober = Arc::new(SequenceProber::new());
    let store = Arc::new(MemorySettingsStore::with_urls(A, None));
    let mgr = Arc::new(FallbackManager::new(sources, uncached(), store, prober));

    assert_eq!(mgr.get_fallback_url(None).await.as_deref(), Some(A));

    let monitor = HealthMonitor::new(mgr, EventBus::default(), MonitorConfig::default());
    let status = monitor.perform_health_check().await;
    assert_eq!(status.overall_status, HealthStatus::Critical);
    assert!(status.available_urls.iter().all(|r| !r.is_healthy()));
}

#[tokio::test]
async fn priority_order_across_every_source() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileSettingsStore::new(dir.path().join("settings.json"));
    store
        .update_stream_url_atomic(
            StreamUrlUpdate {
                stream_url: "https://db-primary.example/live".into(),
                // Same as an env URL: the env entry keeps its priority
                fallback_url: Some("https://x.example/live".into()),
            },
            "1",
        )
        .await
        .unwrap();

    let sources = SourceConfig {
        primary_url: Some(A.into()),
        backup_url: Some(A.into()),
        additional_urls: vec!["https://x.example/live".into(), "https://y.example/live".into()],
        default_urls: vec![DEFAULT_STREAM_URLS[0].into(), B.into()],
    };
    let mgr = FallbackManager::new(
        sources,
        uncached(),
        Arc::new(store),
        Arc::new(SequenceProber::new()),
    );
    let candidates = mgr.get_fallback_urls().await;

    let priorities: Vec<u32> = candidates.iter().map(|c| c.priority).collect();
    let mut sorted = priorities.clone();
    sorted.sort_unstable();
    assert_eq!(priorities, sorted);
    assert_eq!(priorities, vec![1, 10, 11, 100, 101]);

    let unique: BTreeSet<&str> = candidates.iter().map(|c| c.url.as_str()).collect();
    assert_eq!(unique.len(), candidates.len());
    assert!(candidates.iter().all(|c| c.source != CandidateSource::Database));
}

#[tokio::test]
async fn admin_fallback_sits_between_env_and_defaults() {
    let store = MemorySettingsStore::with_urls(A, Some("https://admin.example/live"));
    let sources = SourceConfig {
        primary_url: Some(A.into()),
        ..SourceConfig::default()
    };
    let mgr = FallbackManager::new(sources, uncached(), Arc::new(store), Arc::new(SequenceProber::new()));
    let candidates = mgr.get_fallback_urls().await;
    assert_eq!(candidates[1].url, "https://admin.example/live");
    assert_eq!(candidates[1].priority, 50);
    assert_eq!(candidates[1].source, CandidateSource::Database);
}

#[tokio::test]
async fn nothing_configured_falls_back_to_the_emergency_url() {
    let sources = SourceConfig {
        default_urls: Vec::new(),
        ..SourceConfig::default()
    };
    let mgr = FallbackManager::new(
        sources,
        uncached(),
        Arc::new(MemorySettingsStore::new()),
        Arc::new(SequenceProber::new()),
    );
    let candidates = mgr.get_fallback_urls().await;
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].priority, EMERGENCY_PRIORITY);
    assert_eq!(mgr.get_fallback_url(None).await.as_deref(), Some(DEFAULT_STREAM_URLS[0]));
}

#[tokio::test]
async fn rotation_never_returns_a_failed_url_before_exhaustion() {
    let urls: Vec<String> = (0..6).map(|i| format!("https://s{}.example/live", i)).collect();
    let prober = Arc::new(SequenceProber::new());
    for (i, url) in urls.iter().enumerate() {
        // Every third stream is dead
        prober.script(url, vec![if i % 3 == 2 { down(500) } else { ok(30) }]);
    }
    let sources = SourceConfig {
        primary_url: Some(urls[0].clone()),
        backup_url: None,
        additional_urls: urls[1..].to_vec(),
        default_urls: Vec::new(),
    };
    let mgr = FallbackManager::new(sources, uncached(), Arc::new(MemorySettingsStore::new()), prober);

    let mut failing = urls[0].clone();
    for _ in 0..3 {
        let before = mgr.rotation_state().await.failed_urls;
        let next = mgr.rotate_to_next_fallback(&failing, None).await.unwrap();
        assert_ne!(next, failing);
        assert!(!before.contains(&next), "{} was already marked failed", next);
        failing = next;
    }
    assert_eq!(mgr.rotation_state().await.rotation_count, 3);
}
