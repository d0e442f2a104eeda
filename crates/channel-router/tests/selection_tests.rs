mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use channel_router::{
    normalize_model, priority_tiers, target_priority, weighted_index, ChannelRouter, RouterError,
    RoutingCache, SelectionEngine,
};
use common::{channel, router, seeded, FaultyRepository};
use control_plane::{ChannelRepository, InMemoryChannelRepository, LocalRateLimiter, DEFAULT_WINDOW};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn tiers_are_distinct_and_descending() {
    assert_eq!(priority_tiers([5, 10, 5, -1, 10]), vec![10, 5, -1]);
    assert!(priority_tiers(Vec::new()).is_empty());
}

#[test]
fn retry_index_clamps_to_lowest_tier() {
    let tiers = [10, 5, 0];
    assert_eq!(target_priority(&tiers, 0), Some(10));
    assert_eq!(target_priority(&tiers, 2), Some(0));
    assert_eq!(target_priority(&tiers, 9), Some(0));
    assert_eq!(target_priority(&[], 0), None);
}

#[test]
fn weighted_index_follows_weights() {
    let mut rng = StdRng::seed_from_u64(7);
    assert_eq!(weighted_index(&[], &mut rng), None);
    for _ in 0..100 {
        assert_eq!(weighted_index(&[0, 5, 0], &mut rng), Some(1));
    }
    let mut seen = HashSet::new();
    for _ in 0..200 {
        seen.insert(weighted_index(&[0, 0], &mut rng).expect("index"));
    }
    assert_eq!(seen.len(), 2);
}

#[test]
fn gizmo_models_collapse_to_wildcard() {
    assert_eq!(normalize_model("gpt-4-gizmo-g-abc"), "gpt-4-gizmo-*");
    assert_eq!(normalize_model("gpt-4o-gizmo-g-abc"), "gpt-4o-gizmo-*");
    assert_eq!(normalize_model("gpt-4o"), "gpt-4o");
}

fn tiered_repo() -> Arc<InMemoryChannelRepository> {
    seeded(&[
        channel(1, "gpt-4", "default", 10, 1),
        channel(2, "gpt-4", "default", 10, 1),
        channel(3, "gpt-4", "default", 5, 1),
        channel(4, "gpt-4", "default", 0, 1),
    ])
}

async fn picked_ids(
    router: &ChannelRouter,
    retry: usize,
    draws: usize,
) -> HashSet<i64> {
    let mut ids = HashSet::new();
    for _ in 0..draws {
        let selection = router
            .select_channel("default", "gpt-4", retry)
            .await
            .expect("selection");
        ids.insert(selection.channel.id);
    }
    ids
}

#[tokio::test]
async fn retry_walks_down_priority_tiers() {
    let router = router(tiered_repo(), true, &[]).await;
    assert_eq!(picked_ids(&router, 0, 200).await, HashSet::from([1, 2]));
    assert_eq!(picked_ids(&router, 1, 50).await, HashSet::from([3]));
    assert_eq!(picked_ids(&router, 2, 50).await, HashSet::from([4]));
    assert_eq!(picked_ids(&router, 7, 50).await, HashSet::from([4]));
}

#[tokio::test]
async fn cached_and_direct_paths_agree_on_tiers() {
    let repo = tiered_repo();
    let cached = router(repo.clone(), true, &[]).await;
    let direct = router(repo, false, &[]).await;
    for retry in 0..4 {
        assert_eq!(
            picked_ids(&cached, retry, 200).await,
            picked_ids(&direct, retry, 200).await,
            "retry {retry}"
        );
    }
}

#[tokio::test]
async fn smoothing_gives_zero_weight_channels_a_share() {
    let repo = seeded(&[
        channel(1, "gpt-4", "default", 0, 0),
        channel(2, "gpt-4", "default", 0, 90),
    ]);
    let router = router(repo, true, &[]).await;
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for _ in 0..10_000 {
        let selection = router
            .select_channel("default", "gpt-4", 0)
            .await
            .expect("selection");
        *counts.entry(selection.channel.id).or_default() += 1;
    }
    let light = counts.get(&1).copied().unwrap_or(0);
    assert!((600..=1300).contains(&light), "light channel picked {light} times");
}

#[tokio::test]
async fn direct_path_uses_raw_weights() {
    let repo = seeded(&[
        channel(1, "gpt-4", "default", 0, 0),
        channel(2, "gpt-4", "default", 0, 90),
    ]);
    let router = router(repo, false, &[]).await;
    assert_eq!(picked_ids(&router, 0, 300).await, HashSet::from([2]));
}

#[tokio::test]
async fn rate_limited_channel_yields_to_sibling() {
    let mut limited = channel(1, "gpt-4", "default", 0, 1000);
    limited.rate_limit = Some(2);
    let repo = seeded(&[limited, channel(2, "gpt-4", "default", 0, 0)]);
    let router = router(repo, true, &[]).await;

    let mut limited_hits = 0;
    for _ in 0..10 {
        let selection = router
            .select_channel("default", "gpt-4", 0)
            .await
            .expect("selection");
        if selection.channel.id == 1 {
            limited_hits += 1;
        }
    }
    assert_eq!(limited_hits, 2);
    assert_eq!(router.usage(1), 2);
    assert_eq!(router.usage(2), 8);
}

#[tokio::test]
async fn exhausted_tier_reports_not_found() {
    let mut limited = channel(1, "gpt-4", "default", 0, 1);
    limited.rate_limit = Some(1);
    let repo = seeded(&[limited, channel(2, "gpt-4", "default", -1, 1)]);
    let router = router(repo, true, &[]).await;

    router
        .select_channel("default", "gpt-4", 0)
        .await
        .expect("first selection");
    let err = router
        .select_channel("default", "gpt-4", 0)
        .await
        .expect_err("limited");
    assert!(err.is_not_found());

    let fallback = router
        .select_channel("default", "gpt-4", 1)
        .await
        .expect("lower tier");
    assert_eq!(fallback.channel.id, 2);
}

#[tokio::test]
async fn unknown_model_is_not_found() {
    for cached in [true, false] {
        let router = router(tiered_repo(), cached, &[]).await;
        let err = router
            .select_channel("default", "claude", 0)
            .await
            .expect_err("missing");
        match err {
            RouterError::NotFound { group, model } => {
                assert_eq!(group, "default");
                assert_eq!(model, "claude");
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn gizmo_requests_route_to_wildcard_channel() {
    let repo = seeded(&[channel(1, "gpt-4-gizmo-*", "default", 0, 1)]);
    for cached in [true, false] {
        let router = router(repo.clone(), cached, &[]).await;
        let selection = router
            .select_channel("default", "gpt-4-gizmo-g-123", 0)
            .await
            .expect("selection");
        assert_eq!(selection.channel.id, 1);
    }
}

#[tokio::test]
async fn drifted_tier_is_inconsistent() {
    let inner = seeded(&[channel(1, "gpt-4", "default", 0, 1)]);
    let repo = FaultyRepository::wrap(&inner);
    FaultyRepository::set(&repo.drop_tiers, true);
    let router = router(repo, false, &[]).await;
    let err = router
        .select_channel("default", "gpt-4", 0)
        .await
        .expect_err("drift");
    assert!(matches!(err, RouterError::Inconsistent(_)));
}

#[tokio::test]
async fn store_failure_surfaces_on_direct_path() {
    let inner = seeded(&[channel(1, "gpt-4", "default", 0, 1)]);
    let repo = FaultyRepository::wrap(&inner);
    let router = router(repo.clone(), false, &[]).await;
    FaultyRepository::set(&repo.fail_reads, true);
    let err = router
        .select_channel("default", "gpt-4", 0)
        .await
        .expect_err("offline");
    assert!(matches!(err, RouterError::Repository(_)));
}

#[tokio::test]
async fn engine_skips_channels_missing_from_cache() {
    let repo = seeded(&[
        channel(1, "gpt-4", "default", 0, 1),
        channel(2, "gpt-4", "default", 0, 1),
    ]);
    let cache = RoutingCache::new();
    cache.rebuild(repo.as_ref()).expect("rebuild");
    cache.remove_channel(1);
    let engine = SelectionEngine::new(LocalRateLimiter::shared(DEFAULT_WINDOW));
    for _ in 0..50 {
        let channel = engine
            .select_cached(&cache, "default", "gpt-4", 0)
            .await
            .expect("selection");
        assert_eq!(channel.id, 2);
    }
    cache.remove_channel(2);
    assert!(engine
        .select_cached(&cache, "default", "gpt-4", 0)
        .await
        .expect_err("empty")
        .is_not_found());
    assert_eq!(repo.all_channels().expect("channels").len(), 2);
}
