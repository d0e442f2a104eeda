mod common;

use std::time::Duration;

use channel_router::{regenerate_abilities, AbilityService, ChannelRouter, RouterError};
use common::{channel, config, router, seeded, FaultyRepository};
use control_plane::{
    AbilityTagUpdate, ChannelRepository, ChannelStatus, LocalRateLimiter, ABILITY_BATCH_SIZE,
};

#[tokio::test]
async fn saved_channel_becomes_routable() {
    let repo = seeded(&[channel(1, "gpt-4", "default", 0, 1)]);
    let router = router(repo.clone(), true, &[]).await;
    assert!(router.select_channel("default", "claude", 0).await.is_err());

    let updated = channel(2, "claude", "default", 0, 1);
    repo.upsert_channel(&updated).expect("upsert");
    router.on_channel_saved(&updated).await.expect("saved");

    let selection = router
        .select_channel("default", "claude", 0)
        .await
        .expect("selection");
    assert_eq!(selection.channel.id, 2);
}

#[tokio::test]
async fn sync_channel_reports_written_abilities() {
    let repo = seeded(&[]);
    let service = AbilityService::new(repo.clone());
    let saved = channel(1, "gpt-4,claude,gpt-4", "default,vip", 0, 1);
    repo.upsert_channel(&saved).expect("upsert");
    assert_eq!(service.sync_channel(&saved).await.expect("sync"), 4);
    assert_eq!(repo.all_abilities().expect("abilities").len(), 4);
}

#[tokio::test]
async fn saving_narrower_model_list_drops_stale_routes() {
    let original = channel(1, "gpt-4,claude", "default", 0, 1);
    let repo = seeded(&[original]);
    let router = router(repo.clone(), true, &[]).await;

    let narrowed = channel(1, "gpt-4", "default", 0, 1);
    repo.upsert_channel(&narrowed).expect("upsert");
    router.on_channel_saved(&narrowed).await.expect("saved");

    assert_eq!(repo.all_abilities().expect("abilities").len(), 1);
    assert!(router
        .select_channel("default", "claude", 0)
        .await
        .expect_err("dropped")
        .is_not_found());
}

#[tokio::test]
async fn deleted_channel_is_skipped_before_next_sync() {
    let repo = seeded(&[
        channel(1, "gpt-4", "default", 0, 1),
        channel(2, "gpt-4", "default", 0, 1),
    ]);
    let router = router(repo.clone(), true, &[]).await;
    repo.delete_channel(1).expect("delete");
    router.on_channel_deleted(1).await.expect("deleted");

    assert!(repo
        .all_abilities()
        .expect("abilities")
        .iter()
        .all(|a| a.channel_id == 2));
    for _ in 0..50 {
        let selection = router
            .select_channel("default", "gpt-4", 0)
            .await
            .expect("selection");
        assert_eq!(selection.channel.id, 2);
    }
    assert!(matches!(
        router.get_channel(1).await,
        Err(RouterError::ChannelNotFound(1))
    ));
}

#[tokio::test]
async fn disabled_top_tier_falls_through_to_next_tier() {
    for cached in [true, false] {
        let repo = seeded(&[
            channel(1, "gpt-x", "default", 5, 1),
            channel(2, "gpt-x", "default", 1, 1),
        ]);
        let router = router(repo.clone(), cached, &[]).await;
        router
            .set_channel_status(1, ChannelStatus::ManuallyDisabled)
            .await
            .expect("status");
        let selection = router
            .select_channel("default", "gpt-x", 0)
            .await
            .expect("selection");
        assert_eq!(selection.channel.id, 2, "cached={cached}");
    }
}

#[tokio::test]
async fn deleted_top_tier_falls_through_to_next_tier() {
    for cached in [true, false] {
        let repo = seeded(&[
            channel(1, "gpt-x", "default", 5, 1),
            channel(2, "gpt-x", "default", 1, 1),
        ]);
        let router = router(repo.clone(), cached, &[]).await;
        repo.delete_channel(1).expect("delete");
        router.on_channel_deleted(1).await.expect("deleted");
        let selection = router
            .select_channel("default", "gpt-x", 0)
            .await
            .expect("selection");
        assert_eq!(selection.channel.id, 2, "cached={cached}");
    }
}

#[tokio::test]
async fn disabled_channel_is_soft_removed() {
    let repo = seeded(&[
        channel(1, "gpt-4", "default", 0, 1),
        channel(2, "gpt-4", "default", 0, 1),
    ]);
    for cached in [true, false] {
        let router = router(repo.clone(), cached, &[]).await;
        router
            .set_channel_status(1, ChannelStatus::ManuallyDisabled)
            .await
            .expect("status");
        for _ in 0..50 {
            let selection = router
                .select_channel("default", "gpt-4", 0)
                .await
                .expect("selection");
            assert_eq!(selection.channel.id, 2);
        }
        assert!(matches!(
            router.get_channel(1).await,
            Err(RouterError::ChannelDisabled(1))
        ));
        assert!(matches!(
            router.get_channel_info(1).await,
            Err(RouterError::ChannelDisabled(1))
        ));
        router
            .set_channel_status(1, ChannelStatus::Enabled)
            .await
            .expect("status");
    }
    assert!(
        repo.enabled_abilities("default", "gpt-4")
            .expect("abilities")
            .len()
            == 2
    );
}

#[tokio::test]
async fn status_change_for_unknown_channel_fails() {
    let router = router(seeded(&[]), true, &[]).await;
    assert!(matches!(
        router.set_channel_status(5, ChannelStatus::Enabled).await,
        Err(RouterError::ChannelNotFound(5))
    ));
}

#[tokio::test]
async fn channel_info_projects_multi_key_fields() {
    let mut multi = channel(1, "gpt-4", "default", 0, 1);
    multi.info.is_multi_key = true;
    multi.info.multi_key_size = 3;
    multi.info.multi_key_polling_index = 2;
    let repo = seeded(&[multi]);
    for cached in [true, false] {
        let router = router(repo.clone(), cached, &[]).await;
        let info = router.get_channel_info(1).await.expect("info");
        assert!(info.is_multi_key);
        assert_eq!(info.multi_key_size, 3);
        assert_eq!(info.multi_key_polling_index, 2);
        assert!(matches!(
            router.get_channel_info(9).await,
            Err(RouterError::ChannelNotFound(9))
        ));
    }
}

#[tokio::test]
async fn repair_regenerates_every_channel() {
    let channels: Vec<_> = (1..=(ABILITY_BATCH_SIZE as i64 + 5))
        .map(|id| channel(id, "gpt-4,claude", "default", 0, 1))
        .collect();
    let repo = seeded(&channels);
    let router = router(repo.clone(), true, &[]).await;

    let ids: Vec<i64> = channels.iter().map(|c| c.id).collect();
    repo.delete_channel_abilities(&ids).expect("wipe");
    router.init_cache().await.expect("rebuild");
    assert!(router.select_channel("default", "gpt-4", 0).await.is_err());

    let report = router.repair_abilities().await.expect("repair");
    assert_eq!(report.repaired, channels.len());
    assert_eq!(report.failed, 0);
    assert_eq!(
        repo.all_abilities().expect("abilities").len(),
        channels.len() * 2
    );
    router
        .select_channel("default", "gpt-4", 0)
        .await
        .expect("routable after repair");

    let again = regenerate_abilities(repo.as_ref()).expect("repair twice");
    assert_eq!(again.repaired, channels.len());
    assert_eq!(
        repo.all_abilities().expect("abilities").len(),
        channels.len() * 2
    );
}

#[tokio::test]
async fn concurrent_repair_is_rejected() {
    let inner = seeded(&[channel(1, "gpt-4", "default", 0, 1)]);
    let repo = FaultyRepository::wrap(&inner);
    let router = router(repo.clone(), true, &[]).await;
    FaultyRepository::set(&repo.slow_scans, true);

    let (first, second) = tokio::join!(router.repair_abilities(), router.repair_abilities());
    let (done, rejected) = match (first, second) {
        (Ok(report), Err(err)) | (Err(err), Ok(report)) => (report, err),
        other => panic!("expected exactly one repair to run, got {other:?}"),
    };
    assert_eq!(done.repaired, 1);
    assert!(matches!(rejected, RouterError::RepairInProgress));

    FaultyRepository::set(&repo.slow_scans, false);
    router.repair_abilities().await.expect("repair after release");
}

#[tokio::test]
async fn tag_updates_take_effect_after_rebuild() {
    let mut tagged = channel(1, "gpt-4", "default", 0, 1);
    tagged.tag = Some("promo".to_string());
    let repo = seeded(&[tagged, channel(2, "gpt-4", "default", 5, 1)]);
    let router = router(repo, true, &[]).await;
    assert_eq!(
        router
            .select_channel("default", "gpt-4", 0)
            .await
            .expect("selection")
            .channel
            .id,
        2
    );

    let update = AbilityTagUpdate {
        priority: Some(9),
        ..AbilityTagUpdate::default()
    };
    assert_eq!(
        router
            .update_abilities_by_tag("promo", update)
            .await
            .expect("update"),
        1
    );
    router.init_cache().await.expect("rebuild");
    assert_eq!(
        router
            .select_channel("default", "gpt-4", 0)
            .await
            .expect("selection")
            .channel
            .id,
        1
    );

    assert_eq!(
        router
            .set_ability_status_by_tag("promo", false)
            .await
            .expect("disable"),
        1
    );
    router.init_cache().await.expect("rebuild");
    assert_eq!(
        router
            .select_channel("default", "gpt-4", 0)
            .await
            .expect("selection")
            .channel
            .id,
        2
    );
}

#[tokio::test]
async fn enabled_models_lists_routable_models() {
    let repo = seeded(&[
        channel(1, "gpt-4,claude", "default", 0, 1),
        channel(2, "gemini", "vip", 0, 1),
    ]);
    let router = router(repo, true, &[]).await;
    assert_eq!(
        router.enabled_models(Some("vip")).await.expect("models"),
        vec!["gemini".to_string()]
    );
    assert_eq!(router.enabled_models(None).await.expect("models").len(), 3);
}

#[tokio::test]
async fn periodic_sync_picks_up_store_changes() {
    let repo = seeded(&[channel(1, "gpt-4", "default", 0, 1)]);
    let router = ChannelRouter::new(
        config(true, &[]),
        repo.clone(),
        LocalRateLimiter::shared(Duration::from_secs(60)),
    );
    router.init_cache().await.expect("init");
    let handle = router
        .start_periodic_sync(Duration::from_millis(50))
        .expect("sync task");

    let added = channel(2, "claude", "default", 0, 1);
    repo.upsert_channel(&added).expect("upsert");
    repo.insert_abilities(&added.abilities()).expect("abilities");
    assert!(router.select_channel("default", "claude", 0).await.is_err());

    let cache = router.cache().expect("cache").clone();
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !cache.lookup("default", "claude").is_empty() {
            break;
        }
    }
    assert_eq!(cache.lookup("default", "claude"), vec![2]);
    handle.abort();
}

#[tokio::test]
async fn disabled_memory_cache_has_no_sync_task() {
    let router = router(seeded(&[]), false, &[]).await;
    assert!(router.cache().is_none());
    assert!(router.start_periodic_sync(Duration::from_secs(1)).is_none());
}
