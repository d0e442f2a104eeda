mod common;

use channel_router::{CacheSnapshot, RouteEntry, RoutingCache};
use common::{channel, seeded, FaultyRepository};
use control_plane::{Ability, ChannelRepository, ChannelStatus};

#[test]
fn rebuild_indexes_enabled_channels_by_priority() {
    let mut disabled = channel(4, "gpt-4", "default", 50, 1);
    disabled.status = ChannelStatus::ManuallyDisabled;
    let repo = seeded(&[
        channel(1, "gpt-4,claude", "default,vip", 5, 1),
        channel(2, "gpt-4", "default", 10, 1),
        channel(3, "gpt-4", "default", -3, 1),
        disabled,
    ]);
    let cache = RoutingCache::new();
    let stats = cache.rebuild(repo.as_ref()).expect("rebuild");
    assert_eq!(stats.groups, 2);
    assert_eq!(stats.routes, 4);
    assert_eq!(stats.channels, 4);

    assert_eq!(cache.lookup("default", "gpt-4"), vec![2, 1, 3]);
    assert_eq!(cache.lookup("vip", "claude"), vec![1]);
    assert!(cache.lookup("vip", "gemini").is_empty());
    assert!(cache.lookup("missing", "gpt-4").is_empty());
    assert!(cache.get_channel(4).is_some());
}

#[test]
fn disabled_abilities_are_left_out() {
    let repo = seeded(&[
        channel(1, "gpt-4", "default", 0, 1),
        channel(2, "gpt-4", "default", 0, 1),
    ]);
    repo.update_ability_status(2, false).expect("disable");
    let cache = RoutingCache::new();
    cache.rebuild(repo.as_ref()).expect("rebuild");
    assert_eq!(cache.lookup("default", "gpt-4"), vec![1]);
}

#[test]
fn ability_priority_overrides_channel_priority() {
    let snapshot = CacheSnapshot::build(
        vec![channel(1, "gpt-4", "default", 1, 0), channel(2, "gpt-4", "default", 2, 0)],
        vec![
            Ability {
                group: "default".to_string(),
                model: "gpt-4".to_string(),
                channel_id: 1,
                enabled: true,
                priority: Some(9),
                weight: 0,
                tag: None,
            },
            Ability {
                group: "default".to_string(),
                model: "gpt-4".to_string(),
                channel_id: 2,
                enabled: true,
                priority: None,
                weight: 0,
                tag: None,
            },
        ],
    );
    let cache = RoutingCache::new();
    cache.install(snapshot);
    assert_eq!(
        cache.routes("default", "gpt-4"),
        vec![
            RouteEntry { channel_id: 1, priority: 9 },
            RouteEntry { channel_id: 2, priority: 2 },
        ]
    );
}

#[test]
fn abilities_of_missing_channels_are_skipped() {
    let snapshot = CacheSnapshot::build(
        vec![channel(1, "gpt-4", "default", 0, 0)],
        channel(1, "gpt-4", "default", 0, 0)
            .abilities()
            .into_iter()
            .chain(channel(9, "gpt-4", "default", 0, 0).abilities())
            .collect(),
    );
    assert_eq!(snapshot.skipped(), 1);
    let cache = RoutingCache::new();
    cache.install(snapshot);
    assert_eq!(cache.lookup("default", "gpt-4"), vec![1]);
}

#[test]
fn failed_rebuild_keeps_previous_snapshot() {
    let inner = seeded(&[channel(1, "gpt-4", "default", 0, 1)]);
    let repo = FaultyRepository::wrap(&inner);
    let cache = RoutingCache::new();
    cache.rebuild(repo.as_ref()).expect("rebuild");

    FaultyRepository::set(&repo.fail_reads, true);
    assert!(cache.rebuild(repo.as_ref()).is_err());
    assert_eq!(cache.lookup("default", "gpt-4"), vec![1]);
    assert_eq!(cache.stats().channels, 1);
}

#[test]
fn in_place_updates_touch_only_the_channel_map() {
    let repo = seeded(&[
        channel(1, "gpt-4", "default", 0, 1),
        channel(2, "gpt-4", "default", 0, 1),
    ]);
    let cache = RoutingCache::new();
    cache.rebuild(repo.as_ref()).expect("rebuild");

    assert!(cache.update_status(1, ChannelStatus::AutoDisabled));
    assert!(!cache.update_status(42, ChannelStatus::AutoDisabled));
    let cached = cache.get_channel(1).expect("cached");
    assert_eq!(cached.status, ChannelStatus::AutoDisabled);

    assert!(cache.remove_channel(2));
    assert!(cache.get_channel(2).is_none());
    assert_eq!(cache.lookup("default", "gpt-4"), vec![1, 2]);
    let candidates = cache.candidates("default", "gpt-4");
    assert!(candidates.iter().any(|c| c.route.channel_id == 2 && c.channel.is_none()));

    let mut renamed = channel(1, "gpt-4", "default", 0, 1);
    renamed.name = "renamed".to_string();
    assert!(cache.update_channel(renamed));
    assert_eq!(cache.get_channel(1).expect("cached").name, "renamed");
}

#[test]
fn snapshot_held_by_reader_survives_swap() {
    let repo = seeded(&[channel(1, "gpt-4", "default", 0, 1)]);
    let cache = RoutingCache::new();
    cache.rebuild(repo.as_ref()).expect("rebuild");
    let held = cache.get_channel(1).expect("cached");

    repo.delete_channel(1).expect("delete");
    repo.delete_channel_abilities(&[1]).expect("delete abilities");
    cache.rebuild(repo.as_ref()).expect("rebuild");

    assert_eq!(held.id, 1);
    assert!(cache.get_channel(1).is_none());
    assert!(cache.lookup("default", "gpt-4").is_empty());
}
