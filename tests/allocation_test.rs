//! 分配引擎集成测试

use chrono::Utc;
use flare_allocator::allocator::{
    AllocationEngine, SelectionStrategy, WeightedRandom, WeightedRoundRobin, group_for_key,
};
use flare_allocator::store::{ConfigStore, HolePolicy, MemberSpec};
use flare_allocator::{AllocatorMetrics, ErrorCode, RegistryInstance};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn store_with(name: &str, members: &[(&str, f64)], sizes: &[usize]) -> Arc<ConfigStore> {
    let store = Arc::new(ConfigStore::default());
    let specs: Vec<MemberSpec> = members
        .iter()
        .map(|(address, weight)| MemberSpec::new(*address, *weight))
        .collect();
    store.replace(name, &specs, None).unwrap();
    store.mutate_groups(name, sizes, None).unwrap();
    store
}

fn mark_missing(store: &ConfigStore, name: &str, remaining: &[&str]) {
    let observed: Vec<RegistryInstance> = remaining
        .iter()
        .map(|address| RegistryInstance::new(*address, *address))
        .collect();
    store
        .apply_membership(name, &observed, &HolePolicy::default(), Utc::now())
        .unwrap();
}

fn count_by_address(
    engine: &AllocationEngine,
    name: &str,
    rounds: usize,
) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for i in 0..rounds {
        let selection = engine.select(name, &format!("key-{}", i)).unwrap();
        *counts.entry(selection.member.address).or_insert(0) += 1;
    }
    counts
}

const SEVEN: [(&str, f64); 7] = [
    ("10.0.0.1:80", 1.0),
    ("10.0.0.2:80", 1.0),
    ("10.0.0.3:80", 1.0),
    ("10.0.0.4:80", 1.0),
    ("10.0.0.5:80", 1.0),
    ("10.0.0.6:80", 1.0),
    ("10.0.0.7:80", 1.0),
];

/// 测试：同一键在不同实例上选中同一分组
#[test]
fn test_group_choice_is_deterministic() {
    let first = AllocationEngine::new(
        store_with("svc", &SEVEN, &[2, 2, 3]),
        SelectionStrategy::WeightedRandom,
    );
    let second = AllocationEngine::new(
        store_with("svc", &SEVEN, &[2, 2, 3]),
        SelectionStrategy::WeightedRoundRobin,
    );

    for i in 0..500 {
        let key = format!("user-{}", i);
        let group = assert_ok!(first.select_group("svc", &key));
        assert_eq!(group, assert_ok!(second.select_group("svc", &key)));
        assert_eq!(Some(group), group_for_key(&key, 1024, &[2, 2, 3]));

        // 选中的成员一定在该分组内
        let selection = assert_ok!(first.select("svc", &key));
        assert_eq!(selection.group, group);
        assert_eq!(selection.member.group, group);
    }
}

/// 测试：块长度为 4 时键按 crc32 模 4 分组
#[test]
fn test_block_length_four_buckets_modulo_four() {
    let members = [
        ("10.0.0.1:80", 1.0),
        ("10.0.0.2:80", 1.0),
        ("10.0.0.3:80", 1.0),
        ("10.0.0.4:80", 1.0),
    ];
    let store = store_with("svc", &members, &[1, 1, 1, 1]);
    store.mutate_block_length("svc", 4, None).unwrap();
    let engine = AllocationEngine::new(store, SelectionStrategy::WeightedRoundRobin);

    for i in 0..200 {
        let key = format!("order-{}", i);
        let expected = (crc32fast::hash(key.as_bytes()) % 4) as usize;
        let selection = assert_ok!(engine.select("svc", &key));
        assert_eq!(selection.group, expected);
        assert_eq!(selection.bucket as usize, expected);
        assert_eq!(selection.member.address, members[expected].0);
    }
}

/// 测试：加权随机 0.8 / 0.2 约为 4:1
#[test]
fn test_weighted_random_converges() {
    let store = store_with("svc", &[("10.0.0.1:80", 0.8), ("10.0.0.2:80", 0.2)], &[2]);
    let engine = AllocationEngine::with_picker(store, Arc::new(WeightedRandom));

    let counts = count_by_address(&engine, "svc", 20_000);
    let heavy = counts["10.0.0.1:80"] as f64;
    let light = counts["10.0.0.2:80"] as f64;
    let ratio = heavy / light;
    assert!((3.5..4.6).contains(&ratio), "ratio {}", ratio);
}

/// 测试：加权轮询 0.8 / 0.2 精确收敛到 4:1
#[test]
fn test_weighted_round_robin_converges() {
    let store = store_with("svc", &[("10.0.0.1:80", 0.8), ("10.0.0.2:80", 0.2)], &[2]);
    let engine = AllocationEngine::with_picker(store, Arc::new(WeightedRoundRobin::new()));

    let counts = count_by_address(&engine, "svc", 1000);
    let heavy = counts["10.0.0.1:80"] as i64;
    let light = counts["10.0.0.2:80"] as i64;
    assert_eq!(heavy + light, 1000);
    assert!((heavy - 800).abs() <= 5, "heavy {} light {}", heavy, light);
}

/// 测试：加权轮询在权重相等时按成员顺序轮流
#[test]
fn test_round_robin_ties_follow_member_order() {
    let store = store_with(
        "svc",
        &[("10.0.0.1:80", 1.0), ("10.0.0.2:80", 1.0), ("10.0.0.3:80", 1.0)],
        &[3],
    );
    let engine = AllocationEngine::new(store, SelectionStrategy::WeightedRoundRobin);
    let picked: Vec<String> = (0..6)
        .map(|i| engine.select("svc", &format!("k{}", i)).unwrap().member.address)
        .collect();
    assert_eq!(
        picked,
        vec![
            "10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80",
            "10.0.0.1:80", "10.0.0.2:80", "10.0.0.3:80",
        ]
    );
}

/// 测试：回收后的服务不保留轮询负载
#[test]
fn test_forgotten_service_starts_fresh() {
    let store = store_with("svc", &[("10.0.0.1:80", 1.0), ("10.0.0.2:80", 1.0)], &[2]);
    let engine = AllocationEngine::new(store, SelectionStrategy::WeightedRoundRobin);

    assert_eq!(engine.select("svc", "k").unwrap().member.address, "10.0.0.1:80");
    engine.forget(&["svc".to_string()]);
    assert_eq!(engine.select("svc", "k").unwrap().member.address, "10.0.0.1:80");
    assert_eq!(engine.select("svc", "k").unwrap().member.address, "10.0.0.2:80");
}

/// 测试：权重为 0 的成员不被选中；全部为 0 时等概率
#[test]
fn test_zero_weights() {
    for strategy in [SelectionStrategy::WeightedRandom, SelectionStrategy::WeightedRoundRobin] {
        let store = store_with("svc", &[("10.0.0.1:80", 0.0), ("10.0.0.2:80", 1.0)], &[2]);
        let engine = AllocationEngine::new(store, strategy);
        let counts = count_by_address(&engine, "svc", 200);
        assert_eq!(counts.get("10.0.0.1:80"), None, "{:?}", strategy);

        let store = store_with("svc", &[("10.0.0.1:80", 0.0), ("10.0.0.2:80", 0.0)], &[2]);
        let engine = AllocationEngine::new(store, strategy);
        let counts = count_by_address(&engine, "svc", 2000);
        let first = *counts.get("10.0.0.1:80").unwrap_or(&0);
        assert!((700..=1300).contains(&first), "{:?}: {:?}", strategy, counts);
    }
}

/// 测试：成员变为空洞后仍能分配到健康成员
#[test]
fn test_hole_keeps_routing_to_healthy_members() {
    let store = store_with(
        "svc",
        &[("10.0.0.1:80", 1.0), ("10.0.0.2:80", 1.0), ("10.0.0.3:80", 1.0)],
        &[3],
    );
    mark_missing(&store, "svc", &["10.0.0.1:80", "10.0.0.3:80"]);
    let engine = AllocationEngine::new(store, SelectionStrategy::WeightedRoundRobin);

    let counts = count_by_address(&engine, "svc", 300);
    assert_eq!(counts.get("10.0.0.2:80"), None);
    assert_eq!(counts.values().sum::<usize>(), 300);
}

/// 测试：分组内全部是空洞时顺延到下一组
#[test]
fn test_empty_group_falls_through() {
    let store = store_with("svc", &[("10.0.0.1:80", 1.0), ("10.0.0.2:80", 1.0)], &[1, 1]);
    mark_missing(&store, "svc", &["10.0.0.2:80"]);
    let engine = AllocationEngine::new(store, SelectionStrategy::WeightedRoundRobin);

    for i in 0..200 {
        let selection = assert_ok!(engine.select("svc", &format!("k{}", i)));
        assert_eq!(selection.member.address, "10.0.0.2:80");
        assert_eq!(selection.served_by_group, 1);
    }
}

/// 测试：服务不存在或没有健康成员时返回错误
#[test]
fn test_selection_errors() {
    let store = store_with("svc", &[("10.0.0.1:80", 1.0)], &[1]);
    let metrics = Arc::new(AllocatorMetrics::new().unwrap());
    let engine = AllocationEngine::new(store.clone(), SelectionStrategy::WeightedRandom)
        .with_metrics(metrics.clone());

    assert!(assert_err!(engine.select("missing", "k")).is(ErrorCode::NotFound));

    assert_ok!(engine.select("svc", "k"));
    assert_eq!(metrics.selection_count("svc", "10.0.0.1:80"), 1);

    store.replace("empty", &[], None).unwrap();
    assert!(assert_err!(engine.select("empty", "k")).is(ErrorCode::NoAvailableMember));

    let rendered = metrics.render().unwrap();
    assert!(rendered.contains("allocator_selection_failures_total"));
    assert!(rendered.contains("NOT_FOUND"));
}
