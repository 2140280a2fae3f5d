//! Recheck and teardown pass tests

use ifwarden::internal::{
    exec::scheduler::{PendingSet, MAX_POLICIES},
    fsm::{
        engine::{Engine, PolicyId, PromptKind, WorkerId, WorkerKind},
        memory::{EngineCall, InMemoryEngine},
    },
    manager::Manager,
};

fn policy_id(manager: &Manager<InMemoryEngine>, name: &str) -> PolicyId {
    manager.policies().by_name(name).unwrap().policy
}

fn refresh_count(engine: &InMemoryEngine) -> usize {
    engine
        .calls()
        .iter()
        .filter(|c| **c == EngineCall::RefreshState)
        .count()
}

#[test]
fn test_pending_set_deduplicates_and_keeps_order() {
    let mut set = PendingSet::new();
    assert!(set.insert(WorkerId(3)));
    assert!(set.insert(WorkerId(1)));
    assert!(!set.insert(WorkerId(3)));

    assert_eq!(set.len(), 2);
    assert_eq!(set.take(), vec![WorkerId(3), WorkerId(1)]);
    assert!(set.is_empty());
}

#[test]
fn test_schedule_twice_gives_one_entry() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();

    manager.schedule_recheck(eth0);
    manager.schedule_recheck(eth0);

    assert_eq!(manager.scheduler().recheck_pending().len(), 1);
}

#[test]
fn test_epoch_advance_enqueues_user_controlled_netdevs_and_modems() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let eth1 = engine.add_worker("eth1", WorkerKind::Netdev, 3, None);
    let wwan0 = engine.add_worker("wwan0", WorkerKind::Modem, 4, Some("imsi-1"));
    let mut manager = Manager::new(engine);
    for worker in [eth0, eth1, wwan0] {
        manager.register_device(worker).unwrap();
    }
    manager.set_user_controlled(eth0, true).unwrap();

    manager.create_policy("default").unwrap();
    let report = manager.recheck_do();

    assert_eq!(report.evaluated, vec![eth0, wwan0]);
    assert!(!report.evaluated.contains(&eth1));
    assert_eq!(
        manager.scheduler().last_policy_epoch(),
        manager.engine().policy_epoch()
    );
}

#[test]
fn test_explicitly_scheduled_netdev_is_evaluated_without_user_control() {
    let mut engine = InMemoryEngine::new();
    let eth1 = engine.add_worker("eth1", WorkerKind::Netdev, 3, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth1).unwrap();
    manager.create_policy("default").unwrap();

    manager.schedule_recheck(eth1);
    let report = manager.recheck_do();

    assert_eq!(report.evaluated, vec![eth1]);
    assert_eq!(report.applied.len(), 1);
}

#[test]
fn test_last_applicable_policy_wins() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();
    for name in ["p1", "p2", "p3"] {
        manager.create_policy(name).unwrap();
    }
    let (p1, p2, p3) = (
        policy_id(&manager, "p1"),
        policy_id(&manager, "p2"),
        policy_id(&manager, "p3"),
    );
    manager.engine_mut().set_applicable(eth0, vec![p1, p2, p3]);

    manager.schedule_recheck(eth0);
    let report = manager.recheck_do();

    assert_eq!(report.applied, vec![(eth0, p3)]);
    assert_eq!(manager.engine().active_policy(eth0), Some(p3));
    assert_eq!(manager.lookup_device(eth0).unwrap().active_policy, Some(p3));
}

#[test]
fn test_matcher_list_is_capped() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();
    for i in 0..(MAX_POLICIES + 5) {
        manager.create_policy(&format!("p{}", i)).unwrap();
    }

    manager.schedule_recheck(eth0);
    let report = manager.recheck_do();

    let cutoff = policy_id(&manager, &format!("p{}", MAX_POLICIES - 1));
    assert_eq!(report.applied, vec![(eth0, cutoff)]);
}

#[test]
fn test_empty_pass_does_not_refresh() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();

    let report = manager.recheck_do();

    assert!(report.evaluated.is_empty());
    assert_eq!(refresh_count(manager.engine()), 0);
}

#[test]
fn test_one_refresh_per_pass() {
    let mut engine = InMemoryEngine::new();
    let workers: Vec<WorkerId> = (0..3)
        .map(|i| engine.add_worker(&format!("eth{}", i), WorkerKind::Netdev, 2 + i, None))
        .collect();
    let mut manager = Manager::new(engine);
    for worker in &workers {
        manager.register_device(*worker).unwrap();
        manager.schedule_recheck(*worker);
    }

    let report = manager.recheck_do();

    assert_eq!(report.evaluated, workers);
    assert_eq!(refresh_count(manager.engine()), 1);
    assert_eq!(manager.engine().calls()[0], EngineCall::RefreshState);
}

#[test]
fn test_dead_device_is_skipped() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let eth1 = engine.add_worker("eth1", WorkerKind::Netdev, 3, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();
    manager.register_device(eth1).unwrap();
    manager.create_policy("default").unwrap();
    manager.recheck_do();

    manager.engine_mut().mark_dead(eth0);
    manager.engine_mut().clear_calls();
    manager.schedule_recheck(eth0);
    manager.schedule_recheck(eth1);
    let report = manager.recheck_do();

    assert_eq!(report.skipped_dead, vec![eth0]);
    assert_eq!(report.evaluated, vec![eth1]);
    assert!(manager.lookup_device(eth0).unwrap().dead);
    assert!(!manager
        .engine()
        .calls()
        .contains(&EngineCall::ApplicablePolicies(eth0)));
}

#[test]
fn test_no_applicable_policy_is_skipped() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();

    manager.schedule_recheck(eth0);
    let report = manager.recheck_do();

    assert_eq!(report.no_policy, vec![eth0]);
    assert!(report.applied.is_empty());
    assert!(manager.scheduler().recheck_pending().is_empty());
}

#[test]
fn test_scoped_policy_only_matches_its_device() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let eth1 = engine.add_worker("eth1", WorkerKind::Netdev, 3, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();
    manager.register_device(eth1).unwrap();
    manager.create_scoped_policy("only-eth1", Some(eth1)).unwrap();
    let scoped = policy_id(&manager, "only-eth1");
    manager.engine_mut().scope_policy(scoped, "eth1");

    manager.schedule_recheck(eth0);
    manager.schedule_recheck(eth1);
    let report = manager.recheck_do();

    assert_eq!(report.no_policy, vec![eth0]);
    assert_eq!(report.applied, vec![(eth1, scoped)]);
    assert_eq!(manager.lookup_policy(scoped).unwrap().device, Some(eth1));
}

#[test]
fn test_failed_apply_is_not_retried() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let eth1 = engine.add_worker("eth1", WorkerKind::Netdev, 3, None);
    engine.fail_transitions(eth0);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();
    manager.register_device(eth1).unwrap();
    manager.create_policy("default").unwrap();
    let default = policy_id(&manager, "default");

    manager.schedule_recheck(eth0);
    manager.schedule_recheck(eth1);
    let report = manager.recheck_do();

    assert_eq!(report.failed, vec![eth0]);
    assert_eq!(report.applied, vec![(eth1, default)]);
    assert!(manager.scheduler().recheck_pending().is_empty());

    let again = manager.recheck_do();
    assert!(again.evaluated.is_empty());
}

#[test]
fn test_untracked_winner_fails_device() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    engine.set_applicable(eth0, vec![PolicyId(99)]);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();

    manager.schedule_recheck(eth0);
    let report = manager.recheck_do();

    assert_eq!(report.failed, vec![eth0]);
    assert!(manager.lookup_device(eth0).unwrap().active_policy.is_none());
}

#[test]
fn test_render_precedes_apply_and_selects_config() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();
    manager.create_policy("default").unwrap();
    let default = policy_id(&manager, "default");
    manager.engine_mut().clear_calls();

    manager.schedule_recheck(eth0);
    manager.recheck_do();

    let calls = manager.engine().calls();
    let render = calls
        .iter()
        .position(|c| *c == EngineCall::RenderConfig(eth0, default))
        .unwrap();
    let apply = calls
        .iter()
        .position(|c| *c == EngineCall::ApplyPolicy(eth0, default))
        .unwrap();
    assert!(render < apply);
    assert_eq!(
        manager.lookup_device(eth0).unwrap().selected_config,
        manager.engine().config_root(eth0)
    );
}

#[test]
fn test_repeated_passes_do_not_grow_config_tree() {
    let mut engine = InMemoryEngine::new();
    let wwan0 = engine.add_worker("wwan0", WorkerKind::Modem, 0, Some("imsi-1"));
    let mut manager = Manager::new(engine);
    manager.register_device(wwan0).unwrap();
    manager.create_policy("lte").unwrap();
    let lte = policy_id(&manager, "lte");
    manager
        .engine_mut()
        .require_secret(lte, "auth/pin", PromptKind::Pin);
    manager.add_secret("imsi-1", "/modem/auth/pin", "1234");

    let mut sizes = Vec::new();
    for _ in 0..5 {
        manager.schedule_recheck(wwan0);
        let report = manager.recheck_do();
        assert_eq!(report.applied, vec![(wwan0, lte)]);
        sizes.push(manager.engine().tree().len());
    }

    // modem, name, auth, pin
    assert_eq!(sizes, vec![4; 5]);
    assert_eq!(
        manager.lookup_device(wwan0).unwrap().selected_config,
        manager.engine().config_root(wwan0)
    );

    manager.unregister_device(wwan0).unwrap();
    assert!(manager.engine().tree().is_empty());
}

#[test]
fn test_reapplying_active_policy_is_harmless() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let mut manager = Manager::new(engine);
    manager.register_device(eth0).unwrap();
    manager.create_policy("default").unwrap();
    let default = policy_id(&manager, "default");

    manager.apply_policy(default, eth0).unwrap();
    manager.apply_policy(default, eth0).unwrap();

    assert_eq!(manager.engine().active_policy(eth0), Some(default));
}

#[test]
fn test_apply_to_unregistered_device_is_rejected() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let mut manager = Manager::new(engine);
    manager.create_policy("default").unwrap();
    let default = policy_id(&manager, "default");
    manager.engine_mut().clear_calls();

    assert!(manager.apply_policy(default, eth0).is_err());
    assert!(manager.engine().calls().is_empty());
}

#[test]
fn test_teardown_pass_drains_in_order() {
    let mut engine = InMemoryEngine::new();
    let eth0 = engine.add_worker("eth0", WorkerKind::Netdev, 2, None);
    let eth1 = engine.add_worker("eth1", WorkerKind::Netdev, 3, None);
    let mut manager = Manager::new(engine);

    manager.schedule_down(eth1);
    manager.schedule_down(eth0);
    manager.schedule_down(eth1);

    assert_eq!(manager.down_do(), vec![eth1, eth0]);
    assert!(manager.down_do().is_empty());
}
