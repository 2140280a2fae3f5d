//! Prompt resolution tests

use ifwarden::internal::{
    device::registry::DeviceRegistry,
    exec::scheduler::ApplyError,
    fsm::{
        engine::{Engine, EngineError, Prompt, PromptHandler, PromptKind, WorkerId, WorkerInfo, WorkerKind},
        memory::InMemoryEngine,
    },
    manager::Manager,
    mem::store::SecretStore,
    prompt::resolver::{PromptError, PromptResolver},
    tree::node::{ConfigTree, NodeId},
};

const MODEM: WorkerId = WorkerId(1);

fn modem_registry(security_id: Option<&str>) -> DeviceRegistry {
    let mut devices = DeviceRegistry::new();
    let info = WorkerInfo {
        name: "wwan0".to_string(),
        kind: WorkerKind::Modem,
        ifindex: 4,
        security_id: security_id.map(str::to_string),
        dead: false,
    };
    devices.register(MODEM, &info, "/org/ifwarden/Manager/Modem/1".to_string());
    devices
}

// A modem config `modem/auth/pin` selected for `MODEM`; returns the pin node.
fn selected_modem_config(tree: &mut ConfigTree, devices: &mut DeviceRegistry) -> NodeId {
    let root = tree.add_root("modem");
    let pin = tree.ensure_path(root, "auth/pin").unwrap();
    devices.get_mut(MODEM).unwrap().selected_config = Some(root);
    pin
}

#[test]
fn test_node_outside_any_config_is_not_identified() {
    let mut devices = modem_registry(Some("sec1"));
    let mut tree = ConfigTree::new();
    selected_modem_config(&mut tree, &mut devices);
    let stray_root = tree.add_root("interface");
    let stray = tree.ensure_path(stray_root, "wireless/key").unwrap();
    let secrets = SecretStore::new();

    let resolver = PromptResolver::new(&devices, &secrets);
    let result = resolver.resolve(&mut tree, stray);

    assert!(matches!(result, Err(PromptError::DeviceNotIdentified)));
    assert!(tree.cdata(stray).is_none());
}

#[test]
fn test_prompt_inside_owned_config_sets_value() {
    let mut devices = modem_registry(Some("sec1"));
    let mut tree = ConfigTree::new();
    let pin = selected_modem_config(&mut tree, &mut devices);
    let mut secrets = SecretStore::new();
    secrets.add("sec1", "/modem/auth/pin", "val");

    let resolver = PromptResolver::new(&devices, &secrets);
    let (owner, path) = resolver.identify_owner(&tree, pin).unwrap();
    assert_eq!(owner.worker, MODEM);
    assert_eq!(path, "/modem/auth/pin");

    resolver.resolve(&mut tree, pin).unwrap();
    assert_eq!(tree.cdata(pin), Some("val"));
}

#[test]
fn test_prompt_on_config_root_uses_root_name() {
    let mut devices = modem_registry(Some("sec1"));
    let mut tree = ConfigTree::new();
    let pin = selected_modem_config(&mut tree, &mut devices);
    let root = tree.parent(tree.parent(pin).unwrap()).unwrap();
    let secrets = SecretStore::new();

    let resolver = PromptResolver::new(&devices, &secrets);
    let (_, path) = resolver.identify_owner(&tree, root).unwrap();
    assert_eq!(path, "/modem");
}

#[test]
fn test_owner_without_security_id_fails() {
    let mut devices = modem_registry(None);
    let mut tree = ConfigTree::new();
    let pin = selected_modem_config(&mut tree, &mut devices);
    let secrets = SecretStore::new();

    let resolver = PromptResolver::new(&devices, &secrets);
    match resolver.resolve(&mut tree, pin) {
        Err(PromptError::NoSecurityId(name)) => assert_eq!(name, "wwan0"),
        other => panic!("expected NoSecurityId, got {:?}", other),
    }
}

#[test]
fn test_missing_secret_reports_unavailable() {
    let mut devices = modem_registry(Some("sec1"));
    let mut tree = ConfigTree::new();
    let pin = selected_modem_config(&mut tree, &mut devices);
    let mut secrets = SecretStore::new();
    secrets.add("sec2", "/modem/auth/pin", "wrong device");

    let mut resolver = PromptResolver::new(&devices, &secrets);
    let prompt = Prompt {
        kind: PromptKind::Pin,
        string: "SIM PIN".to_string(),
        id: "wwan0:auth/pin".to_string(),
    };
    match resolver.prompt(&prompt, &mut tree, pin) {
        Err(PromptError::SecretUnavailable {
            security_id, path, ..
        }) => {
            assert_eq!(security_id, "sec1");
            assert_eq!(path, "/modem/auth/pin");
        }
        other => panic!("expected SecretUnavailable, got {:?}", other),
    }
    assert!(tree.cdata(pin).is_none());
}

#[test]
fn test_stalled_modem_applies_after_secret_arrives() {
    let mut engine = InMemoryEngine::new();
    let wwan0 = engine.add_worker("wwan0", WorkerKind::Modem, 4, Some("imsi-1"));
    let mut manager = Manager::new(engine);
    manager.register_device(wwan0).unwrap();
    manager.create_policy("lte").unwrap();
    let lte = manager.policies().by_name("lte").unwrap().policy;
    manager
        .engine_mut()
        .require_secret(lte, "auth/pin", PromptKind::Pin);

    let first = manager.recheck_do();
    assert_eq!(first.failed, vec![wwan0]);
    assert!(manager.engine().active_policy(wwan0).is_none());

    assert_eq!(manager.add_secret("imsi-1", "/modem/auth/pin", "1234"), 1);
    let second = manager.recheck_do();
    assert_eq!(second.applied, vec![(wwan0, lte)]);

    let engine = manager.engine();
    let root = engine.config_root(wwan0).unwrap();
    let tree = engine.tree();
    let auth = tree.child_by_name(root, "auth").unwrap();
    let pin = tree.child_by_name(auth, "pin").unwrap();
    assert_eq!(tree.cdata(pin), Some("1234"));
}

#[test]
fn test_prompt_failure_surfaces_through_engine_error() {
    let mut engine = InMemoryEngine::new();
    let wwan0 = engine.add_worker("wwan0", WorkerKind::Modem, 4, None);
    let mut manager = Manager::new(engine);
    manager.register_device(wwan0).unwrap();
    manager.create_policy("lte").unwrap();
    let lte = manager.policies().by_name("lte").unwrap().policy;
    manager
        .engine_mut()
        .require_secret(lte, "auth/pin", PromptKind::Pin);

    let err = manager.apply_policy(lte, wwan0).unwrap_err();
    match err {
        ApplyError::Engine(EngineError::Prompt { path, source }) => {
            assert_eq!(path, "auth/pin");
            assert!(matches!(source, PromptError::NoSecurityId(_)));
        }
        other => panic!("expected a prompt failure, got {:?}", other),
    }
    assert!(!manager.engine().is_running(wwan0));
}
