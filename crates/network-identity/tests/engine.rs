//! Allocation lifecycle tests

mod common;

use command_executor::LocalLauncher;
use common::*;
use network_identity::{
    AllocationEngine, AllocatorConfig, Error, HostsFileSink, PortAllocator, ServiceRequirement,
    StateStore, Strategy,
};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;

fn config() -> AllocatorConfig {
    let mut config = AllocatorConfig::default();
    config.lan = fast_lan_config();
    config
}

fn engine(dir: &Path, net: &Arc<FakeNetwork>, config: AllocatorConfig) -> AllocationEngine {
    AllocationEngine::new(dir, config)
        .unwrap()
        .with_host_network(net.clone())
        .with_helper_launcher(Arc::new(LocalLauncher))
        .with_port_allocator(
            PortAllocator::with_claimed(8000, 8010, [8001])
                .unwrap()
                .with_probe(|_| true),
        )
}

fn services() -> Vec<ServiceRequirement> {
    vec![
        ServiceRequirement::new("api").with_port().with_address(),
        ServiceRequirement::new("web").with_port().with_address(),
        ServiceRequirement::new("worker").with_address(),
    ]
}

#[smol_potat::test]
async fn test_localhost_strategy_allocates_ports_only() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().into_arc();
    let mut engine = engine(dir.path(), &net, config());

    let outcome = engine.up(&services(), Strategy::None).await.unwrap();
    let record = &outcome.record;

    assert!(!outcome.fell_back());
    assert_eq!(record.strategy, Strategy::None);
    assert_eq!(record.get("api").unwrap().port, Some(8000));
    assert_eq!(record.get("web").unwrap().port, Some(8002));
    assert_eq!(record.get("worker").unwrap().port, None);
    assert!(record.addresses().is_empty());

    let endpoints = record.endpoints();
    assert_eq!(endpoints["api"].to_string(), "127.0.0.1:8000");
    assert_eq!(endpoints["worker"].address, IpAddr::V4(Ipv4Addr::LOCALHOST));

    assert!(net.bound_addresses().is_empty());
    assert_eq!(engine.status().unwrap(), outcome.record);

    let mapping: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(engine.store().mapping_path()).unwrap(),
    )
    .unwrap();
    assert_eq!(mapping["web"]["port"], 8002);
}

#[smol_potat::test]
async fn test_lan_strategy_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().with_ping_responder(lan(100)).into_arc();
    let mut engine = engine(dir.path(), &net, config());

    let outcome = engine.up(&services(), Strategy::LanVisible).await.unwrap();
    let record = &outcome.record;

    assert_eq!(record.strategy, Strategy::LanVisible);
    assert_eq!(record.interface.as_deref(), Some("eth0"));
    assert_eq!(record.get("api").unwrap().address, Some(IpAddr::V4(lan(101))));
    assert_eq!(record.get("web").unwrap().address, Some(IpAddr::V4(lan(102))));
    assert_eq!(record.get("worker").unwrap().address, Some(IpAddr::V4(lan(103))));
    assert_eq!(net.bound_addresses(), vec![lan(101), lan(102), lan(103)]);

    let summary = engine.down().await.unwrap();
    assert!(summary.had_record);
    assert_eq!(summary.lan_addresses_released, 3);
    assert!(net.bound_addresses().is_empty());
    assert!(engine.status().is_none());
    assert!(!engine.store().mapping_path().exists());

    // A second teardown finds nothing to do
    let summary = engine.down().await.unwrap();
    assert!(!summary.had_record);
    assert_eq!(summary.lan_addresses_released, 0);
}

#[smol_potat::test]
async fn test_unprivileged_lan_falls_back_to_localhost() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().unprivileged().into_arc();
    let mut engine = engine(dir.path(), &net, config());

    let outcome = engine.up(&services(), Strategy::LanVisible).await.unwrap();

    assert!(outcome.fell_back());
    assert_eq!(outcome.record.requested, Strategy::LanVisible);
    assert_eq!(outcome.record.strategy, Strategy::None);
    assert!(outcome.record.addresses().is_empty());
    assert_eq!(outcome.record.get("api").unwrap().port, Some(8000));
}

#[smol_potat::test]
async fn test_missing_probe_tool_is_named_in_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().without_tool("arping").into_arc();
    let mut engine = engine(dir.path(), &net, config());

    let outcome = engine.up(&services(), Strategy::LanVisible).await.unwrap();

    let reason = outcome.fallback_reason.as_deref().unwrap();
    assert!(reason.contains("arping"), "{reason}");
    assert!(!reason.contains("not enough free addresses"), "{reason}");
    assert_eq!(outcome.record.strategy, Strategy::None);
    assert!(net.bound_addresses().is_empty());
}

#[smol_potat::test]
async fn test_default_config_falls_back_and_keeps_state_dir() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().unprivileged().into_arc();
    let config = AllocatorConfig::load_or_default(dir.path()).unwrap();
    let mut engine = engine(dir.path(), &net, config);

    let outcome = engine.up(&services(), Strategy::LanVisible).await.unwrap();

    assert!(outcome.fell_back());
    assert!(dir.path().join(".netclaim").join("allocation.json").exists());
    assert!(!dir.path().join("allocation.json").exists());
}

#[smol_potat::test]
async fn test_fallback_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().unprivileged().into_arc();
    let mut config = config();
    config.fallback_to_localhost = false;
    let mut engine = engine(dir.path(), &net, config);

    let err = engine.up(&services(), Strategy::LanVisible).await.unwrap_err();
    assert!(matches!(err, Error::PrivilegeRequired { .. }));
    assert!(engine.status().is_none());
}

#[smol_potat::test]
async fn test_conflict_never_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan()
        .with_neighbor(lan(100), FOREIGN_MAC)
        .into_arc();
    let mut engine = engine(dir.path(), &net, config());

    let err = engine.up(&services(), Strategy::LanVisible).await.unwrap_err();
    assert!(matches!(err, Error::ConflictDetected { .. }));
    assert!(net.bound_addresses().is_empty());
    assert!(engine.status().is_none());
}

#[smol_potat::test]
async fn test_repeated_up_releases_previous_batch() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().into_arc();

    let mut first = engine(dir.path(), &net, config());
    let a = first.up(&services(), Strategy::LanVisible).await.unwrap();

    let mut second = engine(dir.path(), &net, config());
    let b = second.up(&services(), Strategy::LanVisible).await.unwrap();

    assert_eq!(a.record.addresses(), b.record.addresses());
    assert_eq!(net.bound_addresses().len(), 3);
}

#[smol_potat::test]
async fn test_subnet_strategy_with_helper() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().into_arc();
    let mut config = config();
    config.helper.program = "true".into();
    let mut engine = engine(dir.path(), &net, config);

    let outcome = engine.up(&services(), Strategy::IsolatedSubnet).await.unwrap();
    assert_eq!(outcome.record.strategy, Strategy::IsolatedSubnet);
    assert_eq!(
        outcome.record.get("api").unwrap().address,
        Some(IpAddr::V4(Ipv4Addr::new(172, 20, 0, 10)))
    );
    assert_eq!(
        outcome.record.get("worker").unwrap().address,
        Some(IpAddr::V4(Ipv4Addr::new(172, 20, 0, 12)))
    );
    assert!(engine.store().subnet_map().exists());

    let summary = engine.down().await.unwrap();
    assert!(summary.subnet_torn_down);
    assert!(!engine.store().subnet_map().exists());
}

#[smol_potat::test]
async fn test_failing_helper_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().into_arc();
    let mut config = config();
    config.helper.program = "false".into();
    let mut engine = engine(dir.path(), &net, config);

    let outcome = engine.up(&services(), Strategy::IsolatedSubnet).await.unwrap();
    assert!(outcome.fell_back());
    assert_eq!(outcome.record.strategy, Strategy::None);
    assert!(outcome.record.addresses().is_empty());
}

#[smol_potat::test]
async fn test_port_exhaustion_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().into_arc();
    let mut engine = AllocationEngine::new(dir.path(), config())
        .unwrap()
        .with_host_network(net.clone())
        .with_port_allocator(
            PortAllocator::with_claimed(8000, 8001, [8000])
                .unwrap()
                .with_probe(|_| true),
        );

    let err = engine.up(&services(), Strategy::None).await.unwrap_err();
    assert!(matches!(err, Error::NoPortsAvailable { start: 8000, end: 8001 }));
}

#[smol_potat::test]
async fn test_hosts_file_sink_follows_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = dir.path().join("hosts");
    std::fs::write(&hosts, "127.0.0.1\tlocalhost\n").unwrap();

    let net = FakeNetwork::lan().into_arc();
    let mut engine = engine(dir.path(), &net, config())
        .with_sink(Box::new(HostsFileSink::new(&hosts, "test.lan")));

    engine.up(&services(), Strategy::LanVisible).await.unwrap();
    let content = std::fs::read_to_string(&hosts).unwrap();
    assert!(content.contains("192.168.1.100\tapi.test.lan"));
    assert!(content.contains("192.168.1.102\tworker.test.lan"));

    engine.down().await.unwrap();
    assert_eq!(std::fs::read_to_string(&hosts).unwrap(), "127.0.0.1\tlocalhost\n");
}

#[smol_potat::test]
async fn test_state_survives_engine_restart() {
    let dir = tempfile::tempdir().unwrap();
    let net = FakeNetwork::lan().into_arc();

    let mut engine_a = engine(dir.path(), &net, config());
    engine_a.up(&services(), Strategy::LanVisible).await.unwrap();
    drop(engine_a);

    let engine_b = engine(dir.path(), &net, config());
    assert!(StateStore::new(dir.path().join(".netclaim")).has_claims());
    assert_eq!(engine_b.status().unwrap().addresses().len(), 3);

    engine_b.down().await.unwrap();
    assert!(net.bound_addresses().is_empty());
    assert!(!engine_b.store().has_claims());
}
