//! 注册器行为测试（内存后端）

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use common::{MockRegistry, descriptor, test_config};
use flare_discovery::schema::fields;
use flare_discovery::{
    DiscoveryError, InstanceRecord, Registrator, ServiceDescriptor, ServiceType,
};

fn registrator(registry: &Arc<MockRegistry>, singleton: bool, resilience: bool) -> Registrator {
    Registrator::new(registry.clone(), descriptor(singleton), resilience)
}

/// 注册：按固定顺序写入实例节点与标量字段，状态转为已注册
#[tokio::test]
async fn first_tick_registers_and_writes_fields_in_order() {
    let registry = MockRegistry::new();
    let mut config = test_config(false);
    config.service.container_url = Some("http://edge.example.com:80".to_string());
    config.service.cluster_id = Some("cluster-a".to_string());
    let descriptor = ServiceDescriptor::from_config(&config, ServiceType::Rest).expect("valid");
    let key = descriptor.instance_key();
    let mut registrator = Registrator::new(registry.clone(), descriptor, true);

    registrator.tick().await.expect("tick succeeds");

    assert!(registrator.is_registered());
    assert!(registry.contains(&key).await);
    assert_eq!(
        registry.operations().await,
        vec![
            format!("register {}", key.path()),
            "field type=REST".to_string(),
            "field url=http://10.0.0.1:8080".to_string(),
            "field containerUrl=http://edge.example.com:80".to_string(),
            "field clusterId=cluster-a".to_string(),
        ]
    );
}

/// 与基地址相同的 containerUrl 不单独写入
#[tokio::test]
async fn identical_container_url_is_not_written() {
    let registry = MockRegistry::new();
    let mut config = test_config(false);
    config.service.container_url = Some("http://10.0.0.1:8080".to_string());
    let descriptor = ServiceDescriptor::from_config(&config, ServiceType::Rest).expect("valid");
    let mut registrator = Registrator::new(registry.clone(), descriptor, true);

    registrator.tick().await.expect("tick succeeds");

    let operations = registry.operations().await;
    assert!(
        !operations.iter().any(|op| op.contains("containerUrl")),
        "containerUrl should not be written: {:?}",
        operations
    );
}

/// 单例冲突：已有活跃实例时跳过注册，状态不变
#[tokio::test]
async fn singleton_conflict_skips_registration() {
    let registry = MockRegistry::new();
    let descriptor = descriptor(true);
    let peer_key = flare_discovery::InstanceKey::new(
        descriptor.service_key(),
        &descriptor.version,
        "node-0",
    );
    let mut peer = InstanceRecord::new("node-0");
    peer.set_field(fields::URL, "http://10.0.0.2:8080".to_string());
    registry.insert_record(&peer_key, peer).await;

    let mut registrator = Registrator::new(registry.clone(), descriptor, true);
    registrator.tick().await.expect("tick succeeds");

    assert!(!registrator.is_registered());
    let operations = registry.operations().await;
    assert!(
        !operations.iter().any(|op| op.starts_with("register")),
        "registration must be skipped: {:?}",
        operations
    );
}

/// 停用的同版本实例不阻止单例注册
#[tokio::test]
async fn singleton_ignores_disabled_peers() {
    let registry = MockRegistry::new();
    let descriptor = descriptor(true);
    let peer_key = flare_discovery::InstanceKey::new(
        descriptor.service_key(),
        &descriptor.version,
        "node-0",
    );
    let mut peer = InstanceRecord::new("node-0");
    peer.set_field(fields::URL, "http://10.0.0.2:8080".to_string());
    peer.set_field(fields::STATUS, "disabled".to_string());
    registry.insert_record(&peer_key, peer).await;

    let mut registrator = Registrator::new(registry.clone(), descriptor, true);
    registrator.tick().await.expect("tick succeeds");

    assert!(registrator.is_registered());
}

/// 续期发现键已过期：同一次心跳内重新注册并以已注册状态结束
#[tokio::test]
async fn expired_key_is_reregistered_within_one_tick() {
    let registry = MockRegistry::new();
    let mut registrator = registrator(&registry, false, true);
    registrator.tick().await.expect("initial registration");
    let key = registrator.descriptor().instance_key();

    // 模拟 TTL 过期：节点消失
    registry.remove_record(&key).await;
    registrator.tick().await.expect("recovery tick");

    assert!(registrator.is_registered());
    assert!(registry.contains(&key).await);
    let operations = registry.operations().await;
    let refresh_at = operations
        .iter()
        .position(|op| op.starts_with("refresh"))
        .expect("renewal attempted");
    assert!(
        operations[refresh_at + 1..]
            .iter()
            .any(|op| op.starts_with("register")),
        "reregistration must follow the failed renewal: {:?}",
        operations
    );
}

/// 弹性模式：瞬时失败被消化，状态不变
#[tokio::test]
async fn resilient_tick_swallows_timeouts() {
    let registry = MockRegistry::new();
    let mut registrator = registrator(&registry, false, true);
    registrator.tick().await.expect("initial registration");

    registry
        .push_refresh_error(DiscoveryError::timeout("connection refused"))
        .await;
    registrator.tick().await.expect("transient failure is absorbed");

    assert!(registrator.is_registered());
}

/// 弹性模式关闭：瞬时失败升级为致命错误
#[tokio::test]
async fn timeout_without_resilience_aborts() {
    let registry = MockRegistry::new();
    registry
        .push_register_error(DiscoveryError::timeout("connection refused"))
        .await;

    let mut registrator = registrator(&registry, false, false);
    let err = registrator.tick().await.expect_err("tick must abort");

    assert!(err.is_fatal());
    assert!(!registrator.is_registered());
}

/// 认证失败从不终止调度，也不改变状态
#[tokio::test]
async fn auth_failure_never_aborts() {
    let registry = MockRegistry::new();
    registry
        .push_register_error(DiscoveryError::auth("bad credentials"))
        .await;

    let mut registrator = registrator(&registry, false, false);
    registrator.tick().await.expect("auth failure is only logged");
    assert!(!registrator.is_registered());

    // 下一次心跳正常注册
    registrator.tick().await.expect("retry succeeds");
    assert!(registrator.is_registered());
}

/// 瞬时失败后的退避：延迟未过的心跳被跳过，延迟过后恢复注册
#[tokio::test(start_paused = true)]
async fn transient_failure_backs_off_subsequent_ticks() {
    let registry = MockRegistry::new();
    registry
        .push_register_error(DiscoveryError::timeout("connection refused"))
        .await;

    let mut registrator = registrator(&registry, false, true);
    registrator.tick().await.expect("failure absorbed");
    let attempts = registry.operations().await.len();

    // 退避窗口内的心跳不碰后端
    registrator.tick().await.expect("tick skipped");
    assert_eq!(registry.operations().await.len(), attempts);

    tokio::time::advance(Duration::from_millis(600)).await;
    registrator.tick().await.expect("registration retried");
    assert!(registrator.is_registered());
}

/// 注销对不存在的键幂等
#[tokio::test]
async fn deregister_is_idempotent() {
    let registry = MockRegistry::new();
    let mut registrator = registrator(&registry, false, true);

    registrator.deregister().await.expect("absent key is fine");
    registrator.deregister().await.expect("still fine");
}

/// 调度循环：关闭信号停止心跳并注销一次
#[tokio::test]
async fn run_loop_registers_and_deregisters_on_shutdown() {
    let registry = MockRegistry::new();
    let registrator = registrator(&registry, false, true);
    let key = registrator.descriptor().instance_key();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(registrator.run(shutdown_rx));

    // 首个心跳立即触发
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(registry.contains(&key).await);

    shutdown_tx.send(()).expect("loop is alive");
    handle
        .await
        .expect("task joins")
        .expect("clean shutdown");

    assert!(!registry.contains(&key).await);
    assert!(
        registry
            .operations()
            .await
            .iter()
            .any(|op| op.starts_with("delete")),
        "shutdown must deregister"
    );
}

/// 调度循环：弹性模式关闭时致命错误终止循环，不再有后续心跳
#[tokio::test]
async fn run_loop_aborts_on_fatal_error() {
    let registry = MockRegistry::new();
    registry
        .push_register_error(DiscoveryError::timeout("connection refused"))
        .await;

    let registrator = registrator(&registry, false, false);
    let (_shutdown_tx, shutdown_rx) = oneshot::channel();
    let outcome = tokio::spawn(registrator.run(shutdown_rx))
        .await
        .expect("task joins");

    let err = outcome.expect_err("loop must abort");
    assert!(err.is_fatal());
    assert!(
        !registry
            .operations()
            .await
            .iter()
            .any(|op| op.starts_with("delete")),
        "fatal abort must not deregister"
    );
}
