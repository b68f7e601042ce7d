//! 注册器：心跳状态机与调度循环
//!
//! 状态只有未注册/已注册两种。每次心跳要么注册（首次或检测到过期
//! 之后），要么续期 TTL。心跳在单个任务内串行执行，注册状态不需要
//! 额外同步，也不对外暴露可变入口。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::config::ServiceDescriptor;
use crate::error::{DiscoveryError, Result};
use crate::registry::RegistryBackend;
use crate::schema::{InstanceKey, fields};

/// 心跳状态机
pub struct Registrator {
    backend: Arc<dyn RegistryBackend>,
    descriptor: ServiceDescriptor,
    resilience: bool,
    registered: bool,
    retry_delay: Duration,
    backoff_until: Option<Instant>,
}

impl Registrator {
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        descriptor: ServiceDescriptor,
        resilience: bool,
    ) -> Self {
        let retry_delay = Duration::from_millis(descriptor.start_retry_delay_ms);
        Self {
            backend,
            descriptor,
            resilience,
            registered: false,
            retry_delay,
            backoff_until: None,
        }
    }

    /// 当前是否处于已注册状态
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// 执行一次心跳
    ///
    /// 仅在弹性模式关闭且后端瞬时不可用时返回错误，调度循环据此
    /// 停止。其他失败都在此消化。
    pub async fn tick(&mut self) -> Result<()> {
        if let Some(until) = self.backoff_until {
            if Instant::now() < until {
                debug!(
                    instance = %self.descriptor.instance_key(),
                    "Skipping tick, waiting out the retry delay"
                );
                return Ok(());
            }
            self.backoff_until = None;
        }
        if self.registered {
            self.renew().await
        } else {
            self.register().await
        }
    }

    async fn renew(&mut self) -> Result<()> {
        let key = self.descriptor.instance_key();
        debug!(instance = %key, "Sending heartbeat");
        match self.backend.refresh_ttl(&key, self.descriptor.ttl).await {
            Ok(()) => {
                self.reset_backoff();
                Ok(())
            }
            Err(DiscoveryError::KeyNotFound(_)) => {
                // 节点已过期（错过续期窗口或后端重启），同一次心跳内重新注册
                warn!(instance = %key, "Registry key not present, reregistering service");
                self.registered = false;
                self.register().await
            }
            Err(err) => self.absorb("heartbeat", err),
        }
    }

    async fn register(&mut self) -> Result<()> {
        let key = self.descriptor.instance_key();

        if self.descriptor.singleton {
            match self
                .backend
                .list_instances(&key.service, &key.version)
                .await
            {
                Ok(instances) if instances.iter().any(|record| record.is_active()) => {
                    warn!(
                        service = %key.service,
                        "Instance was not registered: another active instance of a singleton service is already registered"
                    );
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => return self.absorb("singleton check", err),
            }
        }

        info!(instance = %key, service_type = %self.descriptor.service_type, "Registering service");
        if let Err(err) = self.write_registration(&key).await {
            return self.absorb("register", err);
        }
        self.registered = true;
        self.reset_backoff();
        info!(instance = %key, "✅ Service registered");
        Ok(())
    }

    /// 按固定顺序写入实例节点与标量字段
    async fn write_registration(&self, key: &InstanceKey) -> Result<()> {
        let descriptor = &self.descriptor;
        self.backend.register_instance(key, descriptor.ttl).await?;
        self.backend
            .write_field(key, fields::TYPE, descriptor.service_type.as_str())
            .await?;
        self.backend
            .write_field(key, fields::URL, &descriptor.base_url)
            .await?;
        if let Some(container_url) = descriptor.container_url.as_deref() {
            if container_url != descriptor.base_url {
                self.backend
                    .write_field(key, fields::CONTAINER_URL, container_url)
                    .await?;
            }
        }
        if let Some(cluster_id) = descriptor.cluster_id.as_deref() {
            self.backend
                .write_field(key, fields::CLUSTER_ID, cluster_id)
                .await?;
        }
        Ok(())
    }

    /// 消化一次失败：瞬时失败按弹性策略处理，其余仅记录
    fn absorb(&mut self, operation: &str, err: DiscoveryError) -> Result<()> {
        match err {
            DiscoveryError::Timeout(reason) => {
                if self.resilience {
                    warn!(
                        operation,
                        instance = %self.descriptor.instance_key(),
                        error = %reason,
                        "Registry not reachable, will retry on a later tick"
                    );
                    self.back_off();
                    Ok(())
                } else {
                    error!(
                        operation,
                        instance = %self.descriptor.instance_key(),
                        error = %reason,
                        "Registry not reachable and resilience is disabled, stopping the schedule"
                    );
                    Err(DiscoveryError::RegistryUnavailable(reason))
                }
            }
            DiscoveryError::Auth(reason) => {
                error!(
                    operation,
                    instance = %self.descriptor.instance_key(),
                    error = %reason,
                    "Registry authentication failed"
                );
                Ok(())
            }
            err => {
                warn!(
                    operation,
                    instance = %self.descriptor.instance_key(),
                    error = %err,
                    "Registry operation failed"
                );
                Ok(())
            }
        }
    }

    /// 瞬时失败后的退避：跳过若干次心跳，延迟翻倍直至上限
    fn back_off(&mut self) {
        self.backoff_until = Some(Instant::now() + self.retry_delay);
        self.retry_delay = self
            .retry_delay
            .saturating_mul(2)
            .min(Duration::from_millis(self.descriptor.max_retry_delay_ms));
    }

    fn reset_backoff(&mut self) {
        self.retry_delay = Duration::from_millis(self.descriptor.start_retry_delay_ms);
        self.backoff_until = None;
    }

    /// 显式注销，删除实例子树；键已不存在时同样视为成功
    pub async fn deregister(&mut self) -> Result<()> {
        let key = self.descriptor.instance_key();
        match self.backend.delete_instance_tree(&key).await {
            Ok(()) | Err(DiscoveryError::KeyNotFound(_)) => {
                self.registered = false;
                info!(instance = %key, "Service deregistered");
                Ok(())
            }
            Err(err) => {
                warn!(instance = %key, error = %err, "Failed to deregister service");
                Err(err)
            }
        }
    }

    /// 调度循环：按 `ping_interval` 周期执行心跳，收到关闭信号后
    /// 注销一次并退出
    ///
    /// 弹性模式关闭时，瞬时失败使循环以错误结束，不再有后续心跳，
    /// 也不注销，注销留给进程关闭路径处理。
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
        let mut ticker = interval(Duration::from_secs(self.descriptor.ping_interval));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(instance = %self.descriptor.instance_key(), "🛑 Heartbeat schedule stopped");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        error!(error = %err, "Heartbeat schedule aborted");
                        return Err(err);
                    }
                }
            }
        }
        // 关闭路径：无论最后一次心跳结果如何都注销一次
        let _ = self.deregister().await;
        Ok(())
    }
}
