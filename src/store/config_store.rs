//! 版本化配置存储
//!
//! - 读：在读锁下克隆 `Arc<ServiceConfig>`，拿到完整不可变快照
//! - 写：同一服务的写操作通过该服务的写锁串行化，不同服务互不影响
//! - 发布：新配置整体替换旧快照（copy-on-write），已发布的快照从不原地修改

use crate::error::{AllocatorError, ErrorCode, Result};
use crate::store::member::MemberSpec;
use crate::store::membership::{HolePolicy, MembershipDiff, MergeOutcome, merge_membership};
use crate::store::service_config::{ServiceConfig, validate_block_length};
use crate::types::RegistryInstance;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// 默认块长度
pub const DEFAULT_BLOCK_LENGTH: u32 = 1024;

struct ServiceEntry {
    snapshot: RwLock<Arc<ServiceConfig>>,
    write_lock: Mutex<()>,
    watchers: AtomicUsize,
}

impl ServiceEntry {
    fn new(config: ServiceConfig) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(config)),
            write_lock: Mutex::new(()),
            watchers: AtomicUsize::new(0),
        }
    }

    fn load(&self) -> Arc<ServiceConfig> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn publish(&self, config: ServiceConfig) -> Arc<ServiceConfig> {
        let config = Arc::new(config);
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = config.clone();
        config
    }
}

/// 服务配置存储（进程内唯一，由 `Arc` 共享）
pub struct ConfigStore {
    services: RwLock<HashMap<String, Arc<ServiceEntry>>>,
    default_block_length: AtomicU32,
}

/// 标记服务正在被引用（例如有调和循环在运行），drop 时自动释放
pub struct WatchGuard {
    entry: Arc<ServiceEntry>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.entry.watchers.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConfigStore {
    pub fn new(default_block_length: u32) -> Result<Self> {
        validate_block_length(i64::from(default_block_length))?;
        Ok(Self {
            services: RwLock::new(HashMap::new()),
            default_block_length: AtomicU32::new(default_block_length),
        })
    }

    /// 获取服务配置快照
    pub fn get(&self, name: &str) -> Result<Arc<ServiceConfig>> {
        self.entry(name)
            .map(|entry| entry.load())
            .ok_or_else(|| AllocatorError::not_found(name))
    }

    /// 所有服务名（已排序）
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_services().keys().cloned().collect();
        names.sort();
        names
    }

    /// 新服务使用的默认块长度
    pub fn default_block_length(&self) -> u32 {
        self.default_block_length.load(Ordering::Acquire)
    }

    /// 全量替换服务配置，返回新版本号
    pub fn replace(
        &self,
        name: &str,
        specs: &[MemberSpec],
        expected_version: Option<u64>,
    ) -> Result<u64> {
        if let Some(entry) = self.entry(name) {
            let replaced = self.update(&entry, name, expected_version, |current| {
                // 块长度保持不变
                ServiceConfig::from_specs(name, specs, current.block_length)
            });
            match replaced {
                Err(e) if e.is(ErrorCode::NotFound) => {}
                other => return other,
            }
        }

        if let Some(expected) = expected_version {
            if expected != 0 {
                return Err(AllocatorError::version_conflict(name, expected, 0));
            }
        }
        let mut config = ServiceConfig::from_specs(name, specs, self.default_block_length())?;
        config.version = 1;
        self.insert_new(name, config)
    }

    /// 修改分组大小，之和必须等于当前成员数
    pub fn mutate_groups(
        &self,
        name: &str,
        sizes: &[usize],
        expected_version: Option<u64>,
    ) -> Result<u64> {
        let entry = self.entry(name).ok_or_else(|| AllocatorError::not_found(name))?;
        self.update(&entry, name, expected_version, |current| {
            current.with_group_sizes(sizes.to_vec())
        })
    }

    /// 修改单个服务的块长度
    pub fn mutate_block_length(
        &self,
        name: &str,
        block_length: i64,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        let entry = self.entry(name).ok_or_else(|| AllocatorError::not_found(name))?;
        self.update(&entry, name, expected_version, |current| {
            current.with_block_length(block_length)
        })
    }

    /// 修改全局默认块长度，并应用到所有已有服务
    ///
    /// 注意：旧的调用方只发送一个整数，无法判断块长度是全局参数还是服务级参数。
    /// 这里按"服务级 + 全局默认值"处理：整数请求同时更新默认值和所有服务。
    pub fn mutate_default_block_length(&self, block_length: i64) -> Result<HashMap<String, u64>> {
        let validated = validate_block_length(block_length)?;
        self.default_block_length.store(validated, Ordering::Release);

        let mut versions = HashMap::new();
        for name in self.names() {
            match self.mutate_block_length(&name, block_length, None) {
                Ok(version) => {
                    versions.insert(name, version);
                }
                // 并发 GC 可能已删除该服务
                Err(e) if e.is(ErrorCode::NotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(versions)
    }

    /// 合并注册中心观察到的实例
    pub fn apply_membership(
        &self,
        name: &str,
        observed: &[RegistryInstance],
        policy: &HolePolicy,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<MembershipDiff> {
        let entry = match self.entry(name) {
            Some(entry) => entry,
            None if observed.is_empty() => return Ok(MembershipDiff::default()),
            None => self.get_or_insert(
                name,
                ServiceConfig::single_group(name, Vec::new(), self.default_block_length())?,
            ),
        };

        let _writer = entry
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.is_registered(name, &entry) {
            drop(_writer);
            return self.apply_membership(name, observed, policy, now);
        }
        let current = entry.load();

        match merge_membership(&current, observed, policy, now)? {
            MergeOutcome::Unchanged => Ok(MembershipDiff {
                version: current.version,
                ..MembershipDiff::default()
            }),
            MergeOutcome::KeptPrior => {
                warn!(
                    service = %name,
                    healthy = current.healthy_count(),
                    "No healthy instance reported for an active service, keeping prior config"
                );
                Ok(MembershipDiff {
                    version: current.version,
                    kept_prior: true,
                    ..MembershipDiff::default()
                })
            }
            MergeOutcome::Changed(mut next, mut diff) => {
                next.version = current.version + 1;
                diff.version = next.version;
                entry.publish(next);
                info!(
                    service = %name,
                    version = diff.version,
                    added = ?diff.added,
                    holed = ?diff.holed,
                    restored = ?diff.restored,
                    purged = ?diff.purged,
                    updated_ids = ?diff.updated_ids,
                    "Membership applied"
                );
                Ok(diff)
            }
        }
    }

    /// 标记服务被引用，阻止其被回收
    pub fn watch(&self, name: &str) -> Result<WatchGuard> {
        let empty = ServiceConfig::single_group(name, Vec::new(), self.default_block_length())?;
        // 引用计数必须在索引写锁内增加，否则 GC 可能在两步之间回收该服务
        let mut services = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let entry = services
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ServiceEntry::new(empty)))
            .clone();
        entry.watchers.fetch_add(1, Ordering::AcqRel);
        Ok(WatchGuard { entry })
    }

    /// 原子地修改多个服务
    ///
    /// 按名称顺序获取所有服务的写锁，再持有索引写锁完成版本比对、草稿构建和发布。
    /// 任何一个服务失败时不发布任何修改。`create_missing` 为 false 时缺失的服务返回 `NotFound`，
    /// 否则 `build` 收到 `None` 并以版本 1 创建。
    pub fn update_many<F>(
        &self,
        names: &BTreeSet<String>,
        expected_version: Option<u64>,
        create_missing: bool,
        mut build: F,
    ) -> Result<HashMap<String, u64>>
    where
        F: FnMut(&str, Option<&ServiceConfig>) -> Result<ServiceConfig>,
    {
        loop {
            let entries: Vec<(&String, Option<Arc<ServiceEntry>>)> =
                names.iter().map(|name| (name, self.entry(name))).collect();
            if !create_missing {
                if let Some((name, _)) = entries.iter().find(|(_, entry)| entry.is_none()) {
                    return Err(AllocatorError::not_found(name.as_str()));
                }
            }

            // 锁顺序：服务写锁（按名称）在前，索引锁在后
            let _writers: Vec<MutexGuard<'_, ()>> = entries
                .iter()
                .filter_map(|(_, entry)| entry.as_ref())
                .map(|entry| {
                    entry
                        .write_lock
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                })
                .collect();
            let mut services = self
                .services
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            let stale = entries.iter().any(|(name, entry)| {
                match (services.get(name.as_str()), entry) {
                    (Some(current), Some(entry)) => !Arc::ptr_eq(current, entry),
                    (None, None) => false,
                    _ => true,
                }
            });
            if stale {
                // 加锁期间有服务被创建或回收
                continue;
            }

            let mut drafts = Vec::with_capacity(entries.len());
            for (name, entry) in &entries {
                let current = entry.as_ref().map(|entry| entry.load());
                let actual = current.as_ref().map_or(0, |current| current.version);
                if let Some(expected) = expected_version {
                    if expected != actual {
                        return Err(AllocatorError::version_conflict(
                            name.as_str(),
                            expected,
                            actual,
                        ));
                    }
                }
                let mut next = build(name.as_str(), current.as_deref())?;
                next.version = actual + 1;
                drafts.push(next);
            }

            let mut versions = HashMap::with_capacity(drafts.len());
            for ((name, entry), next) in entries.iter().zip(drafts) {
                versions.insert((*name).clone(), next.version);
                match entry {
                    Some(entry) => {
                        entry.publish(next);
                    }
                    None => {
                        services.insert((*name).clone(), Arc::new(ServiceEntry::new(next)));
                    }
                }
            }
            return Ok(versions);
        }
    }

    /// 回收没有成员且未被引用的服务，返回被回收的服务名
    pub fn collect_garbage(&self) -> Vec<String> {
        let mut services = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut collected = Vec::new();
        services.retain(|name, entry| {
            // 正在写入的服务不回收
            let idle = entry.watchers.load(Ordering::Acquire) == 0
                && entry.write_lock.try_lock().is_ok()
                && entry.load().is_empty();
            if idle {
                collected.push(name.clone());
            }
            !idle
        });
        if !collected.is_empty() {
            debug!(services = ?collected, "Collected empty services");
        }
        collected
    }

    fn update<F>(
        &self,
        entry: &ServiceEntry,
        name: &str,
        expected_version: Option<u64>,
        mutate: F,
    ) -> Result<u64>
    where
        F: FnOnce(&ServiceConfig) -> Result<ServiceConfig>,
    {
        let _writer = entry
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.is_registered(name, entry) {
            // 拿到写锁前该服务已被回收
            return Err(AllocatorError::not_found(name));
        }
        let current = entry.load();

        if let Some(expected) = expected_version {
            if expected != current.version {
                return Err(AllocatorError::version_conflict(name, expected, current.version));
            }
        }

        let mut next = mutate(&current)?;
        next.version = current.version + 1;
        let version = next.version;
        entry.publish(next);
        Ok(version)
    }

    fn insert_new(&self, name: &str, config: ServiceConfig) -> Result<u64> {
        let mut services = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = services.get(name).cloned() {
            // 并发创建：退化为普通替换
            drop(services);
            let members = config.members;
            return self.update(&existing, name, None, move |current| {
                ServiceConfig::single_group(name, members, current.block_length)
            });
        }
        let version = config.version;
        services.insert(name.to_string(), Arc::new(ServiceEntry::new(config)));
        Ok(version)
    }

    fn get_or_insert(&self, name: &str, config: ServiceConfig) -> Arc<ServiceEntry> {
        self.services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(ServiceEntry::new(config)))
            .clone()
    }

    fn is_registered(&self, name: &str, entry: &ServiceEntry) -> bool {
        self.read_services()
            .get(name)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), entry))
    }

    fn entry(&self, name: &str) -> Option<Arc<ServiceEntry>> {
        self.read_services().get(name).cloned()
    }

    fn read_services(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ServiceEntry>>> {
        self.services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            default_block_length: AtomicU32::new(DEFAULT_BLOCK_LENGTH),
        }
    }
}
