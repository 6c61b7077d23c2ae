use super::statement::{ExecuteListener, MappedStatement};
use indexmap::IndexMap;
use log::debug;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// LRU/FIFO 缓存的默认容量
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// 缓存实现
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheImplementation {
    /// 不淘汰
    Basic,
    /// 超出容量时淘汰最久未使用的
    Lru,
    /// 超出容量时淘汰最早插入的
    Fifo,
}

impl CacheImplementation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "basic" => Some(CacheImplementation::Basic),
            "lru" => Some(CacheImplementation::Lru),
            "fifo" => Some(CacheImplementation::Fifo),
            _ => None,
        }
    }
}

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn raw(key: &str) -> Self {
        CacheKey(key.to_string())
    }

    /// 值序列化后的 SHA-256 摘要
    ///
    /// `serde_json` 的对象按键排序输出，同样内容的值得到同样的键。
    pub fn from_value(value: &Value) -> Self {
        let serialized = value.to_string();
        CacheKey(format!("{:x}", Sha256::digest(serialized.as_bytes())))
    }

    /// 一次查询请求的键
    pub fn for_request(
        statement: &str,
        kind: &str,
        parameter: &Value,
        skip: Option<usize>,
        max: Option<usize>,
    ) -> Self {
        Self::from_value(&json!([statement, kind, parameter, skip, max]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
struct CacheState {
    entries: IndexMap<CacheKey, Value>,
    hits: u64,
    requests: u64,
    last_flush: Instant,
    /// 每次清空加一，用于丢弃清空前开始的查询结果
    generation: u64,
}

impl CacheState {
    fn clear(&mut self) {
        self.entries.clear();
        self.last_flush = Instant::now();
        self.generation += 1;
    }
}

/// 缓存模型
pub struct CacheModel {
    id: String,
    implementation: CacheImplementation,
    capacity: usize,
    /// 为零表示不按时间清空
    flush_interval: Duration,
    trigger_statements: Vec<String>,
    state: Mutex<CacheState>,
}

impl fmt::Debug for CacheModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheModel")
            .field("id", &self.id)
            .field("implementation", &self.implementation)
            .field("capacity", &self.capacity)
            .field("flush_interval", &self.flush_interval)
            .field("trigger_statements", &self.trigger_statements)
            .finish()
    }
}

impl CacheModel {
    pub fn new(id: &str, implementation: CacheImplementation) -> Self {
        CacheModel {
            id: id.to_string(),
            implementation,
            capacity: DEFAULT_CACHE_SIZE,
            flush_interval: Duration::ZERO,
            trigger_statements: Vec::new(),
            state: Mutex::new(CacheState {
                entries: IndexMap::new(),
                hits: 0,
                requests: 0,
                last_flush: Instant::now(),
                generation: 0,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn implementation(&self) -> CacheImplementation {
        self.implementation
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn set_flush_interval(&mut self, interval: Duration) {
        self.flush_interval = interval;
    }

    /// 执行后需要清空本缓存的语句
    pub fn trigger_statements(&self) -> &[String] {
        &self.trigger_statements
    }

    pub fn add_trigger_statement(&mut self, statement: &str) {
        self.trigger_statements.push(statement.to_string());
    }

    /// 让语句在成功执行后清空本缓存
    pub fn register_trigger_statement(self: &Arc<Self>, statement: &mut MappedStatement) {
        debug!(
            "cache model '{}' is flushed by statement '{}'",
            self.id,
            statement.id()
        );
        statement.add_listener(self.clone());
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.flush_interval.is_zero() && state.last_flush.elapsed() >= self.flush_interval {
            debug!("cache model '{}' flush interval elapsed", self.id);
            state.clear();
        }
        state
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let mut state = self.state();
        state.requests += 1;
        let index = state.entries.get_index_of(key)?;
        state.hits += 1;
        if self.implementation == CacheImplementation::Lru {
            let last = state.entries.len() - 1;
            state.entries.move_index(index, last);
            return state.entries.get_index(last).map(|(_, v)| v.clone());
        }
        state.entries.get_index(index).map(|(_, v)| v.clone())
    }

    /// 写入缓存，NULL 不缓存
    pub fn set(&self, key: CacheKey, value: Value) {
        let mut state = self.state();
        self.store(&mut state, key, value);
    }

    /// 当前的清空代数
    pub fn generation(&self) -> u64 {
        self.state().generation
    }

    /// 仅当读取 `generation` 之后没有发生清空时写入
    pub fn set_at(&self, key: CacheKey, value: Value, generation: u64) -> bool {
        let mut state = self.state();
        if state.generation != generation {
            debug!(
                "cache model '{}' flushed during execution, result not stored",
                self.id
            );
            return false;
        }
        self.store(&mut state, key, value);
        true
    }

    fn store(&self, state: &mut CacheState, key: CacheKey, value: Value) {
        if value.is_null() {
            return;
        }
        match self.implementation {
            CacheImplementation::Basic => {
                state.entries.insert(key, value);
            }
            CacheImplementation::Lru => {
                state.entries.shift_remove(&key);
                state.entries.insert(key, value);
            }
            CacheImplementation::Fifo => {
                state.entries.insert(key, value);
            }
        }
        if self.implementation != CacheImplementation::Basic {
            while state.entries.len() > self.capacity {
                state.entries.shift_remove_index(0);
            }
        }
    }

    pub fn flush(&self) {
        debug!("flushing cache model '{}'", self.id);
        self.state().clear();
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.state().hits
    }

    pub fn requests(&self) -> u64 {
        self.state().requests
    }

    /// 命中率，没有请求时为 0
    pub fn hit_ratio(&self) -> f64 {
        let state = self.state();
        if state.requests == 0 {
            0.0
        } else {
            state.hits as f64 / state.requests as f64
        }
    }
}

impl ExecuteListener for CacheModel {
    fn on_executed(&self, statement: &str) {
        debug!("statement '{statement}' executed, flushing cache model '{}'", self.id);
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::model::{Statement, StatementKind};

    #[test]
    fn counts_requests_and_hits() {
        let cache = CacheModel::new("c", CacheImplementation::Basic);
        assert_eq!(cache.hit_ratio(), 0.0);

        cache.set(CacheKey::raw("k"), json!([1, 2]));
        assert_eq!(cache.get(&CacheKey::raw("k")), Some(json!([1, 2])));
        assert_eq!(cache.get(&CacheKey::raw("other")), None);

        assert_eq!(cache.requests(), 2);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.hit_ratio(), 0.5);
    }

    #[test]
    fn null_is_not_stored() {
        let cache = CacheModel::new("c", CacheImplementation::Basic);
        cache.set(CacheKey::raw("k"), Value::Null);
        assert!(cache.is_empty());
    }

    #[test]
    fn value_keys_are_deterministic() {
        let a = CacheKey::from_value(&json!({"b": 1, "a": [1, 2]}));
        let b = CacheKey::from_value(&json!({"a": [1, 2], "b": 1}));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, CacheKey::from_value(&json!({"a": [2, 1], "b": 1})));
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut cache = CacheModel::new("c", CacheImplementation::Lru);
        cache.set_capacity(2);
        cache.set(CacheKey::raw("a"), json!(1));
        cache.set(CacheKey::raw("b"), json!(2));
        assert!(cache.get(&CacheKey::raw("a")).is_some());
        cache.set(CacheKey::raw("c"), json!(3));

        assert!(cache.get(&CacheKey::raw("b")).is_none());
        assert!(cache.get(&CacheKey::raw("a")).is_some());
        assert!(cache.get(&CacheKey::raw("c")).is_some());
    }

    #[test]
    fn fifo_evicts_oldest_inserted() {
        let mut cache = CacheModel::new("c", CacheImplementation::Fifo);
        cache.set_capacity(2);
        cache.set(CacheKey::raw("a"), json!(1));
        cache.set(CacheKey::raw("b"), json!(2));
        assert!(cache.get(&CacheKey::raw("a")).is_some());
        cache.set(CacheKey::raw("c"), json!(3));

        assert!(cache.get(&CacheKey::raw("a")).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn flushed_generation_rejects_stale_results() {
        let cache = CacheModel::new("c", CacheImplementation::Basic);
        let generation = cache.generation();
        cache.flush();
        assert!(!cache.set_at(CacheKey::raw("k"), json!(1), generation));
        assert!(cache.is_empty());
        assert!(cache.set_at(CacheKey::raw("k"), json!(1), cache.generation()));
    }

    #[test]
    fn expired_interval_flushes_on_access() {
        let mut cache = CacheModel::new("c", CacheImplementation::Basic);
        cache.set_flush_interval(Duration::from_millis(1));
        cache.set(CacheKey::raw("k"), json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get(&CacheKey::raw("k")), None);
    }

    #[test]
    fn trigger_statement_receives_listener() {
        let cache = Arc::new(CacheModel::new("c", CacheImplementation::Basic));
        let mut statement = MappedStatement::new(Statement::new("updateAccount", StatementKind::Update));
        cache.register_trigger_statement(&mut statement);
        cache.set(CacheKey::raw("k"), json!(1));

        statement.notify_executed();
        assert!(cache.is_empty());
    }

    #[test]
    fn parses_implementation_names() {
        assert_eq!(CacheImplementation::from_name("LRU"), Some(CacheImplementation::Lru));
        assert_eq!(CacheImplementation::from_name("fifo"), Some(CacheImplementation::Fifo));
        assert_eq!(CacheImplementation::from_name("Basic"), Some(CacheImplementation::Basic));
        assert_eq!(CacheImplementation::from_name("weak"), None);
    }
}
