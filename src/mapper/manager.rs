use super::cache::CacheModel;
use super::error::{Result, SqlMapError};
use super::executor::SqlExecutor;
use super::model::{ParameterMap, ResultMap, StatementKind};
use super::object_model::{JsonObjectModel, ObjectModel};
use super::statement::{Executable, ListRowItem, MapRowItem, MappedStatement};
use super::type_handler::TypeHandlerRegistry;
use indexmap::IndexMap;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::sync::Arc;

/// `<connection>` 声明，原样交给宿主程序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionSettings {
    pub attributes: HashMap<String, String>,
}

impl ConnectionSettings {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// 所有映射、语句和缓存模型的注册表
///
/// 由 [`SqlMapXmlConfiguration`](super::configuration::SqlMapXmlConfiguration)
/// 加载完成后只读，可以在线程间共享。
pub struct SqlMapManager {
    object_model: Box<dyn ObjectModel>,
    type_handlers: TypeHandlerRegistry,
    result_maps: IndexMap<String, ResultMap>,
    parameter_maps: IndexMap<String, ParameterMap>,
    statements: IndexMap<String, Executable>,
    cache_models: IndexMap<String, Arc<CacheModel>>,
    connection: Option<ConnectionSettings>,
}

impl fmt::Debug for SqlMapManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlMapManager")
            .field("type_handlers", &self.type_handlers)
            .field("result_maps", &self.result_maps.keys().collect::<Vec<_>>())
            .field("parameter_maps", &self.parameter_maps.keys().collect::<Vec<_>>())
            .field("statements", &self.statements.keys().collect::<Vec<_>>())
            .field("cache_models", &self.cache_models.keys().collect::<Vec<_>>())
            .field("connection", &self.connection)
            .finish()
    }
}

impl Default for SqlMapManager {
    fn default() -> Self {
        Self::new(JsonObjectModel::new())
    }
}

impl SqlMapManager {
    pub fn new(object_model: impl ObjectModel + 'static) -> Self {
        SqlMapManager {
            object_model: Box::new(object_model),
            type_handlers: TypeHandlerRegistry::new(),
            result_maps: IndexMap::new(),
            parameter_maps: IndexMap::new(),
            statements: IndexMap::new(),
            cache_models: IndexMap::new(),
            connection: None,
        }
    }

    pub fn with_type_handlers(mut self, type_handlers: TypeHandlerRegistry) -> Self {
        self.type_handlers = type_handlers;
        self
    }

    pub fn object_model(&self) -> &dyn ObjectModel {
        self.object_model.as_ref()
    }

    pub fn type_handlers(&self) -> &TypeHandlerRegistry {
        &self.type_handlers
    }

    pub fn type_handlers_mut(&mut self) -> &mut TypeHandlerRegistry {
        &mut self.type_handlers
    }

    pub fn connection(&self) -> Option<&ConnectionSettings> {
        self.connection.as_ref()
    }

    pub fn set_connection(&mut self, connection: ConnectionSettings) {
        self.connection = Some(connection);
    }

    pub fn result_maps(&self) -> &IndexMap<String, ResultMap> {
        &self.result_maps
    }

    pub(crate) fn result_maps_mut(&mut self) -> &mut IndexMap<String, ResultMap> {
        &mut self.result_maps
    }

    pub fn result_map(&self, id: &str) -> Result<&ResultMap> {
        self.result_maps
            .get(id)
            .ok_or_else(|| SqlMapError::ResultMapNotFound(id.to_string()))
    }

    pub fn has_result_map(&self, id: &str) -> bool {
        self.result_maps.contains_key(id)
    }

    /// 同ID的结果映射只保留第一个
    pub fn add_result_map(&mut self, map: ResultMap) -> bool {
        if self.result_maps.contains_key(&map.id) {
            return false;
        }
        self.result_maps.insert(map.id.clone(), map);
        true
    }

    pub fn parameter_maps(&self) -> &IndexMap<String, ParameterMap> {
        &self.parameter_maps
    }

    pub fn parameter_map(&self, id: &str) -> Result<&ParameterMap> {
        self.parameter_maps
            .get(id)
            .ok_or_else(|| SqlMapError::ParameterMapNotFound(id.to_string()))
    }

    pub fn has_parameter_map(&self, id: &str) -> bool {
        self.parameter_maps.contains_key(id)
    }

    pub fn add_parameter_map(&mut self, map: ParameterMap) -> bool {
        if self.parameter_maps.contains_key(&map.id) {
            return false;
        }
        self.parameter_maps.insert(map.id.clone(), map);
        true
    }

    pub fn statement_ids(&self) -> impl Iterator<Item = &str> {
        self.statements.keys().map(String::as_str)
    }

    pub fn mapped_statement(&self, id: &str) -> Result<&Executable> {
        self.statements
            .get(id)
            .ok_or_else(|| SqlMapError::StatementNotFound(id.to_string()))
    }

    pub fn has_statement(&self, id: &str) -> bool {
        self.statements.contains_key(id)
    }

    pub fn add_mapped_statement(&mut self, statement: MappedStatement) -> bool {
        if self.statements.contains_key(statement.id()) {
            return false;
        }
        self.statements
            .insert(statement.id().to_string(), Executable::Direct(statement));
        true
    }

    pub fn cache_model(&self, id: &str) -> Result<&Arc<CacheModel>> {
        self.cache_models
            .get(id)
            .ok_or_else(|| SqlMapError::CacheModelNotFound(id.to_string()))
    }

    pub fn cache_models(&self) -> impl Iterator<Item = &Arc<CacheModel>> {
        self.cache_models.values()
    }

    pub fn add_cache_model(&mut self, cache: CacheModel) -> bool {
        if self.cache_models.contains_key(cache.id()) {
            return false;
        }
        self.cache_models
            .insert(cache.id().to_string(), Arc::new(cache));
        true
    }

    /// 把缓存模型挂到引用它的查询语句上，并注册清空缓存的语句
    pub fn attach_cache_models(&mut self) -> Result<()> {
        let statements = mem::take(&mut self.statements);
        for (id, executable) in statements {
            let cache_id = executable
                .statement()
                .cache_model
                .clone()
                .filter(|_| executable.statement().kind == StatementKind::Select);
            let executable = match cache_id {
                Some(cache_id) => {
                    let cache = self.cache_model(&cache_id)?.clone();
                    debug!("statement '{id}' is cached by '{cache_id}'");
                    executable.with_cache(cache)
                }
                None => executable,
            };
            self.statements.insert(id, executable);
        }

        for cache in self.cache_models.values() {
            for trigger in cache.trigger_statements() {
                let executable = self.statements.get_mut(trigger).ok_or_else(|| {
                    SqlMapError::TriggerStatementNotFound {
                        cache: cache.id().to_string(),
                        statement: trigger.clone(),
                    }
                })?;
                cache.register_trigger_statement(executable.mapped_mut());
            }
        }
        Ok(())
    }

    /// 清空所有缓存
    pub fn flush_caches(&self) {
        for cache in self.cache_models.values() {
            cache.flush();
        }
    }

    /// 用一个数据库驱动执行语句
    pub fn session<'a>(&'a self, executor: &'a dyn SqlExecutor) -> SqlMapSession<'a> {
        SqlMapSession {
            manager: self,
            executor,
        }
    }
}

/// 语句的执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    List(Vec<Value>),
    Object(Value),
    GeneratedKey(Option<Value>),
    RowsAffected(u64),
}

/// 绑定到某个数据库驱动的执行入口
#[derive(Clone, Copy)]
pub struct SqlMapSession<'a> {
    manager: &'a SqlMapManager,
    executor: &'a dyn SqlExecutor,
}

impl<'a> SqlMapSession<'a> {
    pub fn manager(&self) -> &'a SqlMapManager {
        self.manager
    }

    pub fn executor(&self) -> &'a dyn SqlExecutor {
        self.executor
    }

    /// 按语句类型执行：select 返回列表（标量结果类且没有 listClass 时返回单个对象），
    /// insert 返回生成的键，update/delete 返回受影响行数
    pub fn execute(&self, id: &str, parameter: &mut Value) -> Result<StatementResult> {
        let executable = self.manager.mapped_statement(id)?;
        let statement = executable.statement();
        match statement.kind {
            StatementKind::Insert => executable.insert(self, parameter).map(StatementResult::GeneratedKey),
            StatementKind::Update | StatementKind::Delete => {
                executable.update(self, parameter).map(StatementResult::RowsAffected)
            }
            StatementKind::Statement if !statement.returns_rows() => {
                executable.update(self, parameter).map(StatementResult::RowsAffected)
            }
            _ if statement.returns_single_object() => executable
                .query_for_object(self, parameter)
                .map(StatementResult::Object),
            _ => executable
                .query_for_list(self, parameter, None, None)
                .map(StatementResult::List),
        }
    }

    pub fn query_for_object(&self, id: &str, parameter: &Value) -> Result<Value> {
        self.manager
            .mapped_statement(id)?
            .query_for_object(self, parameter)
    }

    pub fn query_for_list(&self, id: &str, parameter: &Value) -> Result<Vec<Value>> {
        self.manager
            .mapped_statement(id)?
            .query_for_list(self, parameter, None, None)
    }

    /// 跳过 `skip` 行，最多返回 `max` 行
    pub fn query_for_list_range(
        &self,
        id: &str,
        parameter: &Value,
        skip: usize,
        max: usize,
    ) -> Result<Vec<Value>> {
        self.manager
            .mapped_statement(id)?
            .query_for_list(self, parameter, Some(skip), Some(max))
    }

    pub fn query_for_map(
        &self,
        id: &str,
        parameter: &Value,
        key_property: &str,
        value_property: Option<&str>,
    ) -> Result<IndexMap<String, Value>> {
        self.manager
            .mapped_statement(id)?
            .query_for_map(self, parameter, key_property, value_property)
    }

    /// 行委托版本的列表查询，不经过缓存
    pub fn query_for_list_with_row_delegate(
        &self,
        id: &str,
        parameter: &Value,
        delegate: impl FnMut(ListRowItem<'_>),
    ) -> Result<Vec<Value>> {
        self.manager
            .mapped_statement(id)?
            .mapped()
            .query_for_list_with_row_delegate(self, parameter, None, None, delegate)
    }

    /// 行委托版本的映射查询，不经过缓存
    pub fn query_for_map_with_row_delegate(
        &self,
        id: &str,
        parameter: &Value,
        key_property: &str,
        value_property: Option<&str>,
        delegate: impl FnMut(MapRowItem<'_>),
    ) -> Result<IndexMap<String, Value>> {
        self.manager
            .mapped_statement(id)?
            .mapped()
            .query_for_map_with_row_delegate(self, parameter, key_property, value_property, delegate)
    }

    pub fn insert(&self, id: &str, parameter: &mut Value) -> Result<Option<Value>> {
        self.manager.mapped_statement(id)?.insert(self, parameter)
    }

    pub fn update(&self, id: &str, parameter: &Value) -> Result<u64> {
        self.manager.mapped_statement(id)?.update(self, parameter)
    }

    pub fn delete(&self, id: &str, parameter: &Value) -> Result<u64> {
        self.update(id, parameter)
    }
}
