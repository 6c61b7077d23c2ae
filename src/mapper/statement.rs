use super::cache::{CacheKey, CacheModel};
use super::error::{BoxError, Result, SqlMapError};
use super::executor::Row;
use super::manager::{SqlMapManager, SqlMapSession};
use super::materializer::Materializer;
use super::model::{ParameterMap, SelectKey, Statement, StatementKind};
use super::object_model::ObjectModel;
use super::sql_generator::with_limit;
use super::type_handler::to_text;
use indexmap::IndexMap;
use log::debug;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

const QUERY_KINDS: &[StatementKind] = &[
    StatementKind::Statement,
    StatementKind::Select,
    StatementKind::SelectKey,
];
const INSERT_KINDS: &[StatementKind] = &[StatementKind::Statement, StatementKind::Insert];
const UPDATE_KINDS: &[StatementKind] = &[
    StatementKind::Statement,
    StatementKind::Update,
    StatementKind::Delete,
];

/// 语句成功执行后的通知
pub trait ExecuteListener: Send + Sync {
    fn on_executed(&self, statement: &str);
}

/// 最终SQL和按位置排列的绑定值
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSql {
    pub sql: String,
    pub parameters: Vec<Value>,
}

/// 列表查询的行委托参数
pub struct ListRowItem<'r> {
    pub result: Value,
    pub parameter: &'r Value,
    pub list: &'r mut Vec<Value>,
}

/// 映射查询的行委托参数
pub struct MapRowItem<'r> {
    pub key: String,
    pub value: Value,
    pub parameter: &'r Value,
    pub map: &'r mut IndexMap<String, Value>,
}

/// 可执行的语句
pub struct MappedStatement {
    statement: Statement,
    listeners: Vec<Arc<dyn ExecuteListener>>,
}

impl fmt::Debug for MappedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedStatement")
            .field("statement", &self.statement)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl MappedStatement {
    pub fn new(statement: Statement) -> Self {
        MappedStatement {
            statement,
            listeners: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.statement.id
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn add_listener(&mut self, listener: Arc<dyn ExecuteListener>) {
        self.listeners.push(listener);
    }

    pub fn notify_executed(&self) {
        for listener in &self.listeners {
            listener.on_executed(&self.statement.id);
        }
    }

    /// 显式的 parameterMap 优先，其次是内联参数生成的映射
    fn parameter_map<'s>(&'s self, manager: &'s SqlMapManager) -> Result<Option<&'s ParameterMap>> {
        match &self.statement.parameter_map {
            Some(name) => manager.parameter_map(name).map(Some),
            None => Ok(self.statement.inline_parameter_map.as_ref()),
        }
    }

    /// 生成最终SQL和绑定值
    pub fn prepare(&self, manager: &SqlMapManager, parameter: &Value) -> Result<PreparedSql> {
        let model = manager.object_model();
        let sql = self.statement.sql.render(&self.statement.id, model, parameter)?;
        let parameters = match self.parameter_map(manager)? {
            Some(map) => map.parameter_values(manager.type_handlers(), model, parameter)?,
            None => Vec::new(),
        };
        debug!("[{}] {sql} {parameters:?}", self.statement.id);
        Ok(PreparedSql { sql, parameters })
    }

    fn ensure(&self, operation: &'static str, allowed: &[StatementKind]) -> Result<()> {
        if allowed.contains(&self.statement.kind) {
            Ok(())
        } else {
            Err(SqlMapError::UnsupportedOperation {
                statement: self.statement.id.clone(),
                kind: self.statement.kind.element_name().to_string(),
                operation,
            })
        }
    }

    fn execution_error(&self, source: BoxError) -> SqlMapError {
        SqlMapError::Execution {
            statement: self.statement.id.clone(),
            source,
        }
    }

    fn run_query(
        &self,
        session: &SqlMapSession<'_>,
        parameter: &Value,
        skip: Option<usize>,
        max: Option<usize>,
    ) -> Result<Vec<Row>> {
        let prepared = self.prepare(session.manager(), parameter)?;
        let sql = with_limit(&prepared.sql, skip, max);
        session
            .executor()
            .query(&sql, &prepared.parameters)
            .map_err(|e| self.execution_error(e))
    }

    /// 查询并返回结果对象列表
    pub fn query_for_list(
        &self,
        session: &SqlMapSession<'_>,
        parameter: &Value,
        skip: Option<usize>,
        max: Option<usize>,
    ) -> Result<Vec<Value>> {
        self.query_for_list_with_row_delegate(session, parameter, skip, max, |item| {
            item.list.push(item.result)
        })
    }

    /// 每个结果对象交给 `delegate`，由它决定是否放进列表
    pub fn query_for_list_with_row_delegate(
        &self,
        session: &SqlMapSession<'_>,
        parameter: &Value,
        skip: Option<usize>,
        max: Option<usize>,
        mut delegate: impl FnMut(ListRowItem<'_>),
    ) -> Result<Vec<Value>> {
        self.ensure("query for list", QUERY_KINDS)?;
        let rows = self.run_query(session, parameter, skip, max)?;
        let values = Materializer::new(session, &self.statement).materialize(rows)?;
        let mut list = Vec::with_capacity(values.len());
        for result in values {
            delegate(ListRowItem {
                result,
                parameter,
                list: &mut list,
            });
        }
        self.notify_executed();
        Ok(list)
    }

    /// 查询单个对象：最后一行的结果，分组时为第一个分组对象；没有结果时为 NULL
    pub fn query_for_object(&self, session: &SqlMapSession<'_>, parameter: &Value) -> Result<Value> {
        self.ensure("query for object", QUERY_KINDS)?;
        let rows = self.run_query(session, parameter, None, None)?;
        let materializer = Materializer::new(session, &self.statement);
        let grouped = materializer.groups_rows();
        let mut values = materializer.materialize(rows)?;
        let object = if grouped {
            values.into_iter().next()
        } else {
            values.pop()
        };
        self.notify_executed();
        Ok(object.unwrap_or(Value::Null))
    }

    /// 查询并按 `key_property` 建立映射
    pub fn query_for_map(
        &self,
        session: &SqlMapSession<'_>,
        parameter: &Value,
        key_property: &str,
        value_property: Option<&str>,
    ) -> Result<IndexMap<String, Value>> {
        let values = self.query_for_list(session, parameter, None, None)?;
        Ok(build_map(
            session.manager().object_model(),
            values,
            key_property,
            value_property,
        ))
    }

    /// 每个键值对交给 `delegate`，由它决定是否放进映射
    pub fn query_for_map_with_row_delegate(
        &self,
        session: &SqlMapSession<'_>,
        parameter: &Value,
        key_property: &str,
        value_property: Option<&str>,
        mut delegate: impl FnMut(MapRowItem<'_>),
    ) -> Result<IndexMap<String, Value>> {
        let values = self.query_for_list(session, parameter, None, None)?;
        let model = session.manager().object_model();
        let mut map = IndexMap::with_capacity(values.len());
        for value in values {
            let (key, value) = map_entry(model, value, key_property, value_property);
            delegate(MapRowItem {
                key,
                value,
                parameter,
                map: &mut map,
            });
        }
        Ok(map)
    }

    /// 执行 insert，返回主键查询得到的键
    pub fn insert(&self, session: &SqlMapSession<'_>, parameter: &mut Value) -> Result<Option<Value>> {
        self.ensure("insert", INSERT_KINDS)?;
        let select_key = self.statement.select_key.as_ref();

        let mut generated = match select_key {
            Some(key) if !key.is_after => self.select_key(session, key, parameter)?,
            _ => None,
        };

        let prepared = self.prepare(session.manager(), parameter)?;
        session
            .executor()
            .execute(&prepared.sql, &prepared.parameters)
            .map_err(|e| self.execution_error(e))?;
        // 行已写入，后置主键查询失败也要刷新缓存
        self.notify_executed();

        if generated.is_none() {
            if let Some(key) = select_key.filter(|k| k.is_after) {
                generated = self.select_key(session, key, parameter)?;
            }
        }
        Ok(generated)
    }

    fn select_key(
        &self,
        session: &SqlMapSession<'_>,
        select_key: &SelectKey,
        parameter: &mut Value,
    ) -> Result<Option<Value>> {
        let key = session.query_for_object(&select_key.id, parameter)?;
        if key.is_null() {
            return Ok(None);
        }
        if let Some(property) = select_key.property.as_deref().filter(|p| !p.is_empty()) {
            session
                .manager()
                .object_model()
                .set_property(parameter, property, key.clone())
                .map_err(|e| self.execution_error(e))?;
        }
        debug!("[{}] generated key {key}", self.statement.id);
        Ok(Some(key))
    }

    /// 执行 update/delete，返回受影响的行数
    pub fn update(&self, session: &SqlMapSession<'_>, parameter: &Value) -> Result<u64> {
        self.ensure("update", UPDATE_KINDS)?;
        let prepared = self.prepare(session.manager(), parameter)?;
        let affected = session
            .executor()
            .execute(&prepared.sql, &prepared.parameters)
            .map_err(|e| self.execution_error(e))?;
        self.notify_executed();
        Ok(affected)
    }
}

/// 以结果对象的某个属性为键建立映射
pub fn build_map(
    model: &dyn ObjectModel,
    values: Vec<Value>,
    key_property: &str,
    value_property: Option<&str>,
) -> IndexMap<String, Value> {
    let mut map = IndexMap::with_capacity(values.len());
    for value in values {
        let (key, value) = map_entry(model, value, key_property, value_property);
        map.insert(key, value);
    }
    map
}

fn map_entry(
    model: &dyn ObjectModel,
    value: Value,
    key_property: &str,
    value_property: Option<&str>,
) -> (String, Value) {
    let key = model
        .get_property(&value, key_property)
        .map(|k| to_text(&k))
        .unwrap_or_default();
    let value = match value_property {
        Some(property) => model.get_property(&value, property).unwrap_or(Value::Null),
        None => value,
    };
    (key, value)
}

/// 注册到管理器中的语句：直接执行，或经过缓存模型
#[derive(Debug)]
pub enum Executable {
    Direct(MappedStatement),
    Cached {
        statement: MappedStatement,
        cache: Arc<CacheModel>,
    },
}

impl Executable {
    pub fn mapped(&self) -> &MappedStatement {
        match self {
            Executable::Direct(statement) | Executable::Cached { statement, .. } => statement,
        }
    }

    pub(crate) fn mapped_mut(&mut self) -> &mut MappedStatement {
        match self {
            Executable::Direct(statement) | Executable::Cached { statement, .. } => statement,
        }
    }

    pub fn id(&self) -> &str {
        self.mapped().id()
    }

    pub fn statement(&self) -> &Statement {
        self.mapped().statement()
    }

    pub fn cache_model(&self) -> Option<&Arc<CacheModel>> {
        match self {
            Executable::Direct(_) => None,
            Executable::Cached { cache, .. } => Some(cache),
        }
    }

    /// 套上缓存模型，语句ID和执行方式不变
    pub(crate) fn with_cache(self, cache: Arc<CacheModel>) -> Self {
        let statement = match self {
            Executable::Direct(statement) | Executable::Cached { statement, .. } => statement,
        };
        Executable::Cached { statement, cache }
    }

    fn cached(
        &self,
        key: CacheKey,
        run: impl FnOnce(&MappedStatement) -> Result<Value>,
    ) -> Result<Value> {
        match self {
            Executable::Direct(statement) => run(statement),
            Executable::Cached { statement, cache } => {
                if let Some(value) = cache.get(&key) {
                    debug!("[{}] cache hit in '{}'", statement.id(), cache.id());
                    return Ok(value);
                }
                debug!("[{}] cache miss in '{}'", statement.id(), cache.id());
                let generation = cache.generation();
                let value = run(statement)?;
                cache.set_at(key, value.clone(), generation);
                Ok(value)
            }
        }
    }

    pub fn query_for_list(
        &self,
        session: &SqlMapSession<'_>,
        parameter: &Value,
        skip: Option<usize>,
        max: Option<usize>,
    ) -> Result<Vec<Value>> {
        if let Executable::Direct(statement) = self {
            return statement.query_for_list(session, parameter, skip, max);
        }
        let key = CacheKey::for_request(self.id(), "list", parameter, skip, max);
        let value = self.cached(key, |statement| {
            statement
                .query_for_list(session, parameter, skip, max)
                .map(Value::Array)
        })?;
        Ok(match value {
            Value::Array(values) => values,
            other => vec![other],
        })
    }

    pub fn query_for_object(&self, session: &SqlMapSession<'_>, parameter: &Value) -> Result<Value> {
        if let Executable::Direct(statement) = self {
            return statement.query_for_object(session, parameter);
        }
        let key = CacheKey::for_request(self.id(), "object", parameter, None, None);
        self.cached(key, |statement| statement.query_for_object(session, parameter))
    }

    pub fn query_for_map(
        &self,
        session: &SqlMapSession<'_>,
        parameter: &Value,
        key_property: &str,
        value_property: Option<&str>,
    ) -> Result<IndexMap<String, Value>> {
        let values = self.query_for_list(session, parameter, None, None)?;
        Ok(build_map(
            session.manager().object_model(),
            values,
            key_property,
            value_property,
        ))
    }

    pub fn insert(&self, session: &SqlMapSession<'_>, parameter: &mut Value) -> Result<Option<Value>> {
        self.mapped().insert(session, parameter)
    }

    pub fn update(&self, session: &SqlMapSession<'_>, parameter: &Value) -> Result<u64> {
        self.mapped().update(session, parameter)
    }
}
