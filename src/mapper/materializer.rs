use super::error::{BoxError, Result, SqlMapError};
use super::executor::Row;
use super::manager::{SqlMapManager, SqlMapSession};
use super::model::{ResultMap, ResultProperty, Statement};
use super::object_model::{value_kind, ObjectModel};
use super::type_handler::{coerce, is_list_type, ScalarType};
use indexmap::IndexMap;
use log::debug;
use serde_json::{Map, Value};

/// 分组结果的对象树节点
struct GroupNode {
    result_map: String,
    class: String,
    object: Value,
    /// 列表属性名 -> 分组键 -> 子节点
    children: IndexMap<String, IndexMap<String, GroupNode>>,
}

/// 把结果行转换为结果对象
pub(crate) struct Materializer<'s, 'a> {
    session: &'s SqlMapSession<'a>,
    statement: &'s Statement,
}

impl<'s, 'a> Materializer<'s, 'a> {
    pub fn new(session: &'s SqlMapSession<'a>, statement: &'s Statement) -> Self {
        Materializer { session, statement }
    }

    fn manager(&self) -> &'a SqlMapManager {
        self.session.manager()
    }

    fn model(&self) -> &'a dyn ObjectModel {
        self.manager().object_model()
    }

    fn result_map(&self) -> Result<Option<&'a ResultMap>> {
        self.statement
            .result_map
            .as_deref()
            .map(|id| self.manager().result_map(id))
            .transpose()
    }

    /// 结果映射是否按 `groupBy` 合并行
    pub fn groups_rows(&self) -> bool {
        matches!(self.result_map(), Ok(Some(map)) if map.group_by.is_some())
    }

    pub fn materialize(&self, rows: Vec<Row>) -> Result<Vec<Value>> {
        if let Some(map) = self.result_map()? {
            if map.group_by.is_some() {
                return self.materialize_groups(map, &rows);
            }
            return rows
                .iter()
                .map(|row| self.fill_result_map(map, row).map(|(object, _)| object))
                .collect();
        }
        match self.statement.result_class.as_deref().filter(|c| !c.is_empty()) {
            Some(class) => rows.iter().map(|row| self.fill_result_class(class, row)).collect(),
            None => Ok(rows.into_iter().map(default_result).collect()),
        }
    }

    fn materialization_error(&self, result_map: &str, class: &str, source: BoxError) -> SqlMapError {
        SqlMapError::Materialization {
            result_map: result_map.to_string(),
            class: class.to_string(),
            source,
        }
    }

    fn new_instance(&self, map: &ResultMap) -> Result<Value> {
        match map.class.as_deref().filter(|c| !c.is_empty()) {
            // 标量类由唯一的属性直接给出结果，数组类按列名逐个填充
            Some(class) if is_list_type(class) => Ok(Value::Object(Map::new())),
            Some(class) if ScalarType::from_tag(class).is_some() => Ok(Value::Null),
            Some(class) => self
                .model()
                .create_instance(class)
                .map_err(|source| self.materialization_error(&map.id, class, source)),
            None => Ok(Value::Object(Map::new())),
        }
    }

    fn assign(&self, map: &ResultMap, target: &mut Value, property: &str, value: Value) -> Result<()> {
        if property.is_empty() || !matches!(target, Value::Object(_) | Value::Array(_)) {
            *target = value;
            return Ok(());
        }
        self.model()
            .set_property(target, property, value)
            .map_err(|source| {
                self.materialization_error(&map.id, map.class.as_deref().unwrap_or_default(), source)
            })
    }

    /// 按鉴别器选择映射后创建并填充对象；第二个值表示行中是否有数据
    fn fill_result_map(&self, map: &ResultMap, row: &Row) -> Result<(Value, bool)> {
        let manager = self.manager();
        let map = map.resolve_sub_map(manager.result_maps(), manager.type_handlers(), row)?;
        let mut object = self.new_instance(map)?;
        let mut found = false;
        for property in map.columns() {
            found |= self.set_object_property(map, property, row, &mut object)?;
        }
        Ok((object, found))
    }

    fn set_object_property(
        &self,
        map: &ResultMap,
        property: &ResultProperty,
        row: &Row,
        target: &mut Value,
    ) -> Result<bool> {
        let manager = self.manager();

        if let Some(select) = property.select.as_deref().filter(|s| !s.is_empty()) {
            let value = self.post_select(property, select, row, target)?;
            self.assign(map, target, &property.property, value)?;
            return Ok(false);
        }

        if let Some(nested_id) = property.nested_result_map.as_deref() {
            let nested = manager.result_map(nested_id)?;
            let (object, found) = self.fill_result_map(nested, row)?;
            let value = if property.is_list_property(self.model(), target) {
                Value::Array(if found { vec![object] } else { Vec::new() })
            } else if found {
                object
            } else {
                Value::Null
            };
            self.assign(map, target, &property.property, value)?;
            return Ok(found);
        }

        let value = property.property_value(manager.type_handlers(), row)?;
        let found = !value.is_null();
        self.assign(map, target, &property.property, value)?;
        Ok(found)
    }

    /// 关联查询；`lazyLoad` 的属性同样在这里取值
    fn post_select(&self, property: &ResultProperty, select: &str, row: &Row, target: &Value) -> Result<Value> {
        let keys = if property.has_composite_keys() {
            composite_keys(property.column.as_deref().unwrap_or_default(), row)
        } else {
            property.property_value(self.manager().type_handlers(), row)?
        };
        debug!("post select '{select}' for property '{}' with {keys}", property.property);
        if property.is_list_property(self.model(), target) {
            self.session.query_for_list(select, &keys).map(Value::Array)
        } else {
            self.session.query_for_object(select, &keys)
        }
    }

    fn materialize_groups(&self, map: &ResultMap, rows: &[Row]) -> Result<Vec<Value>> {
        let mut roots = IndexMap::new();
        for row in rows {
            self.add_group_row(map, row, &mut roots, true)?;
        }
        roots.into_values().map(|node| self.assemble(node)).collect()
    }

    fn add_group_row(
        &self,
        map: &ResultMap,
        row: &Row,
        nodes: &mut IndexMap<String, GroupNode>,
        root: bool,
    ) -> Result<()> {
        let manager = self.manager();
        let model = self.model();
        let map = map.resolve_sub_map(manager.result_maps(), manager.type_handlers(), row)?;
        let key = map.group_key(row);

        if !nodes.contains_key(&key) {
            let mut object = self.new_instance(map)?;
            let mut found = false;
            for property in map.columns() {
                if property.nested_result_map.is_some() && property.is_list_property(model, &object) {
                    continue;
                }
                found |= self.set_object_property(map, property, row, &mut object)?;
            }
            // 外连接中没有子记录的行
            if !found && !root {
                return Ok(());
            }
            nodes.insert(
                key.clone(),
                GroupNode {
                    result_map: map.id.clone(),
                    class: map.class.clone().unwrap_or_default(),
                    object,
                    children: IndexMap::new(),
                },
            );
        }

        let Some(node) = nodes.get_mut(&key) else {
            return Ok(());
        };
        for property in map.columns() {
            let Some(nested_id) = property.nested_result_map.as_deref() else {
                continue;
            };
            if !property.is_list_property(model, &node.object) {
                continue;
            }
            let nested = manager.result_map(nested_id)?;
            let children = node.children.entry(property.property.clone()).or_default();
            self.add_group_row(nested, row, children, false)?;
        }
        Ok(())
    }

    fn assemble(&self, node: GroupNode) -> Result<Value> {
        let GroupNode {
            result_map,
            class,
            mut object,
            children,
        } = node;
        for (property, nodes) in children {
            let mut items = match self.model().get_property(&object, &property) {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            for child in nodes.into_values() {
                items.push(self.assemble(child)?);
            }
            self.model()
                .set_property(&mut object, &property, Value::Array(items))
                .map_err(|source| self.materialization_error(&result_map, &class, source))?;
        }
        Ok(object)
    }

    fn fill_result_class(&self, class: &str, row: &Row) -> Result<Value> {
        match ScalarType::from_tag(class) {
            Some(ScalarType::Array) => return Ok(Value::Array(row.values().cloned().collect())),
            Some(_) => {
                let first = row.values().next().cloned().unwrap_or(Value::Null);
                return Ok(coerce(first, class));
            }
            None => {}
        }

        let model = self.model();
        let mut object = model
            .create_instance(class)
            .map_err(|source| self.materialization_error(&self.statement.id, class, source))?;
        for (column, value) in row {
            if !model.can_set_property(&object, column) {
                debug!("[{}] column '{column}' is not settable on '{class}'", self.statement.id);
                continue;
            }
            // 按实例上已有字段的类型转换
            let value = match model.get_property(&object, column) {
                Some(existing @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => {
                    coerce(value.clone(), value_kind(&existing))
                }
                _ => value.clone(),
            };
            model
                .set_property(&mut object, column, value)
                .map_err(|source| self.materialization_error(&self.statement.id, class, source))?;
        }
        Ok(object)
    }
}

/// 既没有结果映射也没有结果类：单列时取值，否则整行
fn default_result(row: Row) -> Value {
    if row.len() == 1 {
        return row.into_values().next().unwrap_or(Value::Null);
    }
    Value::Object(row.into_iter().collect())
}

/// `k1=col1,k2=col2` 形式的关联查询参数
fn composite_keys(columns: &str, row: &Row) -> Value {
    let mut keys = Map::new();
    for entry in columns.split(',').filter(|e| !e.trim().is_empty()) {
        let (key, column) = match entry.split_once('=') {
            Some((key, column)) => (key.trim(), column.trim()),
            None => (entry.trim(), entry.trim()),
        };
        let value = row
            .get(column)
            .or_else(|| {
                row.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(column))
                    .map(|(_, v)| v)
            })
            .cloned()
            .unwrap_or(Value::Null);
        keys.insert(key.to_string(), value);
    }
    Value::Object(keys)
}
