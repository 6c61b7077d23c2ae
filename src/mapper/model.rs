use super::error::{Result, SqlMapError};
use super::executor::Row;
use super::object_model::ObjectModel;
use super::sql_generator::SqlText;
use super::type_handler::{
    coerce, is_list_type, loosely_equals, to_text, ScalarType, TypeHandlerRegistry,
};
use indexmap::IndexMap;
use log::warn;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// 参数映射中的一个属性
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterProperty {
    /// 参数对象上的属性名
    pub property: String,
    /// SQL参数名，仅作说明
    pub column: Option<String>,
    /// 类型标记
    pub type_tag: Option<String>,
    /// 数据库类型，仅作说明
    pub db_type: Option<String>,
    /// 类型处理器名称
    pub type_handler: Option<String>,
    /// 等于该值时绑定 NULL
    pub null_value: Option<String>,
}

impl ParameterProperty {
    pub fn new(property: &str) -> Self {
        ParameterProperty {
            property: property.to_string(),
            ..Default::default()
        }
    }

    /// 从参数对象读取并转换要绑定的值
    pub fn property_value(
        &self,
        registry: &TypeHandlerRegistry,
        model: &dyn ObjectModel,
        map_id: &str,
        parameter: &Value,
    ) -> Result<Value> {
        let raw = match parameter {
            // 标量参数直接绑定
            Value::Object(_) | Value::Array(_) => model.get_property(parameter, &self.property),
            Value::Null => None,
            scalar => Some(scalar.clone()),
        };
        let raw = raw.ok_or_else(|| SqlMapError::Binding {
            parameter_map: map_id.to_string(),
            property: self.property.clone(),
            type_name: model.type_name(parameter),
        })?;

        let handler = registry.resolve(self.type_handler.as_deref(), self.type_tag.as_deref())?;
        let value = match handler {
            Some(handler) => handler.get_parameter(raw),
            None => raw,
        };

        if let Some(null_value) = &self.null_value {
            if loosely_equals(&value, null_value) {
                return Ok(Value::Null);
            }
        }

        match (handler, &self.type_tag) {
            (None, Some(type_tag)) => Ok(coerce(value, type_tag)),
            _ => Ok(value),
        }
    }
}

/// 参数映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap {
    pub id: String,
    pub class: Option<String>,
    pub extends: Option<String>,
    properties: Vec<ParameterProperty>,
}

impl ParameterMap {
    pub fn new(id: &str) -> Self {
        ParameterMap {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn add_property(&mut self, property: ParameterProperty) {
        self.properties.push(property);
    }

    pub fn insert_property(&mut self, index: usize, property: ParameterProperty) {
        self.properties.insert(index, property);
    }

    /// 继承：父映射的属性按原顺序插入到最前面
    pub fn merge_parent(&mut self, parent: &ParameterMap) {
        for (index, property) in parent.properties.iter().enumerate() {
            self.insert_property(index, property.clone());
        }
    }

    pub fn properties(&self) -> &[ParameterProperty] {
        &self.properties
    }

    pub fn property_at(&self, index: usize) -> Option<&ParameterProperty> {
        self.properties.get(index)
    }

    /// 按名称查找，同名时后定义（子映射）的优先
    pub fn property(&self, name: &str) -> Option<&ParameterProperty> {
        self.properties.iter().rev().find(|p| p.property == name)
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.iter().map(|p| p.property.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// 按位置顺序生成绑定值
    pub fn parameter_values(
        &self,
        registry: &TypeHandlerRegistry,
        model: &dyn ObjectModel,
        parameter: &Value,
    ) -> Result<Vec<Value>> {
        self.properties
            .iter()
            .map(|p| p.property_value(registry, model, &self.id, parameter))
            .collect()
    }
}

/// 结果映射中的一个属性
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultProperty {
    pub property: String,
    pub column: Option<String>,
    /// 从 1 开始的列序号，大于 0 时优先于列名
    pub column_index: Option<usize>,
    pub type_tag: Option<String>,
    pub db_type: Option<String>,
    pub type_handler: Option<String>,
    pub null_value: Option<String>,
    /// 配置中引用的嵌套结果映射
    pub result_mapping: Option<String>,
    /// 加载完成后解析出的嵌套结果映射
    pub nested_result_map: Option<String>,
    /// 关联查询的语句ID
    pub select: Option<String>,
    pub lazy_load: bool,
}

impl ResultProperty {
    pub fn new(property: &str, column: &str) -> Self {
        ResultProperty {
            property: property.to_string(),
            column: Some(column.to_string()),
            ..Default::default()
        }
    }

    fn raw_value(&self, row: &Row) -> Value {
        if let Some(index) = self.column_index.filter(|i| *i > 0) {
            if let Some((_, value)) = row.get_index(index - 1) {
                return value.clone();
            }
        }
        let Some(column) = self.column.as_deref() else {
            return Value::Null;
        };
        if let Some(value) = row.get(column) {
            return value.clone();
        }
        row.iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null)
    }

    fn convert(&self, registry: &TypeHandlerRegistry, value: Value) -> Result<Value> {
        let handler = registry.resolve(self.type_handler.as_deref(), self.type_tag.as_deref())?;
        Ok(match (handler, &self.type_tag) {
            (Some(handler), _) => handler.get_result(value),
            (None, Some(type_tag)) => coerce(value, type_tag),
            (None, None) => value,
        })
    }

    /// 从结果行读取属性值
    pub fn property_value(&self, registry: &TypeHandlerRegistry, row: &Row) -> Result<Value> {
        let value = self.convert(registry, self.raw_value(row))?;
        match (&value, &self.null_value) {
            (Value::Null, Some(null_value)) => {
                self.convert(registry, Value::String(null_value.clone()))
            }
            _ => Ok(value),
        }
    }

    /// 属性是否为列表类型
    pub fn is_list_property(&self, model: &dyn ObjectModel, target: &Value) -> bool {
        if self.type_tag.as_deref().map(is_list_type).unwrap_or(false) {
            return true;
        }
        matches!(
            model.get_property(target, &self.property),
            Some(Value::Array(_))
        )
    }

    /// 关联查询的键是否为组合键（`k1=col1,k2=col2`）
    pub fn has_composite_keys(&self) -> bool {
        self.column
            .as_deref()
            .map(|c| c.contains(',') || c.contains('='))
            .unwrap_or(false)
    }
}

/// 鉴别器的一个分支
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubMap {
    pub value: String,
    pub result_mapping: String,
}

/// 鉴别器：按某一列的运行时值选择子结果映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discriminator {
    pub column: Option<String>,
    pub column_index: Option<usize>,
    pub type_tag: Option<String>,
    pub db_type: Option<String>,
    pub type_handler: Option<String>,
    pub null_value: Option<String>,
    mapping: ResultProperty,
    sub_maps: Vec<SubMap>,
    resolved: HashMap<String, String>,
}

impl Discriminator {
    /// 生成读取鉴别列的结果属性
    pub fn init_mapping(&mut self) {
        self.mapping = ResultProperty {
            property: String::new(),
            column: self.column.clone(),
            column_index: self.column_index,
            type_tag: self.type_tag.clone(),
            db_type: self.db_type.clone(),
            type_handler: self.type_handler.clone(),
            null_value: self.null_value.clone(),
            ..Default::default()
        };
    }

    pub fn mapping(&self) -> &ResultProperty {
        &self.mapping
    }

    pub fn add_sub_map(&mut self, sub_map: SubMap) {
        self.sub_maps.push(sub_map);
    }

    pub fn sub_maps(&self) -> &[SubMap] {
        &self.sub_maps
    }

    /// 把每个分支指向已加载的结果映射；找不到目标的分支在运行时回退到当前映射
    pub fn initialize(&mut self, owner: &str, is_loaded: impl Fn(&str) -> bool) {
        self.resolved.clear();
        for sub_map in &self.sub_maps {
            if is_loaded(&sub_map.result_mapping) {
                self.resolved
                    .entry(sub_map.value.clone())
                    .or_insert_with(|| sub_map.result_mapping.clone());
            } else {
                warn!(
                    "subMap '{}' of result map '{owner}' refers to unknown result map '{}'",
                    sub_map.value, sub_map.result_mapping
                );
            }
        }
    }

    pub fn sub_map(&self, value: &str) -> Option<&str> {
        self.resolved.get(value).map(String::as_str)
    }

    pub(crate) fn targets(&self) -> impl Iterator<Item = &str> {
        self.resolved.values().map(String::as_str)
    }
}

/// 结果映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultMap {
    pub id: String,
    pub class: Option<String>,
    pub extends: Option<String>,
    pub group_by: Option<String>,
    pub discriminator: Option<Discriminator>,
    columns: IndexMap<String, ResultProperty>,
}

impl ResultMap {
    pub fn new(id: &str) -> Self {
        ResultMap {
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// 按属性名加入，同名属性被替换
    pub fn add_result_property(&mut self, property: ResultProperty) {
        self.columns.insert(property.property.clone(), property);
    }

    pub fn columns(&self) -> impl Iterator<Item = &ResultProperty> {
        self.columns.values()
    }

    pub(crate) fn columns_mut(&mut self) -> impl Iterator<Item = &mut ResultProperty> {
        self.columns.values_mut()
    }

    pub fn column(&self, property: &str) -> Option<&ResultProperty> {
        self.columns.get(property)
    }

    /// 继承：父映射的列在前，子映射同名的列覆盖父映射
    pub fn merge_parent(&mut self, parent: &ResultMap) {
        let mut merged = parent.columns.clone();
        for (name, property) in self.columns.drain(..) {
            merged.insert(name, property);
        }
        self.columns = merged;
    }

    /// 按鉴别器选择实际使用的结果映射，可多级
    pub fn resolve_sub_map<'a>(
        &'a self,
        maps: &'a IndexMap<String, ResultMap>,
        registry: &TypeHandlerRegistry,
        row: &Row,
    ) -> Result<&'a ResultMap> {
        let mut current = self;
        let mut visited = HashSet::from([self.id.as_str()]);
        while let Some(discriminator) = &current.discriminator {
            let value = to_text(&discriminator.mapping.property_value(registry, row)?);
            let Some(target) = discriminator.sub_map(&value) else {
                break;
            };
            if !visited.insert(target) {
                break;
            }
            match maps.get(target) {
                Some(next) => current = next,
                None => break,
            }
        }
        Ok(current)
    }

    /// 分组键：映射ID加上分组列的值；没有分组列时用整行内容
    pub fn group_key(&self, row: &Row) -> String {
        let mut key = self.id.clone();
        match self.group_by.as_deref() {
            Some(group_by) if group_by.split(',').all(|c| row.contains_key(c.trim())) => {
                for column in group_by.split(',') {
                    key.push('\u{1f}');
                    key.push_str(&to_text(&row[column.trim()]));
                }
            }
            _ => {
                key.push('\u{1e}');
                key.push_str(&serde_json::to_string(row).unwrap_or_default());
            }
        }
        key
    }
}

/// 语句类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Statement,
    Select,
    Insert,
    Update,
    Delete,
    SelectKey,
}

impl StatementKind {
    pub fn from_element(name: &str) -> Option<Self> {
        match name {
            "statement" => Some(StatementKind::Statement),
            "select" => Some(StatementKind::Select),
            "insert" => Some(StatementKind::Insert),
            "update" => Some(StatementKind::Update),
            "delete" => Some(StatementKind::Delete),
            "selectKey" => Some(StatementKind::SelectKey),
            _ => None,
        }
    }

    pub fn element_name(&self) -> &'static str {
        match self {
            StatementKind::Statement => "statement",
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::SelectKey => "selectKey",
        }
    }
}

/// insert 语句关联的主键查询
#[derive(Debug, Clone, PartialEq)]
pub struct SelectKey {
    /// 主键查询语句的ID（`{insert}.SelectKey`）
    pub id: String,
    pub property: Option<String>,
    /// `type="post"`：在 insert 之后执行
    pub is_after: bool,
}

/// SQL语句定义
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub id: String,
    pub kind: StatementKind,
    pub parameter_map: Option<String>,
    pub parameter_class: Option<String>,
    pub result_map: Option<String>,
    pub result_class: Option<String>,
    pub cache_model: Option<String>,
    pub list_class: Option<String>,
    pub extends: Option<String>,
    /// 由SQL中的内联参数生成的参数映射
    pub inline_parameter_map: Option<ParameterMap>,
    pub sql: SqlText,
    pub select_key: Option<SelectKey>,
}

impl Statement {
    pub fn new(id: &str, kind: StatementKind) -> Self {
        Statement {
            id: id.to_string(),
            kind,
            parameter_map: None,
            parameter_class: None,
            result_map: None,
            result_class: None,
            cache_model: None,
            list_class: None,
            extends: None,
            inline_parameter_map: None,
            sql: SqlText::default(),
            select_key: None,
        }
    }

    /// 是否会产生结果行
    pub fn returns_rows(&self) -> bool {
        match self.kind {
            StatementKind::Select | StatementKind::SelectKey => true,
            StatementKind::Statement => self.result_map.is_some() || self.result_class.is_some(),
            _ => false,
        }
    }

    /// 没有 listClass 且结果类是标量时只返回单个对象
    pub fn returns_single_object(&self) -> bool {
        self.list_class.as_deref().filter(|c| !c.is_empty()).is_none()
            && self
                .result_class
                .as_deref()
                .and_then(ScalarType::from_tag)
                .is_some_and(|t| t != ScalarType::Array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::object_model::JsonObjectModel;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn parameter_extension_puts_parent_first() {
        let mut parent = ParameterMap::new("P");
        parent.add_property(ParameterProperty::new("a"));
        parent.add_property(ParameterProperty::new("b"));
        let mut child = ParameterMap::new("C");
        child.add_property(ParameterProperty::new("c"));

        child.merge_parent(&parent);

        assert_eq!(child.property_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn duplicate_parameter_names_resolve_by_access_path() {
        let mut parent = ParameterMap::new("P");
        parent.add_property(ParameterProperty {
            type_tag: Some("string".into()),
            ..ParameterProperty::new("x")
        });
        let mut child = ParameterMap::new("C");
        child.add_property(ParameterProperty {
            type_tag: Some("int".into()),
            ..ParameterProperty::new("x")
        });
        child.merge_parent(&parent);

        // 按位置：父在前
        assert_eq!(child.property_at(0).unwrap().type_tag.as_deref(), Some("string"));
        // 按名称：子映射优先
        assert_eq!(child.property("x").unwrap().type_tag.as_deref(), Some("int"));
    }

    #[test]
    fn parameter_null_value_binds_null() {
        let model = JsonObjectModel::new();
        let registry = TypeHandlerRegistry::new();
        let property = ParameterProperty {
            null_value: Some("-9999".into()),
            ..ParameterProperty::new("age")
        };
        let value = property
            .property_value(&registry, &model, "m", &json!({"age": -9999}))
            .unwrap();
        assert_eq!(value, Value::Null);
        let value = property
            .property_value(&registry, &model, "m", &json!({"age": 30}))
            .unwrap();
        assert_eq!(value, json!(30));
    }

    #[test]
    fn missing_parameter_property_is_a_binding_error() {
        let model = JsonObjectModel::new();
        let registry = TypeHandlerRegistry::new();
        let err = ParameterProperty::new("missing")
            .property_value(&registry, &model, "accountMap", &json!({"id": 1}))
            .unwrap_err();
        match err {
            SqlMapError::Binding {
                parameter_map,
                property,
                type_name,
            } => {
                assert_eq!(parameter_map, "accountMap");
                assert_eq!(property, "missing");
                assert_eq!(type_name, "object");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn scalar_parameter_binds_itself() {
        let model = JsonObjectModel::new();
        let registry = TypeHandlerRegistry::new();
        let value = ParameterProperty::new("value")
            .property_value(&registry, &model, "m", &json!(5))
            .unwrap();
        assert_eq!(value, json!(5));
    }

    #[test]
    fn result_extension_overrides_parent_column() {
        let mut parent = ResultMap::new("P");
        parent.add_result_property(ResultProperty::new("id", "ID"));
        parent.add_result_property(ResultProperty::new("x", "colX"));
        let mut child = ResultMap::new("C");
        child.add_result_property(ResultProperty::new("x", "colY"));
        child.add_result_property(ResultProperty::new("extra", "E"));

        child.merge_parent(&parent);

        let columns: Vec<_> = child
            .columns()
            .map(|c| (c.property.as_str(), c.column.as_deref().unwrap()))
            .collect();
        assert_eq!(columns, vec![("id", "ID"), ("x", "colY"), ("extra", "E")]);
    }

    #[test]
    fn result_null_value_is_substituted() {
        let registry = TypeHandlerRegistry::new();
        let property = ResultProperty {
            null_value: Some("N/A".into()),
            type_tag: Some("string".into()),
            ..ResultProperty::new("label", "LABEL")
        };
        let value = property
            .property_value(&registry, &row(&[("LABEL", Value::Null)]))
            .unwrap();
        assert_eq!(value, json!("N/A"));
    }

    #[test]
    fn column_index_takes_precedence() {
        let registry = TypeHandlerRegistry::new();
        let property = ResultProperty {
            column_index: Some(2),
            ..ResultProperty::new("name", "ID")
        };
        let r = row(&[("ID", json!(1)), ("NAME", json!("ann"))]);
        assert_eq!(property.property_value(&registry, &r).unwrap(), json!("ann"));
    }

    fn discriminated(id: &str, column: &str, subs: &[(&str, &str)]) -> ResultMap {
        let mut map = ResultMap::new(id);
        let mut discriminator = Discriminator {
            column: Some(column.to_string()),
            ..Default::default()
        };
        discriminator.init_mapping();
        for (value, target) in subs {
            discriminator.add_sub_map(SubMap {
                value: value.to_string(),
                result_mapping: target.to_string(),
            });
        }
        map.discriminator = Some(discriminator);
        map
    }

    #[test]
    fn discriminator_resolves_sub_maps() {
        let registry = TypeHandlerRegistry::new();
        let mut maps = IndexMap::new();
        maps.insert(
            "Base".to_string(),
            discriminated("Base", "type", &[("A", "MapA"), ("B", "MapB"), ("S", "Base")]),
        );
        maps.insert("MapA".to_string(), discriminated("MapA", "sub", &[("c", "MapC")]));
        maps.insert("MapB".to_string(), ResultMap::new("MapB"));
        maps.insert("MapC".to_string(), ResultMap::new("MapC"));
        let known: HashSet<String> = maps.keys().cloned().collect();
        for map in maps.values_mut() {
            if let Some(d) = map.discriminator.as_mut() {
                d.initialize("test", |id| known.contains(id));
            }
        }
        let base = &maps["Base"];
        let resolve = |r: Row| base.resolve_sub_map(&maps, &registry, &r).unwrap().id.clone();

        assert_eq!(resolve(row(&[("type", json!("B"))])), "MapB");
        assert_eq!(resolve(row(&[("type", json!("Z"))])), "Base");
        assert_eq!(resolve(row(&[("type", json!("S"))])), "Base");
        assert_eq!(resolve(row(&[("type", json!("A")), ("sub", json!("c"))])), "MapC");
        assert_eq!(resolve(row(&[("type", json!("A")), ("sub", json!("x"))])), "MapA");
    }

    #[test]
    fn group_key_uses_group_column() {
        let mut map = ResultMap::new("order");
        map.group_by = Some("ORDER_ID".into());
        let a = map.group_key(&row(&[("ORDER_ID", json!(1)), ("LINE", json!(1))]));
        let b = map.group_key(&row(&[("ORDER_ID", json!(1)), ("LINE", json!(2))]));
        assert_eq!(a, b);

        map.group_by = None;
        let a = map.group_key(&row(&[("ORDER_ID", json!(1)), ("LINE", json!(1))]));
        let b = map.group_key(&row(&[("ORDER_ID", json!(1)), ("LINE", json!(2))]));
        assert_ne!(a, b);
    }
}
