use super::error::BoxError;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// 对象模型：按名称读写属性、按类型名创建实例
///
/// 执行引擎只通过这个接口访问参数对象和结果对象。
pub trait ObjectModel: Send + Sync {
    /// 读取属性，不存在时返回 `None`
    fn get_property(&self, obj: &Value, name: &str) -> Option<Value>;

    /// 设置属性
    fn set_property(&self, obj: &mut Value, name: &str, value: Value) -> Result<(), BoxError>;

    /// 创建指定类型的新实例
    fn create_instance(&self, type_name: &str) -> Result<Value, BoxError>;

    /// 属性是否可写
    fn can_set_property(&self, obj: &Value, name: &str) -> bool;

    /// 对象的运行时类型名（用于错误信息）
    fn type_name(&self, obj: &Value) -> String {
        value_kind(obj).to_string()
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 基于 `serde_json::Value` 的对象模型
///
/// 类通过模板注册：模板是一个 JSON 对象，新实例是它的拷贝。模板中值为数组的
/// 字段被视为列表属性。未注册的类名按空 JSON 对象创建，除非启用了 `strict`。
#[derive(Debug, Default)]
pub struct JsonObjectModel {
    classes: HashMap<String, Map<String, Value>>,
    strict: bool,
}

impl JsonObjectModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只允许创建已注册的类，且只能写模板中声明过的字段
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// 注册类模板
    pub fn register_class(&mut self, name: &str, template: Value) -> &mut Self {
        let fields = match template {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.classes.insert(name.to_string(), fields);
        self
    }

    pub fn with_class(mut self, name: &str, template: Value) -> Self {
        self.register_class(name, template);
        self
    }
}

impl ObjectModel for JsonObjectModel {
    fn get_property(&self, obj: &Value, name: &str) -> Option<Value> {
        // 支持嵌套属性访问，例如 account.address.city
        let mut current = obj;
        for part in name.split('.') {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    fn set_property(&self, obj: &mut Value, name: &str, value: Value) -> Result<(), BoxError> {
        if !self.can_set_property(obj, name) {
            return Err(format!(
                "property '{name}' is not writable on {}",
                self.type_name(obj)
            )
            .into());
        }
        let mut parts = name.split('.').peekable();
        let mut current = obj;
        while let Some(part) = parts.next() {
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
            let map = match current {
                Value::Object(map) => map,
                other => {
                    return Err(format!(
                        "can not set '{part}' on a value of type {}",
                        value_kind(other)
                    )
                    .into())
                }
            };
            if parts.peek().is_none() {
                map.insert(part.to_string(), value);
                return Ok(());
            }
            current = map.entry(part.to_string()).or_insert(Value::Null);
        }
        Ok(())
    }

    fn create_instance(&self, type_name: &str) -> Result<Value, BoxError> {
        if let Some(fields) = self.classes.get(type_name) {
            return Ok(Value::Object(fields.clone()));
        }
        if self.strict {
            return Err(format!("class '{type_name}' is not registered").into());
        }
        Ok(Value::Object(Map::new()))
    }

    fn can_set_property(&self, obj: &Value, name: &str) -> bool {
        if !matches!(obj, Value::Object(_) | Value::Null) {
            return false;
        }
        if !self.strict {
            return true;
        }
        // 严格模式下实例来自模板，只能写模板声明过的字段
        let head = name.split('.').next().unwrap_or(name);
        obj.get(head).is_some()
    }
}
