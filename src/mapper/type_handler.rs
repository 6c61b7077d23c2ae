use super::error::{Result, SqlMapError};
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// 自定义类型转换器
pub trait TypeHandler: Send + Sync {
    /// 参数对象的值 -> 绑定到SQL的值
    fn get_parameter(&self, value: Value) -> Value;

    /// 结果集中的值 -> 结果对象的值
    fn get_result(&self, value: Value) -> Value;
}

/// 类型处理器注册表
///
/// 处理器按名称注册（`typeHandler` 属性引用的就是这个名称），
/// 也可以通过 `<typeHandler class="..." type="..."/>` 绑定到某个类型标记上。
#[derive(Default, Clone)]
pub struct TypeHandlerRegistry {
    handlers: HashMap<String, Arc<dyn TypeHandler>>,
    by_type: HashMap<String, String>,
}

impl fmt::Debug for TypeHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeHandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("by_type", &self.by_type)
            .finish()
    }
}

impl TypeHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按名称注册处理器
    pub fn register(&mut self, name: &str, handler: Arc<dyn TypeHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// 把已注册的处理器绑定到类型标记
    pub fn bind_type(&mut self, type_tag: &str, handler_name: &str) -> Result<()> {
        if !self.handlers.contains_key(handler_name) {
            return Err(SqlMapError::TypeHandlerNotFound(handler_name.to_string()));
        }
        self.by_type
            .insert(type_tag.to_ascii_lowercase(), handler_name.to_string());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TypeHandler>> {
        self.handlers.get(name)
    }

    pub fn for_type(&self, type_tag: &str) -> Option<&Arc<dyn TypeHandler>> {
        self.by_type
            .get(&type_tag.to_ascii_lowercase())
            .and_then(|name| self.handlers.get(name))
    }

    /// 选择处理器：显式的 `typeHandler` 优先，其次是绑定到 `type` 的处理器
    pub fn resolve(
        &self,
        handler: Option<&str>,
        type_tag: Option<&str>,
    ) -> Result<Option<&Arc<dyn TypeHandler>>> {
        if let Some(name) = handler {
            return self
                .get(name)
                .map(Some)
                .ok_or_else(|| SqlMapError::TypeHandlerNotFound(name.to_string()));
        }
        Ok(type_tag.and_then(|tag| self.for_type(tag)))
    }
}

/// 内置类型标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Integer,
    Float,
    String,
    Boolean,
    Array,
}

impl ScalarType {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "int" | "integer" | "long" | "i32" | "i64" => Some(ScalarType::Integer),
            "float" | "double" | "decimal" | "f64" => Some(ScalarType::Float),
            "string" | "str" => Some(ScalarType::String),
            "bool" | "boolean" => Some(ScalarType::Boolean),
            "array" | "list" => Some(ScalarType::Array),
            _ => None,
        }
    }
}

/// 是否为列表类的类型标记
pub fn is_list_type(tag: &str) -> bool {
    matches!(ScalarType::from_tag(tag), Some(ScalarType::Array))
}

/// 按类型标记转换值；NULL 保持不变，未知标记（例如类名）原样返回
pub fn coerce(value: Value, type_tag: &str) -> Value {
    let Some(scalar) = ScalarType::from_tag(type_tag) else {
        return value;
    };
    if value.is_null() {
        return value;
    }
    match scalar {
        ScalarType::Integer => match &value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::from)
                .unwrap_or(value),
            Value::String(s) => parse_integer(s),
            Value::Bool(b) => Value::from(*b as i64),
            _ => value,
        },
        ScalarType::Float => match &value {
            Value::Number(n) => n
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(value),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::from(0.0)),
            Value::Bool(b) => Value::from(if *b { 1.0 } else { 0.0 }),
            _ => value,
        },
        ScalarType::String => Value::String(to_text(&value)),
        ScalarType::Boolean => Value::Bool(truthy(&value)),
        ScalarType::Array => match value {
            Value::Array(_) => value,
            other => Value::Array(vec![other]),
        },
    }
}

fn parse_integer(s: &str) -> Value {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Value::from(i);
    }
    match s.parse::<f64>() {
        Ok(f) => Value::from(f as i64),
        Err(_) => Value::from(0),
    }
}

/// 值的文本形式，用于动态SQL替换、鉴别器比较和缓存分组键
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// 宽松相等：配置里的 `nullValue` 总是字符串，与任意标量比较
pub fn loosely_equals(value: &Value, text: &str) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => s == text,
        Value::Number(n) => match (n.as_f64(), text.trim().parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => false,
        },
        Value::Bool(b) => truthy(&Value::String(text.to_string())) == *b,
        _ => false,
    }
}
