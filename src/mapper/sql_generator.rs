use super::error::{Result, SqlMapError};
use super::object_model::ObjectModel;
use super::placeholder::{parse_dynamic_text, DYNAMIC_TOKEN};
use super::type_handler::to_text;
use serde_json::Value;

/// 语句的SQL文本
///
/// 不含 `$name$` 的SQL只生成一次；含有动态文本的SQL在每次执行时从参数对象
/// 取值，按顺序原样替换（调用方负责转义）。
#[derive(Debug, Clone, PartialEq)]
pub enum SqlText {
    Static {
        sql: String,
    },
    Dynamic {
        sql: String,
        names: Vec<String>,
    },
}

impl Default for SqlText {
    fn default() -> Self {
        SqlText::Static { sql: String::new() }
    }
}

impl SqlText {
    /// 由已经处理过内联参数的SQL构建
    pub fn build(sql: &str) -> Self {
        let dynamic = parse_dynamic_text(sql);
        if dynamic.names.is_empty() {
            SqlText::Static {
                sql: dynamic.sql.trim().to_string(),
            }
        } else {
            SqlText::Dynamic {
                sql: dynamic.sql.trim().to_string(),
                names: dynamic.names,
            }
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, SqlText::Dynamic { .. })
    }

    /// SQL模板（动态文本以 [`DYNAMIC_TOKEN`] 表示）
    pub fn template(&self) -> &str {
        match self {
            SqlText::Static { sql } | SqlText::Dynamic { sql, .. } => sql,
        }
    }

    pub fn dynamic_names(&self) -> &[String] {
        match self {
            SqlText::Static { .. } => &[],
            SqlText::Dynamic { names, .. } => names,
        }
    }

    /// 生成最终SQL
    pub fn render(&self, statement: &str, model: &dyn ObjectModel, parameter: &Value) -> Result<String> {
        let (sql, names) = match self {
            SqlText::Static { sql } => return Ok(sql.clone()),
            SqlText::Dynamic { sql, names } => (sql, names),
        };
        let mut rendered = String::with_capacity(sql.len());
        let mut pieces = sql.split(DYNAMIC_TOKEN);
        rendered.push_str(pieces.next().unwrap_or_default());
        for (name, piece) in names.iter().zip(pieces) {
            let value = match parameter {
                Value::Object(_) | Value::Array(_) => model.get_property(parameter, name),
                Value::Null => None,
                scalar => Some(scalar.clone()),
            };
            let value = value.ok_or_else(|| SqlMapError::DynamicText {
                statement: statement.to_string(),
                name: name.clone(),
            })?;
            rendered.push_str(&to_text(&value));
            rendered.push_str(piece);
        }
        Ok(rendered)
    }
}

/// 追加分页子句
pub fn with_limit(sql: &str, skip: Option<usize>, max: Option<usize>) -> String {
    let mut sql = sql.to_string();
    if let Some(max) = max.filter(|m| *m > 0) {
        sql.push_str(&format!(" LIMIT {max}"));
    }
    if let Some(skip) = skip.filter(|s| *s > 0) {
        sql.push_str(&format!(" OFFSET {skip}"));
    }
    sql
}
