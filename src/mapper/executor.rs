use super::error::BoxError;
use indexmap::IndexMap;
use serde_json::Value;

/// 结果集的一行：列名到值，保持列顺序
pub type Row = IndexMap<String, Value>;

/// 数据库驱动
///
/// 引擎把生成的SQL（参数为位置占位符 `?`）和绑定值交给驱动执行。
pub trait SqlExecutor {
    /// 执行查询，返回所有结果行
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BoxError>;

    /// 执行更新，返回受影响的行数
    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, BoxError>;
}

impl<T: SqlExecutor + ?Sized> SqlExecutor for &T {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BoxError> {
        (**self).query(sql, params)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, BoxError> {
        (**self).execute(sql, params)
    }
}
