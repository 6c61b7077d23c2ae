use std::error::Error;
use thiserror::Error;

/// 外部组件（驱动、对象模型、类型处理器）返回的错误
pub type BoxError = Box<dyn Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, SqlMapError>;

/// SqlMap错误
#[derive(Debug, Error)]
pub enum SqlMapError {
    /// XML文档无法解析
    #[error("unable to parse xml document '{file}': {message}")]
    Xml { file: String, message: String },

    /// 资源文件不存在
    #[error("unable to find resource '{resource}' (included from '{file}')")]
    ResourceNotFound { resource: String, file: String },

    /// 元素上出现了无法设置的属性
    #[error("property '{property}' is not settable on {target} in <{element}> of '{file}'")]
    InvalidProperty {
        property: String,
        target: String,
        element: String,
        file: String,
    },

    /// 元素缺少必需属性
    #[error("missing required attribute '{attribute}' on <{element}> in '{file}'")]
    MissingAttribute {
        attribute: String,
        element: String,
        file: String,
    },

    /// 属性值格式不正确
    #[error("invalid value '{value}' for '{attribute}' on <{element}> in '{file}'")]
    InvalidValue {
        attribute: String,
        value: String,
        element: String,
        file: String,
    },

    #[error("unable to find parent result map '{parent}' for result map '{id}' in '{file}'")]
    ParentResultMapNotFound {
        id: String,
        parent: String,
        file: String,
    },

    #[error("unable to find parent parameter map '{parent}' for parameter map '{id}' in '{file}'")]
    ParentParameterMapNotFound {
        id: String,
        parent: String,
        file: String,
    },

    #[error("unable to find parent sql '{parent}' for statement '{id}' in '{file}'")]
    ParentSqlNotFound {
        id: String,
        parent: String,
        file: String,
    },

    /// `extends` 形成了环
    #[error("cyclic extends for {kind} '{id}' in '{file}': {}", chain.join(" -> "))]
    CyclicExtends {
        kind: &'static str,
        id: String,
        chain: Vec<String>,
        file: String,
    },

    #[error("selectKey '{id}' can not be extended (extends '{parent}') in '{file}'")]
    ExtendsSelectKey {
        id: String,
        parent: String,
        file: String,
    },

    #[error("<subMap> without <discriminator> in result map '{id}' of '{file}'")]
    SubMapWithoutDiscriminator { id: String, file: String },

    #[error("unable to find result mapping '{mapping}' used by result map '{result_map}' in '{file}'")]
    ResultMappingNotFound {
        mapping: String,
        result_map: String,
        file: String,
    },

    #[error("discriminator cycle between result maps: {}", cycle.join(" -> "))]
    DiscriminatorCycle { cycle: Vec<String> },

    #[error("nested result map cycle: {}", cycle.join(" -> "))]
    NestedResultMapCycle { cycle: Vec<String> },

    #[error("duplicate {kind} id '{id}' in '{file}'")]
    DuplicateId {
        kind: &'static str,
        id: String,
        file: String,
    },

    #[error("unknown cache implementation '{implementation}' for cache model '{id}'")]
    UnknownCacheImplementation { id: String, implementation: String },

    #[error("unable to find statement '{statement}' to flush cache model '{cache}'")]
    TriggerStatementNotFound { cache: String, statement: String },

    #[error("unable to find cache model '{0}'")]
    CacheModelNotFound(String),

    #[error("unable to find mapped statement '{0}'")]
    StatementNotFound(String),

    #[error("unable to find result map '{0}'")]
    ResultMapNotFound(String),

    #[error("unable to find parameter map '{0}'")]
    ParameterMapNotFound(String),

    #[error("unable to find type handler '{0}'")]
    TypeHandlerNotFound(String),

    /// 参数对象上不存在映射的属性
    #[error("unable to bind property '{property}' of parameter map '{parameter_map}' on object of type '{type_name}'")]
    Binding {
        parameter_map: String,
        property: String,
        type_name: String,
    },

    /// 动态SQL占位符 `$name$` 找不到值
    #[error("unable to substitute dynamic text '{name}' for statement '{statement}'")]
    DynamicText { statement: String, name: String },

    /// SQL执行失败
    #[error("statement '{statement}' execution failed: {source}")]
    Execution {
        statement: String,
        #[source]
        source: BoxError,
    },

    /// 结果对象无法创建或填充
    #[error("unable to materialize result map '{result_map}' of class '{class}': {source}")]
    Materialization {
        result_map: String,
        class: String,
        #[source]
        source: BoxError,
    },

    #[error("statement '{statement}' of kind {kind} does not support {operation}")]
    UnsupportedOperation {
        statement: String,
        kind: String,
        operation: &'static str,
    },
}

impl SqlMapError {
    /// 是否为加载阶段的配置错误
    pub fn is_configuration(&self) -> bool {
        !matches!(
            self,
            SqlMapError::Binding { .. }
                | SqlMapError::DynamicText { .. }
                | SqlMapError::Execution { .. }
                | SqlMapError::Materialization { .. }
                | SqlMapError::UnsupportedOperation { .. }
                | SqlMapError::StatementNotFound(_)
        )
    }
}
