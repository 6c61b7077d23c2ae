use super::cache::{CacheImplementation, CacheModel};
use super::error::{Result, SqlMapError};
use super::manager::{ConnectionSettings, SqlMapManager};
use super::model::{
    Discriminator, ParameterMap, ParameterProperty, ResultMap, ResultProperty, SelectKey, Statement,
    StatementKind, SubMap,
};
use super::parse_helper::{
    check_attributes, optional_attr, parse_bool_attr, parse_column_index, parse_int_attr,
    replace_properties, required_attr, search_matched_attr,
};
use super::parser::{parse_xml, XmlElement};
use super::placeholder::{parse_inline_parameters, unescape_inline_symbols, ParseScope};
use super::sql_generator::SqlText;
use super::statement::MappedStatement;
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const RESULT_MAP_ATTRIBUTES: &[&str] = &["id", "class", "extends", "groupBy"];
const RESULT_ATTRIBUTES: &[&str] = &[
    "property",
    "column",
    "columnIndex",
    "type",
    "dbType",
    "typeHandler",
    "nullValue",
    "resultMapping",
    "select",
    "lazyLoad",
];
const DISCRIMINATOR_ATTRIBUTES: &[&str] = &[
    "column",
    "columnIndex",
    "type",
    "dbType",
    "typeHandler",
    "nullValue",
];
const SUB_MAP_ATTRIBUTES: &[&str] = &["value", "resultMapping"];
const PARAMETER_MAP_ATTRIBUTES: &[&str] = &["id", "class", "extends"];
const PARAMETER_ATTRIBUTES: &[&str] = &["property", "column", "type", "dbType", "typeHandler", "nullValue"];
const STATEMENT_ATTRIBUTES: &[&str] = &[
    "id",
    "parameterMap",
    "parameterClass",
    "resultMap",
    "resultClass",
    "cacheModel",
    "listClass",
    "extends",
];
const SELECT_KEY_ATTRIBUTES: &[&str] = &["property", "type", "resultClass"];
const TYPE_HANDLER_ATTRIBUTES: &[&str] = &["class", "type", "dbType"];
const CACHE_MODEL_ATTRIBUTES: &[&str] = &["id", "implementation", "cacheSize"];
const FLUSH_ON_EXECUTE_ATTRIBUTES: &[&str] = &["statement"];
/// 按优先级排列，第一个出现的单位生效
const FLUSH_INTERVAL_UNITS: &[(&str, u64)] = &[
    ("seconds", 1),
    ("minutes", 60),
    ("hours", 3600),
    ("days", 86400),
    ("duration", 1),
];
const STATEMENT_ELEMENTS: &[&str] = &["statement", "select", "insert", "update", "delete"];

/// 读取配置文档和 `<sqlMap resource>` 引用的映射文档
pub trait ResourceLoader {
    /// 返回资源的名称和内容；`base` 为引用它的文件
    fn load(&self, resource: &str, base: Option<&str>) -> Result<(String, String)>;
}

/// 从文件系统读取，相对路径先按引用文件所在目录解析
#[derive(Debug, Clone, Copy, Default)]
pub struct FsResourceLoader;

impl ResourceLoader for FsResourceLoader {
    fn load(&self, resource: &str, base: Option<&str>) -> Result<(String, String)> {
        let mut candidates = Vec::new();
        if let Some(dir) = base.and_then(|b| Path::new(b).parent()) {
            candidates.push(dir.join(resource));
        }
        candidates.push(PathBuf::from(resource));

        for path in candidates {
            if path.is_file() {
                let name = path.display().to_string();
                let content = fs::read_to_string(&path).map_err(|e| SqlMapError::Xml {
                    file: name.clone(),
                    message: e.to_string(),
                })?;
                return Ok((name, content));
            }
        }
        Err(SqlMapError::ResourceNotFound {
            resource: resource.to_string(),
            file: base.unwrap_or_default().to_string(),
        })
    }
}

/// 内存中的文档，按名称查找
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceLoader {
    documents: HashMap<String, String>,
}

impl MemoryResourceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_document(&mut self, name: &str, content: &str) -> &mut Self {
        self.documents.insert(name.to_string(), content.to_string());
        self
    }

    pub fn with_document(mut self, name: &str, content: &str) -> Self {
        self.add_document(name, content);
        self
    }
}

impl ResourceLoader for MemoryResourceLoader {
    fn load(&self, resource: &str, base: Option<&str>) -> Result<(String, String)> {
        self.documents
            .get(resource)
            .map(|content| (resource.to_string(), content.clone()))
            .ok_or_else(|| SqlMapError::ResourceNotFound {
                resource: resource.to_string(),
                file: base.unwrap_or_default().to_string(),
            })
    }
}

/// XML配置加载器
///
/// 加载顺序：全局属性、类型处理器、连接声明，然后是配置文档本身和它引用的
/// 所有映射文档中的结果映射、参数映射、语句和缓存模型，最后解析嵌套结果映射
/// 并把缓存模型挂到语句上。
pub struct SqlMapXmlConfiguration<L = FsResourceLoader> {
    manager: SqlMapManager,
    loader: L,
    properties: HashMap<String, String>,
}

impl SqlMapXmlConfiguration<FsResourceLoader> {
    pub fn new(manager: SqlMapManager) -> Self {
        Self::with_loader(manager, FsResourceLoader)
    }
}

impl<L: ResourceLoader> SqlMapXmlConfiguration<L> {
    pub fn with_loader(manager: SqlMapManager, loader: L) -> Self {
        SqlMapXmlConfiguration {
            manager,
            loader,
            properties: HashMap::new(),
        }
    }

    /// 预先定义 `${name}` 属性，文档中的 `<property>` 会覆盖它
    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.properties.insert(name.to_string(), value.to_string());
        self
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// 加载配置文件
    pub fn configure(self, file: &str) -> Result<SqlMapManager> {
        let (name, content) = self.loader.load(file, None)?;
        self.configure_str(&name, &content)
    }

    /// 加载配置文本，`file` 用于错误信息和解析相对的资源路径
    pub fn configure_str(mut self, file: &str, xml: &str) -> Result<SqlMapManager> {
        let raw = parse_xml(xml, file)?;
        for property in raw.descendants("property", &["cacheModel"]) {
            self.load_global_property(property, file)?;
        }

        let root = parse_xml(&replace_properties(xml, &self.properties), file)?;
        for handler in root.descendants("typeHandler", &[]) {
            self.load_type_handler(handler, file)?;
        }
        if let Some(connection) = root.descendants("connection", &[]).last() {
            self.load_connection(connection);
        }

        let includes: Vec<String> = root
            .descendants("sqlMap", &[])
            .into_iter()
            .filter_map(|node| node.non_empty_attr("resource"))
            .map(|resource| replace_properties(resource, &self.properties))
            .collect();

        let mut documents = vec![Document {
            file: file.to_string(),
            root,
        }];
        for resource in includes {
            let (name, content) = self.loader.load(&resource, Some(file))?;
            let root = parse_xml(&replace_properties(&content, &self.properties), &name)?;
            documents.push(Document { file: name, root });
        }

        MappingLoader::new(&documents, &mut self.manager).load()?;
        Ok(self.manager)
    }

    fn load_global_property(&mut self, node: &XmlElement, file: &str) -> Result<()> {
        let name = required_attr(node, "name", file)?;
        let value = node.attr("value").unwrap_or_default();
        debug!("global property '{name}' = '{value}'");
        self.properties.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn load_type_handler(&mut self, node: &XmlElement, file: &str) -> Result<()> {
        check_attributes(node, TYPE_HANDLER_ATTRIBUTES, "type handler", file)?;
        let class = required_attr(node, "class", file)?;
        let registry = self.manager.type_handlers_mut();
        match node.non_empty_attr("type") {
            Some(type_tag) => registry.bind_type(type_tag, class),
            None if registry.contains(class) => Ok(()),
            None => Err(SqlMapError::TypeHandlerNotFound(class.to_string())),
        }
    }

    fn load_connection(&mut self, node: &XmlElement) {
        let connection = ConnectionSettings {
            attributes: node.attributes.iter().cloned().collect(),
        };
        self.manager.set_connection(connection);
    }
}

struct Document {
    file: String,
    root: XmlElement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// 映射文档的加载过程
struct MappingLoader<'d, 'm> {
    documents: &'d [Document],
    manager: &'m mut SqlMapManager,
    result_map_files: HashMap<String, &'d str>,
    /// 作为 `extends` 的父映射提前加载的映射
    loaded_early: HashSet<(&'static str, String)>,
}

impl<'d, 'm> MappingLoader<'d, 'm> {
    fn new(documents: &'d [Document], manager: &'m mut SqlMapManager) -> Self {
        MappingLoader {
            documents,
            manager,
            result_map_files: HashMap::new(),
            loaded_early: HashSet::new(),
        }
    }

    fn load(mut self) -> Result<()> {
        let documents = self.documents;

        for (index, document) in documents.iter().enumerate() {
            for node in document.root.descendants("resultMap", &[]) {
                self.load_result_map(index, node, &mut Vec::new())?;
            }
        }
        for (index, document) in documents.iter().enumerate() {
            for node in document.root.descendants("parameterMap", &[]) {
                self.load_parameter_map(index, node, &mut Vec::new())?;
            }
        }
        for (index, document) in documents.iter().enumerate() {
            for tag in STATEMENT_ELEMENTS {
                for node in document.root.descendants(tag, &[]) {
                    self.load_statement(index, node)?;
                }
            }
        }
        for document in documents {
            for node in document.root.descendants("cacheModel", &[]) {
                self.load_cache_model(node, &document.file)?;
            }
        }

        self.resolve_result_mappings()?;
        self.validate_statements()?;
        self.manager.attach_cache_models()?;

        for document in documents {
            info!("loaded sqlmap document '{}'", document.file);
        }
        Ok(())
    }

    fn file(&self, document: usize) -> &'d str {
        self.documents[document].file.as_str()
    }

    /// 按ID查找元素，先在当前文档中找，再找其它文档
    fn find_element(&self, document: usize, tag: &str, id: &str) -> Option<(usize, &'d XmlElement)> {
        let documents = self.documents;
        std::iter::once(document)
            .chain((0..documents.len()).filter(|i| *i != document))
            .find_map(|i| documents[i].root.find_by_id(tag, id).map(|node| (i, node)))
    }

    fn check_type_handler(&self, handler: Option<&str>) -> Result<()> {
        match handler {
            Some(name) if !self.manager.type_handlers().contains(name) => {
                Err(SqlMapError::TypeHandlerNotFound(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn cyclic_extends(kind: &'static str, id: &str, parent: &str, stack: &[String], file: &str) -> SqlMapError {
        let mut chain = stack.to_vec();
        chain.push(id.to_string());
        chain.push(parent.to_string());
        SqlMapError::CyclicExtends {
            kind,
            id: id.to_string(),
            chain,
            file: file.to_string(),
        }
    }

    fn load_result_map(&mut self, document: usize, node: &'d XmlElement, stack: &mut Vec<String>) -> Result<()> {
        let file = self.file(document);
        let id = required_attr(node, "id", file)?;
        if self.manager.has_result_map(id) {
            if !self.loaded_early.remove(&("resultMap", id.to_string())) {
                warn!("duplicate result map '{id}' in '{file}' ignored");
            }
            return Ok(());
        }

        let mut result_map = self.create_result_map(node, file)?;

        if let Some(parent) = result_map.extends.clone() {
            if parent == result_map.id || stack.contains(&parent) {
                return Err(Self::cyclic_extends("result map", id, &parent, stack.as_slice(), file));
            }
            if !self.manager.has_result_map(&parent) {
                if let Some((parent_document, parent_node)) = self.find_element(document, "resultMap", &parent) {
                    stack.push(id.to_string());
                    self.load_result_map(parent_document, parent_node, stack)?;
                    stack.pop();
                    self.loaded_early.insert(("resultMap", parent.clone()));
                }
            }
            let parent_map = self.manager.result_map(&parent).map_err(|_| {
                SqlMapError::ParentResultMapNotFound {
                    id: id.to_string(),
                    parent: parent.clone(),
                    file: file.to_string(),
                }
            })?;
            result_map.merge_parent(parent_map);
            debug!("result map '{id}' extends '{parent}'");
        }

        self.result_map_files.insert(result_map.id.clone(), file);
        self.manager.add_result_map(result_map);
        Ok(())
    }

    fn create_result_map(&self, node: &XmlElement, file: &str) -> Result<ResultMap> {
        check_attributes(node, RESULT_MAP_ATTRIBUTES, "result map", file)?;
        let mut result_map = ResultMap::new(required_attr(node, "id", file)?);
        result_map.class = optional_attr(node, "class");
        result_map.extends = optional_attr(node, "extends");
        result_map.group_by = optional_attr(node, "groupBy");

        for result in node.children_named("result") {
            result_map.add_result_property(self.create_result_property(result, file)?);
        }

        let discriminator_node = node.child("discriminator");
        let sub_maps: Vec<&XmlElement> = node
            .children_named("subMap")
            .chain(discriminator_node.into_iter().flat_map(|d| d.children_named("subMap")))
            .collect();

        match discriminator_node {
            Some(discriminator_node) => {
                let mut discriminator = self.create_discriminator(discriminator_node, file)?;
                for sub_map in sub_maps {
                    check_attributes(sub_map, SUB_MAP_ATTRIBUTES, "sub map", file)?;
                    discriminator.add_sub_map(SubMap {
                        value: sub_map.attr("value").unwrap_or_default().to_string(),
                        result_mapping: required_attr(sub_map, "resultMapping", file)?.to_string(),
                    });
                }
                result_map.discriminator = Some(discriminator);
            }
            None if !sub_maps.is_empty() => {
                return Err(SqlMapError::SubMapWithoutDiscriminator {
                    id: result_map.id,
                    file: file.to_string(),
                })
            }
            None => {}
        }
        Ok(result_map)
    }

    fn create_result_property(&self, node: &XmlElement, file: &str) -> Result<ResultProperty> {
        check_attributes(node, RESULT_ATTRIBUTES, "result property", file)?;
        let name = node.attr("property").ok_or_else(|| SqlMapError::MissingAttribute {
            attribute: "property".to_string(),
            element: node.name.clone(),
            file: file.to_string(),
        })?;
        let property = ResultProperty {
            property: name.to_string(),
            column: optional_attr(node, "column"),
            column_index: parse_column_index(node, file)?,
            type_tag: optional_attr(node, "type"),
            db_type: optional_attr(node, "dbType"),
            type_handler: optional_attr(node, "typeHandler"),
            null_value: node.attr("nullValue").map(str::to_string),
            result_mapping: optional_attr(node, "resultMapping"),
            nested_result_map: None,
            select: optional_attr(node, "select"),
            lazy_load: parse_bool_attr(node, "lazyLoad", file)?,
        };
        self.check_type_handler(property.type_handler.as_deref())?;
        Ok(property)
    }

    fn create_discriminator(&self, node: &XmlElement, file: &str) -> Result<Discriminator> {
        check_attributes(node, DISCRIMINATOR_ATTRIBUTES, "discriminator", file)?;
        let mut discriminator = Discriminator::default();
        discriminator.column = optional_attr(node, "column");
        discriminator.column_index = parse_column_index(node, file)?;
        discriminator.type_tag = optional_attr(node, "type");
        discriminator.db_type = optional_attr(node, "dbType");
        discriminator.type_handler = optional_attr(node, "typeHandler");
        discriminator.null_value = node.attr("nullValue").map(str::to_string);
        self.check_type_handler(discriminator.type_handler.as_deref())?;
        discriminator.init_mapping();
        Ok(discriminator)
    }

    fn load_parameter_map(
        &mut self,
        document: usize,
        node: &'d XmlElement,
        stack: &mut Vec<String>,
    ) -> Result<()> {
        let file = self.file(document);
        let id = required_attr(node, "id", file)?;
        if self.manager.has_parameter_map(id) {
            if self.loaded_early.remove(&("parameterMap", id.to_string())) {
                return Ok(());
            }
            return Err(SqlMapError::DuplicateId {
                kind: "parameter map",
                id: id.to_string(),
                file: file.to_string(),
            });
        }

        let mut parameter_map = self.create_parameter_map(node, file)?;

        if let Some(parent) = parameter_map.extends.clone() {
            if parent == parameter_map.id || stack.contains(&parent) {
                return Err(Self::cyclic_extends("parameter map", id, &parent, stack.as_slice(), file));
            }
            if !self.manager.has_parameter_map(&parent) {
                if let Some((parent_document, parent_node)) =
                    self.find_element(document, "parameterMap", &parent)
                {
                    stack.push(id.to_string());
                    self.load_parameter_map(parent_document, parent_node, stack)?;
                    stack.pop();
                    self.loaded_early.insert(("parameterMap", parent.clone()));
                }
            }
            let parent_map = self.manager.parameter_map(&parent).map_err(|_| {
                SqlMapError::ParentParameterMapNotFound {
                    id: id.to_string(),
                    parent: parent.clone(),
                    file: file.to_string(),
                }
            })?;
            parameter_map.merge_parent(parent_map);
            debug!("parameter map '{id}' extends '{parent}'");
        }

        self.manager.add_parameter_map(parameter_map);
        Ok(())
    }

    fn create_parameter_map(&self, node: &XmlElement, file: &str) -> Result<ParameterMap> {
        check_attributes(node, PARAMETER_MAP_ATTRIBUTES, "parameter map", file)?;
        let mut parameter_map = ParameterMap::new(required_attr(node, "id", file)?);
        parameter_map.class = optional_attr(node, "class");
        parameter_map.extends = optional_attr(node, "extends");

        for parameter in node.children_named("parameter") {
            check_attributes(parameter, PARAMETER_ATTRIBUTES, "parameter property", file)?;
            let property = ParameterProperty {
                property: required_attr(parameter, "property", file)?.to_string(),
                column: optional_attr(parameter, "column"),
                type_tag: optional_attr(parameter, "type"),
                db_type: optional_attr(parameter, "dbType"),
                type_handler: optional_attr(parameter, "typeHandler"),
                null_value: parameter.attr("nullValue").map(str::to_string),
            };
            self.check_type_handler(property.type_handler.as_deref())?;
            parameter_map.add_property(property);
        }
        Ok(parameter_map)
    }

    fn load_statement(&mut self, document: usize, node: &'d XmlElement) -> Result<()> {
        let Some(kind) = StatementKind::from_element(&node.name) else {
            return Ok(());
        };
        let file = self.file(document);
        check_attributes(node, STATEMENT_ATTRIBUTES, kind.element_name(), file)?;

        let mut statement = Statement::new(required_attr(node, "id", file)?, kind);
        search_matched_attr(node, "parameterMap", |v| statement.parameter_map = Some(v.to_string()));
        search_matched_attr(node, "parameterClass", |v| statement.parameter_class = Some(v.to_string()));
        search_matched_attr(node, "resultMap", |v| statement.result_map = Some(v.to_string()));
        search_matched_attr(node, "resultClass", |v| statement.result_class = Some(v.to_string()));
        search_matched_attr(node, "cacheModel", |v| statement.cache_model = Some(v.to_string()));
        search_matched_attr(node, "listClass", |v| statement.list_class = Some(v.to_string()));
        search_matched_attr(node, "extends", |v| statement.extends = Some(v.to_string()));

        let mut text = node.text();
        if let Some(parent) = statement.extends.as_deref() {
            let (_, parent_node) = self.find_element(document, "*", parent).ok_or_else(|| {
                SqlMapError::ParentSqlNotFound {
                    id: statement.id.clone(),
                    parent: parent.to_string(),
                    file: file.to_string(),
                }
            })?;
            text = parent_node.text() + &text;
        }
        self.apply_sql(&mut statement, &text, node, file)?;

        if kind == StatementKind::Insert {
            if let Some(select_key) = node.child("selectKey") {
                statement.select_key = Some(self.load_select_key(&statement.id, select_key, file)?);
            }
        }
        self.add_statement(statement, file)
    }

    /// 提取内联参数和动态文本
    fn apply_sql(&self, statement: &mut Statement, text: &str, node: &XmlElement, file: &str) -> Result<()> {
        let sql = if statement.parameter_map.is_none() {
            let scope = ParseScope {
                file,
                element: &node.name,
            };
            let inline = parse_inline_parameters(text, scope)?;
            if !inline.parameters.is_empty() {
                let mut map = ParameterMap::new(&format!("{}-InLineParameterMap", statement.id));
                for property in inline.parameters {
                    self.check_type_handler(property.type_handler.as_deref())?;
                    map.add_property(property);
                }
                statement.inline_parameter_map = Some(map);
            }
            inline.sql
        } else {
            unescape_inline_symbols(text)
        };
        statement.sql = SqlText::build(&sql);
        debug!("statement '{}': {}", statement.id, statement.sql.template());
        Ok(())
    }

    fn load_select_key(&mut self, insert: &str, node: &XmlElement, file: &str) -> Result<SelectKey> {
        let id = format!("{insert}.SelectKey");
        if let Some(parent) = node.non_empty_attr("extends") {
            return Err(SqlMapError::ExtendsSelectKey {
                id,
                parent: parent.to_string(),
                file: file.to_string(),
            });
        }
        check_attributes(node, SELECT_KEY_ATTRIBUTES, "select key", file)?;

        let is_after = match node.non_empty_attr("type") {
            None => false,
            Some(t) if t.eq_ignore_ascii_case("post") => true,
            Some(t) if t.eq_ignore_ascii_case("pre") => false,
            Some(t) => {
                return Err(SqlMapError::InvalidValue {
                    attribute: "type".to_string(),
                    value: t.to_string(),
                    element: node.name.clone(),
                    file: file.to_string(),
                })
            }
        };

        let mut statement = Statement::new(&id, StatementKind::SelectKey);
        statement.result_class = optional_attr(node, "resultClass");
        self.apply_sql(&mut statement, &node.text(), node, file)?;
        self.add_statement(statement, file)?;

        Ok(SelectKey {
            id,
            property: optional_attr(node, "property"),
            is_after,
        })
    }

    fn add_statement(&mut self, statement: Statement, file: &str) -> Result<()> {
        let id = statement.id.clone();
        if !self.manager.add_mapped_statement(MappedStatement::new(statement)) {
            return Err(SqlMapError::DuplicateId {
                kind: "statement",
                id,
                file: file.to_string(),
            });
        }
        Ok(())
    }

    fn load_cache_model(&mut self, node: &XmlElement, file: &str) -> Result<()> {
        check_attributes(node, CACHE_MODEL_ATTRIBUTES, "cache model", file)?;
        let id = required_attr(node, "id", file)?;
        let name = node.non_empty_attr("implementation").unwrap_or("basic");
        let implementation = CacheImplementation::from_name(name).ok_or_else(|| {
            SqlMapError::UnknownCacheImplementation {
                id: id.to_string(),
                implementation: name.to_string(),
            }
        })?;

        let mut cache = CacheModel::new(id, implementation);
        if let Some(size) = parse_int_attr(node, "cacheSize", file)? {
            cache.set_capacity(size.max(1) as usize);
        }

        for property in node.children_named("property") {
            let (Some(name), Some(value)) = (property.non_empty_attr("name"), property.non_empty_attr("value")) else {
                continue;
            };
            if !name.eq_ignore_ascii_case("cacheSize") {
                warn!("cache model '{id}' has no property '{name}', skipped");
                continue;
            }
            let size = value.trim().parse::<usize>().map_err(|_| SqlMapError::InvalidValue {
                attribute: name.to_string(),
                value: value.to_string(),
                element: property.name.clone(),
                file: file.to_string(),
            })?;
            cache.set_capacity(size);
        }

        if let Some(interval) = node.child("flushInterval") {
            cache.set_flush_interval(Self::flush_interval(interval, file)?);
        }

        for flush in node.children_named("flushOnExecute") {
            check_attributes(flush, FLUSH_ON_EXECUTE_ATTRIBUTES, "flush on execute", file)?;
            cache.add_trigger_statement(required_attr(flush, "statement", file)?);
        }

        debug!("cache model '{id}': {cache:?}");
        if !self.manager.add_cache_model(cache) {
            return Err(SqlMapError::DuplicateId {
                kind: "cache model",
                id: id.to_string(),
                file: file.to_string(),
            });
        }
        Ok(())
    }

    fn flush_interval(node: &XmlElement, file: &str) -> Result<Duration> {
        let units: Vec<&str> = FLUSH_INTERVAL_UNITS.iter().map(|(unit, _)| *unit).collect();
        check_attributes(node, &units, "flush interval", file)?;
        for (unit, seconds) in FLUSH_INTERVAL_UNITS {
            if let Some(value) = parse_int_attr(node, unit, file)? {
                return Ok(Duration::from_secs(value.max(0) as u64 * seconds));
            }
        }
        Ok(Duration::ZERO)
    }

    /// 把 `resultMapping` 指向已加载的结果映射，初始化鉴别器
    fn resolve_result_mappings(&mut self) -> Result<()> {
        let known: HashSet<String> = self.manager.result_maps().keys().cloned().collect();
        let files = &self.result_map_files;
        for result_map in self.manager.result_maps_mut().values_mut() {
            let id = result_map.id.clone();
            let file = files.get(&id).copied().unwrap_or_default();
            for column in result_map.columns_mut() {
                let Some(mapping) = column.result_mapping.clone() else {
                    continue;
                };
                if !known.contains(&mapping) {
                    return Err(SqlMapError::ResultMappingNotFound {
                        mapping,
                        result_map: id,
                        file: file.to_string(),
                    });
                }
                column.nested_result_map = Some(mapping);
            }
            if let Some(discriminator) = result_map.discriminator.as_mut() {
                discriminator.initialize(&id, |target| known.contains(target));
            }
        }
        check_discriminator_cycles(self.manager.result_maps())?;
        check_nested_cycles(self.manager.result_maps())
    }

    /// 语句引用的映射和缓存模型必须存在
    fn validate_statements(&self) -> Result<()> {
        for id in self.manager.statement_ids() {
            let statement = self.manager.mapped_statement(id)?.statement();
            if let Some(result_map) = &statement.result_map {
                self.manager.result_map(result_map)?;
            }
            if let Some(parameter_map) = &statement.parameter_map {
                self.manager.parameter_map(parameter_map)?;
            }
            if let Some(cache_model) = &statement.cache_model {
                self.manager.cache_model(cache_model)?;
            }
        }
        Ok(())
    }
}

/// 鉴别器的子映射之间不能成环（指向自身除外）
fn check_discriminator_cycles(maps: &IndexMap<String, ResultMap>) -> Result<()> {
    find_cycle(maps, discriminator_targets)
        .map_or(Ok(()), |cycle| Err(SqlMapError::DiscriminatorCycle { cycle }))
}

/// 嵌套结果映射不能直接或经由鉴别器回到自身
fn check_nested_cycles(maps: &IndexMap<String, ResultMap>) -> Result<()> {
    find_cycle(maps, |map| {
        let mut targets = discriminator_targets(map);
        targets.extend(map.columns().filter_map(|c| c.nested_result_map.as_deref()));
        targets
    })
    .map_or(Ok(()), |cycle| Err(SqlMapError::NestedResultMapCycle { cycle }))
}

fn discriminator_targets(map: &ResultMap) -> Vec<&str> {
    map.discriminator
        .as_ref()
        .map(|d| d.targets().filter(|t| *t != map.id).collect())
        .unwrap_or_default()
}

fn find_cycle<'m>(
    maps: &'m IndexMap<String, ResultMap>,
    edges: impl Fn(&'m ResultMap) -> Vec<&'m str>,
) -> Option<Vec<String>> {
    let mut marks = HashMap::new();
    maps.keys()
        .find_map(|id| visit_result_map(maps, id, &edges, &mut marks, &mut Vec::new()))
}

fn visit_result_map<'m>(
    maps: &'m IndexMap<String, ResultMap>,
    id: &'m str,
    edges: &impl Fn(&'m ResultMap) -> Vec<&'m str>,
    marks: &mut HashMap<&'m str, Mark>,
    path: &mut Vec<&'m str>,
) -> Option<Vec<String>> {
    match marks.get(id) {
        Some(Mark::Done) => return None,
        Some(Mark::Visiting) => {
            let start = path.iter().position(|p| *p == id).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|p| p.to_string()).collect();
            cycle.push(id.to_string());
            return Some(cycle);
        }
        None => {}
    }

    marks.insert(id, Mark::Visiting);
    path.push(id);
    if let Some(map) = maps.get(id) {
        let mut targets = edges(map);
        targets.sort_unstable();
        targets.dedup();
        for target in targets {
            if let Some(cycle) = visit_result_map(maps, target, edges, marks, path) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    marks.insert(id, Mark::Done);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn configure(xml: &str) -> Result<SqlMapManager> {
        SqlMapXmlConfiguration::with_loader(SqlMapManager::default(), MemoryResourceLoader::new())
            .configure_str("Test.xml", xml)
    }

    #[test]
    fn flush_interval_takes_first_unit() {
        let manager = configure(
            r#"<sqlMap>
                <cacheModel id="c" cacheSize="0"><flushInterval minutes="2" seconds="5"/></cacheModel>
            </sqlMap>"#,
        )
        .unwrap();
        let cache = manager.cache_model("c").unwrap();
        assert_eq!(cache.flush_interval(), Duration::from_secs(5));
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn select_key_type_must_be_pre_or_post() {
        let err = configure(
            r#"<sqlMap>
                <insert id="add">INSERT INTO t VALUES (1)<selectKey type="later">SELECT 1</selectKey></insert>
            </sqlMap>"#,
        )
        .unwrap_err();
        assert!(matches!(err, SqlMapError::InvalidValue { ref value, .. } if value == "later"));
    }

    #[test]
    fn inline_parameters_become_parameter_map() {
        let manager = configure(
            r#"<sqlMap>
                <select id="find">SELECT * FROM t WHERE a = #a# AND b = #b,type=int# AND c = '##'</select>
                <select id="raw" parameterMap="pm">SELECT * FROM t WHERE a = ? AND c = '##'</select>
                <parameterMap id="pm"><parameter property="a"/></parameterMap>
            </sqlMap>"#,
        )
        .unwrap();

        let find = manager.mapped_statement("find").unwrap().statement();
        let inline = find.inline_parameter_map.as_ref().unwrap();
        assert_eq!(inline.id, "find-InLineParameterMap");
        assert_eq!(inline.property_names(), vec!["a", "b"]);
        assert_eq!(find.sql.template(), "SELECT * FROM t WHERE a = ? AND b = ? AND c = '#'");

        let raw = manager.mapped_statement("raw").unwrap().statement();
        assert!(raw.inline_parameter_map.is_none());
        assert_eq!(raw.sql.template(), "SELECT * FROM t WHERE a = ? AND c = '#'");
    }

    #[test]
    fn unregistered_type_handler_is_rejected() {
        let err = configure(
            r#"<sqlMapConfig>
                <typeHandlers><typeHandler type="date" class="DateHandler"/></typeHandlers>
            </sqlMapConfig>"#,
        )
        .unwrap_err();
        assert!(matches!(err, SqlMapError::TypeHandlerNotFound(ref name) if name == "DateHandler"));
    }

    fn nested_cycle(xml: &str) -> Vec<String> {
        match configure(xml).unwrap_err() {
            SqlMapError::NestedResultMapCycle { cycle } => cycle,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nested_result_map_cycles_are_rejected() {
        let cycle = nested_cycle(
            r#"<sqlMap>
                <resultMap id="node"><result property="child" resultMapping="node"/></resultMap>
            </sqlMap>"#,
        );
        assert_eq!(cycle, vec!["node", "node"]);

        let cycle = nested_cycle(
            r#"<sqlMap>
                <resultMap id="a"><result property="b" resultMapping="b"/></resultMap>
                <resultMap id="b"><result property="a" resultMapping="a"/></resultMap>
            </sqlMap>"#,
        );
        assert_eq!(cycle, vec!["a", "b", "a"]);

        // 经由鉴别器的子映射回到外层映射
        let cycle = nested_cycle(
            r#"<sqlMap>
                <resultMap id="a"><result property="b" resultMapping="b"/></resultMap>
                <resultMap id="b">
                    <discriminator column="K"><subMap value="1" resultMapping="a"/></discriminator>
                </resultMap>
            </sqlMap>"#,
        );
        assert_eq!(cycle, vec!["a", "b", "a"]);

        configure(
            r#"<sqlMap>
                <resultMap id="a"><result property="b" resultMapping="b"/><result property="c" resultMapping="c"/></resultMap>
                <resultMap id="b"><result property="c" resultMapping="c"/></resultMap>
                <resultMap id="c"><result property="x" column="X"/></resultMap>
            </sqlMap>"#,
        )
        .unwrap();
    }

    #[test]
    fn fs_loader_reports_missing_files() {
        let err = FsResourceLoader
            .load("no/such/SqlMap.xml", Some("config/SqlMapConfig.xml"))
            .unwrap_err();
        assert!(matches!(err, SqlMapError::ResourceNotFound { ref file, .. } if file == "config/SqlMapConfig.xml"));
    }
}
