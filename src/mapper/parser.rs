use super::error::{Result, SqlMapError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::Cursor;

/// XML元素
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlElement {
    pub name: String,
    /// 按文档顺序保存的属性
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

/// XML节点
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

impl XmlElement {
    /// 读取属性（属性名不区分大小写）
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// 非空属性
    pub fn non_empty_attr(&self, name: &str) -> Option<&str> {
        self.attr(name).filter(|v| !v.is_empty())
    }

    /// 直接子元素
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// 指定名称的直接子元素
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |e| e.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.name == name)
    }

    /// 元素自身的文本（不含子元素的文本），相当于 `(string)$node`
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// 文档顺序的后代元素，相当于 `//name`；`skip` 中的元素不会被深入
    pub fn descendants<'a>(&'a self, name: &str, skip: &[&str]) -> Vec<&'a XmlElement> {
        let mut found = Vec::new();
        self.collect_descendants(name, skip, &mut found);
        found
    }

    fn collect_descendants<'a>(&'a self, name: &str, skip: &[&str], found: &mut Vec<&'a XmlElement>) {
        for element in self.elements() {
            if element.name == name {
                found.push(element);
            }
            if !skip.contains(&element.name.as_str()) {
                element.collect_descendants(name, skip, found);
            }
        }
    }

    /// 按ID查找元素（`*` 匹配任意元素名，ID属性名不区分大小写）
    pub fn find_by_id(&self, tag: &str, id: &str) -> Option<&XmlElement> {
        for element in self.elements() {
            if (tag == "*" || element.name == tag) && element.attr("id") == Some(id) {
                return Some(element);
            }
            if let Some(found) = element.find_by_id(tag, id) {
                return Some(found);
            }
        }
        None
    }
}

/// SqlMap XML解析器
pub struct SqlMapXmlParser {
    reader: Reader<Cursor<Vec<u8>>>,
    buf: Vec<u8>,
    file: String,
}

impl SqlMapXmlParser {
    /// 从字符串创建解析器
    pub fn new(xml_content: &str, file: &str) -> Self {
        Self::new_from_bytes(xml_content.as_bytes(), file)
    }

    /// 从字节切片创建解析器
    pub fn new_from_bytes(xml_bytes: &[u8], file: &str) -> Self {
        let cursor = Cursor::new(xml_bytes.to_vec());

        // SQL文本中的空白需要保留
        let mut reader = Reader::from_reader(cursor);
        reader.trim_text(false);

        SqlMapXmlParser {
            reader,
            buf: Vec::new(),
            file: file.to_string(),
        }
    }

    fn error(file: &str, message: impl ToString) -> SqlMapError {
        SqlMapError::Xml {
            file: file.to_string(),
            message: message.to_string(),
        }
    }

    /// 解析整个文档，返回根元素
    pub fn parse_document(&mut self) -> Result<XmlElement> {
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;

        loop {
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map_err(|e| SqlMapError::Xml {
                    file: self.file.clone(),
                    message: e.to_string(),
                })?;
            match event {
                Event::Start(e) => {
                    let element = Self::start_element(&self.file, &e)?;
                    stack.push(element);
                }
                Event::Empty(e) => {
                    let element = Self::start_element(&self.file, &e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Element(element)),
                        None => root = Some(element),
                    }
                }
                Event::End(_) => {
                    let element = stack.pop().ok_or_else(|| Self::error(&self.file, "unexpected closing tag"))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Element(element)),
                        None => root = Some(element),
                    }
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| Self::error(&self.file, e))?.into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(text));
                    }
                }
                Event::CData(c) => {
                    let text = std::str::from_utf8(&c).map_err(|e| Self::error(&self.file, e))?.to_string();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(text));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            self.buf.clear();
        }

        if !stack.is_empty() {
            return Err(Self::error(&self.file, format!("unclosed element <{}>", stack[stack.len() - 1].name)));
        }
        root.ok_or_else(|| Self::error(&self.file, "document has no root element"))
    }

    fn start_element(file: &str, e: &BytesStart<'_>) -> Result<XmlElement> {
        let name = std::str::from_utf8(e.local_name().as_ref())
            .map_err(|err| Self::error(file, err))?
            .to_string();
        let mut element = XmlElement {
            name,
            ..Default::default()
        };
        for attr in e.attributes() {
            let attr = attr.map_err(|err| Self::error(file, err))?;
            let key = std::str::from_utf8(attr.key.as_ref()).map_err(|err| Self::error(file, err))?;
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let value = attr.unescape_value().map_err(|err| Self::error(file, err))?;
            element.attributes.push((key.to_string(), value.into_owned()));
        }
        Ok(element)
    }
}

/// 解析XML文本
pub fn parse_xml(xml_content: &str, file: &str) -> Result<XmlElement> {
    SqlMapXmlParser::new(xml_content, file).parse_document()
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sqlMap namespace="Account">
    <resultMap id="account" class="Account">
        <result property="id" column="ID"/>
    </resultMap>
    <select id="find" resultMap="account">
        SELECT * FROM accounts WHERE id = #id#
        <![CDATA[ AND age < 10 ]]>
    </select>
    <insert id="add">
        INSERT INTO accounts VALUES (#id#)
        <selectKey property="id" type="post">SELECT 1</selectKey>
    </insert>
</sqlMap>"#;

    #[test]
    fn builds_element_tree() {
        let root = parse_xml(XML, "Account.xml").unwrap();
        assert_eq!(root.name, "sqlMap");
        assert_eq!(root.attr("NAMESPACE"), Some("Account"));

        let maps = root.descendants("result", &[]);
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].attr("column"), Some("ID"));

        let select = root.find_by_id("*", "find").unwrap();
        assert_eq!(select.name, "select");
        let text = select.text();
        assert!(text.contains("WHERE id = #id#"));
        assert!(text.contains("AND age < 10"));
    }

    #[test]
    fn element_text_excludes_child_elements() {
        let root = parse_xml(XML, "Account.xml").unwrap();
        let insert = root.find_by_id("insert", "add").unwrap();
        assert_eq!(insert.text().trim(), "INSERT INTO accounts VALUES (#id#)");
        assert_eq!(insert.child("selectKey").unwrap().text(), "SELECT 1");
    }

    #[test]
    fn skipped_elements_are_not_searched() {
        let root = parse_xml(
            r#"<cfg><property name="a" value="1"/><cacheModel id="c"><property name="cacheSize" value="5"/></cacheModel></cfg>"#,
            "cfg.xml",
        )
        .unwrap();
        assert_eq!(root.descendants("property", &["cacheModel"]).len(), 1);
        assert_eq!(root.descendants("property", &[]).len(), 2);
    }

    #[test]
    fn malformed_document_fails() {
        assert!(matches!(
            parse_xml("<sqlMap><select></sqlMap>", "bad.xml"),
            Err(SqlMapError::Xml { .. })
        ));
    }
}
