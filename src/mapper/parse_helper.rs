use super::error::{Result, SqlMapError};
use super::parser::XmlElement;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashMap;

lazy_static! {
    static ref PROPERTY_REGEX: Regex = Regex::new(r"\$\{([^}]+)\}").unwrap();
}

/// 替换 `${name}`，未定义的属性保持原样
pub fn replace_properties(text: &str, properties: &HashMap<String, String>) -> String {
    if properties.is_empty() || !text.contains("${") {
        return text.to_string();
    }
    PROPERTY_REGEX
        .replace_all(text, |caps: &Captures| match properties.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// 检索属性，匹配且非空时回调闭包
pub fn search_matched_attr(element: &XmlElement, matched_name: &str, mut f: impl FnMut(&str)) {
    if let Some(value) = element.non_empty_attr(matched_name) {
        f(value);
    }
}

/// 非空属性的拷贝
pub fn optional_attr(element: &XmlElement, name: &str) -> Option<String> {
    element.non_empty_attr(name).map(str::to_string)
}

/// 必需的属性
pub fn required_attr<'e>(element: &'e XmlElement, name: &str, file: &str) -> Result<&'e str> {
    element
        .non_empty_attr(name)
        .ok_or_else(|| SqlMapError::MissingAttribute {
            attribute: name.to_string(),
            element: element.name.clone(),
            file: file.to_string(),
        })
}

/// 元素上只能出现可设置的属性
pub fn check_attributes(element: &XmlElement, allowed: &[&str], target: &str, file: &str) -> Result<()> {
    for (name, _) in &element.attributes {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            return Err(SqlMapError::InvalidProperty {
                property: name.clone(),
                target: target.to_string(),
                element: element.name.clone(),
                file: file.to_string(),
            });
        }
    }
    Ok(())
}

fn invalid_value(element: &XmlElement, attribute: &str, value: &str, file: &str) -> SqlMapError {
    SqlMapError::InvalidValue {
        attribute: attribute.to_string(),
        value: value.to_string(),
        element: element.name.clone(),
        file: file.to_string(),
    }
}

/// 整数属性
pub fn parse_int_attr(element: &XmlElement, name: &str, file: &str) -> Result<Option<i64>> {
    element
        .non_empty_attr(name)
        .map(|value| {
            value
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid_value(element, name, value, file))
        })
        .transpose()
}

/// 列序号：小于等于 0 视为未设置
pub fn parse_column_index(element: &XmlElement, file: &str) -> Result<Option<usize>> {
    Ok(parse_int_attr(element, "columnIndex", file)?
        .filter(|i| *i > 0)
        .map(|i| i as usize))
}

/// 布尔属性
pub fn parse_bool_attr(element: &XmlElement, name: &str, file: &str) -> Result<bool> {
    match element.non_empty_attr(name) {
        None => Ok(false),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(invalid_value(element, name, value, file)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::parser::parse_xml;

    #[test]
    fn replaces_known_properties_only() {
        let properties = HashMap::from([("schema".to_string(), "app".to_string())]);
        assert_eq!(
            replace_properties("SELECT * FROM ${schema}.users WHERE x = '${other}'", &properties),
            "SELECT * FROM app.users WHERE x = '${other}'"
        );
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let element = parse_xml(r#"<result property="id" colour="red"/>"#, "m.xml").unwrap();
        let err = check_attributes(&element, &["property", "column"], "result property", "m.xml")
            .unwrap_err();
        assert!(matches!(err, SqlMapError::InvalidProperty { ref property, .. } if property == "colour"));
        assert!(check_attributes(&element, &["PROPERTY", "colour"], "result property", "m.xml").is_ok());
    }

    #[test]
    fn parses_typed_attributes() {
        let element = parse_xml(r#"<result columnIndex="0" lazyLoad="true" size="x"/>"#, "m.xml").unwrap();
        assert_eq!(parse_column_index(&element, "m.xml").unwrap(), None);
        assert!(parse_bool_attr(&element, "lazyLoad", "m.xml").unwrap());
        assert!(matches!(
            parse_int_attr(&element, "size", "m.xml"),
            Err(SqlMapError::InvalidValue { .. })
        ));
    }
}
