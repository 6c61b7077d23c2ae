use super::error::{Result, SqlMapError};
use super::model::ParameterProperty;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref INLINE_PARAM_REGEX: Regex = Regex::new(r"#([^#]+)#").unwrap();
    static ref DYNAMIC_TEXT_REGEX: Regex = Regex::new(r"\$([\w.\[\]]+)\$").unwrap();
}

pub const INLINE_SYMBOL: &str = "#";
pub const SIMPLE_MARK: &str = "$";
/// `##` 在解析期间的占位
pub const INLINE_PLACEHOLDER: &str = "`!!!`";
/// `$$` 在解析期间的占位
pub const SIMPLE_PLACEHOLDER: &str = "`!!`";
/// 动态文本在SQL模板中的标记
pub const DYNAMIC_TOKEN: &str = "`!`";

/// 解析出错时的来源信息
#[derive(Debug, Clone, Copy)]
pub struct ParseScope<'a> {
    pub file: &'a str,
    pub element: &'a str,
}

/// 内联参数解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct InlineParameters {
    pub sql: String,
    pub parameters: Vec<ParameterProperty>,
}

/// 解析 `#name,attr=value#`，每个参数替换为 `?`
///
/// `##` 表示字面量 `#`。
pub fn parse_inline_parameters(sql: &str, scope: ParseScope<'_>) -> Result<InlineParameters> {
    let escaped = sql.replace("##", INLINE_PLACEHOLDER);
    let mut parameters = Vec::new();
    let mut text = String::with_capacity(escaped.len());
    let mut last = 0;
    for caps in INLINE_PARAM_REGEX.captures_iter(&escaped) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        text.push_str(&escaped[last..whole.start]);
        text.push('?');
        last = whole.end;
        parameters.push(parse_inline_token(&caps[1], scope)?);
    }
    text.push_str(&escaped[last..]);

    Ok(InlineParameters {
        sql: text.replace(INLINE_PLACEHOLDER, INLINE_SYMBOL),
        parameters,
    })
}

/// 只还原 `##`，用于已经指定了 parameterMap 的语句
pub fn unescape_inline_symbols(sql: &str) -> String {
    sql.replace("##", INLINE_SYMBOL)
}

fn parse_inline_token(token: &str, scope: ParseScope<'_>) -> Result<ParameterProperty> {
    let mut segments = token.split(',');
    let name = segments.next().unwrap_or_default().trim();
    let mut property = ParameterProperty::new(name);

    for segment in segments {
        let (key, value) = match segment.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim().to_string()),
            None => (segment.trim(), String::new()),
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => property.type_tag = Some(value),
            "dbtype" => property.db_type = Some(value),
            "nullvalue" => property.null_value = Some(value),
            "handler" | "typehandler" => property.type_handler = Some(value),
            "column" => property.column = Some(value),
            _ => {
                return Err(SqlMapError::InvalidProperty {
                    property: key.to_string(),
                    target: format!("inline parameter '#{token}#'"),
                    element: scope.element.to_string(),
                    file: scope.file.to_string(),
                })
            }
        }
    }
    Ok(property)
}

/// 动态文本解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicText {
    pub sql: String,
    pub names: Vec<String>,
}

/// 解析 `$name$`，每个名称替换为 [`DYNAMIC_TOKEN`]
///
/// `$$` 表示字面量 `$`。
pub fn parse_dynamic_text(sql: &str) -> DynamicText {
    let escaped = sql.replace("$$", SIMPLE_PLACEHOLDER);
    let mut names = Vec::new();
    let replaced = DYNAMIC_TEXT_REGEX.replace_all(&escaped, |caps: &regex::Captures| {
        names.push(caps[1].to_string());
        DYNAMIC_TOKEN
    });
    DynamicText {
        sql: replaced.replace(SIMPLE_PLACEHOLDER, SIMPLE_MARK),
        names,
    }
}
