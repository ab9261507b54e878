//! Minimal XML-RPC codec for the Wikidot API.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{Context, Result, anyhow, bail};
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Int(i64),
    Double(f64),
    Text(String),
    DateTime(String),
    Base64(String),
    Array(Vec<Value>),
    Struct(BTreeMap<String, Value>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) | Self::DateTime(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    pub fn into_struct(self) -> Result<BTreeMap<String, Value>> {
        match self {
            Self::Struct(members) => Ok(members),
            other => bail!("expected XML-RPC struct, found {}", other.kind()),
        }
    }

    pub fn into_string_list(self) -> Result<Vec<String>> {
        match self {
            Self::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Self::Text(value) => Ok(value),
                    other => Err(anyhow!(
                        "expected string in XML-RPC array, found {}",
                        other.kind()
                    )),
                })
                .collect(),
            other => bail!("expected XML-RPC array, found {}", other.kind()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Text(_) => "string",
            Self::DateTime(_) => "dateTime.iso8601",
            Self::Base64(_) => "base64",
            Self::Array(_) => "array",
            Self::Struct(_) => "struct",
        }
    }
}

/// Text rendering used when a value is copied into a metadata document.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => Ok(()),
            // capitalized, as in metadata documents already on disk
            Self::Boolean(true) => f.write_str("True"),
            Self::Boolean(false) => f.write_str("False"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value}"),
            Self::Text(value) | Self::DateTime(value) | Self::Base64(value) => f.write_str(value),
            Self::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Struct(members) => {
                for (index, (key, item)) in members.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={item}")?;
                }
                Ok(())
            }
        }
    }
}

pub fn encode_call(method: &str, params: &[Value]) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("failed to write XML declaration")?;
    open(&mut writer, "methodCall")?;
    write_text_element(&mut writer, "methodName", method)?;
    open(&mut writer, "params")?;
    for param in params {
        open(&mut writer, "param")?;
        write_value(&mut writer, param)?;
        close(&mut writer, "param")?;
    }
    close(&mut writer, "params")?;
    close(&mut writer, "methodCall")?;
    String::from_utf8(writer.into_inner()).context("encoded XML-RPC call is not UTF-8")
}

/// Decode a `methodResponse`, turning a `<fault>` into an error.
pub fn decode_response(body: &str) -> Result<Value> {
    let root = parse_document(body)?;
    if root.name != "methodResponse" {
        bail!("expected methodResponse, found <{}>", root.name);
    }
    let payload = root
        .children
        .first()
        .ok_or_else(|| anyhow!("empty methodResponse"))?;

    match payload.name.as_str() {
        "params" => {
            let value = payload
                .child("param")
                .and_then(|param| param.child("value"))
                .ok_or_else(|| anyhow!("methodResponse has no return value"))?;
            decode_value(value)
        }
        "fault" => {
            let value = payload
                .child("value")
                .ok_or_else(|| anyhow!("fault has no value"))?;
            let members = decode_value(value)?.into_struct()?;
            let code = members
                .get("faultCode")
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown".to_string());
            let message = members
                .get("faultString")
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown fault".to_string());
            bail!("XML-RPC fault [{code}]: {message}")
        }
        other => bail!("unexpected <{other}> in methodResponse"),
    }
}

#[derive(Debug, Default)]
struct Node {
    name: String,
    text: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|child| child.name == name)
    }
}

fn parse_document(body: &str) -> Result<Node> {
    let mut reader = Reader::from_str(body);
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Node> = None;

    loop {
        match reader
            .read_event()
            .context("failed to parse XML-RPC document")?
        {
            Event::Start(element) => stack.push(Node {
                name: element_name(&element),
                ..Node::default()
            }),
            Event::Empty(element) => {
                let node = Node {
                    name: element_name(&element),
                    ..Node::default()
                };
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = text
                        .unescape()
                        .context("invalid escape in XML-RPC document")?;
                    top.text.push_str(&decoded);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| anyhow!("unbalanced XML-RPC document"))?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        bail!("truncated XML-RPC document");
    }
    root.ok_or_else(|| anyhow!("empty XML-RPC document"))
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, node: Node) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_some() {
                bail!("XML-RPC document has more than one root element");
            }
            *root = Some(node);
        }
    }
    Ok(())
}

fn element_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.name().as_ref()).into_owned()
}

fn decode_value(node: &Node) -> Result<Value> {
    let Some(typed) = node.children.first() else {
        // `<value>text</value>` without a type element is a string
        return Ok(Value::Text(node.text.clone()));
    };

    let text = typed.text.trim();
    let value = match typed.name.as_str() {
        "string" => Value::Text(typed.text.clone()),
        "int" | "i4" | "i8" => Value::Int(
            text.parse()
                .with_context(|| format!("invalid XML-RPC integer: {text}"))?,
        ),
        "boolean" => match text {
            "1" => Value::Boolean(true),
            "0" => Value::Boolean(false),
            other => bail!("invalid XML-RPC boolean: {other}"),
        },
        "double" => Value::Double(
            text.parse()
                .with_context(|| format!("invalid XML-RPC double: {text}"))?,
        ),
        "dateTime.iso8601" => Value::DateTime(text.to_string()),
        "base64" => Value::Base64(text.to_string()),
        "nil" => Value::Nil,
        "array" => {
            let mut items = Vec::new();
            if let Some(data) = typed.child("data") {
                for item in data.children.iter().filter(|child| child.name == "value") {
                    items.push(decode_value(item)?);
                }
            }
            Value::Array(items)
        }
        "struct" => {
            let mut members = BTreeMap::new();
            for member in typed.children.iter().filter(|child| child.name == "member") {
                let name = member
                    .child("name")
                    .map(|name| name.text.clone())
                    .ok_or_else(|| anyhow!("XML-RPC struct member without a name"))?;
                let value = match member.child("value") {
                    Some(value) => decode_value(value)?,
                    None => Value::Nil,
                };
                members.insert(name, value);
            }
            Value::Struct(members)
        }
        other => bail!("unsupported XML-RPC type <{other}>"),
    };
    Ok(value)
}

fn write_value(writer: &mut Writer<Vec<u8>>, value: &Value) -> Result<()> {
    open(writer, "value")?;
    match value {
        Value::Nil => {
            writer
                .write_event(Event::Empty(BytesStart::new("nil")))
                .context("failed to write XML-RPC nil")?;
        }
        Value::Boolean(flag) => {
            write_text_element(writer, "boolean", if *flag { "1" } else { "0" })?;
        }
        Value::Int(number) => write_text_element(writer, "int", &number.to_string())?,
        Value::Double(number) => write_text_element(writer, "double", &number.to_string())?,
        Value::Text(text) => write_text_element(writer, "string", text)?,
        Value::DateTime(text) => write_text_element(writer, "dateTime.iso8601", text)?,
        Value::Base64(text) => write_text_element(writer, "base64", text)?,
        Value::Array(items) => {
            open(writer, "array")?;
            open(writer, "data")?;
            for item in items {
                write_value(writer, item)?;
            }
            close(writer, "data")?;
            close(writer, "array")?;
        }
        Value::Struct(members) => {
            open(writer, "struct")?;
            for (name, item) in members {
                open(writer, "member")?;
                write_text_element(writer, "name", name)?;
                write_value(writer, item)?;
                close(writer, "member")?;
            }
            close(writer, "struct")?;
        }
    }
    close(writer, "value")
}

fn open(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .with_context(|| format!("failed to open <{name}>"))?;
    Ok(())
}

fn close(writer: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .with_context(|| format!("failed to close <{name}>"))?;
    Ok(())
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    open(writer, name)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .with_context(|| format!("failed to write <{name}> text"))?;
    close(writer, name)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{Value, decode_response, encode_call};

    #[test]
    fn encode_call_writes_struct_params() {
        let mut params = BTreeMap::new();
        params.insert("site".to_string(), Value::text("fancyclopedia"));
        params.insert("page".to_string(), Value::text("a & b"));
        let body = encode_call("pages.get_one", &[Value::Struct(params)]).expect("encode");

        assert!(body.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(body.contains("<methodName>pages.get_one</methodName>"));
        assert!(body.contains(
            "<member><name>page</name><value><string>a &amp; b</string></value></member>"
        ));
        assert!(body.contains(
            "<member><name>site</name><value><string>fancyclopedia</string></value></member>"
        ));
    }

    #[test]
    fn decode_struct_response_with_mixed_types() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<methodResponse>
  <params>
    <param>
      <value>
        <struct>
          <member><name>fullname</name><value><string>forum:start</string></value></member>
          <member><name>rating</name><value><int>12</int></value></member>
          <member><name>locked</name><value><boolean>0</boolean></value></member>
          <member><name>parent_fullname</name><value><nil/></value></member>
          <member><name>title</name><value>Tom &amp; Jerry</value></member>
          <member><name>tags</name><value><array><data>
            <value><string>fanzine</string></value>
            <value><string>1950s</string></value>
          </data></array></value></member>
        </struct>
      </value>
    </param>
  </params>
</methodResponse>"#;

        let members = decode_response(body)
            .expect("decode")
            .into_struct()
            .expect("struct");
        assert_eq!(members["fullname"], Value::text("forum:start"));
        assert_eq!(members["rating"], Value::Int(12));
        assert_eq!(members["locked"], Value::Boolean(false));
        assert!(members["parent_fullname"].is_nil());
        assert_eq!(members["title"], Value::text("Tom & Jerry"));
        assert_eq!(
            members["tags"].clone().into_string_list().expect("tags"),
            vec!["fanzine".to_string(), "1950s".to_string()]
        );
    }

    #[test]
    fn decode_empty_string_element() {
        let body = "<methodResponse><params><param><value><string/></value></param></params></methodResponse>";
        assert_eq!(decode_response(body).expect("decode"), Value::text(""));
    }

    #[test]
    fn decode_fault_is_an_error() {
        let body = r#"<methodResponse><fault><value><struct>
<member><name>faultCode</name><value><int>406</int></value></member>
<member><name>faultString</name><value><string>page does not exist</string></value></member>
</struct></value></fault></methodResponse>"#;
        let error = decode_response(body).expect_err("fault must fail");
        let message = error.to_string();
        assert!(message.contains("406"));
        assert!(message.contains("page does not exist"));
    }

    #[test]
    fn decode_rejects_truncated_document() {
        let body = "<methodResponse><params><param><value><string>x</string>";
        assert!(decode_response(body).is_err());
    }

    #[test]
    fn display_renders_scalars_and_lists() {
        assert_eq!(Value::Int(7).to_string(), "7");
        assert_eq!(Value::Boolean(true).to_string(), "True");
        assert_eq!(Value::Boolean(false).to_string(), "False");
        assert_eq!(
            Value::Array(vec![Value::text("a"), Value::Int(2)]).to_string(),
            "a, 2"
        );
        assert_eq!(Value::Nil.to_string(), "");
    }
}
