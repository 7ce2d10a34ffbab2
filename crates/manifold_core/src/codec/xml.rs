//! XML to tree mapping.
//!
//! Elements become object keys. Attributes are stored under `@name`, text
//! beside children or attributes under `#text`, and repeated sibling elements
//! collect into an array. An element holding only text maps to that text
//! (numbers are read as numbers). The declaration is kept under `?xml` so it
//! survives a parse and write cycle.

use std::borrow::Cow;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

const ATTRIBUTE_PREFIX: &str = "@";
const TEXT_KEY: &str = "#text";
const DECLARATION_KEY: &str = "?xml";

fn xml_error(error: impl ToString) -> EngineError {
    EngineError::Xml(error.to_string())
}

fn utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// An element being assembled while its children are read.
struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> EngineResult<Self> {
        let mut fields = Map::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(xml_error)?;
            let key = format!("{}{}", ATTRIBUTE_PREFIX, utf8(attribute.key.as_ref()));
            let value = attribute.unescape_value().map_err(xml_error)?;
            fields.insert(key, Value::String(value.into_owned()));
        }
        Ok(Self {
            name: utf8(start.name().as_ref()),
            fields,
            text: String::new(),
        })
    }

    fn close(self) -> Value {
        let text = self.text.trim();
        if self.fields.is_empty() {
            return scalar(text);
        }
        let mut fields = self.fields;
        if !text.is_empty() {
            fields.insert(TEXT_KEY.to_string(), scalar(text));
        }
        Value::Object(fields)
    }
}

fn scalar(text: &str) -> Value {
    let digits = text.trim_start_matches('-');
    if digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") {
        return Value::String(text.to_string());
    }
    if let Ok(int) = text.parse::<i64>() {
        return Value::from(int);
    }
    match text.parse::<f64>() {
        Ok(float) if float.is_finite() && !text.starts_with('.') => Value::from(float),
        _ => Value::String(text.to_string()),
    }
}

/// Insert `value` under `key`, turning repeated keys into arrays.
fn attach(fields: &mut Map<String, Value>, key: String, value: Value) {
    match fields.get_mut(&key) {
        Some(Value::Array(existing)) => existing.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(key, value);
        }
    }
}

fn declaration(decl: &BytesDecl<'_>) -> EngineResult<Value> {
    let mut fields = Map::new();
    let version = decl.version().map_err(xml_error)?;
    fields.insert("@version".to_string(), Value::String(utf8(&version)));
    if let Some(encoding) = decl.encoding() {
        let encoding = encoding.map_err(xml_error)?;
        fields.insert("@encoding".to_string(), Value::String(utf8(&encoding)));
    }
    if let Some(standalone) = decl.standalone() {
        let standalone = standalone.map_err(xml_error)?;
        fields.insert("@standalone".to_string(), Value::String(utf8(&standalone)));
    }
    Ok(Value::Object(fields))
}

/// Parse an XML document into a tree.
pub fn parse(text: &str) -> EngineResult<Value> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut root = Map::new();
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Decl(decl) => {
                root.insert(DECLARATION_KEY.to_string(), declaration(&decl)?);
            }
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let frame = Frame::open(&start)?;
                let name = frame.name.clone();
                let value = frame.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.fields, name, value),
                    None => attach(&mut root, name, value),
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| xml_error("unexpected closing tag"))?;
                let name = frame.name.clone();
                let value = frame.close();
                match stack.last_mut() {
                    Some(parent) => attach(&mut parent.fields, name, value),
                    None => attach(&mut root, name, value),
                }
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text.unescape().map_err(xml_error)?);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(xml_error(format!("unclosed element <{}>", open.name)));
    }
    Ok(Value::Object(root))
}

fn text_of(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(text) => Cow::Borrowed(text),
        Value::Null => Cow::Borrowed(""),
        other => Cow::Owned(other.to_string()),
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> EngineResult<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
            Ok(())
        }
        Value::Object(fields) => {
            let mut start = BytesStart::new(name);
            for (key, attribute) in fields {
                if let Some(attribute_name) = key.strip_prefix(ATTRIBUTE_PREFIX) {
                    start.push_attribute((attribute_name, text_of(attribute).as_ref()));
                }
            }
            let text = fields.get(TEXT_KEY);
            let children: Vec<_> = fields
                .iter()
                .filter(|(key, _)| !key.starts_with(ATTRIBUTE_PREFIX) && key.as_str() != TEXT_KEY)
                .collect();

            if text.is_none() && children.is_empty() {
                return writer.write_event(Event::Empty(start)).map_err(xml_error);
            }
            writer.write_event(Event::Start(start)).map_err(xml_error)?;
            if let Some(text) = text {
                writer
                    .write_event(Event::Text(BytesText::new(&text_of(text))))
                    .map_err(xml_error)?;
            }
            for (key, child) in children {
                write_element(writer, key, child)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_error)
        }
        Value::Null => writer
            .write_event(Event::Empty(BytesStart::new(name)))
            .map_err(xml_error),
        scalar => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(xml_error)?;
            writer
                .write_event(Event::Text(BytesText::new(&text_of(scalar))))
                .map_err(xml_error)?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(xml_error)
        }
    }
}

/// Serialize a tree as an indented XML document.
pub fn to_string(tree: &Value) -> EngineResult<String> {
    let fields = tree
        .as_object()
        .ok_or_else(|| xml_error("XML output requires an object at the root"))?;
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    for (key, value) in fields {
        if key == DECLARATION_KEY {
            let version = value.get("@version").map(text_of);
            let encoding = value.get("@encoding").map(text_of);
            let standalone = value.get("@standalone").map(text_of);
            writer
                .write_event(Event::Decl(BytesDecl::new(
                    version.as_deref().unwrap_or("1.0"),
                    encoding.as_deref(),
                    standalone.as_deref(),
                )))
                .map_err(xml_error)?;
            continue;
        }
        write_element(&mut writer, key, value)?;
    }

    let mut out = String::from_utf8(writer.into_inner()).map_err(xml_error)?;
    out.push('\n');
    Ok(out)
}
