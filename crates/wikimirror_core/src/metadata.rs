use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::rpc::Value;

pub const CONTENT_FIELD: &str = "content";
pub const HTML_FIELD: &str = "html";
pub const UPDATED_AT_FIELD: &str = "updated_at";
pub const TAGS_FIELD: &str = "tags";
pub const DOWNLOAD_URL_FIELD: &str = "download_url";

const ROOT_ELEMENT: &str = "data";
const TAG_ELEMENT: &str = "tag";
const UTC_SUFFIX: &str = "+00:00";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const NULL_SENTINEL: &str = "None";

/// A page (or attached file) record as returned by the remote service.
///
/// `content` and `html` are persisted as their own files; everything else goes into the
/// metadata document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageRecord {
    pub content: Option<String>,
    pub html: Option<String>,
    pub updated_at: Option<String>,
    pub tags: Vec<String>,
    pub fields: BTreeMap<String, Value>,
}

impl PageRecord {
    pub fn from_struct(mut members: BTreeMap<String, Value>) -> Self {
        let content = members.remove(CONTENT_FIELD).and_then(into_text);
        let html = members.remove(HTML_FIELD).and_then(into_text);
        let updated_at = members.remove(UPDATED_AT_FIELD).and_then(into_text);
        let tags = match members.remove(TAGS_FIELD) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(into_text)
                .filter(|tag| !tag.is_empty())
                .collect(),
            Some(Value::Text(joined)) => joined.split_whitespace().map(str::to_string).collect(),
            _ => Vec::new(),
        };
        Self {
            content,
            html,
            updated_at,
            tags,
            fields: members,
        }
    }

    pub fn field_text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .filter(|value| !value.is_nil())
            .map(ToString::to_string)
    }
}

fn into_text(value: Value) -> Option<String> {
    match value {
        Value::Nil => None,
        Value::Text(text) | Value::DateTime(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// Decoded "last updated" instant. `Never` orders before every real timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PageTimestamp {
    Never,
    At(NaiveDateTime),
}

pub fn decode_timestamp(value: Option<&str>) -> Result<PageTimestamp> {
    let Some(value) = value else {
        return Ok(PageTimestamp::Never);
    };
    let Some(stamp) = value.strip_suffix(UTC_SUFFIX) else {
        bail!("could not decode timestamp '{value}': expected a {UTC_SUFFIX} suffix");
    };
    let parsed = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .with_context(|| format!("could not decode timestamp '{value}'"))?;
    Ok(PageTimestamp::At(parsed))
}

/// Write everything except the raw bodies into `path` and return the record's `updated_at`.
pub fn save_metadata(path: &Path, record: &PageRecord) -> Result<Option<String>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("failed to write metadata declaration")?;
    open(&mut writer, ROOT_ELEMENT)?;

    let mut entries: Vec<(&str, Cow<'_, str>)> = Vec::with_capacity(record.fields.len() + 1);
    if let Some(updated_at) = &record.updated_at {
        entries.push((UPDATED_AT_FIELD, Cow::Borrowed(updated_at.as_str())));
    }
    for (name, value) in &record.fields {
        if value.is_nil() {
            continue;
        }
        let text = value.to_string();
        if text == NULL_SENTINEL {
            continue;
        }
        if !is_element_name(name) {
            log::warn!("skipping metadata field with unusable name '{name}'");
            continue;
        }
        entries.push((name.as_str(), Cow::Owned(text)));
    }
    if !record.tags.is_empty() {
        entries.push((TAGS_FIELD, Cow::Borrowed("")));
    }
    entries.sort_by(|left, right| left.0.cmp(right.0));

    for (name, text) in entries {
        if name == TAGS_FIELD {
            open(&mut writer, TAGS_FIELD)?;
            for tag in &record.tags {
                write_text_element(&mut writer, TAG_ELEMENT, tag)?;
            }
            close(&mut writer, TAGS_FIELD)?;
        } else {
            write_text_element(&mut writer, name, &text)?;
        }
    }

    close(&mut writer, ROOT_ELEMENT)?;
    fs::write(path, writer.into_inner())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(record.updated_at.clone())
}

/// Read the stored `updated_at` from a metadata document, if both exist.
pub fn load_updated_at(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    let body =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;

    let mut reader = Reader::from_str(&body);
    reader.config_mut().trim_text(true);

    let mut depth = 0usize;
    let mut inside = false;
    let mut value: Option<String> = None;

    loop {
        match reader
            .read_event()
            .with_context(|| format!("failed to parse {}", path.display()))?
        {
            Event::Start(element) => {
                depth += 1;
                inside = depth == 2 && element.name().as_ref() == UPDATED_AT_FIELD.as_bytes();
            }
            Event::Text(text) if inside => {
                let decoded = text
                    .unescape()
                    .with_context(|| format!("invalid escape in {}", path.display()))?;
                value.get_or_insert_with(String::new).push_str(&decoded);
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                inside = false;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(value.filter(|text| !text.is_empty()))
}

fn is_element_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
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
        .with_context(|| format!("failed to write <{name}>"))?;
    close(writer, name)
}
