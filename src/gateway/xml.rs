//! WebDAV XML bodies.
//!
//! Output is compact (no indentation) and uses `DAV:` as the default
//! namespace, so the exact bytes are stable and tested below.

use std::io::Cursor;

use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

use crate::error::{Result, StoreError};

const STATUS_OK: &str = "HTTP/1.1 200 OK";

/// One `<response>` in a PROPFIND multistatus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropEntry {
    pub href: String,
    pub display_name: String,
    pub is_collection: bool,
    pub content_length: Option<u64>,
    pub last_modified: String,
}

impl PropEntry {
    pub fn collection(href: impl Into<String>, display_name: impl Into<String>, last_modified: &str) -> Self {
        Self {
            href: href.into(),
            display_name: display_name.into(),
            is_collection: true,
            content_length: None,
            last_modified: last_modified.to_string(),
        }
    }

    /// A file at the root: href is `/` plus the percent-encoded name.
    pub fn file(name: &str, size: u64, last_modified: &str) -> Self {
        Self {
            href: format!("/{}", urlencoding::encode(name)),
            display_name: name.to_string(),
            is_collection: false,
            content_length: Some(size),
            last_modified: last_modified.to_string(),
        }
    }
}

/// Lock details echoed back for an advisory LOCK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    pub token: String,
    pub owner: String,
    pub timeout_secs: u64,
}

fn new_writer() -> Writer<Cursor<Vec<u8>>> {
    Writer::new(Cursor::new(Vec::new()))
}

fn finish(writer: Writer<Cursor<Vec<u8>>>) -> Result<String> {
    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| StoreError::Custom(format!("XML is not UTF-8: {}", e)))
}

fn write_decl<W: std::io::Write>(writer: &mut Writer<W>) -> Result<()> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
    Ok(())
}

fn write_root_start<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    let mut elem = BytesStart::new(name);
    elem.push_attribute(("xmlns", "DAV:"));
    writer.write_event(Event::Start(elem))?;
    Ok(())
}

fn write_start<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    Ok(())
}

fn write_end<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_empty<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<()> {
    writer.write_event(Event::Empty(BytesStart::new(name)))?;
    Ok(())
}

fn write_simple_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<()> {
    write_start(writer, name)?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    write_end(writer, name)
}

/// PROPFIND `207 Multi-Status` body.
pub fn multistatus(entries: &[PropEntry]) -> Result<String> {
    let mut writer = new_writer();
    write_decl(&mut writer)?;
    write_root_start(&mut writer, "multistatus")?;

    for entry in entries {
        write_start(&mut writer, "response")?;
        write_simple_element(&mut writer, "href", &entry.href)?;
        write_start(&mut writer, "propstat")?;
        write_start(&mut writer, "prop")?;

        if entry.is_collection {
            write_start(&mut writer, "resourcetype")?;
            write_empty(&mut writer, "collection")?;
            write_end(&mut writer, "resourcetype")?;
        } else {
            write_empty(&mut writer, "resourcetype")?;
        }
        write_simple_element(&mut writer, "displayname", &entry.display_name)?;
        if let Some(len) = entry.content_length {
            write_simple_element(&mut writer, "getcontentlength", &len.to_string())?;
            write_simple_element(&mut writer, "getcontenttype", "application/octet-stream")?;
        }
        write_simple_element(&mut writer, "getlastmodified", &entry.last_modified)?;

        write_end(&mut writer, "prop")?;
        write_simple_element(&mut writer, "status", STATUS_OK)?;
        write_end(&mut writer, "propstat")?;
        write_end(&mut writer, "response")?;
    }

    write_end(&mut writer, "multistatus")?;
    finish(writer)
}

/// PROPPATCH acknowledgment: every property change is reported as accepted.
pub fn proppatch(href: &str) -> Result<String> {
    let mut writer = new_writer();
    write_decl(&mut writer)?;
    write_root_start(&mut writer, "multistatus")?;
    write_start(&mut writer, "response")?;
    write_simple_element(&mut writer, "href", href)?;
    write_start(&mut writer, "propstat")?;
    write_empty(&mut writer, "prop")?;
    write_simple_element(&mut writer, "status", STATUS_OK)?;
    write_end(&mut writer, "propstat")?;
    write_end(&mut writer, "response")?;
    write_end(&mut writer, "multistatus")?;
    finish(writer)
}

/// LOCK response body with a single exclusive write lock.
pub fn lock_discovery(lock: &LockInfo) -> Result<String> {
    let mut writer = new_writer();
    write_decl(&mut writer)?;
    write_root_start(&mut writer, "prop")?;
    write_start(&mut writer, "lockdiscovery")?;
    write_start(&mut writer, "activelock")?;

    write_start(&mut writer, "locktype")?;
    write_empty(&mut writer, "write")?;
    write_end(&mut writer, "locktype")?;
    write_start(&mut writer, "lockscope")?;
    write_empty(&mut writer, "exclusive")?;
    write_end(&mut writer, "lockscope")?;
    write_simple_element(&mut writer, "depth", "0")?;
    write_simple_element(&mut writer, "owner", &lock.owner)?;
    write_simple_element(&mut writer, "timeout", &format!("Second-{}", lock.timeout_secs))?;
    write_start(&mut writer, "locktoken")?;
    write_simple_element(&mut writer, "href", &lock.token)?;
    write_end(&mut writer, "locktoken")?;

    write_end(&mut writer, "activelock")?;
    write_end(&mut writer, "lockdiscovery")?;
    write_end(&mut writer, "prop")?;
    finish(writer)
}
