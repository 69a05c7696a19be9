//! S3 XML request parsing and response rendering.
//!
//! The gateway only ever reads one small request document
//! (`CreateBucketConfiguration`) and writes two response shapes
//! (`Error`, `CopyObjectResult`).  Everything goes through `quick-xml`.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;

use crate::errors::S3Error;

// ── Error response ──────────────────────────────────────────────────

/// Render an S3 `<Error>` XML document.
///
/// ```xml
/// <?xml version="1.0" encoding="UTF-8"?>
/// <Error>
///   <Code>MalformedXML</Code>
///   <Message>The XML you provided was not well-formed ...</Message>
///   <Resource>mybucket</Resource>
///   <RequestId>abcd-1234</RequestId>
/// </Error>
/// ```
pub fn render_error(code: &str, message: &str, resource: &str, request_id: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(quick_xml::events::BytesDecl::new(
            "1.0",
            Some("UTF-8"),
            None,
        )))
        .expect("xml decl");

    write_simple_element_group(
        &mut writer,
        "Error",
        &[
            ("Code", code),
            ("Message", message),
            ("Resource", resource),
            ("RequestId", request_id),
        ],
    );

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

// ── CopyObjectResult ────────────────────────────────────────────────

/// Render `<CopyObjectResult>` returned by `PUT` with `x-amz-copy-source`.
///
/// `etag` is the bare hex digest; it is quoted here as S3 requires.
pub fn render_copy_object_result(etag: &str, last_modified: &str) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer
        .write_event(Event::Decl(quick_xml::events::BytesDecl::new(
            "1.0",
            Some("UTF-8"),
            None,
        )))
        .expect("xml decl");

    let quoted = format!("\"{etag}\"");
    write_simple_element_group(
        &mut writer,
        "CopyObjectResult",
        &[("LastModified", last_modified), ("ETag", &quoted)],
    );

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

// ── CreateBucketConfiguration ───────────────────────────────────────

/// Extract the location constraint from a `PUT /{bucket}` body.
///
/// ```xml
/// <CreateBucketConfiguration xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
///   <LocationConstraint>us-west-1</LocationConstraint>
/// </CreateBucketConfiguration>
/// ```
///
/// A document that does not parse, has a different root, or lacks a
/// non-empty `LocationConstraint` child yields [`S3Error::MalformedXML`].
pub fn parse_create_bucket_configuration(body: &[u8]) -> Result<String, S3Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();

    // Open elements, local names only (namespace prefixes stripped).
    let mut path: Vec<String> = Vec::new();
    let mut saw_root = false;
    let mut location: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                if path.is_empty() {
                    if saw_root || name != "CreateBucketConfiguration" {
                        return Err(S3Error::MalformedXML);
                    }
                    saw_root = true;
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                if path.pop().is_none() {
                    return Err(S3Error::MalformedXML);
                }
            }
            Ok(Event::Text(ref e)) if in_location_constraint(&path) => {
                let text = e.unescape().map_err(|_| S3Error::MalformedXML)?;
                let text = text.trim();
                if !text.is_empty() {
                    location = Some(text.to_string());
                }
            }
            Ok(Event::CData(ref e)) if in_location_constraint(&path) => {
                let text = String::from_utf8_lossy(e).trim().to_string();
                if !text.is_empty() {
                    location = Some(text);
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedXML),
            _ => {}
        }
        buf.clear();
    }

    // Unclosed elements at end of input.
    if !path.is_empty() {
        return Err(S3Error::MalformedXML);
    }

    location.ok_or(S3Error::MalformedXML)
}

fn in_location_constraint(path: &[String]) -> bool {
    path.len() == 2 && path[0] == "CreateBucketConfiguration" && path[1] == "LocationConstraint"
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Write a `<tag>text</tag>` element.
fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, tag: &str, text: &str) {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}

/// Write a parent element containing a flat list of child text elements.
fn write_simple_element_group(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    parent: &str,
    children: &[(&str, &str)],
) {
    writer
        .write_event(Event::Start(BytesStart::new(parent)))
        .expect("start parent");
    for (tag, value) in children {
        write_text_element(writer, tag, value);
    }
    writer
        .write_event(Event::End(BytesEnd::new(parent)))
        .expect("end parent");
}
