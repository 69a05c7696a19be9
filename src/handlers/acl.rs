//! Access control lists for the in-memory gateway.
//!
//! An ACL comes from exactly one of: a canned `x-amz-acl` header, a set of
//! `x-amz-grant-*` headers, or an `AccessControlPolicy` XML body.  With
//! none of them the resource is private to its owner.

use axum::http::HeaderMap;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::errors::S3Error;

const ALL_USERS: &str = "http://acs.amazonaws.com/groups/global/AllUsers";
const AUTHENTICATED_USERS: &str = "http://acs.amazonaws.com/groups/global/AuthenticatedUsers";

const PERMISSIONS: &[&str] = &["FULL_CONTROL", "READ", "READ_ACP", "WRITE", "WRITE_ACP"];

/// `x-amz-grant-*` header → permission it grants.
const GRANT_HEADERS: &[(&str, &str)] = &[
    ("x-amz-grant-full-control", "FULL_CONTROL"),
    ("x-amz-grant-read", "READ"),
    ("x-amz-grant-read-acp", "READ_ACP"),
    ("x-amz-grant-write", "WRITE"),
    ("x-amz-grant-write-acp", "WRITE_ACP"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    pub owner: AclOwner,
    pub grants: Vec<AclGrant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclOwner {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclGrant {
    pub grantee: AclGrantee,
    pub permission: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclGrantee {
    CanonicalUser { id: String, display_name: String },
    Group { uri: String },
}

impl Acl {
    /// Owner-only FULL_CONTROL.
    pub fn private(owner_id: &str, display_name: &str) -> Self {
        Acl {
            owner: AclOwner {
                id: owner_id.to_string(),
                display_name: display_name.to_string(),
            },
            grants: vec![owner_grant(owner_id, display_name)],
        }
    }

    /// Expand a canned ACL name.
    pub fn canned(name: &str, owner_id: &str, display_name: &str) -> Result<Self, S3Error> {
        let mut acl = Acl::private(owner_id, display_name);
        let mut group = |uri: &str, permission: &str| {
            acl.grants.push(AclGrant {
                grantee: AclGrantee::Group {
                    uri: uri.to_string(),
                },
                permission: permission.to_string(),
            })
        };
        match name {
            "private" => {}
            "public-read" => group(ALL_USERS, "READ"),
            "public-read-write" => {
                group(ALL_USERS, "READ");
                group(ALL_USERS, "WRITE");
            }
            "authenticated-read" => group(AUTHENTICATED_USERS, "READ"),
            _ => {
                return Err(S3Error::InvalidArgument {
                    message: format!("Invalid canned ACL: {name}"),
                })
            }
        }
        Ok(acl)
    }
}

fn owner_grant(owner_id: &str, display_name: &str) -> AclGrant {
    AclGrant {
        grantee: AclGrantee::CanonicalUser {
            id: owner_id.to_string(),
            display_name: display_name.to_string(),
        },
        permission: "FULL_CONTROL".to_string(),
    }
}

/// Work out the ACL a write asks for.
///
/// `body` is only consulted when no ACL header is present.  Mixing the
/// canned header with grant headers is an invalid argument.
pub fn resolve_acl(
    headers: &HeaderMap,
    body: &[u8],
    owner_id: &str,
    display_name: &str,
) -> Result<Acl, S3Error> {
    let canned = headers.get("x-amz-acl");
    let has_grants = GRANT_HEADERS
        .iter()
        .any(|(name, _)| headers.contains_key(*name));

    match canned {
        Some(_) if has_grants => Err(S3Error::InvalidArgument {
            message: "Specifying both x-amz-acl and x-amz-grant headers is not allowed".to_string(),
        }),
        Some(value) => {
            let name = value.to_str().map_err(|_| S3Error::InvalidArgument {
                message: "Invalid canned ACL".to_string(),
            })?;
            Acl::canned(name.trim(), owner_id, display_name)
        }
        None if has_grants => grants_from_headers(headers, owner_id, display_name),
        None if !body.is_empty() => parse_access_control_policy(body),
        None => Ok(Acl::private(owner_id, display_name)),
    }
}

/// Build an ACL from `x-amz-grant-*` headers.
///
/// Each header holds comma-separated `id="..."` or `uri="..."` grantees.
fn grants_from_headers(
    headers: &HeaderMap,
    owner_id: &str,
    display_name: &str,
) -> Result<Acl, S3Error> {
    let mut acl = Acl::private(owner_id, display_name);
    for (header, permission) in GRANT_HEADERS {
        let Some(value) = headers.get(*header).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        for grantee in value.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            let grantee = parse_grantee_expression(grantee).ok_or_else(|| {
                S3Error::InvalidArgument {
                    message: format!("Invalid grantee in {header}: {grantee}"),
                }
            })?;
            acl.grants.push(AclGrant {
                grantee,
                permission: permission.to_string(),
            });
        }
    }
    Ok(acl)
}

fn parse_grantee_expression(expr: &str) -> Option<AclGrantee> {
    let (kind, value) = expr.split_once('=')?;
    let value = value.trim().trim_matches('"').to_string();
    if value.is_empty() {
        return None;
    }
    match kind.trim() {
        "id" => Some(AclGrantee::CanonicalUser {
            display_name: value.clone(),
            id: value,
        }),
        "uri" => Some(AclGrantee::Group { uri: value }),
        _ => None,
    }
}

// ── AccessControlPolicy XML ─────────────────────────────────────────

#[derive(Default)]
struct GrantBuilder {
    grantee_type: String,
    id: String,
    display_name: String,
    uri: String,
    permission: String,
}

impl GrantBuilder {
    fn build(self) -> Result<AclGrant, S3Error> {
        if !PERMISSIONS.contains(&self.permission.as_str()) {
            return Err(S3Error::MalformedACLError);
        }
        let grantee = if self.grantee_type == "Group" || !self.uri.is_empty() {
            if self.uri.is_empty() {
                return Err(S3Error::MalformedACLError);
            }
            AclGrantee::Group { uri: self.uri }
        } else if !self.id.is_empty() {
            AclGrantee::CanonicalUser {
                id: self.id,
                display_name: self.display_name,
            }
        } else {
            return Err(S3Error::MalformedACLError);
        };
        Ok(AclGrant {
            grantee,
            permission: self.permission,
        })
    }
}

/// Parse an `<AccessControlPolicy>` document.
pub fn parse_access_control_policy(body: &[u8]) -> Result<Acl, S3Error> {
    let mut reader = Reader::from_reader(body);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut path: Vec<String> = Vec::new();
    let mut owner = AclOwner::default();
    let mut grants = Vec::new();
    let mut current: Option<GrantBuilder> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                if path.is_empty() && name != "AccessControlPolicy" {
                    return Err(S3Error::MalformedACLError);
                }
                match name.as_str() {
                    "Grant" => current = Some(GrantBuilder::default()),
                    "Grantee" => {
                        if let Some(grant) = current.as_mut() {
                            grant.grantee_type = grantee_type(e);
                        }
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else {
                    return Err(S3Error::MalformedACLError);
                };
                if name == "Grant" {
                    let grant = current.take().ok_or(S3Error::MalformedACLError)?;
                    grants.push(grant.build()?);
                }
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|_| S3Error::MalformedACLError)?
                    .into_owned();
                let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                match segments.as_slice() {
                    ["AccessControlPolicy", "Owner", "ID"] => owner.id = text,
                    ["AccessControlPolicy", "Owner", "DisplayName"] => owner.display_name = text,
                    [.., "Grant", "Permission"] => {
                        if let Some(grant) = current.as_mut() {
                            grant.permission = text;
                        }
                    }
                    [.., "Grantee", field] => {
                        if let Some(grant) = current.as_mut() {
                            match *field {
                                "ID" => grant.id = text,
                                "DisplayName" => grant.display_name = text,
                                "URI" => grant.uri = text,
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(S3Error::MalformedACLError),
            _ => {}
        }
        buf.clear();
    }

    if !path.is_empty() || owner.id.is_empty() {
        return Err(S3Error::MalformedACLError);
    }
    Ok(Acl { owner, grants })
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// The `xsi:type` of a `<Grantee>` element.
fn grantee_type(e: &BytesStart<'_>) -> String {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == b"type")
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<AccessControlPolicy xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Owner><ID>owner-1</ID><DisplayName>Owner</DisplayName></Owner>
  <AccessControlList>
    <Grant>
      <Grantee xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="CanonicalUser">
        <ID>owner-1</ID><DisplayName>Owner</DisplayName>
      </Grantee>
      <Permission>FULL_CONTROL</Permission>
    </Grant>
    <Grant>
      <Grantee xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="Group">
        <URI>http://acs.amazonaws.com/groups/global/AllUsers</URI>
      </Grantee>
      <Permission>READ</Permission>
    </Grant>
  </AccessControlList>
</AccessControlPolicy>"#;

    #[test]
    fn test_canned_acls() {
        assert_eq!(Acl::canned("private", "o", "O").unwrap().grants.len(), 1);
        let acl = Acl::canned("public-read-write", "o", "O").unwrap();
        assert_eq!(acl.grants.len(), 3);
        assert!(acl
            .grants
            .iter()
            .any(|g| g.permission == "WRITE" && g.grantee == AclGrantee::Group { uri: ALL_USERS.into() }));
        assert!(Acl::canned("bogus", "o", "O").is_err());
    }

    #[test]
    fn test_parse_access_control_policy() {
        let acl = parse_access_control_policy(POLICY.as_bytes()).unwrap();
        assert_eq!(acl.owner.id, "owner-1");
        assert_eq!(acl.grants.len(), 2);
        assert_eq!(
            acl.grants[1].grantee,
            AclGrantee::Group {
                uri: ALL_USERS.to_string()
            }
        );
        assert_eq!(acl.grants[1].permission, "READ");
    }

    #[test]
    fn test_parse_access_control_policy_rejects_bad_documents() {
        assert!(matches!(
            parse_access_control_policy(b"<Nope/>"),
            Err(S3Error::MalformedACLError)
        ));
        let bad_permission = POLICY.replace("<Permission>READ</Permission>", "<Permission>ALL</Permission>");
        assert!(parse_access_control_policy(bad_permission.as_bytes()).is_err());
        assert!(parse_access_control_policy(b"<AccessControlPolicy><Owner>").is_err());
    }

    #[test]
    fn test_resolve_acl_sources() {
        let mut headers = HeaderMap::new();
        let acl = resolve_acl(&headers, b"", "o", "O").unwrap();
        assert_eq!(acl, Acl::private("o", "O"));

        let acl = resolve_acl(&headers, POLICY.as_bytes(), "o", "O").unwrap();
        assert_eq!(acl.owner.id, "owner-1");

        headers.insert("x-amz-acl", "public-read".parse().unwrap());
        let acl = resolve_acl(&headers, POLICY.as_bytes(), "o", "O").unwrap();
        assert_eq!(acl.owner.id, "o");
        assert_eq!(acl.grants.len(), 2);

        headers.insert("x-amz-grant-read", "id=\"someone\"".parse().unwrap());
        assert!(matches!(
            resolve_acl(&headers, b"", "o", "O"),
            Err(S3Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_grant_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-amz-grant-read",
            format!("id=\"reader\", uri=\"{AUTHENTICATED_USERS}\"").parse().unwrap(),
        );
        let acl = resolve_acl(&headers, b"", "o", "O").unwrap();
        assert_eq!(acl.grants.len(), 3);
        assert!(acl.grants[1..].iter().all(|g| g.permission == "READ"));

        headers.insert("x-amz-grant-write", "emailAddress=\"x@y\"".parse().unwrap());
        assert!(resolve_acl(&headers, b"", "o", "O").is_err());
    }
}
