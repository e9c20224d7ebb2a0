use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::profile::HostAuth;
use super::unix_now;
use crate::error::Error;

/// A request sent to the phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireRequest", into = "WireRequest")]
pub struct Request {
    pub request_id: String,
    pub unix_seconds: i64,
    /// Ask the phone to acknowledge receipt before the user answers.
    pub send_ack: bool,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Sign(SignRequest),
    GitSign(GitSignRequest),
    Me(MeRequest),
    List(ListRequest),
    Unpair(UnpairRequest),
    Hosts(HostsRequest),
    NoOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Sign,
    GitSign,
    Me,
    List,
    Unpair,
    Hosts,
    NoOp,
}

impl RequestKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sign => "sign",
            Self::GitSign => "git_sign",
            Self::Me => "me",
            Self::List => "list",
            Self::Unpair => "unpair",
            Self::Hosts => "hosts",
            Self::NoOp => "noop",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    /// SHA-256 of the SSH wire encoding of the key to sign with.
    #[serde(with = "super::b64")]
    pub public_key_fingerprint: Vec<u8>,
    #[serde(with = "super::b64")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_auth: Option<HostAuth>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireGitSign", into = "WireGitSign")]
pub struct GitSignRequest {
    pub target: GitSignTarget,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitSignTarget {
    Commit(CommitInfo),
    Tag(TagInfo),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub tree: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_parents: Option<Vec<String>>,
    pub author: String,
    pub committer: String,
    #[serde(with = "super::b64")]
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInfo {
    pub object: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub tag: String,
    pub tagger: String,
    #[serde(with = "super::b64")]
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgp_user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpairRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsRequest {}

/// Approval-cache key: SHA-256 over a canonical encoding of a signing sub-request.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fingerprint(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

impl Fingerprint {
    fn of<T: Serialize>(domain: &[u8], value: &T) -> Option<Self> {
        let canonical = serde_json::to_vec(value).ok()?;
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(&canonical);
        Some(Self(hasher.finalize().into()))
    }
}

impl Request {
    /// Build a request with a fresh UUID stamped with the current time.
    pub fn new(body: RequestBody) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            unix_seconds: unix_now(),
            send_ack: false,
            body,
        }
    }

    #[must_use]
    pub const fn with_ack(mut self) -> Self {
        self.send_ack = true;
        self
    }

    pub const fn kind(&self) -> RequestKind {
        self.body.kind()
    }

    /// Fingerprint for the approval window. Only signing requests have one.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        match &self.body {
            RequestBody::Sign(sign) => Fingerprint::of(b"sign\0", sign),
            RequestBody::GitSign(git) => Fingerprint::of(b"git_sign\0", git),
            _ => None,
        }
    }

    /// Reject requests whose sub-record cannot be acted on by the phone.
    pub fn validate(&self) -> Result<(), Error> {
        if self.request_id.is_empty() {
            return Err(Error::InvalidRequest("empty request_id".into()));
        }
        match &self.body {
            RequestBody::Sign(sign) => {
                if sign.public_key_fingerprint.is_empty() {
                    return Err(Error::InvalidRequest(
                        "sign_request without public_key_fingerprint".into(),
                    ));
                }
                if sign.data.is_empty() {
                    return Err(Error::InvalidRequest("sign_request without data".into()));
                }
            }
            RequestBody::GitSign(git) => {
                if git.user_id.is_empty() {
                    return Err(Error::InvalidRequest(
                        "git_sign_request without user_id".into(),
                    ));
                }
            }
            RequestBody::Me(_)
            | RequestBody::List(_)
            | RequestBody::Unpair(_)
            | RequestBody::Hosts(_)
            | RequestBody::NoOp => {}
        }
        Ok(())
    }
}

impl RequestBody {
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Sign(_) => RequestKind::Sign,
            Self::GitSign(_) => RequestKind::GitSign,
            Self::Me(_) => RequestKind::Me,
            Self::List(_) => RequestKind::List,
            Self::Unpair(_) => RequestKind::Unpair,
            Self::Hosts(_) => RequestKind::Hosts,
            Self::NoOp => RequestKind::NoOp,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireRequest {
    #[serde(default)]
    request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unix_seconds: Option<i64>,
    #[serde(default, rename = "a", skip_serializing_if = "std::ops::Not::not")]
    send_ack: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sign_request: Option<SignRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    git_sign_request: Option<GitSignRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    me_request: Option<MeRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_request: Option<ListRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unpair_request: Option<UnpairRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hosts_request: Option<HostsRequest>,
}

impl TryFrom<WireRequest> for Request {
    type Error = Error;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let mut bodies = [
            wire.sign_request.map(RequestBody::Sign),
            wire.git_sign_request.map(RequestBody::GitSign),
            wire.me_request.map(RequestBody::Me),
            wire.list_request.map(RequestBody::List),
            wire.unpair_request.map(RequestBody::Unpair),
            wire.hosts_request.map(RequestBody::Hosts),
        ]
        .into_iter()
        .flatten();

        let body = bodies.next().unwrap_or(RequestBody::NoOp);
        if bodies.next().is_some() {
            return Err(Error::Protocol(
                "request carries more than one sub-request".into(),
            ));
        }

        let request_id = if wire.request_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            wire.request_id
        };

        Ok(Self {
            request_id,
            unix_seconds: wire.unix_seconds.unwrap_or_else(unix_now),
            send_ack: wire.send_ack,
            body,
        })
    }
}

impl From<Request> for WireRequest {
    fn from(request: Request) -> Self {
        let mut wire = Self {
            request_id: request.request_id,
            unix_seconds: Some(request.unix_seconds),
            send_ack: request.send_ack,
            sign_request: None,
            git_sign_request: None,
            me_request: None,
            list_request: None,
            unpair_request: None,
            hosts_request: None,
        };
        match request.body {
            RequestBody::Sign(r) => wire.sign_request = Some(r),
            RequestBody::GitSign(r) => wire.git_sign_request = Some(r),
            RequestBody::Me(r) => wire.me_request = Some(r),
            RequestBody::List(r) => wire.list_request = Some(r),
            RequestBody::Unpair(r) => wire.unpair_request = Some(r),
            RequestBody::Hosts(r) => wire.hosts_request = Some(r),
            RequestBody::NoOp => {}
        }
        wire
    }
}

#[derive(Serialize, Deserialize)]
struct WireGitSign {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    commit: Option<CommitInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tag: Option<TagInfo>,
    user_id: String,
}

impl TryFrom<WireGitSign> for GitSignRequest {
    type Error = Error;

    fn try_from(wire: WireGitSign) -> Result<Self, Self::Error> {
        let target = match (wire.commit, wire.tag) {
            (Some(commit), None) => GitSignTarget::Commit(commit),
            (None, Some(tag)) => GitSignTarget::Tag(tag),
            (None, None) => {
                return Err(Error::Protocol(
                    "git_sign_request needs a commit or a tag".into(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(Error::Protocol(
                    "git_sign_request has both a commit and a tag".into(),
                ));
            }
        };
        Ok(Self {
            target,
            user_id: wire.user_id,
        })
    }
}

impl From<GitSignRequest> for WireGitSign {
    fn from(request: GitSignRequest) -> Self {
        let (commit, tag) = match request.target {
            GitSignTarget::Commit(commit) => (Some(commit), None),
            GitSignTarget::Tag(tag) => (None, Some(tag)),
        };
        Self {
            commit,
            tag,
            user_id: request.user_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign_body(data: &[u8]) -> RequestBody {
        RequestBody::Sign(SignRequest {
            public_key_fingerprint: vec![0xAA; 32],
            data: data.to_vec(),
            host_auth: None,
        })
    }

    fn commit() -> CommitInfo {
        CommitInfo {
            tree: "4b825dc642cb6eb9a060e54bf8d69288fbee4904".into(),
            parent: Some("9fceb02d0ae598e95dc970b74767f19372d61af8".into()),
            merge_parents: None,
            author: "Alice <alice@example.com> 1700000000 +0000".into(),
            committer: "Alice <alice@example.com> 1700000000 +0000".into(),
            message: b"initial commit\n".to_vec(),
        }
    }

    #[test]
    fn every_variant_survives_the_wire() {
        let bodies = vec![
            sign_body(b"0123456789"),
            RequestBody::GitSign(GitSignRequest {
                target: GitSignTarget::Commit(commit()),
                user_id: "Alice <alice@example.com>".into(),
            }),
            RequestBody::GitSign(GitSignRequest {
                target: GitSignTarget::Tag(TagInfo {
                    object: "9fceb02d0ae598e95dc970b74767f19372d61af8".into(),
                    object_type: "commit".into(),
                    tag: "v1.0.0".into(),
                    tagger: "Alice <alice@example.com> 1700000000 +0000".into(),
                    message: b"release".to_vec(),
                }),
                user_id: "Alice <alice@example.com>".into(),
            }),
            RequestBody::Me(MeRequest {
                pgp_user_id: Some("Alice <alice@example.com>".into()),
            }),
            RequestBody::List(ListRequest::default()),
            RequestBody::Unpair(UnpairRequest {}),
            RequestBody::Hosts(HostsRequest {}),
            RequestBody::NoOp,
        ];

        for body in bodies {
            let request = Request::new(body).with_ack();
            let json = serde_json::to_string(&request).unwrap();
            let decoded: Request = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, request, "wire form: {json}");
        }
    }

    #[test]
    fn sign_request_uses_optional_field_wire_shape() {
        let mut request = Request::new(sign_body(b"hi"));
        request.request_id = "R1".into();
        request.unix_seconds = 1_700_000_000;

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({
                "request_id": "R1",
                "unix_seconds": 1_700_000_000,
                "sign_request": {
                    "public_key_fingerprint": "qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqo=",
                    "data": "aGk="
                }
            })
        );
    }

    #[test]
    fn request_without_sub_record_is_noop() {
        let request: Request =
            serde_json::from_str(r#"{"request_id": "R9", "unix_seconds": 5}"#).unwrap();
        assert_eq!(request.body, RequestBody::NoOp);
        assert_eq!(request.request_id, "R9");
        assert!(!request.send_ack);
    }

    #[test]
    fn missing_request_id_gets_fresh_uuid() {
        let request: Request = serde_json::from_str(r#"{"me_request": {}}"#).unwrap();
        assert!(uuid::Uuid::parse_str(&request.request_id).is_ok());
        assert!(request.unix_seconds > 0);
    }

    #[test]
    fn two_sub_records_fail_to_decode() {
        let result: Result<Request, _> =
            serde_json::from_str(r#"{"request_id": "R", "me_request": {}, "hosts_request": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn git_sign_needs_exactly_one_target() {
        let neither: Result<GitSignRequest, _> =
            serde_json::from_str(r#"{"user_id": "alice"}"#);
        assert!(neither.is_err());
    }

    #[test]
    fn empty_sign_request_fails_validation() {
        let request: Request = serde_json::from_str(
            r#"{"request_id": "R", "sign_request": {"public_key_fingerprint": "", "data": ""}}"#,
        )
        .unwrap();
        assert!(matches!(request.validate(), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn fingerprint_ignores_id_and_timestamp() {
        let a = Request::new(sign_body(b"payload"));
        let mut b = Request::new(sign_body(b"payload"));
        b.unix_seconds += 100;
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(a.fingerprint().is_some());
    }

    #[test]
    fn fingerprint_differs_with_payload() {
        let a = Request::new(sign_body(b"payload-a"));
        let b = Request::new(sign_body(b"payload-b"));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn only_signing_requests_have_fingerprints() {
        assert!(Request::new(RequestBody::Me(MeRequest::default())).fingerprint().is_none());
        assert!(Request::new(RequestBody::NoOp).fingerprint().is_none());
        let git = Request::new(RequestBody::GitSign(GitSignRequest {
            target: GitSignTarget::Commit(commit()),
            user_id: "alice".into(),
        }));
        assert!(git.fingerprint().is_some());
    }
}
