use serde::{Deserialize, Serialize};

use super::profile::{Profile, UserAndHost};
use super::request::RequestKind;
use crate::error::Error;

/// Error string the phone returns when the user declines.
pub const REJECTED: &str = "rejected";

/// A response from the phone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub struct Response {
    pub request_id: String,
    /// Absent on metadata-only updates.
    pub body: Option<ResponseBody>,
    pub sns_endpoint_arn: Option<String>,
    /// Unix seconds until which identical signing requests are auto-approved.
    pub approved_until: Option<i64>,
    pub tracking_id: Option<String>,
    /// Phone software version.
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Sign(SignResponse),
    GitSign(GitSignResponse),
    Me(MeResponse),
    List(ListResponse),
    Unpair(UnpairResponse),
    Hosts(HostsResponse),
    Ack(AckResponse),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    #[serde(
        default,
        with = "super::b64::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub signature: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSignResponse {
    #[serde(
        default,
        with = "super::b64::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub signature: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeResponse {
    pub me: Profile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpairResponse {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsResponse {
    #[serde(default)]
    pub hosts: Vec<UserAndHost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgp_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {}

impl Response {
    pub fn new(request_id: impl Into<String>, body: ResponseBody) -> Self {
        Self {
            request_id: request_id.into(),
            body: Some(body),
            sns_endpoint_arn: None,
            approved_until: None,
            tracking_id: None,
            version: None,
        }
    }

    /// Whether the phone reported that the user declined.
    pub fn is_rejection(&self) -> bool {
        let error = match &self.body {
            Some(ResponseBody::Sign(r)) => r.error.as_deref(),
            Some(ResponseBody::GitSign(r)) => r.error.as_deref(),
            _ => None,
        };
        error == Some(REJECTED)
    }

    pub const fn is_ack(&self) -> bool {
        matches!(self.body, Some(ResponseBody::Ack(_)))
    }
}

impl ResponseBody {
    /// The request kind this body answers; `None` for acknowledgements.
    pub const fn answers(&self) -> Option<RequestKind> {
        match self {
            Self::Sign(_) => Some(RequestKind::Sign),
            Self::GitSign(_) => Some(RequestKind::GitSign),
            Self::Me(_) => Some(RequestKind::Me),
            Self::List(_) => Some(RequestKind::List),
            Self::Unpair(_) => Some(RequestKind::Unpair),
            Self::Hosts(_) => Some(RequestKind::Hosts),
            Self::Ack(_) => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sign_response: Option<SignResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    git_sign_response: Option<GitSignResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    me_response: Option<MeResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    list_response: Option<ListResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unpair_response: Option<UnpairResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hosts_response: Option<HostsResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ack_response: Option<AckResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sns_endpoint_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    approved_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tracking_id: Option<String>,
    #[serde(default, rename = "v", skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

impl TryFrom<WireResponse> for Response {
    type Error = Error;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        let mut bodies = [
            wire.sign_response.map(ResponseBody::Sign),
            wire.git_sign_response.map(ResponseBody::GitSign),
            wire.me_response.map(ResponseBody::Me),
            wire.list_response.map(ResponseBody::List),
            wire.unpair_response.map(ResponseBody::Unpair),
            wire.hosts_response.map(ResponseBody::Hosts),
            wire.ack_response.map(ResponseBody::Ack),
        ]
        .into_iter()
        .flatten();

        let body = bodies.next();
        if bodies.next().is_some() {
            return Err(Error::Protocol(
                "response carries more than one sub-response".into(),
            ));
        }

        Ok(Self {
            request_id: wire.request_id,
            body,
            sns_endpoint_arn: wire.sns_endpoint_arn,
            approved_until: wire.approved_until,
            tracking_id: wire.tracking_id,
            version: wire.version,
        })
    }
}

impl From<Response> for WireResponse {
    fn from(response: Response) -> Self {
        let mut wire = Self {
            request_id: response.request_id,
            sign_response: None,
            git_sign_response: None,
            me_response: None,
            list_response: None,
            unpair_response: None,
            hosts_response: None,
            ack_response: None,
            sns_endpoint_arn: response.sns_endpoint_arn,
            approved_until: response.approved_until,
            tracking_id: response.tracking_id,
            version: response.version,
        };
        match response.body {
            Some(ResponseBody::Sign(r)) => wire.sign_response = Some(r),
            Some(ResponseBody::GitSign(r)) => wire.git_sign_response = Some(r),
            Some(ResponseBody::Me(r)) => wire.me_response = Some(r),
            Some(ResponseBody::List(r)) => wire.list_response = Some(r),
            Some(ResponseBody::Unpair(r)) => wire.unpair_response = Some(r),
            Some(ResponseBody::Hosts(r)) => wire.hosts_response = Some(r),
            Some(ResponseBody::Ack(r)) => wire.ack_response = Some(r),
            None => {}
        }
        wire
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sign_response_decodes_signature_bytes() {
        let response: Response = serde_json::from_str(
            r#"{"request_id": "R1", "sign_response": {"signature": "AQIDBA=="}}"#,
        )
        .unwrap();
        assert_eq!(response.request_id, "R1");
        assert_eq!(
            response.body,
            Some(ResponseBody::Sign(SignResponse {
                signature: Some(vec![1, 2, 3, 4]),
                error: None,
            }))
        );
        assert!(!response.is_rejection());
    }

    #[test]
    fn rejected_error_is_a_rejection() {
        let response: Response = serde_json::from_str(
            r#"{"request_id": "R1", "sign_response": {"error": "rejected"}}"#,
        )
        .unwrap();
        assert!(response.is_rejection());

        let other: Response = serde_json::from_str(
            r#"{"request_id": "R1", "git_sign_response": {"error": "no key"}}"#,
        )
        .unwrap();
        assert!(!other.is_rejection());
    }

    #[test]
    fn metadata_only_response_has_no_body() {
        let response: Response = serde_json::from_str(
            r#"{"request_id": "R3", "sns_endpoint_arn": "arn:aws:sns:x", "approved_until": 1700000010, "v": "2.4.0"}"#,
        )
        .unwrap();
        assert_eq!(response.body, None);
        assert_eq!(response.sns_endpoint_arn.as_deref(), Some("arn:aws:sns:x"));
        assert_eq!(response.approved_until, Some(1_700_000_010));
        assert_eq!(response.version.as_deref(), Some("2.4.0"));
    }

    #[test]
    fn ack_answers_no_request_kind() {
        let response = Response::new("R", ResponseBody::Ack(AckResponse {}));
        assert!(response.is_ack());
        assert_eq!(response.body.as_ref().and_then(ResponseBody::answers), None);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, serde_json::json!({"request_id": "R", "ack_response": {}}));
    }

    #[test]
    fn two_sub_responses_fail_to_decode() {
        let result: Result<Response, _> = serde_json::from_str(
            r#"{"request_id": "R", "sign_response": {}, "ack_response": {}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_request_id_fails_to_decode() {
        let result: Result<Response, _> = serde_json::from_str(r#"{"ack_response": {}}"#);
        assert!(result.is_err());
    }
}
