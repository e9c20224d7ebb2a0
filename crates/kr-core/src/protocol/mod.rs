//! Messages exchanged with the paired phone.
//!
//! In memory a [`Request`] or [`Response`] carries exactly one typed body.
//! On the wire each body variant is an optional sibling field
//! (`sign_request`, `me_response`, ...); the conversion happens in private
//! bridge structs so nothing outside this module sees the optional-field shape.

pub mod b64;
mod profile;
mod request;
mod response;

pub use profile::{HostAuth, PairingPayload, PairingStatus, Profile, UserAndHost};
pub use request::{
    CommitInfo, Fingerprint, GitSignRequest, GitSignTarget, HostsRequest, ListRequest, MeRequest,
    Request, RequestBody, RequestKind, SignRequest, TagInfo, UnpairRequest,
};
pub use response::{
    AckResponse, GitSignResponse, HostsResponse, ListResponse, MeResponse, REJECTED, Response,
    ResponseBody, SignResponse, UnpairResponse,
};

/// Current time as unix seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
