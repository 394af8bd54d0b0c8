//! # Host Errors
//!
//! Every call through the session adapter either succeeds or fails with a
//! `CtApiError`. The worker never inspects error *types* alone: generic host
//! failures carry a numeric code, and the code decides whether the session is
//! gone, a single tag is unknown, or the call should simply be retried.

use thiserror::Error;

/// Codes above this value are host codes offset into the platform space.
pub const ERROR_USER_DEFINED_BASE: u32 = 0x1000_0000;

/// The transport link to the host is gone.
pub const CODE_LINK_NOT_CONNECTED: u32 = 233;
/// The tag is unknown to the host.
pub const CODE_TAG_NOT_FOUND: u32 = 424;
/// Generic failure reported by the host without further detail.
pub const CODE_GENERAL_FAILURE: u32 = 1;
/// The host reports a problem with the tag itself.
pub const CODE_TAG_PROBLEM: u32 = 12;
/// Platform invalid-access code, seen on reads of missing tags.
pub const CODE_INVALID_ACCESS: u32 = 21;

/// Normalises a raw error code coming out of the native library.
///
/// Host codes are reported offset by `ERROR_USER_DEFINED_BASE`; anything at
/// or below the base is a platform code and is returned unchanged.
pub fn normalize_code(raw: u32) -> u32 {
    if raw > ERROR_USER_DEFINED_BASE {
        raw - ERROR_USER_DEFINED_BASE
    } else {
        raw
    }
}

/// Named view of a host status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    /// 233: the session's link is lost.
    LinkNotConnected,
    /// 424: tag not found.
    TagNotFound,
    /// 1: undocumented general failure, retried.
    GeneralFailure,
    /// 12: tag problem, retried.
    TagProblem,
    /// 21: undocumented invalid access, retried.
    InvalidAccess,
    /// Anything else.
    Other(u32),
}

impl HostStatus {
    /// Maps a normalised code to its status.
    pub fn from_code(code: u32) -> Self {
        match code {
            CODE_LINK_NOT_CONNECTED => HostStatus::LinkNotConnected,
            CODE_TAG_NOT_FOUND => HostStatus::TagNotFound,
            CODE_GENERAL_FAILURE => HostStatus::GeneralFailure,
            CODE_TAG_PROBLEM => HostStatus::TagProblem,
            CODE_INVALID_ACCESS => HostStatus::InvalidAccess,
            other => HostStatus::Other(other),
        }
    }
}

/// What the polling worker does about a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Tear the session down and reconnect with backoff.
    Reconnect,
    /// Skip the affected tag for this cycle; the rest of the cycle continues.
    SkipTag,
    /// Keep the session, skip the pacing sleep once and retry sooner.
    Transient,
}

/// Typed outcome of a failed session adapter call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CtApiError {
    /// Opening a session against the endpoint failed.
    #[error("failed to connect to {host} (code {code})")]
    FailedToConnect {
        /// Endpoint host.
        host: String,
        /// Normalised host/platform code.
        code: u32,
    },

    /// The host does not know the tag.
    #[error("tag {tag} does not exist")]
    TagDoesNotExist {
        /// Tag name.
        tag: String,
    },

    /// Any other host failure.
    #[error("host error {code}")]
    General {
        /// Normalised host/platform code.
        code: u32,
    },

    /// A list handle was requested for a list this session never created.
    #[error("tag list {list} has not been created on this session")]
    UnknownList {
        /// List name.
        list: String,
    },

    /// A value was requested for a tag that was never added to a list.
    #[error("tag {tag} has not been added to a tag list")]
    UnknownTag {
        /// Tag name.
        tag: String,
    },
}

impl CtApiError {
    /// Builds the error for a failed call from the raw native code.
    ///
    /// `tag` names the tag the call was about, if any, so that code 424 can be
    /// reported as `TagDoesNotExist` rather than a generic failure.
    pub fn from_native(raw: u32, tag: Option<&str>) -> Self {
        let code = normalize_code(raw);
        match (HostStatus::from_code(code), tag) {
            (HostStatus::TagNotFound, Some(tag)) => CtApiError::TagDoesNotExist {
                tag: tag.to_string(),
            },
            _ => CtApiError::General { code },
        }
    }

    /// The host status behind this error, when it carries one.
    pub fn status(&self) -> Option<HostStatus> {
        match self {
            CtApiError::General { code } | CtApiError::FailedToConnect { code, .. } => {
                Some(HostStatus::from_code(*code))
            }
            CtApiError::TagDoesNotExist { .. } => Some(HostStatus::TagNotFound),
            CtApiError::UnknownList { .. } | CtApiError::UnknownTag { .. } => None,
        }
    }

    /// Classifies the error for the polling loop.
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            CtApiError::FailedToConnect { .. } => ErrorDisposition::Reconnect,
            CtApiError::TagDoesNotExist { .. } | CtApiError::UnknownTag { .. } => {
                ErrorDisposition::SkipTag
            }
            CtApiError::UnknownList { .. } => ErrorDisposition::Transient,
            CtApiError::General { code } => match HostStatus::from_code(*code) {
                HostStatus::LinkNotConnected => ErrorDisposition::Reconnect,
                HostStatus::TagNotFound => ErrorDisposition::SkipTag,
                _ => ErrorDisposition::Transient,
            },
        }
    }
}
