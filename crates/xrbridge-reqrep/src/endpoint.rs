//! Endpoint codes understood by the compute backend.
//!
//! The bridge never interprets these; they exist for callers and for
//! readable logs.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use serde::Serialize;

/// Interaction-space limits. No payload.
pub const LIMITS: &str = "L";
/// Voxels filtered by constraints and a cost metric. Structured payload.
pub const COMPUTE: &str = "C";
/// The most recently computed interaction space. No payload.
pub const INTERACTION_SPACE: &str = "I";
/// Arm poses for one voxel. Structured payload.
pub const POSES: &str = "P";
/// Optimal placement inside a polygon. Structured payload.
pub const OPTIMAL_POSITION: &str = "O";
/// Camera frame upload. Base64 payload, reply ignored.
pub const FRAME_UPLOAD: &str = "F";
/// Rebuild costs for custom arm dimensions. Structured payload.
pub const CUSTOM_COST: &str = "A";
/// Restore the default arm model. No payload.
pub const DEFAULT_COST: &str = "D";

/// One row of the endpoint table.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EndpointInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub payload: &'static str,
}

impl EndpointInfo {
    const fn new(code: &'static str, name: &'static str, payload: &'static str) -> Self {
        Self {
            code,
            name,
            payload,
        }
    }
}

/// All endpoints the backend documents.
pub const ENDPOINTS: &[EndpointInfo] = &[
    EndpointInfo::new(LIMITS, "limits", "none"),
    EndpointInfo::new(COMPUTE, "compute", "structured"),
    EndpointInfo::new(INTERACTION_SPACE, "interaction-space", "none"),
    EndpointInfo::new(POSES, "poses", "structured"),
    EndpointInfo::new(OPTIMAL_POSITION, "optimal-position", "structured"),
    EndpointInfo::new(FRAME_UPLOAD, "frame-upload", "base64"),
    EndpointInfo::new(CUSTOM_COST, "custom-cost", "structured"),
    EndpointInfo::new(DEFAULT_COST, "default-cost", "none"),
];

/// Returns a human-readable name for an endpoint code.
pub fn endpoint_name(code: &str) -> &'static str {
    ENDPOINTS
        .iter()
        .find(|info| info.code == code)
        .map(|info| info.name)
        .unwrap_or("unknown")
}

/// Opaque code selecting a remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(Cow<'static, str>);

impl Endpoint {
    pub const fn from_static(code: &'static str) -> Self {
        Self(Cow::Borrowed(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Readable name for logs; `"unknown"` for codes outside the table.
    pub fn name(&self) -> &'static str {
        endpoint_name(&self.0)
    }

    /// The endpoint as the first wire part.
    pub fn to_bytes(&self) -> Bytes {
        match &self.0 {
            Cow::Borrowed(code) => Bytes::from_static(code.as_bytes()),
            Cow::Owned(code) => Bytes::copy_from_slice(code.as_bytes()),
        }
    }
}

impl From<&'static str> for Endpoint {
    fn from(code: &'static str) -> Self {
        Self::from_static(code)
    }
}

impl From<String> for Endpoint {
    fn from(code: String) -> Self {
        Self(Cow::Owned(code))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
