//! Camera REST control seam
//!
//! The preview is started and stopped with `POST preview`. The HTTP client
//! lives outside this crate; it implements [`CameraControl`].

use serde::Serialize;

use crate::error::ControlError;

/// Body of the `preview` request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRequest {
    /// Video id
    pub id: String,
    pub preview_active: bool,
    /// Port the receiver is listening on
    pub preview_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length_secs: Option<f64>,
}

impl PreviewRequest {
    pub fn start(id: impl Into<String>, preview_port: u16) -> Self {
        Self {
            id: id.into(),
            preview_active: true,
            preview_port,
            offset_secs: None,
            length_secs: None,
        }
    }

    pub fn stop(id: impl Into<String>, preview_port: u16) -> Self {
        Self {
            preview_active: false,
            ..Self::start(id, preview_port)
        }
    }

    /// Start the preview `offset_secs` into the video
    pub fn with_offset(mut self, offset_secs: f64) -> Self {
        self.offset_secs = Some(offset_secs);
        self
    }

    /// Limit the preview to `length_secs`
    pub fn with_length(mut self, length_secs: f64) -> Self {
        self.length_secs = Some(length_secs);
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Issues preview requests to the camera
#[async_trait::async_trait]
pub trait CameraControl: Send + Sync {
    /// Send `POST preview`; only success or failure is of interest
    async fn set_preview(&self, request: PreviewRequest) -> Result<(), ControlError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_body() {
        let json: serde_json::Value = serde_json::from_str(&PreviewRequest::start("1000000001", 4012).to_json().unwrap()).unwrap();

        assert_eq!(
            json,
            serde_json::json!({"id": "1000000001", "preview_active": true, "preview_port": 4012})
        );
    }

    #[test]
    fn test_optional_keys() {
        let request = PreviewRequest::start("5", 4010).with_offset(2.5).with_length(10.0);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["offset_secs"], 2.5);
        assert_eq!(json["length_secs"], 10.0);
    }

    #[test]
    fn test_stop_body() {
        let request = PreviewRequest::stop("5", 4010);

        assert!(!request.preview_active);
        assert_eq!(request.preview_port, 4010);
        assert!(!request.to_json().unwrap().contains("offset_secs"));
    }
}
