//! Load requests parsed from task arguments

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LoadError;

/// How the resource is fetched and decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadType {
    /// Plain HTTP request decoded per `ResponseType`
    #[default]
    Xhr,
    /// Image bytes with width/height
    Image,
}

/// How an `Xhr` body is decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseType {
    #[default]
    #[serde(rename = "text", alias = "")]
    Text,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "arraybuffer")]
    ArrayBuffer,
}

/// Everything needed to load one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub url: String,
    #[serde(default)]
    pub load_type: LoadType,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl LoadRequest {
    /// A text request for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            load_type: LoadType::Xhr,
            response_type: ResponseType::Text,
            timeout_ms: None,
            width: None,
            height: None,
        }
    }

    /// Load as an image
    pub fn image(mut self) -> Self {
        self.load_type = LoadType::Image;
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Size hints; reported as the image size when present
    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Parse task arguments
    ///
    /// The first argument is a URL string or a request object; the rest are
    /// returned untouched as extra values for the load-start event.
    pub fn from_args(args: &[Value]) -> Result<(Self, Vec<Value>), LoadError> {
        let (first, extra) = args
            .split_first()
            .ok_or_else(|| LoadError::InvalidRequest("missing url argument".to_string()))?;

        let request = match first {
            Value::String(url) => Self::new(url.clone()),
            Value::Object(_) => {
                serde_json::from_value(first.clone()).map_err(|e| LoadError::InvalidRequest(e.to_string()))?
            }
            other => {
                return Err(LoadError::InvalidRequest(format!(
                    "expected url string or request object, got {}",
                    other
                )));
            }
        };

        if request.url.trim().is_empty() {
            return Err(LoadError::InvalidRequest("empty url".to_string()));
        }

        Ok((request, extra.to_vec()))
    }

    /// Render as task arguments
    pub fn to_args(&self) -> Vec<Value> {
        vec![serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.url.clone()))]
    }
}
