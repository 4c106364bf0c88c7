//! Middleware: named transform stages
//!
//! A middleware decides which resources one `add` call loads and how a
//! finished batch is turned into output values. Both steps have default
//! implementations, so a middleware only overrides what it specializes.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{LoaderError, Result};
use crate::resource::{LoadRequest, Payload, Resource};

/// A resource together with the arguments its load is started with
#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub resource: Arc<Resource>,
    pub args: Vec<Value>,
}

impl ResourceEntry {
    pub fn new(resource: Arc<Resource>, args: Vec<Value>) -> Self {
        Self { resource, args }
    }

    /// A fresh resource loading `request`
    pub fn from_request(request: &LoadRequest) -> Self {
        Self::new(Resource::new(), request.to_args())
    }

    /// A fresh resource for `args`, rejecting arguments that name no request
    pub fn parse(args: Vec<Value>) -> Result<Self> {
        LoadRequest::from_args(&args).map_err(|e| LoaderError::InvalidRequest(e.to_string()))?;
        Ok(Self::new(Resource::new(), args))
    }
}

/// Transform stage applied to batches added through it
pub trait Middleware: Send + Sync {
    /// Resources to load for `add(key, args)`
    ///
    /// Default: one resource started with `args`.
    fn resources(&self, key: &str, args: Vec<Value>) -> Vec<ResourceEntry> {
        let _ = key;
        vec![ResourceEntry::new(Resource::new(), args)]
    }

    /// Output values for a finished batch, in resource order
    ///
    /// Default: each payload as JSON, `null` for resources without one.
    fn transform(&self, resources: &[Arc<Resource>]) -> Vec<Value> {
        resources
            .iter()
            .map(|r| r.payload().map(|p| p.to_value()).unwrap_or(Value::Null))
            .collect()
    }
}

/// Middleware using only the default behavior
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMiddleware;

impl Middleware for DefaultMiddleware {}

/// Loads images and reports their size
///
/// `add(key, [url?, width?, height?])`: the URL defaults to the key.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageLoader;

impl Middleware for ImageLoader {
    fn resources(&self, key: &str, args: Vec<Value>) -> Vec<ResourceEntry> {
        let url = args.first().and_then(Value::as_str).unwrap_or(key);
        let dimension = |index: usize| args.get(index).and_then(Value::as_u64).map(|v| v as u32);
        let request = LoadRequest::new(url).image().with_size(dimension(1), dimension(2));
        vec![ResourceEntry::from_request(&request)]
    }

    fn transform(&self, resources: &[Arc<Resource>]) -> Vec<Value> {
        resources
            .iter()
            .map(|r| match r.payload() {
                Some(payload @ Payload::Image(_)) => payload.to_value(),
                _ => Value::Null,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::LoadType;
    use serde_json::json;

    #[test]
    fn test_default_resources_pass_args_through() {
        let entries = DefaultMiddleware.resources("k", vec![json!("http://localhost/a")]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].args, vec![json!("http://localhost/a")]);
    }

    #[test]
    fn test_parse_rejects_missing_url() {
        assert!(matches!(ResourceEntry::parse(vec![]), Err(LoaderError::InvalidRequest(_))));
        assert!(ResourceEntry::parse(vec![json!("http://localhost/a")]).is_ok());
    }

    #[test]
    fn test_default_transform_unloaded_is_null() {
        let resources = vec![Resource::new()];
        assert_eq!(DefaultMiddleware.transform(&resources), vec![Value::Null]);
    }

    #[test]
    fn test_image_loader_url_defaults_to_key() {
        let entries = ImageLoader.resources("http://localhost/logo.png", vec![]);
        let (request, _) = LoadRequest::from_args(&entries[0].args).unwrap();
        assert_eq!(request.url, "http://localhost/logo.png");
        assert_eq!(request.load_type, LoadType::Image);
    }

    #[test]
    fn test_image_loader_size_hints() {
        let entries = ImageLoader.resources("logo", vec![json!("http://localhost/l.png"), json!(32), json!(16)]);
        let (request, _) = LoadRequest::from_args(&entries[0].args).unwrap();
        assert_eq!(request.url, "http://localhost/l.png");
        assert_eq!(request.width, Some(32));
        assert_eq!(request.height, Some(16));
    }
}
