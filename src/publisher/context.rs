//! Simulated request context and the serializer seam.
//!
//! Publishing happens outside any HTTP request, but serializers often need
//! request data to build absolute URLs or pick a language. The publisher
//! hands them a [`RequestContext`] describing a plausible HTTPS request to
//! the publishing site.

use std::marker::PhantomData;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::envelope::Site;
use crate::error::SerializeError;

/// The request a serializer would have seen had the event come from HTTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    scheme: &'static str,
    server_name: String,
    server_port: u16,
    script_name: Option<String>,
    language: Option<String>,
}

impl RequestContext {
    /// HTTPS on port 443 to the site's domain.
    pub fn simulated(site: &Site) -> Self {
        Self {
            scheme: "https",
            server_name: site.domain().to_string(),
            server_port: 443,
            script_name: None,
            language: None,
        }
    }

    pub fn with_script_name(mut self, script_name: Option<String>) -> Self {
        self.script_name = script_name;
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn scheme(&self) -> &str {
        self.scheme
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn script_name(&self) -> Option<&str> {
        self.script_name.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Absolute URI for a path on this request's host, under the script name.
    pub fn absolute_uri(&self, path: &str) -> String {
        let script = self
            .script_name
            .as_deref()
            .unwrap_or("")
            .trim_end_matches('/');
        let port = if self.server_port == 443 {
            String::new()
        } else {
            format!(":{}", self.server_port)
        };
        format!(
            "{}://{}{}{}{}",
            self.scheme, self.server_name, port, script, path
        )
    }
}

/// Turns a domain object into the plain map carried as event `data`.
pub trait Serializer<T: ?Sized> {
    fn serialize(&self, item: &T, context: &RequestContext)
        -> Result<Map<String, Value>, SerializeError>;
}

impl<T: ?Sized, F> Serializer<T> for F
where
    F: Fn(&T, &RequestContext) -> Result<Map<String, Value>, SerializeError>,
{
    fn serialize(
        &self,
        item: &T,
        context: &RequestContext,
    ) -> Result<Map<String, Value>, SerializeError> {
        self(item, context)
    }
}

/// Serializer for any `serde::Serialize` type that encodes to a JSON object.
///
/// Types that encode to anything other than an object are an error.
pub struct SerdeSerializer<T: ?Sized>(PhantomData<fn(&T)>);

impl<T: ?Sized> SerdeSerializer<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: ?Sized> Default for SerdeSerializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + ?Sized> Serializer<T> for SerdeSerializer<T> {
    fn serialize(
        &self,
        item: &T,
        _context: &RequestContext,
    ) -> Result<Map<String, Value>, SerializeError> {
        match serde_json::to_value(item)? {
            Value::Object(map) => Ok(map),
            other => Err(SerializeError(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            ))),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
