//! Execution strategies
//!
//! A strategy is the transport that performs an action invocation. The
//! network strategy calls the routed HTTP endpoint and works everywhere;
//! the direct strategy invokes a pre-registered in-process handler and
//! falls back to the network strategy when no handler is registered, so
//! it can be adopted route by route.

use async_trait::async_trait;
use playops_core::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// The routed identity of a remote action.
#[derive(Debug, Clone)]
pub struct ActionRoute {
    pub module: String,
    pub method: String,
    /// Route template with `[paramName]` placeholders
    pub route: String,
}

/// Pluggable invocation transport.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    async fn execute_api_call(
        &self,
        action: &ActionRoute,
        input: &Map<String, Value>,
    ) -> Result<Value>;
}

/// Substitute `[param]` placeholders from the input, returning the resolved
/// route and the remaining unused inputs.
pub(crate) fn substitute_route(
    template: &str,
    input: &Map<String, Value>,
) -> (String, Map<String, Value>) {
    let mut route = template.to_string();
    let mut used: Vec<&str> = Vec::new();

    for (key, value) in input {
        let placeholder = format!("[{}]", key);
        if route.contains(&placeholder) {
            route = route.replace(&placeholder, &value_as_segment(value));
            used.push(key);
        }
    }

    let remaining = input
        .iter()
        .filter(|(k, _)| !used.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    (route, remaining)
}

fn value_as_segment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn wants_body(method: &str) -> bool {
    matches!(method, "POST" | "PUT" | "PATCH")
}

/// HTTP transport: `baseUrl + "/api/" + resolvedRoute`, unused inputs in the
/// query string for GET/DELETE or the JSON body otherwise.
pub struct NetworkStrategy {
    client: reqwest::Client,
    base_url: String,
}

impl NetworkStrategy {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ExecutionStrategy for NetworkStrategy {
    async fn execute_api_call(
        &self,
        action: &ActionRoute,
        input: &Map<String, Value>,
    ) -> Result<Value> {
        let (route, remaining) = substitute_route(&action.route, input);
        let method = action.method.to_uppercase();
        let url = format!("{}/api/{}", self.base_url.trim_end_matches('/'), route);

        debug!(module = %action.module, method = %method, url = %url, "Dispatching network action");

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "DELETE" => self.client.delete(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            other => return Err(Error::action(format!("unsupported HTTP method '{}'", other))),
        };

        if wants_body(&method) {
            request = request.json(&Value::Object(remaining));
        } else if !remaining.is_empty() {
            let pairs: Vec<(String, String)> = remaining
                .iter()
                .map(|(k, v)| (k.clone(), value_as_segment(v)))
                .collect();
            request = request.query(&pairs);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(Error::action(format!(
                "API call to {} failed with status {}: {}",
                route, status, body
            )));
        }

        if body.is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

/// A request handed to an in-process handler: the same shape the routed
/// HTTP endpoint would have seen.
#[derive(Debug, Clone)]
pub struct DirectRequest {
    pub method: String,
    pub route: String,
    /// Extracted `[param]` route parameters
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Value,
}

/// A handler's response.
#[derive(Debug, Clone)]
pub struct DirectResponse {
    pub status: u16,
    pub body: Value,
}

impl DirectResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn error(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

/// An in-process route handler.
#[async_trait]
pub trait DirectHandler: Send + Sync {
    async fn handle(&self, request: DirectRequest) -> Result<DirectResponse>;
}

/// In-process transport keyed by `"METHOD:route-template"`, with a
/// transparent network fallback for unregistered routes.
pub struct DirectStrategy {
    handlers: HashMap<String, Arc<dyn DirectHandler>>,
    fallback: NetworkStrategy,
}

impl DirectStrategy {
    pub fn new(fallback: NetworkStrategy) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback,
        }
    }

    /// Register a handler for `method` + route template.
    pub fn register(&mut self, method: &str, route: &str, handler: Arc<dyn DirectHandler>) {
        let key = format!("{}:{}", method.to_uppercase(), route);
        self.handlers.insert(key, handler);
    }

    fn handler_for(&self, action: &ActionRoute) -> Option<&Arc<dyn DirectHandler>> {
        let key = format!("{}:{}", action.method.to_uppercase(), action.route);
        self.handlers.get(&key)
    }
}

#[async_trait]
impl ExecutionStrategy for DirectStrategy {
    async fn execute_api_call(
        &self,
        action: &ActionRoute,
        input: &Map<String, Value>,
    ) -> Result<Value> {
        let Some(handler) = self.handler_for(action) else {
            debug!(
                method = %action.method,
                route = %action.route,
                "No direct handler registered, falling back to network"
            );
            return self.fallback.execute_api_call(action, input).await;
        };

        let (route, remaining) = substitute_route(&action.route, input);
        let method = action.method.to_uppercase();

        // route params are exactly the inputs consumed by substitution
        let params: HashMap<String, String> = input
            .iter()
            .filter(|(k, _)| !remaining.contains_key(k.as_str()))
            .map(|(k, v)| (k.clone(), value_as_segment(v)))
            .collect();

        let (query, body) = if wants_body(&method) {
            (HashMap::new(), Value::Object(remaining))
        } else {
            let query = remaining
                .iter()
                .map(|(k, v)| (k.clone(), value_as_segment(v)))
                .collect();
            (query, Value::Object(Map::new()))
        };

        debug!(method = %method, route = %route, "Dispatching direct action");

        let response = handler
            .handle(DirectRequest {
                method,
                route,
                params,
                query,
                body,
            })
            .await?;

        if !(200..300).contains(&response.status) {
            return Err(Error::action(format!(
                "Direct call to {} failed with status {}: {}",
                action.route, response.status, response.body
            )));
        }
        Ok(response.body)
    }
}
