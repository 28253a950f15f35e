//! Dynamic HTTP handlers and entry-point security rules
//!
//! Feature modules extend the REST surface at runtime by registering
//! handlers against path patterns; the HTTP front end resolves each
//! request to the most specific matching handler. Security rules live in a
//! parallel table consulted by the auth middleware before any handler
//! runs, keyed the same way so protection follows the path shape.
//!
//! Pattern language: literal segments, `{name}` parameter segments and a
//! trailing `*` covering the whole subtree. Specificity: exact beats
//! parameterized beats subtree, more literal segments beat fewer, and a
//! method-specific entry beats an any-method entry on the same pattern.

use std::{
    cmp::Reverse,
    collections::HashMap,
    sync::{Arc, RwLock},
};

use armada_api::model::OwnerToken;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

/// Malformed handler path patterns
#[derive(thiserror::Error, Debug)]
pub enum PatternError {
    #[error("path pattern must not be empty")]
    Empty,

    #[error("'*' is only valid as the final segment: {0}")]
    MisplacedWildcard(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Compiled path pattern
#[derive(Clone, Debug)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    subtree: bool,
}

impl PathPattern {
    pub fn compile(raw: &str) -> Result<Self, PatternError> {
        let mut parts: Vec<&str> = raw.split('/').filter(|part| !part.is_empty()).collect();
        if parts.is_empty() {
            return Err(PatternError::Empty);
        }

        let subtree = *parts.last().unwrap_or(&"") == "*";
        if subtree {
            parts.pop();
        }
        if parts.iter().any(|part| *part == "*") {
            return Err(PatternError::MisplacedWildcard(raw.to_string()));
        }

        let segments = parts
            .into_iter()
            .map(|part| {
                if part.starts_with('{') && part.ends_with('}') && part.len() > 2 {
                    Segment::Param(part[1..part.len() - 1].to_string())
                } else {
                    Segment::Literal(part.to_string())
                }
            })
            .collect();

        Ok(Self {
            raw: raw.to_string(),
            segments,
            subtree,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Match `path`, returning extracted parameter values on success.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();

        if self.subtree {
            if parts.len() < self.segments.len() {
                return None;
            }
        } else if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts.iter()) {
            match segment {
                Segment::Literal(literal) if literal == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(params)
    }

    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Literal(_)))
            .count()
    }

    fn param_count(&self) -> usize {
        self.segments.len() - self.literal_count()
    }

    /// Ordering key; lower sorts more specific.
    fn specificity(&self) -> (u8, Reverse<usize>, Reverse<usize>) {
        let kind = if self.subtree {
            2
        } else if self.param_count() > 0 {
            1
        } else {
            0
        };
        (kind, Reverse(self.literal_count()), Reverse(self.segments.len()))
    }
}

/// Decoded request handed to a dynamic handler
#[derive(Clone, Debug, Default)]
pub struct HandlerRequest {
    pub method: String,
    pub path: String,
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Response produced by a dynamic handler
#[derive(Clone, Debug)]
pub struct HandlerResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Bytes,
}

impl HandlerResponse {
    pub fn json(status: u16, value: &impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            status,
            content_type: "application/json".to_string(),
            body: Bytes::from(serde_json::to_vec(value)?),
        })
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain".to_string(),
            body: Bytes::from(body.into()),
        }
    }
}

/// One dynamically registered HTTP entry point
#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn handle(&self, request: HandlerRequest) -> anyhow::Result<HandlerResponse>;
}

struct RegisteredHttpHandler {
    owner: OwnerToken,
    method: Option<String>,
    pattern: PathPattern,
    handler: Arc<dyn HttpHandler>,
}

/// Pattern-keyed table of dynamic HTTP handlers
pub struct HttpHandlerRegistry {
    handlers: RwLock<Vec<Arc<RegisteredHttpHandler>>>,
}

impl HttpHandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register a handler for `pattern`, scoped to one HTTP method when
    /// `method` is given.
    pub fn register(
        &self,
        owner: OwnerToken,
        method: Option<&str>,
        pattern: &str,
        handler: Arc<dyn HttpHandler>,
    ) -> Result<(), PatternError> {
        let compiled = PathPattern::compile(pattern)?;
        debug!(pattern = %pattern, owner = %owner, "registered http handler");
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(Arc::new(RegisteredHttpHandler {
                owner,
                method: method.map(|m| m.to_uppercase()),
                pattern: compiled,
                handler,
            }));
        }
        Ok(())
    }

    /// Remove every handler registered under `owner`.
    pub fn remove_handlers(&self, owner: OwnerToken) -> usize {
        let mut removed = 0;
        if let Ok(mut handlers) = self.handlers.write() {
            let before = handlers.len();
            handlers.retain(|handler| handler.owner != owner);
            removed = before - handlers.len();
        }
        removed
    }

    pub fn handler_count(&self, owner: OwnerToken) -> usize {
        self.handlers
            .read()
            .map(|handlers| {
                handlers
                    .iter()
                    .filter(|handler| handler.owner == owner)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Resolve a request to the most specific matching handler, together
    /// with the path parameters its pattern extracted.
    pub fn resolve(
        &self,
        method: &str,
        path: &str,
    ) -> Option<(Arc<dyn HttpHandler>, HashMap<String, String>)> {
        let method = method.to_uppercase();
        let handlers = self.handlers.read().ok()?;

        handlers
            .iter()
            .filter(|entry| {
                entry
                    .method
                    .as_ref()
                    .is_none_or(|entry_method| *entry_method == method)
            })
            .filter_map(|entry| {
                entry
                    .pattern
                    .match_path(path)
                    .map(|params| (entry, params))
            })
            .min_by_key(|(entry, _)| {
                let (kind, literals, length) = entry.pattern.specificity();
                (kind, literals, length, u8::from(entry.method.is_none()))
            })
            .map(|(entry, params)| (entry.handler.clone(), params))
    }
}

impl Default for HttpHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// How an entry point authenticates its callers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthKind {
    /// Anyone may call
    None,
    /// HTTP Basic credentials; `optional` lets anonymous callers through
    Basic { optional: bool },
    /// Bearer token; `optional` lets anonymous callers through
    Bearer { optional: bool },
}

/// Protection applied to the entry points a pattern covers
#[derive(Clone, Debug)]
pub struct SecurityRule {
    pub method: Option<String>,
    pub pattern: String,
    pub auth: AuthKind,
    pub required_permission: Option<String>,
}

struct RegisteredSecurityRule {
    owner: OwnerToken,
    compiled: PathPattern,
    rule: SecurityRule,
}

/// Pattern-keyed table of security rules consulted by the middleware
pub struct SecurityRegistry {
    rules: RwLock<Vec<Arc<RegisteredSecurityRule>>>,
}

impl SecurityRegistry {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
        }
    }

    pub fn add_rule(
        &self,
        owner: OwnerToken,
        method: Option<&str>,
        pattern: &str,
        auth: AuthKind,
        required_permission: Option<&str>,
    ) -> Result<(), PatternError> {
        let compiled = PathPattern::compile(pattern)?;
        debug!(pattern = %pattern, owner = %owner, "added security rule");
        if let Ok(mut rules) = self.rules.write() {
            rules.push(Arc::new(RegisteredSecurityRule {
                owner,
                compiled,
                rule: SecurityRule {
                    method: method.map(|m| m.to_uppercase()),
                    pattern: pattern.to_string(),
                    auth,
                    required_permission: required_permission.map(str::to_string),
                },
            }));
        }
        Ok(())
    }

    /// Remove every rule registered under `owner`.
    pub fn remove_rules(&self, owner: OwnerToken) -> usize {
        let mut removed = 0;
        if let Ok(mut rules) = self.rules.write() {
            let before = rules.len();
            rules.retain(|rule| rule.owner != owner);
            removed = before - rules.len();
        }
        removed
    }

    pub fn rule_count(&self, owner: OwnerToken) -> usize {
        self.rules
            .read()
            .map(|rules| rules.iter().filter(|rule| rule.owner == owner).count())
            .unwrap_or(0)
    }

    /// The most specific rule covering this request, if any. No rule
    /// means the entry point is open.
    pub fn lookup(&self, method: &str, path: &str) -> Option<SecurityRule> {
        let method = method.to_uppercase();
        let rules = self.rules.read().ok()?;

        rules
            .iter()
            .filter(|entry| {
                entry
                    .rule
                    .method
                    .as_ref()
                    .is_none_or(|entry_method| *entry_method == method)
            })
            .filter(|entry| entry.compiled.match_path(path).is_some())
            .min_by_key(|entry| {
                let (kind, literals, length) = entry.compiled.specificity();
                (kind, literals, length, u8::from(entry.rule.method.is_none()))
            })
            .map(|entry| entry.rule.clone())
    }
}

impl Default for SecurityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
