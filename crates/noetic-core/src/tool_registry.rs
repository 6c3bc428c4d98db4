//! `ToolRegistry`: the single source of truth for everything the reasoning
//! model may invoke, behind one flat namespace covering three tool classes —
//! built-in, external-server (`server.tool`), delegated-agent
//! (`agent.method`). Registered once via `Arc<RwLock<HashMap<...>>>` of
//! trait objects and queried often.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::sync::RwLock;

use crate::audit_journal::AuditJournal;
use crate::error::{Error, Result};

/// The three tool classes sharing one flat namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClass {
    /// Executed in-process.
    BuiltIn,
    /// Discovered from a tool-server adapter, namespaced `server.tool`.
    ExternalServer,
    /// Invokes another agent via a remote-call adapter, namespaced
    /// `agent.method`.
    DelegatedAgent,
}

/// Public listing entry returned by `ListAll`.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub class: ToolClass,
    pub schema: JsonValue,
}

/// Executes one tool call. Implementors own their own connection state
/// (e.g. a cached external-server client).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: JsonValue) -> Result<JsonValue>;

    /// Whether the handler's backing connection is currently reachable.
    /// Built-in handlers are always healthy; adapter-backed handlers report
    /// their live connection state.
    async fn is_healthy(&self) -> bool {
        true
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Pre-dispatch veto hook, implemented by `Watchdog`.
#[async_trait]
pub trait DispatchAuthorizer: Send + Sync {
    async fn authorize(&self, tool_name: &str, args: &JsonValue) -> Result<()>;
}

struct AllowAll;

#[async_trait]
impl DispatchAuthorizer for AllowAll {
    async fn authorize(&self, _tool_name: &str, _args: &JsonValue) -> Result<()> {
        Ok(())
    }
}

/// Backoff schedule applied to a single external-server adapter while its
/// connection is down.
struct ReconnectState {
    connected: bool,
    next_attempt_delay: Duration,
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

impl ReconnectState {
    fn fresh() -> Self {
        Self {
            connected: true,
            next_attempt_delay: INITIAL_BACKOFF,
        }
    }

    fn mark_failure(&mut self) {
        self.connected = false;
        self.next_attempt_delay = (self.next_attempt_delay * 2).min(MAX_BACKOFF);
    }

    fn mark_recovered(&mut self) {
        self.connected = true;
        self.next_attempt_delay = INITIAL_BACKOFF;
    }
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    adapters: RwLock<HashMap<String, ReconnectState>>,
    authorizer: Arc<dyn DispatchAuthorizer>,
    audit: Option<Arc<AuditJournal>>,
}

impl ToolRegistry {
    pub fn new(authorizer: Option<Arc<dyn DispatchAuthorizer>>, audit: Option<Arc<AuditJournal>>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            adapters: RwLock::new(HashMap::new()),
            authorizer: authorizer.unwrap_or_else(|| Arc::new(AllowAll)),
            audit,
        }
    }

    /// Register a tool under the flat namespace. `server.tool` and
    /// `agent.method` names are conventions enforced by the caller, not this
    /// method — `Register` accepts any class with any name.
    pub async fn register(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        class: ToolClass,
        schema: JsonValue,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        let name = name.into();
        if class == ToolClass::ExternalServer {
            let adapter = name
                .split('.')
                .next()
                .ok_or_else(|| Error::SchemaInvalid(format!("malformed server.tool name: {name}")))?;
            self.adapters
                .write()
                .await
                .entry(adapter.to_string())
                .or_insert_with(ReconnectState::fresh);
        }

        let descriptor = ToolDescriptor {
            name: name.clone(),
            description: description.into(),
            class,
            schema,
        };
        self.tools.write().await.insert(name, RegisteredTool { descriptor, handler });
        Ok(())
    }

    /// List every registered tool's descriptor.
    pub async fn list_all(&self) -> Vec<ToolDescriptor> {
        self.tools.read().await.values().map(|t| t.descriptor.clone()).collect()
    }

    /// Validate `args` against a tool's declared schema. This reference
    /// implementation checks required top-level keys only — a full JSON
    /// Schema validator is a drop-in replacement behind this same call.
    fn validate_schema(schema: &JsonValue, args: &JsonValue) -> Result<()> {
        let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
            return Ok(());
        };
        for key in required {
            let Some(key) = key.as_str() else { continue };
            if args.get(key).is_none() {
                return Err(Error::SchemaInvalid(format!("missing required argument `{key}`")));
            }
        }
        Ok(())
    }

    /// Invoke a registered tool by name. Every call generates an
    /// `AuditEvent`; `Watchdog` (via the configured `DispatchAuthorizer`) may
    /// veto pre-dispatch.
    pub async fn call(&self, name: &str, args: JsonValue) -> Result<JsonValue> {
        let tool = {
            let tools = self.tools.read().await;
            let Some(tool) = tools.get(name) else {
                return Err(Error::HandlerError(format!("unknown tool: {name}")));
            };
            (tool.descriptor.clone(), tool.handler.clone())
        };
        let (descriptor, handler) = tool;

        if descriptor.class == ToolClass::ExternalServer {
            if let Some(adapter) = descriptor.name.split('.').next() {
                let adapters = self.adapters.read().await;
                if let Some(state) = adapters.get(adapter) {
                    if !state.connected {
                        self.audit_call(&descriptor.name, "adapter_unavailable", &args).await?;
                        return Err(Error::AdapterUnavailable(format!(
                            "adapter `{adapter}` is reconnecting"
                        )));
                    }
                }
            }
        }

        Self::validate_schema(&descriptor.schema, &args).map_err(|e| {
            e
        })?;

        if let Err(err) = self.authorizer.authorize(&descriptor.name, &args).await {
            self.audit_call(&descriptor.name, "denied_by_watchdog", &args).await?;
            return Err(Error::DeniedByWatchdog(err.to_string()));
        }

        // Audit precedes dispatch: the event must be durable before the
        // handler can produce any observable side effect.
        self.audit_call(&descriptor.name, "tool_call", &args).await?;

        let outcome = handler.call(args.clone()).await;

        match &outcome {
            Ok(_) => self.audit_call(&descriptor.name, "call_succeeded", &args).await?,
            Err(err) => {
                self.audit_call(&descriptor.name, "call_failed", &args).await?;
                if descriptor.class == ToolClass::ExternalServer && matches!(err, Error::AdapterUnavailable(_)) {
                    self.mark_adapter_failure(&descriptor.name).await;
                }
            }
        }

        outcome
    }

    async fn audit_call(&self, tool_name: &str, kind: &str, args: &JsonValue) -> Result<()> {
        if let Some(audit) = &self.audit {
            audit
                .emit("tool_registry", kind, None, json!({"tool": tool_name, "args": args}))
                .await?;
        }
        Ok(())
    }

    async fn mark_adapter_failure(&self, tool_name: &str) {
        if let Some(adapter) = tool_name.split('.').next() {
            if let Some(state) = self.adapters.write().await.get_mut(adapter) {
                state.mark_failure();
            }
        }
    }

    /// Mark an adapter as reconnected, clearing its backoff. Called by the
    /// adapter's own reconnect loop once it regains connectivity.
    pub async fn mark_adapter_recovered(&self, adapter: &str) {
        if let Some(state) = self.adapters.write().await.get_mut(adapter) {
            state.mark_recovered();
        }
    }
}
