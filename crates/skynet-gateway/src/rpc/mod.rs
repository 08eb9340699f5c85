//! JSON-RPC method dispatch.
//!
//! [`MethodRegistry`] maps a method name to a boxed async handler. Unlike a
//! `match` in a dispatch function, a name can be registered with no handler
//! (`None`) — invoking it surfaces a JSON-RPC error rather than panicking,
//! which is the behavior spec.md requires of a "nil handler".

pub mod handlers;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use skynet_protocol::RpcError;

use crate::app::AppState;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;
pub type HandlerFn =
    Arc<dyn Fn(Arc<AppState>, String, Value) -> HandlerFuture + Send + Sync>;

#[derive(Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, Option<HandlerFn>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, method: &str, handler: HandlerFn) {
        self.handlers.insert(method.to_string(), Some(handler));
    }

    /// Register a method name with no handler. Exercises the "nil handler"
    /// requirement explicitly; not used by the default registry build.
    #[cfg(test)]
    pub fn register_nil(&mut self, method: &str) {
        self.handlers.insert(method.to_string(), None);
    }

    pub async fn dispatch(
        &self,
        state: Arc<AppState>,
        session_id: String,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        match self.handlers.get(method) {
            None => Err(RpcError::method_not_found(method)),
            Some(None) => Err(RpcError::internal_error(format!(
                "no handler registered for method '{method}'"
            ))),
            Some(Some(handler)) => handler(state, session_id, params).await,
        }
    }

    pub fn build() -> Self {
        handlers::build_registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let registry = MethodRegistry::new();
        let state = crate::app::AppState::for_test();
        let err = registry
            .dispatch(state, "s1".into(), "nonexistent", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code, skynet_protocol::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn nil_handler_surfaces_error_instead_of_panicking() {
        let mut registry = MethodRegistry::new();
        registry.register_nil("health");
        let state = crate::app::AppState::for_test();
        let err = registry
            .dispatch(state, "s1".into(), "health", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code, skynet_protocol::INTERNAL_ERROR);
    }
}
