//! Provider-independent fallback handlers.
//!
//! Used when no plugin supplies a handler for an action that has a sane
//! no-op answer: publishing and pushing report "not done", status queries
//! report "not ready" or "no result".

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use trellis_spi::{handler_fn, ActionHandler, ModuleActionKind};

/// The built-in default handlers, keyed by action.
pub fn install_default_handlers() -> HashMap<ModuleActionKind, Arc<dyn ActionHandler>> {
    let mut handlers: HashMap<ModuleActionKind, Arc<dyn ActionHandler>> = HashMap::new();
    handlers.insert(
        ModuleActionKind::PublishModule,
        handler_fn(|_params, _ctx| async { Ok(json!({"published": false})) }),
    );
    handlers.insert(
        ModuleActionKind::PushModule,
        handler_fn(|_params, _ctx| async { Ok(json!({"pushed": false})) }),
    );
    handlers.insert(
        ModuleActionKind::GetTestResult,
        handler_fn(|_params, _ctx| async { Ok(Value::Null) }),
    );
    handlers.insert(
        ModuleActionKind::GetBuildStatus,
        handler_fn(|_params, _ctx| async { Ok(json!({"ready": false})) }),
    );
    // `configure` defaults to the identity: declared services, tasks and
    // tests pass through untouched.
    handlers.insert(
        ModuleActionKind::Configure,
        handler_fn(|params, _ctx| async move {
            Ok(params.get("module").cloned().unwrap_or(Value::Null))
        }),
    );
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_spi::PluginContext;

    fn ctx() -> PluginContext {
        PluginContext {
            plugin_name: "default".to_string(),
            project_name: "demo".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_push_default_to_not_done() {
        let handlers = install_default_handlers();
        let publish = handlers[&ModuleActionKind::PublishModule]
            .call(json!({"module": {}}), ctx())
            .await
            .expect("ok");
        assert_eq!(publish, json!({"published": false}));

        let push = handlers[&ModuleActionKind::PushModule]
            .call(json!({"module": {}}), ctx())
            .await
            .expect("ok");
        assert_eq!(push, json!({"pushed": false}));
    }

    #[tokio::test]
    async fn test_status_defaults() {
        let handlers = install_default_handlers();
        assert_eq!(
            handlers[&ModuleActionKind::GetTestResult]
                .call(json!({"module": {}}), ctx())
                .await
                .expect("ok"),
            Value::Null
        );
        assert_eq!(
            handlers[&ModuleActionKind::GetBuildStatus]
                .call(json!({"module": {}}), ctx())
                .await
                .expect("ok"),
            json!({"ready": false})
        );
    }
}
