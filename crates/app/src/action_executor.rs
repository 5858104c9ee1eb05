//! Executes the action behind a schedule.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;

use ccuhub_domain::error::{CcuError, NotFoundError};
use ccuhub_domain::schedule::ScheduleAction;

use crate::device_registry::DeviceRegistry;
use crate::ports::RemoteClient;
use crate::sync::{read, write};

/// Performs a [`ScheduleAction`].
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, action: &ScheduleAction) -> impl Future<Output = Result<(), CcuError>> + Send;
}

impl<T: ActionExecutor> ActionExecutor for Arc<T> {
    fn execute(&self, action: &ScheduleAction) -> impl Future<Output = Result<(), CcuError>> + Send {
        (**self).execute(action)
    }
}

/// A locally registered action, invoked by name.
pub type NamedAction = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CcuError>> + Send + Sync>;

/// Runs parameter writes through the [`DeviceRegistry`] and named actions
/// from a local table.
pub struct RemoteActionExecutor<R> {
    registry: Arc<DeviceRegistry<R>>,
    named: RwLock<HashMap<String, NamedAction>>,
}

impl<R: RemoteClient> RemoteActionExecutor<R> {
    pub fn new(registry: Arc<DeviceRegistry<R>>) -> Self {
        Self {
            registry,
            named: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the action run for `ScheduleAction::Named`.
    pub fn register_named(&self, name: impl Into<String>, action: NamedAction) {
        let name = name.into();
        tracing::debug!(%name, "named action registered");
        write(&self.named).insert(name, action);
    }
}

impl<R: RemoteClient> ActionExecutor for RemoteActionExecutor<R> {
    fn execute(&self, action: &ScheduleAction) -> impl Future<Output = Result<(), CcuError>> + Send {
        async move {
            match action {
                ScheduleAction::WriteParameter { address, value } => {
                    self.registry.write(address, value.clone()).await
                }
                ScheduleAction::Named { name } => {
                    let handler = read(&self.named).get(name).cloned();
                    let handler = handler.ok_or_else(|| NotFoundError {
                        entity: "Action",
                        id: name.clone(),
                    })?;
                    handler().await
                }
            }
        }
    }
}
