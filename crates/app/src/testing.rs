//! Fakes shared by the app-layer tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::BoxFuture;

use tokio::sync::Notify;

use ccuhub_domain::address::ParameterAddress;
use ccuhub_domain::device::{Device, ParameterValue};
use ccuhub_domain::error::{CcuError, ListenerError, NotFoundError, RemoteError};
use ccuhub_domain::event::Event;
use ccuhub_domain::id::ScheduleId;
use ccuhub_domain::schedule::{Schedule, ScheduleAction};

use crate::action_executor::ActionExecutor;
use crate::ports::{
    EventSink, Listener, RawEvent, RemoteClient, ScheduleRepository, SubscriptionHandle,
};

pub use crate::ports::event_log::memory::InMemoryEventLog;

#[derive(Default)]
pub struct FakeRemote {
    pub devices: Mutex<Vec<Device>>,
    pub values: Mutex<HashMap<String, serde_json::Value>>,
    pub writes: Mutex<Vec<(String, ParameterValue)>>,
    sinks: Mutex<HashMap<u64, EventSink>>,
    next_handle: AtomicU64,
    pub subscribe_calls: AtomicU32,
    pub unsubscribe_calls: AtomicU32,
    /// Number of upcoming subscribe calls that fail.
    pub failing_subscribes: AtomicU32,
    /// Reject every subscribe call with a permanent fault.
    pub refuse_subscribes: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl FakeRemote {
    pub fn with_devices(devices: Vec<Device>) -> Self {
        let remote = Self::default();
        *remote.devices.lock().unwrap() = devices;
        remote
    }

    pub fn active_subscriptions(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    /// Push a raw event into every open subscription.
    pub fn emit(&self, raw: &RawEvent) {
        for sink in self.sinks.lock().unwrap().values() {
            sink.deliver(raw.clone());
        }
    }

    /// Break every open subscription as if the connection dropped.
    pub fn break_subscriptions(&self) {
        let sinks: Vec<EventSink> = self.sinks.lock().unwrap().drain().map(|(_, s)| s).collect();
        for sink in sinks {
            sink.lost(RemoteError::subscription_lost("connection reset"));
        }
    }
}

impl RemoteClient for FakeRemote {
    fn list_devices(&self) -> impl Future<Output = Result<Vec<Device>, RemoteError>> + Send {
        let devices = self.devices.lock().unwrap().clone();
        async { Ok(devices) }
    }

    fn read(
        &self,
        address: &ParameterAddress,
    ) -> impl Future<Output = Result<serde_json::Value, RemoteError>> + Send {
        let value = self.values.lock().unwrap().get(&address.to_string()).cloned();
        let key = address.to_string();
        async move { value.ok_or_else(|| RemoteError::from_fault(-5, format!("unknown {key}"))) }
    }

    fn write(
        &self,
        address: &ParameterAddress,
        value: &ParameterValue,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        let result = if self.fail_writes.load(Ordering::SeqCst) {
            Err(RemoteError::connection("controller unreachable"))
        } else {
            self.writes
                .lock()
                .unwrap()
                .push((address.to_string(), value.clone()));
            Ok(())
        };
        async { result }
    }

    fn subscribe(
        &self,
        sink: EventSink,
    ) -> impl Future<Output = Result<SubscriptionHandle, RemoteError>> + Send {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.refuse_subscribes.load(Ordering::SeqCst) {
            Err(RemoteError::from_fault(-6, "subscriptions not supported"))
        } else if self
            .failing_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            Err(RemoteError::connection("connection refused"))
        } else {
            let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
            self.sinks.lock().unwrap().insert(id, sink);
            Ok(SubscriptionHandle(id))
        };
        async { result }
    }

    fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        let removed = self.sinks.lock().unwrap().remove(&handle.0).is_some();
        async move {
            if removed {
                Ok(())
            } else {
                Err(RemoteError::from_fault(-1, "unknown subscription"))
            }
        }
    }
}

/// Listener that records what it saw into a shared journal.
pub struct RecordingListener {
    pub name: String,
    pub journal: Arc<Mutex<Vec<(String, Event)>>>,
    pub fail: bool,
    pub panic: bool,
}

impl RecordingListener {
    pub fn new(name: &str, journal: &Arc<Mutex<Vec<(String, Event)>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: Arc::clone(journal),
            fail: false,
            panic: false,
        })
    }

    pub fn failing(name: &str, journal: &Arc<Mutex<Vec<(String, Event)>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: Arc::clone(journal),
            fail: true,
            panic: false,
        })
    }

    pub fn panicking(name: &str, journal: &Arc<Mutex<Vec<(String, Event)>>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: Arc::clone(journal),
            fail: false,
            panic: true,
        })
    }
}

impl Listener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<(), ListenerError>> {
        async move {
            assert!(!self.panic, "listener {} exploded", self.name);
            if self.fail {
                return Err(ListenerError::new(&self.name, "refused"));
            }
            self.journal
                .lock()
                .unwrap()
                .push((self.name.clone(), event.clone()));
            Ok(())
        }
        .boxed()
    }
}

#[derive(Default)]
pub struct InMemoryScheduleRepository {
    pub schedules: Mutex<Vec<Schedule>>,
    pub fail_saves: AtomicBool,
}

impl ScheduleRepository for InMemoryScheduleRepository {
    fn get_all(&self) -> impl Future<Output = Result<Vec<Schedule>, CcuError>> + Send {
        let all = self.schedules.lock().unwrap().clone();
        async { Ok(all) }
    }

    fn save(&self, schedule: Schedule) -> impl Future<Output = Result<Schedule, CcuError>> + Send {
        let result = if self.fail_saves.load(Ordering::SeqCst) {
            Err(CcuError::Storage("disk full".into()))
        } else {
            let mut all = self.schedules.lock().unwrap();
            all.retain(|s| s.id != schedule.id);
            all.push(schedule.clone());
            Ok(schedule)
        };
        async { result }
    }

    fn delete(&self, id: ScheduleId) -> impl Future<Output = Result<(), CcuError>> + Send {
        let mut all = self.schedules.lock().unwrap();
        let before = all.len();
        all.retain(|s| s.id != id);
        let result = if all.len() == before {
            Err(NotFoundError {
                entity: "Schedule",
                id: id.to_string(),
            }
            .into())
        } else {
            Ok(())
        };
        drop(all);
        async { result }
    }
}

/// Executor that records actions and can be held mid-execution.
#[derive(Default)]
pub struct ScriptedExecutor {
    pub executed: Mutex<Vec<ScheduleAction>>,
    pub fail: AtomicBool,
    /// When set, every execution waits for [`release`](Self::release).
    pub gated: AtomicBool,
    pub started: Notify,
    release: Notify,
}

impl ScriptedExecutor {
    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl ActionExecutor for ScriptedExecutor {
    fn execute(&self, action: &ScheduleAction) -> impl Future<Output = Result<(), CcuError>> + Send {
        let action = action.clone();
        async move {
            self.executed.lock().unwrap().push(action);
            if self.gated.load(Ordering::SeqCst) {
                self.started.notify_one();
                self.release.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                Err(RemoteError::from_fault(-7, "update failed").into())
            } else {
                Ok(())
            }
        }
    }
}
