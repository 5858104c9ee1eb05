//! Presence tracker: turns sensor changes into arrive/leave events.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::FutureExt;
use futures::future::BoxFuture;

use ccuhub_domain::error::{CcuError, ListenerError};
use ccuhub_domain::event::Event;
use ccuhub_domain::presence::{Resident, presence_of};

use crate::ports::{EventLog, Listener};
use crate::sync::lock;

/// Listener deriving `ResidentArrive` / `ResidentLeave` from the configured
/// residents' presence sensors.
///
/// A resident with no known state counts as absent: the first "present"
/// reading produces an arrival, the first "absent" reading only records the
/// state.
pub struct PresenceTracker<L> {
    log: L,
    residents: Vec<Resident>,
    present: Mutex<HashMap<String, bool>>,
}

impl<L: EventLog> PresenceTracker<L> {
    /// # Errors
    ///
    /// Returns a validation error when a resident is malformed.
    pub fn new(log: L, residents: Vec<Resident>) -> Result<Self, CcuError> {
        for resident in &residents {
            resident.validate()?;
        }
        Ok(Self {
            log,
            residents,
            present: Mutex::new(HashMap::new()),
        })
    }

    /// Restore each resident's last known presence from the log.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Storage`] when the log cannot be read.
    #[tracing::instrument(skip(self))]
    pub async fn restore(&self) -> Result<usize, CcuError> {
        let mut restored = 0;
        for resident in &self.residents {
            let Some(last) = self.log.latest_for_source(&resident.name).await? else {
                continue;
            };
            if let Some(present) = presence_of(&last) {
                lock(&self.present).insert(resident.name.clone(), present);
                restored += 1;
            }
        }
        tracing::info!(restored, residents = self.residents.len(), "presence restored");
        Ok(restored)
    }

    #[must_use]
    pub fn is_present(&self, name: &str) -> bool {
        lock(&self.present).get(name).copied().unwrap_or(false)
    }

    /// Names of present residents, in configuration order.
    #[must_use]
    pub fn present_residents(&self) -> Vec<String> {
        let present = lock(&self.present);
        self.residents
            .iter()
            .filter(|r| present.get(&r.name).copied().unwrap_or(false))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Feed one event; returns the arrive/leave events it produced.
    ///
    /// # Errors
    ///
    /// Returns [`CcuError::Storage`] when a derived event cannot be logged.
    /// The resident's state is only updated after a successful append.
    pub async fn observe(&self, event: &Event) -> Result<Vec<Event>, CcuError> {
        let mut derived = Vec::new();
        for resident in &self.residents {
            let Some(now_present) = resident.presence_from(event) else {
                continue;
            };
            let was_present = lock(&self.present).get(&resident.name).copied();
            match was_present {
                Some(prev) if prev == now_present => continue,
                None if !now_present => {
                    lock(&self.present).insert(resident.name.clone(), false);
                    continue;
                }
                _ => {}
            }

            let change = Event::presence(
                resident.name.clone(),
                now_present,
                Some(event.source.as_str()),
                event.timestamp,
            );
            self.log.append(change.clone()).await?;
            lock(&self.present).insert(resident.name.clone(), now_present);
            tracing::info!(
                resident = %resident.name,
                present = now_present,
                "presence changed"
            );
            derived.push(change);
        }
        Ok(derived)
    }
}

impl<L: EventLog> Listener for PresenceTracker<L> {
    fn name(&self) -> &str {
        "presence"
    }

    fn handle<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<(), ListenerError>> {
        async move {
            self.observe(event)
                .await
                .map(|_| ())
                .map_err(|err| ListenerError::from_ccu("presence", err))
        }
        .boxed()
    }
}
