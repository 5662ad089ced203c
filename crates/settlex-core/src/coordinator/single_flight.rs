//! One in-flight ingestion per trading date.

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use super::IngestError;
use crate::domain::{IngestionResult, TradingDate};

type Outcome = Result<IngestionResult, IngestError>;

/// What a second caller for the same trading date gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleFlightPolicy {
    /// Wait for the running ingestion and share its result.
    #[default]
    Join,
    /// Fail fast with `ConcurrentIngestionInProgress`.
    Reject,
}

impl FromStr for SingleFlightPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "join" => Ok(Self::Join),
            "reject" => Ok(Self::Reject),
            other => Err(format!("expected join or reject, got '{other}'")),
        }
    }
}

/// Registry of running ingestions keyed by trading date.
#[derive(Debug, Default)]
pub struct SingleFlight {
    inflight: Mutex<HashMap<TradingDate, watch::Receiver<Option<Outcome>>>>,
}

enum Role {
    Leader(watch::Sender<Option<Outcome>>),
    Follower(watch::Receiver<Option<Outcome>>),
}

/// Clears the registry entry even if the leader is dropped mid-flight.
struct FlightGuard<'a> {
    flights: &'a SingleFlight,
    trading_date: TradingDate,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flights.lock().remove(&self.trading_date);
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an ingestion for `trading_date` is running.
    pub fn is_running(&self, trading_date: TradingDate) -> bool {
        self.lock().contains_key(&trading_date)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TradingDate, watch::Receiver<Option<Outcome>>>> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `work` unless an ingestion for `trading_date` is already running.
    ///
    /// The first caller leads and runs `work`; later callers either join the
    /// leader's result or are rejected, per `policy`. If the leader is dropped
    /// before finishing, joined callers get `ConcurrentIngestionInProgress`.
    pub async fn run<F>(
        &self,
        trading_date: TradingDate,
        policy: SingleFlightPolicy,
        work: F,
    ) -> Outcome
    where
        F: Future<Output = Outcome>,
    {
        let role = {
            let mut inflight = self.lock();
            match inflight.get(&trading_date) {
                Some(_) if policy == SingleFlightPolicy::Reject => {
                    return Err(IngestError::ConcurrentIngestionInProgress { trading_date });
                }
                Some(receiver) => Role::Follower(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    inflight.insert(trading_date, receiver);
                    Role::Leader(sender)
                }
            }
        };

        match role {
            Role::Leader(sender) => {
                let _guard = FlightGuard {
                    flights: self,
                    trading_date,
                };
                let outcome = work.await;
                sender.send_replace(Some(outcome.clone()));
                outcome
            }
            Role::Follower(mut receiver) => {
                debug!(%trading_date, "joining in-flight ingestion");
                loop {
                    let current = receiver.borrow_and_update().clone();
                    if let Some(outcome) = current {
                        return outcome;
                    }
                    if receiver.changed().await.is_err() {
                        let last = receiver.borrow().clone();
                        return last.unwrap_or(Err(IngestError::ConcurrentIngestionInProgress {
                            trading_date,
                        }));
                    }
                }
            }
        }
    }
}
