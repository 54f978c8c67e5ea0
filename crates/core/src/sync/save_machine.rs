//! Save attempt state machine behind the sync scheduler.
//!
//! The machine is a plain value: the driver feeds it ticks and save results
//! and acts on the decisions it returns. Exactly one save is in flight while
//! the state is [`SaveState::Saving`]; ticks that arrive meanwhile are
//! coalesced rather than queued.

use serde::{Deserialize, Serialize};

use super::{GameSnapshot, CIRCUIT_BREAKER_THRESHOLD};

/// Lifecycle of the current save attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    Idle,
    Saving,
    RetryPending,
    CircuitOpen,
}

/// What the driver should do after a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickDecision {
    /// Send `payload` to the server. `is_retry` is set when the payload is the
    /// one retained from a failed attempt rather than a fresh snapshot.
    Dispatch {
        payload: GameSnapshot,
        is_retry: bool,
    },
    /// A save is already in flight; this tick was folded into it.
    Coalesced,
    /// The snapshot provider had nothing to save yet.
    NotReady,
    /// The circuit is open; nothing is sent until a manual retry.
    CircuitOpen,
}

/// Result of applying a finished save to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The save landed. `recovered` is set when earlier failures were cleared.
    Saved {
        recovered: bool,
        coalesced_ticks: u32,
    },
    /// The save failed below the threshold; the payload is kept for the next tick.
    RetryScheduled { consecutive_failures: u32 },
    /// The save failed and the threshold was reached.
    CircuitOpened { consecutive_failures: u32 },
    /// No save was in flight, so the result was discarded.
    Ignored,
}

/// Read-only view of the machine for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStatus {
    pub state: SaveState,
    pub consecutive_failures: u32,
    pub has_pending_payload: bool,
    pub coalesced_ticks: u32,
}

#[derive(Debug, Clone)]
pub struct SaveMachine {
    state: SaveState,
    payload: Option<GameSnapshot>,
    consecutive_failures: u32,
    coalesced_ticks: u32,
    circuit_tripped: bool,
    threshold: u32,
}

impl Default for SaveMachine {
    fn default() -> Self {
        Self::new(CIRCUIT_BREAKER_THRESHOLD)
    }
}

impl SaveMachine {
    /// Create an idle machine that opens the circuit after `threshold`
    /// consecutive failures (at least one).
    pub fn new(threshold: u32) -> Self {
        Self {
            state: SaveState::Idle,
            payload: None,
            consecutive_failures: 0,
            coalesced_ticks: 0,
            circuit_tripped: false,
            threshold: threshold.max(1),
        }
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Payload retained for the in-flight or pending retry attempt.
    pub fn payload(&self) -> Option<&GameSnapshot> {
        self.payload.as_ref()
    }

    pub fn status(&self) -> SaveStatus {
        SaveStatus {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            has_pending_payload: self.payload.is_some(),
            coalesced_ticks: self.coalesced_ticks,
        }
    }

    /// Advance the machine by one tick.
    ///
    /// `snapshot` is only called from `Idle`; a pending retry always resends
    /// the retained payload.
    pub fn on_tick<F>(&mut self, snapshot: F) -> TickDecision
    where
        F: FnOnce() -> Option<GameSnapshot>,
    {
        match self.state {
            SaveState::CircuitOpen => TickDecision::CircuitOpen,
            SaveState::Saving => {
                self.coalesced_ticks = self.coalesced_ticks.saturating_add(1);
                TickDecision::Coalesced
            }
            SaveState::RetryPending => match self.payload.clone() {
                Some(payload) => {
                    self.begin_saving();
                    TickDecision::Dispatch {
                        payload,
                        is_retry: true,
                    }
                }
                None => {
                    // Nothing retained; fall back to a fresh attempt.
                    self.state = SaveState::Idle;
                    self.dispatch_fresh(snapshot)
                }
            },
            SaveState::Idle => self.dispatch_fresh(snapshot),
        }
    }

    /// Apply the result of the in-flight save.
    pub fn on_save_result(&mut self, succeeded: bool) -> SaveOutcome {
        if self.state != SaveState::Saving {
            return SaveOutcome::Ignored;
        }

        let coalesced_ticks = std::mem::take(&mut self.coalesced_ticks);
        if succeeded {
            let recovered = self.consecutive_failures > 0 || self.circuit_tripped;
            self.consecutive_failures = 0;
            self.circuit_tripped = false;
            self.payload = None;
            self.state = SaveState::Idle;
            return SaveOutcome::Saved {
                recovered,
                coalesced_ticks,
            };
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures >= self.threshold {
            self.state = SaveState::CircuitOpen;
            self.circuit_tripped = true;
            SaveOutcome::CircuitOpened {
                consecutive_failures: self.consecutive_failures,
            }
        } else {
            self.state = SaveState::RetryPending;
            SaveOutcome::RetryScheduled {
                consecutive_failures: self.consecutive_failures,
            }
        }
    }

    /// The in-flight save did not reach the server for a reason that is not a
    /// delivery failure. The payload is kept and the failure count is untouched.
    pub fn on_save_deferred(&mut self) -> bool {
        if self.state != SaveState::Saving {
            return false;
        }
        self.coalesced_ticks = 0;
        self.state = SaveState::RetryPending;
        true
    }

    /// Start a save of `payload` outside the tick cadence.
    ///
    /// Refused while a save is in flight or the circuit is open. A retained
    /// retry payload is superseded by the newer one.
    pub fn begin_manual(&mut self, payload: GameSnapshot) -> bool {
        match self.state {
            SaveState::Idle | SaveState::RetryPending => {
                self.payload = Some(payload);
                self.begin_saving();
                true
            }
            SaveState::Saving | SaveState::CircuitOpen => false,
        }
    }

    /// Manual retry: close the circuit and drop the retained payload.
    ///
    /// Returns `false` (and changes nothing) unless the circuit is open.
    pub fn reset(&mut self) -> bool {
        if self.state != SaveState::CircuitOpen {
            return false;
        }
        self.consecutive_failures = 0;
        self.payload = None;
        self.coalesced_ticks = 0;
        self.state = SaveState::Idle;
        true
    }

    fn dispatch_fresh<F>(&mut self, snapshot: F) -> TickDecision
    where
        F: FnOnce() -> Option<GameSnapshot>,
    {
        match snapshot() {
            Some(payload) => {
                self.payload = Some(payload.clone());
                self.begin_saving();
                TickDecision::Dispatch {
                    payload,
                    is_retry: false,
                }
            }
            None => TickDecision::NotReady,
        }
    }

    fn begin_saving(&mut self) {
        self.state = SaveState::Saving;
        self.coalesced_ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::PlayerInfo;

    fn snapshot(money: f64) -> GameSnapshot {
        GameSnapshot {
            player_info: PlayerInfo {
                money,
                ..PlayerInfo::default()
            },
            ..GameSnapshot::default()
        }
    }

    fn dispatched_money(decision: TickDecision) -> (f64, bool) {
        match decision {
            TickDecision::Dispatch { payload, is_retry } => (payload.player_info.money, is_retry),
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[test]
    fn idle_tick_without_snapshot_stays_idle() {
        let mut machine = SaveMachine::default();
        assert_eq!(machine.on_tick(|| None), TickDecision::NotReady);
        assert_eq!(machine.state(), SaveState::Idle);
    }

    #[test]
    fn ticks_while_saving_are_coalesced_without_reading_state() {
        let mut machine = SaveMachine::default();
        dispatched_money(machine.on_tick(|| Some(snapshot(1.0))));

        for _ in 0..5 {
            let decision = machine.on_tick(|| panic!("provider must not be called while saving"));
            assert_eq!(decision, TickDecision::Coalesced);
        }
        assert_eq!(machine.status().coalesced_ticks, 5);

        assert_eq!(
            machine.on_save_result(true),
            SaveOutcome::Saved {
                recovered: false,
                coalesced_ticks: 5
            }
        );
        assert_eq!(machine.status().coalesced_ticks, 0);
    }

    #[test]
    fn failed_payload_is_retried_instead_of_a_newer_snapshot() {
        let mut machine = SaveMachine::default();
        dispatched_money(machine.on_tick(|| Some(snapshot(10.0))));
        assert_eq!(
            machine.on_save_result(false),
            SaveOutcome::RetryScheduled {
                consecutive_failures: 1
            }
        );

        let (money, is_retry) = dispatched_money(machine.on_tick(|| Some(snapshot(99.0))));
        assert_eq!(money, 10.0);
        assert!(is_retry);
    }

    #[test]
    fn circuit_opens_on_third_consecutive_failure_and_blocks_ticks() {
        let mut machine = SaveMachine::default();
        for attempt in 1..=3 {
            dispatched_money(machine.on_tick(|| Some(snapshot(attempt as f64))));
            let outcome = machine.on_save_result(false);
            if attempt < 3 {
                assert_eq!(
                    outcome,
                    SaveOutcome::RetryScheduled {
                        consecutive_failures: attempt
                    }
                );
            } else {
                assert_eq!(
                    outcome,
                    SaveOutcome::CircuitOpened {
                        consecutive_failures: 3
                    }
                );
            }
        }

        assert_eq!(machine.state(), SaveState::CircuitOpen);
        assert_eq!(
            machine.on_tick(|| Some(snapshot(4.0))),
            TickDecision::CircuitOpen
        );
    }

    #[test]
    fn success_after_failures_reports_recovery_and_resets_counter() {
        let mut machine = SaveMachine::default();
        dispatched_money(machine.on_tick(|| Some(snapshot(1.0))));
        machine.on_save_result(false);
        dispatched_money(machine.on_tick(|| None));

        assert_eq!(
            machine.on_save_result(true),
            SaveOutcome::Saved {
                recovered: true,
                coalesced_ticks: 0
            }
        );
        assert_eq!(machine.consecutive_failures(), 0);
        assert!(machine.payload().is_none());
    }

    #[test]
    fn reset_only_applies_to_open_circuit() {
        let mut machine = SaveMachine::new(1);
        assert!(!machine.reset());

        dispatched_money(machine.on_tick(|| Some(snapshot(5.0))));
        assert_eq!(
            machine.on_save_result(false),
            SaveOutcome::CircuitOpened {
                consecutive_failures: 1
            }
        );

        assert!(machine.reset());
        assert_eq!(machine.state(), SaveState::Idle);
        assert_eq!(machine.consecutive_failures(), 0);
        assert!(machine.payload().is_none());

        let (money, is_retry) = dispatched_money(machine.on_tick(|| Some(snapshot(6.0))));
        assert_eq!(money, 6.0);
        assert!(!is_retry);
        assert_eq!(
            machine.on_save_result(true),
            SaveOutcome::Saved {
                recovered: true,
                coalesced_ticks: 0
            }
        );
    }

    #[test]
    fn deferred_save_keeps_payload_without_counting() {
        let mut machine = SaveMachine::default();
        assert!(!machine.on_save_deferred());

        dispatched_money(machine.on_tick(|| Some(snapshot(7.0))));
        assert!(machine.on_save_deferred());
        assert_eq!(machine.state(), SaveState::RetryPending);
        assert_eq!(machine.consecutive_failures(), 0);

        let (money, is_retry) = dispatched_money(machine.on_tick(|| Some(snapshot(8.0))));
        assert_eq!(money, 7.0);
        assert!(is_retry);
    }

    #[test]
    fn manual_save_is_refused_while_saving_or_open() {
        let mut machine = SaveMachine::new(1);
        assert!(machine.begin_manual(snapshot(1.0)));
        assert_eq!(machine.state(), SaveState::Saving);
        assert!(!machine.begin_manual(snapshot(2.0)));

        machine.on_save_result(false);
        assert_eq!(machine.state(), SaveState::CircuitOpen);
        assert!(!machine.begin_manual(snapshot(3.0)));
    }

    #[test]
    fn stray_result_is_ignored() {
        let mut machine = SaveMachine::default();
        assert_eq!(machine.on_save_result(true), SaveOutcome::Ignored);
        assert_eq!(machine.state(), SaveState::Idle);
    }
}
