//! Connection lifecycle state machine and reconnect policy.
//!
//! `LifecycleMachine` is a pure transition function over
//! [`ConnectionState`]; the transport driver feeds it inputs and acts on
//! the resulting state. Keeping it free of I/O lets every path through the
//! lifecycle be tested without a socket or a clock.

use callrelay_core::ConnectionState;
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Bounded exponential backoff with symmetric jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any delay before jitter.
    pub max_delay: Duration,
    /// Retries allowed since the last successful handshake.
    pub max_attempts: u32,
    /// Jitter as a fraction of the delay, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter: 0.2,
        }
    }
}

impl ReconnectPolicy {
    /// Returns the un-jittered delay before retry `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max)`.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1u32 << exponent;
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    /// Returns the delay before retry `attempt` with jitter applied.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let delay = self.backoff_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }

        let factor = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(factor)
    }
}

/// Something that happened to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleInput {
    /// The first connection attempt starts.
    Connect,
    /// The backoff delay elapsed.
    RetryDue,
    HandshakeSucceeded,
    ConnectFailed,
    /// Unclean close, I/O error, or liveness deadline exceeded.
    ConnectionLost,
    /// The upstream ended the session, or closed cleanly.
    SessionEnded,
    /// The owner asked for a graceful close.
    CloseRequested,
}

/// What the driver must do after a connection error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then feed [`LifecycleInput::RetryDue`].
    Retry { attempt: u32, delay: Duration },
    /// The budget is exhausted; the machine is now `failed`.
    GiveUp { attempts: u32 },
}

/// An input that is not valid in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub input: LifecycleInput,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} is not valid in state {}", self.input, self.from)
    }
}

impl std::error::Error for InvalidTransition {}

/// Connection lifecycle for one transport.
#[derive(Debug, Clone)]
pub struct LifecycleMachine {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl LifecycleMachine {
    /// Creates a machine in `disconnected`.
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            policy,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Retries scheduled since the last successful handshake.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Applies an input and returns the new state.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the input is not valid in the
    /// current state. The state is left unchanged.
    pub fn apply(&mut self, input: LifecycleInput) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState as S;
        use LifecycleInput as I;

        let next = match (self.state, input) {
            (S::Disconnected, I::Connect) | (S::Reconnecting, I::RetryDue) => S::Connecting,
            (S::Connecting, I::HandshakeSucceeded) => {
                self.attempts = 0;
                S::Connected
            }
            (S::Connecting, I::ConnectFailed) | (S::Connected, I::ConnectionLost) => S::Errored,
            (S::Connected, I::SessionEnded) => S::Ended,
            (from, I::CloseRequested) if !from.is_terminal() => S::Ended,
            (from, input) => return Err(InvalidTransition { from, input }),
        };

        self.state = next;
        Ok(next)
    }

    /// Decides what follows an error: another attempt after a backoff, or
    /// `failed` once the budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] unless the machine is `errored`.
    pub fn schedule_retry(&mut self, rng: &mut impl Rng) -> Result<RetryDecision, InvalidTransition> {
        if self.state != ConnectionState::Errored {
            return Err(InvalidTransition {
                from: self.state,
                input: LifecycleInput::ConnectionLost,
            });
        }

        if self.attempts >= self.policy.max_attempts {
            self.state = ConnectionState::Failed;
            return Ok(RetryDecision::GiveUp {
                attempts: self.attempts,
            });
        }

        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        Ok(RetryDecision::Retry {
            attempt: self.attempts,
            delay: self.policy.delay_for_attempt(self.attempts, rng),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn policy(jitter: f64) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            jitter,
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = policy(0.0);
        assert_eq!(policy.backoff_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.backoff_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for_attempt(5), Duration::from_secs(16));
        assert_eq!(policy.backoff_for_attempt(6), Duration::from_secs(30));
        assert_eq!(policy.backoff_for_attempt(40), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = policy(0.2);
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 1..=5 {
            let nominal = policy.backoff_for_attempt(attempt);
            let delay = policy.delay_for_attempt(attempt, &mut rng);
            assert!(delay >= nominal.mul_f64(0.8), "attempt {attempt}: {delay:?}");
            assert!(delay <= nominal.mul_f64(1.2), "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn happy_path() {
        let mut machine = LifecycleMachine::new(policy(0.0));
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(
            machine.apply(LifecycleInput::Connect),
            Ok(ConnectionState::Connecting)
        );
        assert_eq!(
            machine.apply(LifecycleInput::HandshakeSucceeded),
            Ok(ConnectionState::Connected)
        );
        assert_eq!(
            machine.apply(LifecycleInput::SessionEnded),
            Ok(ConnectionState::Ended)
        );
    }

    #[test]
    fn retries_until_budget_then_fails() {
        let mut machine = LifecycleMachine::new(policy(0.0));
        let mut rng = StdRng::seed_from_u64(1);
        machine.apply(LifecycleInput::Connect).unwrap();
        machine.apply(LifecycleInput::HandshakeSucceeded).unwrap();
        machine.apply(LifecycleInput::ConnectionLost).unwrap();

        let mut delays = Vec::new();
        loop {
            match machine.schedule_retry(&mut rng).unwrap() {
                RetryDecision::Retry { delay, .. } => {
                    delays.push(delay.as_secs());
                    assert_eq!(machine.state(), ConnectionState::Reconnecting);
                    machine.apply(LifecycleInput::RetryDue).unwrap();
                    machine.apply(LifecycleInput::ConnectFailed).unwrap();
                }
                RetryDecision::GiveUp { attempts } => {
                    assert_eq!(attempts, 5);
                    break;
                }
            }
        }

        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert_eq!(machine.state(), ConnectionState::Failed);
    }

    #[test]
    fn successful_handshake_resets_budget() {
        let mut machine = LifecycleMachine::new(policy(0.0));
        let mut rng = StdRng::seed_from_u64(1);
        machine.apply(LifecycleInput::Connect).unwrap();
        machine.apply(LifecycleInput::ConnectFailed).unwrap();
        machine.schedule_retry(&mut rng).unwrap();
        machine.apply(LifecycleInput::RetryDue).unwrap();
        machine.apply(LifecycleInput::ConnectFailed).unwrap();
        machine.schedule_retry(&mut rng).unwrap();
        assert_eq!(machine.attempts(), 2);

        machine.apply(LifecycleInput::RetryDue).unwrap();
        machine.apply(LifecycleInput::HandshakeSucceeded).unwrap();
        assert_eq!(machine.attempts(), 0);

        machine.apply(LifecycleInput::ConnectionLost).unwrap();
        assert_eq!(
            machine.schedule_retry(&mut rng).unwrap(),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn close_is_valid_from_any_live_state() {
        let mut machine = LifecycleMachine::new(policy(0.0));
        let mut rng = StdRng::seed_from_u64(1);
        machine.apply(LifecycleInput::Connect).unwrap();
        machine.apply(LifecycleInput::ConnectFailed).unwrap();
        machine.schedule_retry(&mut rng).unwrap();

        assert_eq!(
            machine.apply(LifecycleInput::CloseRequested),
            Ok(ConnectionState::Ended)
        );
    }

    #[test]
    fn terminal_states_reject_everything() {
        let mut machine = LifecycleMachine::new(policy(0.0));
        machine.apply(LifecycleInput::CloseRequested).unwrap();

        for input in [
            LifecycleInput::Connect,
            LifecycleInput::RetryDue,
            LifecycleInput::HandshakeSucceeded,
            LifecycleInput::CloseRequested,
        ] {
            let err = machine.apply(input).unwrap_err();
            assert_eq!(err.from, ConnectionState::Ended);
        }
        assert!(machine.schedule_retry(&mut StdRng::seed_from_u64(1)).is_err());
    }

    #[test]
    fn data_arrival_requires_connected() {
        let mut machine = LifecycleMachine::new(policy(0.0));
        assert!(machine.apply(LifecycleInput::HandshakeSucceeded).is_err());
        assert!(machine.apply(LifecycleInput::SessionEnded).is_err());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }
}
