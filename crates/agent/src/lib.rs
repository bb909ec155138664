//! The research agent: turn execution and session coordination.
//!
//! A turn follows a **model step → invoke → model step** cycle:
//!
//! 1. **Receive** a user message for a thread
//! 2. **Ask the model** with the thread history and every registered capability
//! 3. **If invocation requests**: run them, append the results, go back to 2
//! 4. **If text**: that is the answer
//!
//! The [`SessionCoordinator`] wraps this for front-ends and turns every
//! failure into a chat message.

pub mod prompt;
pub mod session;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_support;

pub use prompt::DEFAULT_SYSTEM_PROMPT;
pub use session::{InitStatus, NOT_INITIALIZED, SessionCoordinator};
pub use turn::{TurnExecutor, TurnOutcome};
