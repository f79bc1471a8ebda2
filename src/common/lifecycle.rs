//! Setup/destroy state tracking for long-lived components

use crate::common::{Error, Result};

/// Lifecycle state of a component.
///
/// `Destroyed` is terminal: a destroyed component can never be initialized again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Initialized,
    Destroyed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Initialized => write!(f, "initialized"),
            LifecycleState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// State holder shared by components with a `setup()`/`destroy()` pair.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    name: &'static str,
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: LifecycleState::Created,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Fails unless a transition to `Initialized` is allowed from the current state.
    pub fn check_can_initialize(&self) -> Result<()> {
        match self.state {
            LifecycleState::Created => Ok(()),
            LifecycleState::Initialized => Err(Error::Lifecycle(format!(
                "{} is already initialized",
                self.name
            ))),
            LifecycleState::Destroyed => Err(Error::Lifecycle(format!(
                "{} has been destroyed and cannot be re-initialized",
                self.name
            ))),
        }
    }

    pub fn mark_initialized(&mut self) -> Result<()> {
        self.check_can_initialize()?;
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    pub fn mark_destroyed(&mut self) {
        self.state = LifecycleState::Destroyed;
    }

    /// Fails unless the component is ready for use.
    pub fn ensure_initialized(&self) -> Result<()> {
        match self.state {
            LifecycleState::Initialized => Ok(()),
            LifecycleState::Created => Err(Error::Lifecycle(format!(
                "{} has not been initialized yet",
                self.name
            ))),
            LifecycleState::Destroyed => Err(Error::Lifecycle(format!(
                "{} has been destroyed and cannot be used anymore",
                self.name
            ))),
        }
    }
}
