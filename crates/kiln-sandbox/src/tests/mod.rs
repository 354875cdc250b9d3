//! Unit and behavioural tests for the sandbox policy engine.

mod behaviour;
mod env_guard;
mod unit;
