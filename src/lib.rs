pub mod artifacts;
pub mod cli;
pub mod config;
pub mod diff;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod llm;
pub mod locator;
pub mod orchestrator;
pub mod phases;
pub mod process;
pub mod prompts;
pub mod publisher;
pub mod repo;
pub mod runlock;
pub mod schema;
pub mod verify;

#[cfg(test)]
mod test_helpers;
