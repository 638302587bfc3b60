pub mod engine;
pub mod ordering;
pub mod state;
pub mod state_store;
pub mod steps;
pub mod types;
pub mod update_manager;
pub mod versions;

#[cfg(test)]
pub mod testing;
