pub mod amount;
pub mod csv;
pub mod engine;
pub mod ledger;
pub mod memory;
pub mod model;
pub mod notify;
pub mod roundup;
pub mod settings;
pub mod store;

pub use amount::Money;
pub use engine::{Engine, EngineError};
pub use model::{
    Allocation, AllocationResult, AllocationStatus, CharityGoal, DonationMode, Purchase,
    PurchaseEvent,
};
pub use roundup::{calculate_roundup, calculate_total_roundup};
