//! Pure computations: no I/O, no async.

pub mod attendance_history;
pub mod balance;
pub mod ledger;
pub mod money;
