pub mod use_approval_queue;
pub mod use_attendance;
pub mod use_attendance_history;
pub mod use_ledger;
pub mod use_periodic_refresh;
