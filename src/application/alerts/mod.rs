// Notification of durably stored records
pub mod alert_dispatcher;

pub use alert_dispatcher::{AlertDispatcher, AlertQueue};
