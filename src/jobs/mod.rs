pub mod broker_poll;
pub mod history;
