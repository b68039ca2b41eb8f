pub mod appointment;
pub mod common;
pub mod list;
pub mod patient;
pub mod records;
pub mod sos;
pub mod status;
pub mod sync;
