//! Payload encoders: SIA DC-03 (alphanumeric) and SIA DC-05 (Contact ID),
//! plus the shared extra-data block and typed parameter model.

pub mod dc03;
pub mod dc05;
pub mod extra;
pub mod params;

pub use dc03::dc03_event;
pub use dc05::dc05_event;
pub use extra::dc09_extra;
pub use params::{code_class_dc03, dc05_is_user_code, CodeClass, EventType, MessageParams};
