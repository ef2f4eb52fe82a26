// crates/mediaport-core/src/lib.rs

pub mod logging;
pub mod properties;
pub mod rational;
pub mod sequence;
pub mod timecode;
pub mod types;

pub use properties::{MediaProperty, PropertyBag, PropertyValue};
pub use rational::Rational;
pub use timecode::TimeCode;
