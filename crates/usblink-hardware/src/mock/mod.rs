//! Mock platform implementations for testing and development.
//!
//! Each mock comes paired with a handle that scripts its behavior and
//! observes the calls it received, so tests can run the enumerator and the
//! communication manager without physical hardware.

pub mod channel;
pub mod enumeration;
pub mod stream;

// Re-export commonly used types
pub use channel::{MockCalls, MockChannel, MockDeviceHandle, MockOpener, WriteBehavior};
pub use enumeration::{
    MockConfigStore, MockDeviceSource, MockInterface, MockInterfaceSet, MockSourceHandle,
};
pub use stream::{LoopbackHandle, LoopbackStream};
