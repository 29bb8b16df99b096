pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::{StubBackend, StubGate, StubLoader, StubScript};

#[cfg(feature = "backend-tract")]
pub use tract::{TractBackend, TractLoader, TractStrategy};
