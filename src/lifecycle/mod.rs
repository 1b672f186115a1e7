//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (bridge):
//!     Spawn epoch poller, cache sweeper → tracked by Shutdown
//!
//! Register (confirmation request):
//!     Child token per request → poller spawned on the same tracker
//!
//! Stop (shutdown.rs):
//!     Cancel root token → Wait for every tracked task → Clear registries
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
