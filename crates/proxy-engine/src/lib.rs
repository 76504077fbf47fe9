//! The async session state machines that drive one accepted connection
//! end to end: the downstream (client-facing) half, the upstream
//! (origin-facing) half, and the pair coordinator that owns both and
//! drives the lifecycle.

pub mod downstream;
pub mod pair;
pub mod stream;
pub mod upstream;

pub use pair::{run_pair, PairConfig};
pub use stream::BoxedStream;
