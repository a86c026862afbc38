//! Cross-cutting utilities: filesystem helpers shared by the fetchers,
//! builders, and the flag tracker.

pub mod fs;
