//! Pure position arithmetic for ordered membership.
//!
//! Nothing here touches storage; the step size is always passed in.

pub mod position;
