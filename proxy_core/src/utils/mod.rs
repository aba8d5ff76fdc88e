pub mod logging;
pub(crate) mod sync;
