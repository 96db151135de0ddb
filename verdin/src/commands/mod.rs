mod cleanup;
mod target;

pub use cleanup::Cleanup;
pub use target::Target;
