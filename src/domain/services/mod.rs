mod controller;
mod conversation;
mod reducer;
mod sessions;

pub use controller::*;
pub use conversation::*;
pub use reducer::*;
pub use sessions::*;
