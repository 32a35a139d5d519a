mod sender;

pub use sender::*;
