pub mod close;
pub mod frame;
pub mod packet_buffer;
pub mod ping;
pub mod types;

pub use close::*;
pub use frame::*;
pub use packet_buffer::*;
pub use ping::*;
pub use types::*;
