pub mod redirect;
pub mod request;
pub mod response;
pub mod transaction;

pub use redirect::*;
pub use request::*;
pub use response::*;
pub use transaction::*;
