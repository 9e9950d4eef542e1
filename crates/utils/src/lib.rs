pub mod logging;
pub mod password;
pub mod response;
pub mod token;
