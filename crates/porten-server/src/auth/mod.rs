pub mod password;
pub mod service;
pub mod token;

pub use password::{HashScheme, PasswordContext};
pub use token::{TokenError, TokenService, TokenSubject};
