//! Request authentication: the path ACL and the SSO JWT authenticator

mod access;
mod iam;

pub use access::AccessController;
pub use iam::{Iam, User};
