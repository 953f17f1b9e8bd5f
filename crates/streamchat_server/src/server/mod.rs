#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod connection;
pub mod dispatch;
pub mod drawing;
pub mod emotes;
pub mod health;
pub mod hub;
pub mod poller;
pub mod presence;
pub mod registry;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;


#[cfg(test)]
mod dispatch_tests;


#[cfg(test)]
mod poller_tests;

#[cfg(test)]
mod presence_tests;
