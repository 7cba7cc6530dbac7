//! HTTP front end of the content admin panel.
//!
//! Every destructive bucket operation passes through the collaborator gate in
//! [`auth`] before it reaches the object store; repository edits forward the
//! caller's credential to the repository host, which enforces its own
//! permissions.

pub mod auth;
pub mod files;
pub mod server;
pub mod telemetry;

mod documents;
mod site;
