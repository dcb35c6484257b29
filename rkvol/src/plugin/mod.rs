//! Docker volume plugin transport.
//!
//! Docker talks to the plugin with JSON `POST` requests over HTTP on a Unix
//! socket.  [`protocol`] holds the wire types, [`handler`] maps each
//! endpoint onto a [`libvolume::VolumeDriver`] call, and [`server`] runs the
//! `hyper` server.

pub mod handler;
pub mod protocol;
pub mod server;

pub use server::serve;
