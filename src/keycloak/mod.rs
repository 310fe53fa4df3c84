//! Keycloak directory client (C5).

pub mod client;
pub mod errors;
pub mod token;

pub use self::{
    client::{KeycloakClient, KeycloakConfig, KeycloakUser},
    errors::KeycloakError,
};
