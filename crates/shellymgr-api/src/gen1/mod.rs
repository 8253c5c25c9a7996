// Gen1 REST API surface.
//
// First-generation firmware exposes a flat REST-ish API: identification
// at `/shelly`, live state at `/status`, configuration at `/settings`,
// and control via query parameters on the settings endpoints. Protected
// devices use HTTP Basic.

mod client;
mod models;

pub use client::Gen1Client;
pub use models::{
    Gen1Ident, Gen1Login, Gen1Meter, Gen1Relay, Gen1Settings, Gen1Status, Gen1UpdateStatus,
};
