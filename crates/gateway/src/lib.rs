//! HTTP surface: `POST /send-to-all` enters the broadcast coordinator
//! directly, `GET /status` and `GET /health` report on the running bot.

pub mod server;
pub mod state;

pub use {
    server::{SendToAllRequest, build_gateway_app, start_gateway},
    state::GatewayState,
};
