//! HTTP front end for the follow-up agent.
//!
//! `POST /api/followup`, `GET /api/health` and `GET /api/test-followup` on a single port.

mod protocol;
#[allow(clippy::module_inception)]
mod server;

pub use protocol::{ErrorBody, FollowUpParams, FollowUpReply};
pub use server::{build_session_store, router, run_server, AppState};
