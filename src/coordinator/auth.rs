//! Agent authentication extractor.
//!
//! Grounded on `CheckAgentAccessKey` in `http.go`: look the agent up by
//! name; if its stored key matches, accept. If no such agent exists and
//! the presented key equals the coordinator's global shared key,
//! auto-register it — but if an agent by that name already exists (its
//! own key just didn't match, e.g. after rotation/revocation), treat the
//! global key as a valid re-auth and refresh its location instead of
//! re-inserting it. Otherwise reject with 403. On every success, refresh
//! the agent's `location`/`last_seen`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use tracing::{info, warn};

use crate::persistence::Persistence;

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Runs the full algorithm named in the protocol, given the already
/// extracted headers. Split out from the `FromRequestParts` impl so the
/// ingest routes can call it directly with their own state handle.
pub async fn authenticate(
    persistence: &dyn Persistence,
    global_key: &str,
    name: &str,
    presented_key: &str,
    location: &str,
) -> Result<(), StatusCode> {
    match persistence.search_agent_access_key(name, presented_key).await {
        Ok(()) => {
            if let Err(err) = persistence.update_agent_location(name, location).await {
                warn!("failed to refresh agent {name}'s location: {err}");
            }
            Ok(())
        }
        Err(_) => {
            if presented_key == global_key {
                if persistence.select_agent(name).await.is_ok() {
                    info!("agent {name} re-authenticated via global key, refreshing location");
                    persistence
                        .update_agent_location(name, location)
                        .await
                        .map_err(|err| {
                            warn!("failed to refresh agent {name}'s location: {err}");
                            StatusCode::INTERNAL_SERVER_ERROR
                        })?;
                } else {
                    info!("auto-registering new agent {name} at {location}");
                    persistence
                        .insert_agent(name, presented_key, location)
                        .await
                        .map_err(|err| {
                            warn!("failed to auto-register agent {name}: {err}");
                            StatusCode::INTERNAL_SERVER_ERROR
                        })?;
                }
                Ok(())
            } else {
                Err(StatusCode::FORBIDDEN)
            }
        }
    }
}

pub struct AgentHeaders {
    pub name: String,
    pub key: String,
    pub location: String,
    pub only_location: bool,
}

impl<S> FromRequestParts<S> for AgentHeaders
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let name = header(parts, "agent-name").ok_or(StatusCode::FORBIDDEN)?;
        let key = header(parts, "agent-key").ok_or(StatusCode::FORBIDDEN)?;
        let location = header(parts, "agent-location").unwrap_or_default();
        let only_location = header(parts, "agent-onlylocation")
            .map(|v| v.eq_ignore_ascii_case("YES"))
            .unwrap_or(false);

        Ok(AgentHeaders {
            name,
            key,
            location,
            only_location,
        })
    }
}
