//! Role-based delivery routing (the blocking presentation controller).
//!
//! Decides once per identity whether incoming notices are queued for the
//! blocking acknowledgment surface, only refresh the cached message lists,
//! or are ignored.

use tracing::{info, info_span};

use crate::models::user::{Role, SessionUser};

/// What a session does with an incoming notice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryRoute {
    /// Admit into the priority queue and present blocking.
    Queue,
    /// Invalidate cached message-list views; no modal.
    Refresh,
    /// Take no action.
    #[default]
    Ignore,
}

impl DeliveryRoute {
    /// Lowercase label used in logs and snapshots.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Refresh => "refresh",
            Self::Ignore => "ignore",
        }
    }
}

/// Single lookup from role to route.
pub struct RoutePolicy;

impl RoutePolicy {
    /// Route for an authenticated role, or for no user at all.
    #[must_use]
    pub fn route_for(role: Option<&Role>) -> DeliveryRoute {
        match role {
            Some(Role::Manager | Role::Counsellor) => DeliveryRoute::Queue,
            Some(Role::Superadmin | Role::Director) => DeliveryRoute::Refresh,
            Some(Role::Other(_)) | None => DeliveryRoute::Ignore,
        }
    }

    /// Whether the realtime listener should subscribe for this role.
    #[must_use]
    pub fn subscribes(role: Option<&Role>) -> bool {
        Self::route_for(role) != DeliveryRoute::Ignore
    }
}

/// Holds the current identity and the route derived from it.
#[derive(Debug, Default)]
pub struct PresentationController {
    user: Option<SessionUser>,
    route: DeliveryRoute,
}

impl PresentationController {
    /// Replace the identity and re-evaluate the route.
    ///
    /// Returns `true` when the identity (id or role) actually changed.
    pub fn set_user(&mut self, user: Option<SessionUser>) -> bool {
        let changed = match (&self.user, &user) {
            (Some(old), Some(new)) => old.id != new.id || old.role != new.role,
            (None, None) => false,
            _ => true,
        };

        let route = RoutePolicy::route_for(user.as_ref().map(|u| &u.role));
        let _span = info_span!("route_evaluate", route = route.as_str()).entered();
        if changed {
            info!(
                user_id = user.as_ref().map_or("-", |u| u.id.as_str()),
                role = user.as_ref().map_or("-", |u| u.role.as_str()),
                "session identity changed"
            );
        }

        self.user = user;
        self.route = route;
        changed
    }

    /// Current route.
    #[must_use]
    pub fn route(&self) -> DeliveryRoute {
        self.route
    }

    /// Whether the blocking modal path is active.
    #[must_use]
    pub fn blocking_enabled(&self) -> bool {
        self.route == DeliveryRoute::Queue
    }
}
