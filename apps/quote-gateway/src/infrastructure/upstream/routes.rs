//! Per-session route table.
//!
//! A provider session accepts a limited number of registrations. Routes past
//! the limit are parked in arrival order and promoted as live routes leave.

use std::collections::{HashSet, VecDeque};

use crate::domain::subscription::UpstreamCommand;
use crate::domain::symbol::Route;

/// Live and parked routes for one upstream session.
#[derive(Debug)]
pub struct RouteTable {
    limit: usize,
    live: Vec<Route>,
    live_set: HashSet<Route>,
    parked: VecDeque<Route>,
}

impl RouteTable {
    /// Create a table admitting at most `limit` live routes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            live: Vec::new(),
            live_set: HashSet::new(),
            parked: VecDeque::new(),
        }
    }

    /// Apply a registry command; returns what to send upstream, in order.
    pub fn apply(&mut self, command: UpstreamCommand) -> Vec<UpstreamCommand> {
        match command {
            UpstreamCommand::Subscribe(route) => self
                .admit(route)
                .map(UpstreamCommand::Subscribe)
                .into_iter()
                .collect(),
            UpstreamCommand::Unsubscribe(route) => self.evict(&route),
        }
    }

    /// Replace the table with `routes`; returns the routes to register.
    pub fn reset<I>(&mut self, routes: I) -> Vec<Route>
    where
        I: IntoIterator<Item = Route>,
    {
        self.live.clear();
        self.live_set.clear();
        self.parked.clear();
        routes.into_iter().filter_map(|route| self.admit(route)).collect()
    }

    /// Routes registered on the session, oldest first.
    #[must_use]
    pub fn live(&self) -> &[Route] {
        &self.live
    }

    /// Number of parked routes.
    #[must_use]
    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    fn admit(&mut self, route: Route) -> Option<Route> {
        if self.live_set.contains(&route) || self.parked.contains(&route) {
            return None;
        }
        if self.live.len() >= self.limit {
            tracing::info!(route = %route, limit = self.limit, "Session route limit reached, parking route");
            self.parked.push_back(route);
            return None;
        }
        self.live_set.insert(route.clone());
        self.live.push(route.clone());
        Some(route)
    }

    fn evict(&mut self, route: &Route) -> Vec<UpstreamCommand> {
        if self.live_set.remove(route) {
            self.live.retain(|r| r != route);
            let mut out = vec![UpstreamCommand::Unsubscribe(route.clone())];
            if let Some(next) = self.parked.pop_front() {
                self.live_set.insert(next.clone());
                self.live.push(next.clone());
                out.push(UpstreamCommand::Subscribe(next));
            }
            out
        } else {
            self.parked.retain(|r| r != route);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(key: &str) -> Route {
        Route::new("H0STCNT0", key)
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut table = RouteTable::new(5);
        assert_eq!(table.apply(UpstreamCommand::Subscribe(r("1"))).len(), 1);
        assert!(table.apply(UpstreamCommand::Subscribe(r("1"))).is_empty());
    }

    #[test]
    fn overflow_parks_and_promotes_in_order() {
        let mut table = RouteTable::new(2);
        table.apply(UpstreamCommand::Subscribe(r("1")));
        table.apply(UpstreamCommand::Subscribe(r("2")));
        assert!(table.apply(UpstreamCommand::Subscribe(r("3"))).is_empty());
        assert!(table.apply(UpstreamCommand::Subscribe(r("4"))).is_empty());
        assert_eq!(table.parked_len(), 2);

        let out = table.apply(UpstreamCommand::Unsubscribe(r("1")));
        assert_eq!(
            out,
            vec![
                UpstreamCommand::Unsubscribe(r("1")),
                UpstreamCommand::Subscribe(r("3")),
            ]
        );
        assert_eq!(table.live(), &[r("2"), r("3")]);
    }

    #[test]
    fn unsubscribing_parked_route_sends_nothing() {
        let mut table = RouteTable::new(1);
        table.apply(UpstreamCommand::Subscribe(r("1")));
        table.apply(UpstreamCommand::Subscribe(r("2")));
        assert!(table.apply(UpstreamCommand::Unsubscribe(r("2"))).is_empty());
        assert_eq!(table.parked_len(), 0);
    }

    #[test]
    fn unsubscribing_unknown_route_sends_nothing() {
        let mut table = RouteTable::new(1);
        assert!(table.apply(UpstreamCommand::Unsubscribe(r("9"))).is_empty());
    }

    #[test]
    fn reset_replays_up_to_limit() {
        let mut table = RouteTable::new(2);
        table.apply(UpstreamCommand::Subscribe(r("old")));

        let replay = table.reset(vec![r("1"), r("2"), r("3")]);
        assert_eq!(replay, vec![r("1"), r("2")]);
        assert_eq!(table.parked_len(), 1);
        assert!(!table.live().contains(&r("old")));
    }
}
