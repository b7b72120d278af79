use std::collections::HashMap;

use tokio::sync::watch;

/// Navigation parameters, e.g. `id -> "7"`.
pub type RouteParams = HashMap<String, String>;

/// Push source for route parameters. Every `navigate` replaces the full
/// parameter map and wakes all subscribers.
pub struct RouteParamsSource {
    sender: watch::Sender<RouteParams>,
}

impl RouteParamsSource {
    pub fn new() -> Self {
        Self {
            sender: watch::channel(RouteParams::new()).0,
        }
    }

    pub fn navigate(&self, params: RouteParams) {
        self.sender.send_replace(params);
    }

    pub fn navigate_to_id(&self, id: i64) {
        let mut params = RouteParams::new();
        params.insert("id".to_string(), id.to_string());
        self.navigate(params);
    }

    pub fn subscribe(&self) -> watch::Receiver<RouteParams> {
        self.sender.subscribe()
    }
}

impl Default for RouteParamsSource {
    fn default() -> Self {
        Self::new()
    }
}
