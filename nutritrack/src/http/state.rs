use std::sync::Arc;

use crate::routes::RouteTable;
use crate::session::ClientFactory;

#[derive(Debug, Clone)]
pub struct AppState {
    pub clients: Arc<ClientFactory>,
    pub routes: Arc<RouteTable>,
}

impl AppState {
    pub fn new(clients: ClientFactory, routes: RouteTable) -> Self {
        Self {
            clients: Arc::new(clients),
            routes: Arc::new(routes),
        }
    }
}
