use std::sync::Arc;

use relay_core::RelayService;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) relay: Arc<RelayService>,
    pub(crate) docs_url: String,
}
