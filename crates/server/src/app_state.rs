use std::{sync::Arc, time::Duration};

use crate::hub::SessionHub;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) hub: Arc<SessionHub>,
    pub(crate) resync_interval: Option<Duration>,
}
