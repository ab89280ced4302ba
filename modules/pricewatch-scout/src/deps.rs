use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::notify::LogNotifier;
use crate::pipeline::vision::VisionClient;
use crate::traits::{Notifier, PageRenderer, ProductStore, VisionAnalyzer};

/// Shared, cloneable dependency container for the coordinator, the
/// scheduler and the refresh service.
#[derive(Clone, TypedBuilder)]
pub struct ScoutDeps {
    pub renderer: Arc<dyn PageRenderer>,
    pub store: Arc<dyn ProductStore>,
    #[builder(default = Arc::new(VisionClient::new()))]
    pub vision: Arc<dyn VisionAnalyzer>,
    #[builder(default = Arc::new(LogNotifier))]
    pub notifier: Arc<dyn Notifier>,
}
