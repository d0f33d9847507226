//! Configuration shared by every isolate a broker creates.

use std::sync::Arc;

use isowire::MarshalRegistry;

use crate::telemetry::NoopTelemetry;
use crate::telemetry::Telemetry;

/// The marshal table and telemetry used on both sides of a worker channel.
///
/// Cloning is cheap; each worker holds its own clone.
#[derive(Clone)]
pub struct IsolateCtx {
    marshal: Arc<MarshalRegistry>,
    telemetry: Arc<dyn Telemetry>,
}

impl IsolateCtx {
    pub fn new(marshal: MarshalRegistry, telemetry: Arc<dyn Telemetry>) -> Self {
        Self {
            marshal: Arc::new(marshal),
            telemetry,
        }
    }

    pub fn marshal(&self) -> &MarshalRegistry {
        &self.marshal
    }

    pub fn telemetry(&self) -> &dyn Telemetry {
        self.telemetry.as_ref()
    }
}

impl Default for IsolateCtx {
    fn default() -> Self {
        Self::new(MarshalRegistry::new(), Arc::new(NoopTelemetry))
    }
}
