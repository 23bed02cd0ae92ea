use std::time::Duration;

use spacetree::description::EndpointConnection;
use spacetree::registry::MAX_BULK_DEVICES;

const RESOURCE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const REMOVAL_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const EXPORT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const LOOKUP_GROUP_SIZE: usize = 10;
const SPACE_LIMIT: usize = 1000;
const SPACE_WARNING_THRESHOLD: usize = 995;

/// Settings shared by the provisioning, registration, and removal passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionerConfig {
    pub(crate) resource_poll_interval: Duration,
    pub(crate) removal_timeout: Duration,
    pub(crate) export_poll_interval: Duration,
    pub(crate) batch_size: usize,
    pub(crate) lookup_group_size: usize,
    pub(crate) parallel: bool,
    pub(crate) space_limit: usize,
    pub(crate) space_warning_threshold: usize,
    pub(crate) endpoint_connection: EndpointConnection,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionerConfig {
    /// Creates a [`ProvisionerConfig`] with the default settings.
    ///
    /// - Resources are polled every 5 seconds.
    /// - Resource deletion is awaited for at most 10 minutes.
    /// - Export jobs are polled every 5 seconds.
    /// - Bulk registry operations carry at most 100 devices.
    /// - Devices are looked up 10 hardware identifiers at a time.
    /// - Sibling spaces are provisioned sequentially.
    /// - The topology is limited to 1000 spaces, with a warning from 995.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self {
            resource_poll_interval: RESOURCE_POLL_INTERVAL,
            removal_timeout: REMOVAL_TIMEOUT,
            export_poll_interval: EXPORT_POLL_INTERVAL,
            batch_size: MAX_BULK_DEVICES,
            lookup_group_size: LOOKUP_GROUP_SIZE,
            parallel: false,
            space_limit: SPACE_LIMIT,
            space_warning_threshold: SPACE_WARNING_THRESHOLD,
            endpoint_connection: EndpointConnection::default(),
        }
    }

    /// Sets the interval between two resource status checks.
    #[must_use]
    #[inline]
    pub const fn resource_poll_interval(mut self, interval: Duration) -> Self {
        self.resource_poll_interval = interval;
        self
    }

    /// Sets the ceiling of the resource deletion wait.
    #[must_use]
    #[inline]
    pub const fn removal_timeout(mut self, timeout: Duration) -> Self {
        self.removal_timeout = timeout;
        self
    }

    /// Sets the interval between two export job status checks.
    #[must_use]
    #[inline]
    pub const fn export_poll_interval(mut self, interval: Duration) -> Self {
        self.export_poll_interval = interval;
        self
    }

    /// Sets the number of devices of a bulk registry operation.
    ///
    /// The size is clamped between 1 and the registry maximum.
    #[must_use]
    #[inline]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.clamp(1, MAX_BULK_DEVICES);
        self
    }

    /// Sets the number of hardware identifiers of a device lookup.
    #[must_use]
    #[inline]
    pub fn lookup_group_size(mut self, size: usize) -> Self {
        self.lookup_group_size = size.max(1);
        self
    }

    /// Provisions sibling spaces concurrently.
    #[must_use]
    #[inline]
    pub const fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the maximum number of spaces and the count from which a warning
    /// is emitted.
    #[must_use]
    #[inline]
    pub const fn space_limit(mut self, limit: usize, warning_threshold: usize) -> Self {
        self.space_limit = limit;
        self.space_warning_threshold = warning_threshold;
        self
    }

    /// Sets the connection settings given to the created endpoints.
    #[must_use]
    #[inline]
    pub fn endpoint_connection(mut self, connection: EndpointConnection) -> Self {
        self.endpoint_connection = connection;
        self
    }
}
