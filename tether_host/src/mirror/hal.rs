//! Proxy for a HAL service hosted by a target driver process.

use crate::callback::CallbackRegistrar;
use crate::channel::SharedChannel;
use crate::mirror::RemoteId;
use crate::version::HalVersion;
use tether_common::proto::{Bits, CallbackMessage, Request};
use tether_common::{TetherError, TetherResult};
use tracing::debug;

/// Host-side proxy for one loaded HAL service.
///
/// Each HAL mirror owns a dedicated driver process reached over its own
/// command channel; asynchronous results from the service arrive through
/// the registry's callback server.
pub struct HalMirror {
    target_type: String,
    version: HalVersion,
    package: String,
    component_name: String,
    hwbinder_service_name: String,
    bits: Bits,
    is_test_hal: bool,
    driver_id: RemoteId,
    channel: SharedChannel,
    callbacks: Option<CallbackRegistrar>,
}

impl HalMirror {
    /// Load the HAL service into an already launched driver process.
    ///
    /// # Errors
    /// `ComponentLoading` if the driver cannot load the service.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create(
        channel: SharedChannel,
        target_type: &str,
        version: HalVersion,
        package: &str,
        component_name: &str,
        hwbinder_service_name: &str,
        bits: Bits,
        is_test_hal: bool,
        callbacks: Option<CallbackRegistrar>,
    ) -> TetherResult<Self> {
        let response = channel.lock().send(&Request::LoadHal {
            target_type: target_type.to_string(),
            version_major: version.major,
            version_minor: version.minor,
            package: package.to_string(),
            component_name: component_name.to_string(),
            hwbinder_service_name: hwbinder_service_name.to_string(),
            is_test_hal,
        })?;

        let driver_id = response
            .resource_id
            .and_then(RemoteId::from_wire)
            .ok_or_else(|| {
                TetherError::ComponentLoading(format!(
                    "driver could not load HAL service {package}@{version}::{target_type}"
                ))
            })?;

        debug!("HAL service {target_type} loaded as driver {driver_id}");
        Ok(Self {
            target_type: target_type.to_string(),
            version,
            package: package.to_string(),
            component_name: component_name.to_string(),
            hwbinder_service_name: hwbinder_service_name.to_string(),
            bits,
            is_test_hal,
            driver_id,
            channel,
            callbacks,
        })
    }

    /// Invoke an API on the loaded service and return its result payload.
    pub fn call(
        &self,
        api: &str,
        args: Vec<serde_json::Value>,
    ) -> TetherResult<Option<serde_json::Value>> {
        let response = self.channel.lock().send(&Request::HalCall {
            driver_id: self.driver_id.raw(),
            api: api.to_string(),
            args,
        })?;
        Ok(response.payload)
    }

    /// Register a handler for asynchronous results the service delivers
    /// through the callback channel.
    ///
    /// # Errors
    /// `UserInput` if the owning registry never started a callback server.
    pub fn register_callback<F>(&self, id: impl Into<String>, handler: F) -> TetherResult<()>
    where
        F: Fn(CallbackMessage) + Send + Sync + 'static,
    {
        match &self.callbacks {
            Some(registrar) => {
                registrar.register(id, handler);
                Ok(())
            }
            None => Err(TetherError::UserInput(
                "no callback server is running; start one before registering callbacks"
                    .to_string(),
            )),
        }
    }

    /// Target type name (e.g. `light`, `camera`).
    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    /// Resolved interface version.
    pub fn version(&self) -> HalVersion {
        self.version
    }

    /// Package name of the HAL interface.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Component name within the package.
    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    /// Name of the hwbinder service instance.
    pub fn hwbinder_service_name(&self) -> &str {
        &self.hwbinder_service_name
    }

    /// Bit-width of the driver process.
    pub fn bits(&self) -> Bits {
        self.bits
    }

    /// Whether this service was brought up purely for testing.
    pub fn is_test_hal(&self) -> bool {
        self.is_test_hal
    }

    /// Driver-assigned id of the loaded service.
    pub fn driver_id(&self) -> RemoteId {
        self.driver_id
    }

    /// The command channel backing this mirror.
    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }
}

impl std::fmt::Debug for HalMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HalMirror")
            .field("target_type", &self.target_type)
            .field("version", &self.version)
            .field("package", &self.package)
            .field("driver_id", &self.driver_id)
            .finish()
    }
}
