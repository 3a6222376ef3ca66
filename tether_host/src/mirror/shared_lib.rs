//! Proxy for a shared library hosted by a target driver process.

use crate::channel::SharedChannel;
use crate::mirror::RemoteId;
use crate::version::HalVersion;
use tether_common::proto::{Bits, Request};
use tether_common::{TetherError, TetherResult};
use tracing::debug;

/// Host-side proxy for one loaded shared library.
///
/// Library calls are plain synchronous invocations; unlike HAL services,
/// a library is not expected to call back into the host, so this mirror
/// has no callback-server dependency.
pub struct LibMirror {
    target_type: String,
    version: HalVersion,
    package: String,
    file_name: String,
    search_paths: Vec<String>,
    bits: Bits,
    driver_id: RemoteId,
    channel: SharedChannel,
}

impl LibMirror {
    /// Load the library into an already launched driver process.
    ///
    /// # Errors
    /// `ComponentLoading` if the driver cannot load the library.
    pub(crate) fn create(
        channel: SharedChannel,
        target_type: &str,
        version: HalVersion,
        package: &str,
        file_name: &str,
        search_paths: &[String],
        bits: Bits,
    ) -> TetherResult<Self> {
        let response = channel.lock().send(&Request::LoadLib {
            target_type: target_type.to_string(),
            version_major: version.major,
            version_minor: version.minor,
            package: package.to_string(),
            file_name: file_name.to_string(),
            search_paths: search_paths.to_vec(),
            bits,
        })?;

        let driver_id = response
            .resource_id
            .and_then(RemoteId::from_wire)
            .ok_or_else(|| {
                TetherError::ComponentLoading(format!(
                    "driver could not load library {file_name} for {target_type}"
                ))
            })?;

        debug!("library {file_name} loaded as driver {driver_id}");
        Ok(Self {
            target_type: target_type.to_string(),
            version,
            package: package.to_string(),
            file_name: file_name.to_string(),
            search_paths: search_paths.to_vec(),
            bits,
            driver_id,
            channel,
        })
    }

    /// Invoke a library function and return its result payload.
    pub fn call(
        &self,
        api: &str,
        args: Vec<serde_json::Value>,
    ) -> TetherResult<Option<serde_json::Value>> {
        let response = self.channel.lock().send(&Request::LibCall {
            driver_id: self.driver_id.raw(),
            api: api.to_string(),
            args,
        })?;
        Ok(response.payload)
    }

    /// Target type name.
    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    /// Resolved library version.
    pub fn version(&self) -> HalVersion {
        self.version
    }

    /// Library file name (e.g. `libm.so`).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Directories searched for the library on the target.
    pub fn search_paths(&self) -> &[String] {
        &self.search_paths
    }

    /// Bit-width of the driver process.
    pub fn bits(&self) -> Bits {
        self.bits
    }

    /// Driver-assigned id of the loaded library.
    pub fn driver_id(&self) -> RemoteId {
        self.driver_id
    }

    /// The command channel backing this mirror.
    pub fn channel(&self) -> &SharedChannel {
        &self.channel
    }
}

impl std::fmt::Debug for LibMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibMirror")
            .field("target_type", &self.target_type)
            .field("file_name", &self.file_name)
            .field("driver_id", &self.driver_id)
            .finish()
    }
}
