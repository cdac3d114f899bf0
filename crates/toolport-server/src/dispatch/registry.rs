//! Machine credential checks.

use tracing::debug;

use super::{DispatchError, Dispatcher};
use crate::auth::hash_secret;
use crate::storage::Machine;

impl Dispatcher {
    /// Resolve a presented machine key to an enabled machine.
    ///
    /// Missing or unknown keys are `Unauthorized`-class errors, a known key on a
    /// disabled machine is `MachineDisabled`.
    pub async fn authenticate_machine(&self, key: Option<&str>) -> Result<Machine, DispatchError> {
        let key = key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(DispatchError::MissingMachineKey)?;

        let machine = self
            .db
            .get_machine_by_key_hash(&hash_secret(key))
            .await?
            .ok_or(DispatchError::InvalidMachineKey)?;

        if !machine.enabled {
            debug!(machine_id = %machine.id, "Rejected disabled machine");
            return Err(DispatchError::MachineDisabled);
        }

        Ok(machine)
    }
}
