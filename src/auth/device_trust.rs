//! Device trust store: per-installation id and role-scoped device tokens.
//!
//! The device id is generated once and survives logout. The device token is
//! the "remember this device" credential that lets a recognized device skip
//! the OTP challenge; it is bound to the role it was issued for, so a device
//! trusted as `seller` never skips OTP on a `master` login.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::models::Role;
use crate::traits::StateStore;

/// Storage key for the permanent device id.
const DEVICE_ID_KEY: &str = "bbhc_device_id";

/// Storage key for the opaque device token.
const DEVICE_TOKEN_KEY: &str = "bbhc_device_token";

/// Storage key for the role the device token is bound to.
const DEVICE_ROLE_KEY: &str = "bbhc_device_user_type";

/// Role-scoped device trust backed by the persistent state store.
#[derive(Clone)]
pub struct DeviceTrustStore {
    store: Arc<dyn StateStore>,
}

impl DeviceTrustStore {
    /// Create a device trust store on top of a state store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Return the stable device id, generating and persisting one on first
    /// use. The id is permanent for the installation; logout never clears it.
    pub fn get_or_create_device_id(&self) -> String {
        match self.store.get(DEVICE_ID_KEY) {
            Ok(Some(id)) if !id.is_empty() => return id,
            Ok(_) => {}
            Err(e) => warn!("Failed to read device id: {}", e),
        }

        let id = Uuid::new_v4().to_string();
        if let Err(e) = self.store.set(DEVICE_ID_KEY, &id) {
            warn!("Failed to persist device id: {}", e);
        }
        id
    }

    /// Return the stored device token, but only if it is bound to `role`.
    ///
    /// A token bound to a different role behaves exactly as if no token were
    /// stored; the mismatch is not an error.
    pub fn get_device_token(&self, role: Role) -> Option<String> {
        let token = match self.store.get(DEVICE_TOKEN_KEY) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => return None,
            Err(e) => {
                warn!("Failed to read device token: {}", e);
                return None;
            }
        };

        match self.store.get(DEVICE_ROLE_KEY) {
            Ok(Some(bound)) if Role::parse(&bound) == Some(role) => Some(token),
            Ok(_) => None,
            Err(e) => {
                warn!("Failed to read device token role: {}", e);
                None
            }
        }
    }

    /// Persist a server-issued device token, scoped to the role that earned it.
    pub fn set_device_token(&self, token: &str, device_id: &str, role: Role) {
        for (key, value) in [
            (DEVICE_TOKEN_KEY, token),
            (DEVICE_ID_KEY, device_id),
            (DEVICE_ROLE_KEY, role.as_str()),
        ] {
            if let Err(e) = self.store.set(key, value) {
                warn!("Failed to persist {}: {}", key, e);
            }
        }
    }

    /// Clear the device token and its bound role. The device id is kept;
    /// it is permanent for this installation.
    pub fn clear_device_token(&self) {
        for key in [DEVICE_TOKEN_KEY, DEVICE_ROLE_KEY] {
            if let Err(e) = self.store.remove(key) {
                warn!("Failed to remove {}: {}", key, e);
            }
        }
    }
}
