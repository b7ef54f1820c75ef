use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// One async lock per camera, shared by all jobs in the process
#[derive(Clone, Default)]
pub struct CameraLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

impl CameraLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, camera_id: &Uuid) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(*camera_id).or_default().clone()
    }

    /// Take the camera's lock if nobody holds it
    pub fn try_acquire(&self, camera_id: &Uuid) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(camera_id).try_lock_owned().ok()
    }
}
