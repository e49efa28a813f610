//! In-memory infrastructure provider for tests in this and downstream crates

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::provider::{Droplet, InfrastructureError, InfrastructureProvider, NewDroplet};

struct FakeState {
    next_id: u64,
    droplets: HashMap<String, Droplet>,
    created: Vec<NewDroplet>,
    destroyed: Vec<String>,
    reject_next: Option<String>,
    withhold_addresses: bool,
}

/// Creates droplets that report `new` with no address, then `active` with an
/// address on their first lookup.
pub struct FakeInfrastructure {
    state: Mutex<FakeState>,
}

impl Default for FakeInfrastructure {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_id: 1000,
                droplets: HashMap::new(),
                created: Vec::new(),
                destroyed: Vec::new(),
                reject_next: None,
                withhold_addresses: false,
            }),
        }
    }
}

impl FakeInfrastructure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_droplet` call fail as a provider rejection
    pub fn reject_next(&self, message: &str) {
        self.lock().reject_next = Some(message.to_string());
    }

    /// Never assign public addresses
    pub fn withhold_addresses(&self) {
        self.lock().withhold_addresses = true;
    }

    /// Overwrite what the provider reports for a droplet
    pub fn set_status(&self, droplet_id: &str, status: &str) {
        if let Some(droplet) = self.lock().droplets.get_mut(droplet_id) {
            droplet.status = status.to_string();
        }
    }

    /// Forget a droplet so lookups and deletes report not-found
    pub fn remove(&self, droplet_id: &str) {
        self.lock().droplets.remove(droplet_id);
    }

    pub fn created(&self) -> Vec<NewDroplet> {
        self.lock().created.clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.lock().destroyed.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl InfrastructureProvider for FakeInfrastructure {
    async fn create_droplet(&self, droplet: &NewDroplet) -> Result<Droplet, InfrastructureError> {
        let mut state = self.lock();
        if let Some(message) = state.reject_next.take() {
            return Err(InfrastructureError::Rejected(message));
        }

        state.next_id += 1;
        let created = Droplet {
            id: state.next_id.to_string(),
            status: "new".to_string(),
            public_ipv4: None,
        };
        state.created.push(droplet.clone());
        state.droplets.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn get_droplet(&self, droplet_id: &str) -> Result<Droplet, InfrastructureError> {
        let mut state = self.lock();
        let withhold = state.withhold_addresses;
        let droplet = state
            .droplets
            .get_mut(droplet_id)
            .ok_or_else(|| InfrastructureError::NotFound(droplet_id.to_string()))?;

        if !withhold && droplet.public_ipv4.is_none() {
            let octet = droplet_id.parse::<u64>().unwrap_or(0) % 250 + 1;
            droplet.public_ipv4 = Some(format!("203.0.113.{}", octet));
            droplet.status = "active".to_string();
        }
        Ok(droplet.clone())
    }

    async fn destroy_droplet(&self, droplet_id: &str) -> Result<(), InfrastructureError> {
        let mut state = self.lock();
        if state.droplets.remove(droplet_id).is_none() {
            return Err(InfrastructureError::NotFound(droplet_id.to_string()));
        }
        state.destroyed.push(droplet_id.to_string());
        Ok(())
    }
}
